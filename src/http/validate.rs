//! Form file extraction and per-route file rules.

use std::path::Path;

use axum::extract::Multipart;
use bytes::Bytes;

use crate::error::ValidationError;

/// A file received through a multipart form, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    /// Declared content type, or one guessed from the file name.
    pub fn effective_content_type(&self) -> Option<String> {
        self.content_type
            .clone()
            .or_else(|| mime_guess::from_path(&self.file_name).first_raw().map(str::to_owned))
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    fn has_allowed_type(&self, allowed: &[&str]) -> bool {
        let by_content_type = self
            .content_type
            .as_deref()
            .and_then(mime_guess::get_mime_extensions_str)
            .is_some_and(|exts| exts.iter().any(|ext| allowed.contains(ext)));
        let by_name = self
            .extension()
            .is_some_and(|ext| allowed.contains(&ext.as_str()));
        by_content_type || by_name
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FileRule {
    pub field: &'static str,
    pub required: bool,
    pub max_size: Option<usize>,
    pub extensions: &'static [&'static str],
    pub limit: usize,
}

pub const MAX_IMAGE_SIZE: usize = 2 * 1024 * 1024;

/// Small images for the direct upload route.
pub const IMAGE_RULE: FileRule = FileRule {
    field: "file",
    required: true,
    max_size: Some(MAX_IMAGE_SIZE),
    extensions: &["jpg", "png", "jpeg", "gif"],
    limit: 1,
};

/// Videos for the multipart upload route.
pub const VIDEO_RULE: FileRule = FileRule {
    field: "file",
    required: true,
    max_size: None,
    extensions: &["mov", "mp4", "mkv"],
    limit: 1,
};

impl FileRule {
    /// Buffers every file sent under this rule's field. Other fields are
    /// ignored.
    pub async fn collect(
        &self,
        mut multipart: Multipart,
    ) -> Result<Vec<UploadedFile>, ValidationError> {
        let mut files = Vec::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ValidationError::Malformed(err.body_text()))?
        {
            if field.name() != Some(self.field) {
                continue;
            }
            let Some(file_name) = field.file_name().map(str::to_owned) else {
                continue;
            };
            let content_type = field.content_type().map(str::to_owned);
            let data = field
                .bytes()
                .await
                .map_err(|err| ValidationError::Malformed(err.body_text()))?;
            files.push(UploadedFile {
                file_name,
                content_type,
                data,
            });
        }
        Ok(files)
    }

    /// Checks presence, count, size and type. Returns the single accepted
    /// file, if any.
    pub fn check(
        &self,
        mut files: Vec<UploadedFile>,
    ) -> Result<Option<UploadedFile>, ValidationError> {
        if files.is_empty() {
            return if self.required {
                Err(ValidationError::MissingFile)
            } else {
                Ok(None)
            };
        }
        if files.len() > self.limit {
            return Err(ValidationError::TooManyFiles { limit: self.limit });
        }
        for file in &files {
            self.check_file(file)?;
        }
        Ok(Some(files.swap_remove(0)))
    }

    fn check_file(&self, file: &UploadedFile) -> Result<(), ValidationError> {
        if let Some(max) = self.max_size {
            if file.data.len() > max {
                return Err(ValidationError::TooLarge {
                    name: file.file_name.clone(),
                    max,
                });
            }
        }
        if !self.extensions.is_empty() && !file.has_allowed_type(self.extensions) {
            return Err(ValidationError::ExtensionNotAllowed {
                name: file.file_name.clone(),
                allowed: self.extensions.to_vec(),
            });
        }
        Ok(())
    }
}
