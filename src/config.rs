use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_REGION: &str = "us-east-1";

const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024;

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

fn default_max_upload_bytes() -> u64 {
    DEFAULT_MAX_UPLOAD_BYTES
}

/// Process configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub aws_region: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    #[serde(default)]
    pub aws_bucket_name: String,
    pub aws_endpoint_url: Option<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config: Config = envy::from_iter(vars)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Body limit for the multipart route. Saturates where `usize` is
    /// narrower than the configured value.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX)
    }

    /// Static credentials, when both halves were supplied. `None` means the
    /// default AWS credential chain is used.
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(key_id), Some(secret)) => Some((key_id, secret)),
            _ => None,
        }
    }

    fn normalize(&mut self) {
        for value in [
            &mut self.aws_region,
            &mut self.aws_access_key_id,
            &mut self.aws_secret_access_key,
            &mut self.aws_endpoint_url,
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *value = None;
            } else if let Some(v) = value {
                *v = v.trim().to_owned();
            }
        }
        self.aws_bucket_name = self.aws_bucket_name.trim().to_owned();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.aws_bucket_name.is_empty() {
            return Err(ConfigError::MissingBucket);
        }
        if self.aws_access_key_id.is_some() != self.aws_secret_access_key.is_some() {
            return Err(ConfigError::IncompleteCredentials);
        }
        Ok(())
    }
}
