use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;

use crate::error::{CoreError, CoreResult};

/// Core configuration shared by the components.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base URL of the document management API
    pub api_base_url: String,
    /// Expected OTP length (digits)
    pub otp_code_length: usize,
    /// Maximum accepted size for camera captures, in bytes
    pub max_camera_file_bytes: u64,
    /// Key under which the session token is persisted
    pub session_storage_key: String,
    /// Directory for downloaded preview artifacts
    pub preview_cache_dir: PathBuf,
}

impl CoreConfig {
    pub const DEFAULT_OTP_LENGTH: usize = 6;
    pub const DEFAULT_MAX_CAMERA_FILE_BYTES: u64 = 5 * 1024 * 1024;
    pub const DEFAULT_SESSION_KEY: &'static str = "session_token";

    /// Configuration with defaults for everything except the API base URL.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            otp_code_length: Self::DEFAULT_OTP_LENGTH,
            max_camera_file_bytes: Self::DEFAULT_MAX_CAMERA_FILE_BYTES,
            session_storage_key: Self::DEFAULT_SESSION_KEY.to_string(),
            preview_cache_dir: env::temp_dir().join("docvault-previews"),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> CoreResult<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let api_base_url = env::var("DMS_API_BASE_URL")
            .map_err(|_| CoreError::Config("DMS_API_BASE_URL must be set".into()))?;

        let mut config = Self::new(api_base_url);

        if let Ok(raw) = env::var("DMS_OTP_LENGTH") {
            config.otp_code_length = raw
                .parse()
                .map_err(|_| CoreError::Config("DMS_OTP_LENGTH must be a number".into()))?;
        }
        if let Ok(raw) = env::var("DMS_MAX_CAMERA_FILE_BYTES") {
            config.max_camera_file_bytes = raw.parse().map_err(|_| {
                CoreError::Config("DMS_MAX_CAMERA_FILE_BYTES must be a number".into())
            })?;
        }
        if let Ok(dir) = env::var("DMS_PREVIEW_CACHE_DIR") {
            config.preview_cache_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::new("https://dms.example.com/api");
        assert_eq!(config.otp_code_length, 6);
        assert_eq!(config.max_camera_file_bytes, 5 * 1024 * 1024);
        assert_eq!(config.session_storage_key, "session_token");
    }
}
