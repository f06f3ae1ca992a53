//! Minimal runtime configuration helpers.
//! Everything comes from the environment (optionally seeded from a `.env` file by `main`).

use crate::models::platform::DEFAULT_PAGE_SIZE;
use std::path::PathBuf;
use std::time::Duration;
use std::{fs, path::Path};

pub const DEFAULT_DOMAIN: &str = "internetofthings.ibmcloud.com";
pub const DEFAULT_RESOURCE_DIR: &str = "resources";
pub const DEFAULT_INTERFACE_PREFIX: &str = "OH2";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const TOKEN_FILE: &str = "api-token.txt";

#[derive(Debug, Clone)]
pub struct Config {
    pub org_id: String,
    pub api_key: String,
    pub api_token: String,
    /// Platform domain; the API lives at `https://<org>.<domain>/api/v0002`.
    pub domain: String,
    /// Root of the local `evt/` and `api/` schema documents.
    pub resource_dir: PathBuf,
    pub page_size: usize,
    /// Physical interfaces are named `<prefix>-<capability>-<event>`.
    pub interface_prefix: String,
    pub request_timeout: Duration,
}

fn non_empty(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn required(name: &str) -> Result<String, String> {
    non_empty(name).ok_or_else(|| format!("Missing {}: set it in the environment or .env file", name))
}

fn positive(name: &str, default: u64) -> Result<u64, String> {
    match non_empty(name) {
        None => Ok(default),
        Some(s) => match s.parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(format!("{} must be a positive integer, got `{}`", name, s)),
        },
    }
}

impl Config {
    /// Only the settings that work without credentials; used by workflows that never call out.
    pub fn local_from_env() -> Result<Self, String> {
        Ok(Config {
            org_id: non_empty("IOT_ORG_ID").unwrap_or_default(),
            api_key: non_empty("IOT_API_KEY").unwrap_or_default(),
            api_token: String::new(),
            domain: non_empty("IOT_DOMAIN").unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
            resource_dir: PathBuf::from(
                non_empty("IOT_RESOURCE_DIR").unwrap_or_else(|| DEFAULT_RESOURCE_DIR.to_string()),
            ),
            page_size: positive("IOT_PAGE_SIZE", DEFAULT_PAGE_SIZE as u64)? as usize,
            interface_prefix: non_empty("IOT_INTERFACE_PREFIX").unwrap_or_else(|| DEFAULT_INTERFACE_PREFIX.to_string()),
            request_timeout: Duration::from_secs(positive("REQUEST_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
        })
    }

    pub fn from_env() -> Result<Self, String> {
        let mut cfg = Config::local_from_env()?;
        cfg.org_id = required("IOT_ORG_ID")?;
        cfg.api_key = required("IOT_API_KEY")?;
        // Prefer env var; fallback to api-token.txt in working directory
        cfg.api_token = match non_empty("IOT_API_TOKEN") {
            Some(v) => v,
            None => read_token_file(Path::new(TOKEN_FILE)).ok_or_else(|| {
                format!(
                    "Missing API token: set IOT_API_TOKEN or provide {} in working directory",
                    TOKEN_FILE
                )
            })?,
        };
        Ok(cfg)
    }
}

fn read_token_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn token_file_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "  a-secret-token  ").expect("write");
        assert_eq!(read_token_file(file.path()).as_deref(), Some("a-secret-token"));
    }

    #[test]
    fn blank_or_missing_token_file_is_ignored() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        assert_eq!(read_token_file(file.path()), None);
        assert_eq!(read_token_file(Path::new("/nonexistent/api-token.txt")), None);
    }
}
