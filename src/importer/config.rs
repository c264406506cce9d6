use crate::util::env::{env_opt, env_parse};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONTENT_ROOT: &str = "storage/app/public";
pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MIN_IMAGE_BYTES: usize = 500;
pub const DEFAULT_MAX_RUNTIME_SECS: u64 = 30 * 60;

/// Tunables for an import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Root of the content store; each kind writes into its own sub-directory.
    pub content_root: PathBuf,
    /// Ceiling of simultaneously in-flight image fetches.
    pub fetch_concurrency: usize,
    pub fetch_timeout: Duration,
    /// Bodies shorter than this are not treated as images.
    pub min_image_bytes: usize,
    /// Soft ceiling for a whole run, enforced by the entry points.
    pub max_runtime: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from(DEFAULT_CONTENT_ROOT),
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            min_image_bytes: DEFAULT_MIN_IMAGE_BYTES,
            max_runtime: Duration::from_secs(DEFAULT_MAX_RUNTIME_SECS),
        }
    }
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            content_root: env_opt("CONTENT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_ROOT)),
            fetch_concurrency: env_parse("FETCH_CONCURRENCY", DEFAULT_FETCH_CONCURRENCY).max(1),
            fetch_timeout: Duration::from_secs(
                env_parse("FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS).max(1),
            ),
            min_image_bytes: env_parse("MIN_IMAGE_BYTES", DEFAULT_MIN_IMAGE_BYTES),
            max_runtime: Duration::from_secs(
                env_parse("IMPORT_MAX_RUNTIME_SECS", DEFAULT_MAX_RUNTIME_SECS).max(1),
            ),
        }
    }
}
