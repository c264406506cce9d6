//! Turns one image reference from a sheet into a stored file.

use super::drive;
use super::http::{FetchError, HttpFetch};
use super::sniff::{sniff, ImageFormat};
use super::store::ContentStore;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Format assumed when a plain URL body has no recognisable signature.
pub const FALLBACK_FORMAT: ImageFormat = ImageFormat::Png;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetFailure {
    #[error("file id not found in drive link")]
    FileIdNotFound,
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyBody,
    #[error("body too small for an image ({len} < {min} bytes)")]
    TooSmall { len: usize, min: usize },
    #[error("response is not a recognised image")]
    NotAnImage,
    #[error("no download candidate succeeded (last: {0})")]
    CandidatesExhausted(Box<AssetFailure>),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("fetch task aborted: {0}")]
    Aborted(String),
}

impl From<FetchError> for AssetFailure {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout => AssetFailure::Timeout,
            FetchError::Transport(msg) => AssetFailure::Transport(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAsset {
    /// Downloaded and written to the content store.
    Stored {
        path: String,
        format: ImageFormat,
        /// Whether the format came from the body or from [`FALLBACK_FORMAT`].
        sniffed: bool,
    },
    /// Not a web URL; kept verbatim as an existing local reference.
    Passthrough(String),
}

impl ResolvedAsset {
    /// Value written to the owner record.
    pub fn reference(&self) -> &str {
        match self {
            ResolvedAsset::Stored { path, .. } => path,
            ResolvedAsset::Passthrough(s) => s,
        }
    }
}

/// One download attempt. Drive candidates must sniff as an image; a plain URL
/// accepts any plausible body.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    url: String,
    require_image: bool,
}

pub struct AssetResolver {
    fetcher: Arc<dyn HttpFetch>,
    store: Arc<dyn ContentStore>,
    min_bytes: usize,
}

impl AssetResolver {
    pub fn new(fetcher: Arc<dyn HttpFetch>, store: Arc<dyn ContentStore>, min_bytes: usize) -> Self {
        Self {
            fetcher,
            store,
            min_bytes,
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// Never errors out of band: every problem comes back as an [`AssetFailure`].
    pub async fn resolve(&self, source: &str, dir: &str) -> Result<ResolvedAsset, AssetFailure> {
        let source = source.trim();
        let url = match Url::parse(source) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            _ => return Ok(ResolvedAsset::Passthrough(source.to_string())),
        };

        let candidates = plan_candidates(&url)?;
        let mut last_failure = AssetFailure::NotAnImage;
        for candidate in &candidates {
            match self.try_candidate(candidate).await {
                Ok((bytes, format, sniffed)) => {
                    let path = random_file_name(dir, format);
                    self.store
                        .put(&path, &bytes)
                        .await
                        .map_err(|e| AssetFailure::Storage(e.to_string()))?;
                    debug!(target = "assets", source, candidate = %candidate.url, %path, "stored image");
                    return Ok(ResolvedAsset::Stored {
                        path,
                        format,
                        sniffed,
                    });
                }
                Err(failure) => {
                    debug!(target = "assets", candidate = %candidate.url, %failure, "candidate failed");
                    last_failure = failure;
                }
            }
        }

        if candidates.len() > 1 {
            Err(AssetFailure::CandidatesExhausted(Box::new(last_failure)))
        } else {
            Err(last_failure)
        }
    }

    async fn try_candidate(
        &self,
        candidate: &Candidate,
    ) -> Result<(bytes::Bytes, ImageFormat, bool), AssetFailure> {
        let fetched = self.fetcher.get(&candidate.url).await?;
        if !fetched.is_success() {
            return Err(AssetFailure::Status(fetched.status));
        }
        let body = fetched.body;
        if body.is_empty() {
            return Err(AssetFailure::EmptyBody);
        }
        if body.len() < self.min_bytes {
            return Err(AssetFailure::TooSmall {
                len: body.len(),
                min: self.min_bytes,
            });
        }
        match sniff(&body) {
            Some(format) => Ok((body, format, true)),
            None if candidate.require_image => Err(AssetFailure::NotAnImage),
            None => Ok((body, FALLBACK_FORMAT, false)),
        }
    }
}

fn plan_candidates(url: &Url) -> Result<Vec<Candidate>, AssetFailure> {
    if drive::is_drive_url(url) {
        let id = drive::extract_file_id(url).ok_or(AssetFailure::FileIdNotFound)?;
        return Ok(drive::candidate_urls(&id)
            .into_iter()
            .map(|url| Candidate {
                url,
                require_image: true,
            })
            .collect());
    }
    Ok(vec![Candidate {
        url: url.to_string(),
        require_image: false,
    }])
}

/// `<dir>/<unix-seconds>_<16 random alphanumerics>.<ext>`
fn random_file_name(dir: &str, format: ImageFormat) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!(
        "{}/{}_{}.{}",
        dir.trim_end_matches('/'),
        Utc::now().timestamp(),
        suffix,
        format.extension()
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::media::http::FetchedBody;
    use crate::media::store::LocalContentStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    pub(crate) fn png_body(len: usize) -> Vec<u8> {
        let mut body = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        body.resize(len, 7);
        body
    }

    /// Canned responses keyed by URL; unknown URLs are a transport error.
    #[derive(Default)]
    pub(crate) struct CannedFetcher {
        responses: HashMap<String, (u16, Vec<u8>)>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl CannedFetcher {
        pub(crate) fn with(mut self, url: &str, status: u16, body: Vec<u8>) -> Self {
            self.responses.insert(url.to_string(), (status, body));
            self
        }
    }

    #[async_trait]
    impl HttpFetch for CannedFetcher {
        async fn get(&self, url: &str) -> Result<FetchedBody, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.responses.get(url) {
                Some((status, body)) => Ok(FetchedBody {
                    status: *status,
                    body: bytes::Bytes::from(body.clone()),
                }),
                None => Err(FetchError::Transport("connection refused".into())),
            }
        }
    }

    fn resolver(fetcher: Arc<CannedFetcher>, root: &std::path::Path) -> AssetResolver {
        AssetResolver::new(fetcher, Arc::new(LocalContentStore::new(root)), 500)
    }

    fn files_in(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn stores_direct_png_with_png_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher =
            Arc::new(CannedFetcher::default().with("https://cdn.example.com/a", 200, png_body(1000)));
        let resolved = resolver(fetcher, tmp.path())
            .resolve("https://cdn.example.com/a", "hotels")
            .await
            .unwrap();
        let ResolvedAsset::Stored { path, format, sniffed } = resolved else {
            panic!("expected a stored file");
        };
        assert!(path.starts_with("hotels/") && path.ends_with(".png"));
        assert_eq!(format, ImageFormat::Png);
        assert!(sniffed);
        assert_eq!(std::fs::read(tmp.path().join(&path)).unwrap().len(), 1000);
    }

    #[tokio::test]
    async fn non_urls_pass_through_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CannedFetcher::default());
        let r = resolver(fetcher.clone(), tmp.path());
        assert_eq!(
            r.resolve("hotels/existing.jpg", "hotels").await.unwrap(),
            ResolvedAsset::Passthrough("hotels/existing.jpg".into())
        );
        assert_eq!(
            r.resolve("", "hotels").await.unwrap(),
            ResolvedAsset::Passthrough(String::new())
        );
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drive_link_without_id_fails_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CannedFetcher::default());
        let err = resolver(fetcher.clone(), tmp.path())
            .resolve("https://drive.google.com/drive/my-drive", "hotels")
            .await
            .unwrap_err();
        assert_eq!(err, AssetFailure::FileIdNotFound);
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(files_in(&tmp.path().join("hotels")), 0);
    }

    #[tokio::test]
    async fn drive_candidates_stop_at_first_image() {
        let tmp = tempfile::tempdir().unwrap();
        let id = "1AbCdEfGhIjKlMnOpQrStUvWxYz012345";
        let urls = drive::candidate_urls(id);
        let fetcher = Arc::new(
            CannedFetcher::default()
                .with(&urls[0], 200, b"<html>virus scan warning</html>".repeat(40))
                .with(&urls[1], 200, png_body(2048))
                .with(&urls[2], 200, png_body(2048)),
        );
        let resolved = resolver(fetcher.clone(), tmp.path())
            .resolve(&format!("https://drive.google.com/file/d/{id}/view"), "rooms")
            .await
            .unwrap();
        assert!(resolved.reference().starts_with("rooms/"));
        assert_eq!(*fetcher.calls.lock().unwrap(), vec![urls[0].clone(), urls[1].clone()]);
    }

    #[tokio::test]
    async fn drive_exhaustion_reports_last_reason() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CannedFetcher::default());
        let err = resolver(fetcher.clone(), tmp.path())
            .resolve("https://drive.google.com/open?id=1AbCdEfGhIjKlMnOpQrStUvWxYz012345", "rooms")
            .await
            .unwrap_err();
        assert!(matches!(err, AssetFailure::CandidatesExhausted(_)));
        assert_eq!(fetcher.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn small_empty_and_error_bodies_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(
            CannedFetcher::default()
                .with("https://x.test/small", 200, png_body(100))
                .with("https://x.test/empty", 200, Vec::new())
                .with("https://x.test/missing", 404, png_body(1000)),
        );
        let r = resolver(fetcher, tmp.path());
        assert_eq!(
            r.resolve("https://x.test/small", "hotels").await.unwrap_err(),
            AssetFailure::TooSmall { len: 100, min: 500 }
        );
        assert_eq!(
            r.resolve("https://x.test/empty", "hotels").await.unwrap_err(),
            AssetFailure::EmptyBody
        );
        assert_eq!(
            r.resolve("https://x.test/missing", "hotels").await.unwrap_err(),
            AssetFailure::Status(404)
        );
        assert!(matches!(
            r.resolve("https://x.test/unknown", "hotels").await.unwrap_err(),
            AssetFailure::Transport(_)
        ));
    }

    #[tokio::test]
    async fn unsniffable_plain_body_defaults_to_png() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher =
            Arc::new(CannedFetcher::default().with("https://x.test/blob", 200, vec![1u8; 800]));
        let resolved = resolver(fetcher, tmp.path())
            .resolve("https://x.test/blob", "cuisines")
            .await
            .unwrap();
        assert!(matches!(
            resolved,
            ResolvedAsset::Stored { format: ImageFormat::Png, sniffed: false, .. }
        ));
    }

    #[test]
    fn random_names_differ() {
        let a = random_file_name("hotels/", ImageFormat::Webp);
        let b = random_file_name("hotels", ImageFormat::Webp);
        assert_ne!(a, b);
        assert!(a.starts_with("hotels/") && a.ends_with(".webp"));
    }
}
