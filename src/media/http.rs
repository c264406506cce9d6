use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub status: u16,
    pub body: Bytes,
}

impl FetchedBody {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

/// GET with a bounded wait. Implementations must be cheap to share across tasks.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedBody, FetchError>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("travel-import/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Transport(e.to_string())
            }
        };
        let resp = self.client.get(url).send().await.map_err(map_err)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(map_err)?;
        Ok(FetchedBody { status, body })
    }
}
