//! Bounded-concurrency image fetching.
//!
//! Every pending asset becomes a tokio task that waits on a shared semaphore,
//! so at most `concurrency` resolutions are in flight. Completions are handed
//! to a [`CompletionHandler`] in arrival order on the caller's task.

use super::PendingAsset;
use crate::media::{AssetFailure, AssetResolver, ResolvedAsset};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[async_trait]
pub trait CompletionHandler: Send {
    async fn on_success(&mut self, asset: PendingAsset, resolved: ResolvedAsset);
    async fn on_failure(&mut self, asset: PendingAsset, failure: AssetFailure);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct FetchPool {
    resolver: Arc<AssetResolver>,
    concurrency: usize,
}

impl FetchPool {
    pub fn new(resolver: Arc<AssetResolver>, concurrency: usize) -> Self {
        Self {
            resolver,
            concurrency: concurrency.max(1),
        }
    }

    /// Resolves every asset. Each one reaches exactly one handler call, even
    /// when its task panics or is torn down.
    pub async fn run<H>(&self, assets: Vec<PendingAsset>, handler: &mut H) -> FetchStats
    where
        H: CompletionHandler + ?Sized,
    {
        let mut stats = FetchStats {
            submitted: assets.len(),
            ..Default::default()
        };
        if assets.is_empty() {
            return stats;
        }
        info!(
            target = "assets",
            total = assets.len(),
            concurrency = self.concurrency,
            "fetch phase start"
        );

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut outstanding: HashMap<usize, PendingAsset> = HashMap::with_capacity(assets.len());
        let mut set: JoinSet<(usize, Result<ResolvedAsset, AssetFailure>)> = JoinSet::new();

        for (idx, asset) in assets.into_iter().enumerate() {
            let sem = sem.clone();
            let resolver = self.resolver.clone();
            let source = asset.source_url.clone();
            let dir = asset.kind.content_dir();
            outstanding.insert(idx, asset);
            set.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return (idx, Err(AssetFailure::Aborted(e.to_string()))),
                };
                let result = AssertUnwindSafe(resolver.resolve(&source, dir))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(AssetFailure::Aborted("resolver panicked".into())));
                (idx, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (idx, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(target = "assets", error = %e, "fetch task did not complete");
                    continue;
                }
            };
            let Some(asset) = outstanding.remove(&idx) else {
                continue;
            };
            match result {
                Ok(resolved) => {
                    stats.succeeded += 1;
                    handler.on_success(asset, resolved).await;
                }
                Err(failure) => {
                    stats.failed += 1;
                    handler.on_failure(asset, failure).await;
                }
            }
            if (stats.succeeded + stats.failed) % 25 == 0 {
                debug!(
                    target = "assets",
                    done = stats.succeeded + stats.failed,
                    total = stats.submitted,
                    "fetch progress"
                );
            }
        }

        // Tasks that never reported back still count as failures.
        let mut leftovers: Vec<_> = outstanding.into_iter().collect();
        leftovers.sort_by_key(|(idx, _)| *idx);
        for (_, asset) in leftovers {
            stats.failed += 1;
            handler
                .on_failure(asset, AssetFailure::Aborted("task lost".into()))
                .await;
        }

        info!(
            target = "assets",
            succeeded = stats.succeeded,
            failed = stats.failed,
            "fetch phase done"
        );
        stats
    }
}
