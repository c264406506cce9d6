//! Drives one import run through its phases.

use super::fetch_pool::{CompletionHandler, FetchPool};
use super::relations::{parse_tokens, sync_relations, PendingRelations, RelationCache};
use super::sheet::{self, SheetFormat};
use super::upsert::{attach_asset, known_asset, upsert_record, UpsertOutcome};
use super::{ImportConfig, ImportFailure, ImportKind, ImportOutcome, ImportRow, PendingAsset};
use crate::media::{
    AssetFailure, AssetResolver, ContentStore, LocalContentStore, ReqwestFetcher, ResolvedAsset,
};
use crate::normalization::{normalize_row, Normalized};
use crate::util::db::Db;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Idle,
    RowProcessing,
    AssetFetch,
    RelationSync,
    Completed,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportPhase::Idle => "idle",
            ImportPhase::RowProcessing => "row_processing",
            ImportPhase::AssetFetch => "asset_fetch",
            ImportPhase::RelationSync => "relation_sync",
            ImportPhase::Completed => "completed",
        };
        f.write_str(s)
    }
}

pub struct ImportPipeline {
    db: Db,
    resolver: Arc<AssetResolver>,
    config: ImportConfig,
    phase: ImportPhase,
}

/// Work collected while rows are processed, consumed by the later phases.
#[derive(Default)]
struct Staged {
    assets: Vec<PendingAsset>,
    relations: Vec<PendingRelations>,
}

impl ImportPipeline {
    pub fn new(db: Db, resolver: Arc<AssetResolver>, config: ImportConfig) -> Self {
        Self {
            db,
            resolver,
            config,
            phase: ImportPhase::Idle,
        }
    }

    /// Pipeline over the real network and the local content root.
    pub fn from_config(db: Db, config: ImportConfig) -> Result<Self> {
        let resolver = shared_resolver(&config)?;
        Ok(Self::new(db, resolver, config))
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    fn enter(&mut self, next: ImportPhase, outcome: &ImportOutcome) {
        info!(
            target = "import",
            run_id = %outcome.run_id,
            from = %self.phase,
            to = %next,
            "phase transition"
        );
        self.phase = next;
    }

    pub async fn run_path(&mut self, kind: ImportKind, path: &Path) -> Result<ImportOutcome> {
        let rows = sheet::read_path(path).await?;
        self.run(kind, rows).await
    }

    pub async fn run_bytes(
        &mut self,
        kind: ImportKind,
        bytes: &[u8],
        format: SheetFormat,
    ) -> Result<ImportOutcome> {
        let rows = sheet::read_bytes(bytes, format)?;
        self.run(kind, rows).await
    }

    /// Rows are persisted first, images fetched next, amenities synced last.
    /// Only sheet-wide problems come back as `Err`; row and asset problems
    /// land in the outcome.
    pub async fn run(&mut self, kind: ImportKind, rows: Vec<ImportRow>) -> Result<ImportOutcome> {
        let started = Instant::now();
        let mut outcome = ImportOutcome::new(kind);
        self.phase = ImportPhase::Idle;
        info!(target = "import", run_id = %outcome.run_id, %kind, rows = rows.len(), "import start");

        let mut cache = if kind == ImportKind::HotelRooms {
            Some(RelationCache::load(&self.db).await?)
        } else {
            None
        };

        self.enter(ImportPhase::RowProcessing, &outcome);
        let staged = self.process_rows(kind, &rows, &mut outcome).await?;

        self.enter(ImportPhase::AssetFetch, &outcome);
        let assets = self.drop_known_assets(staged.assets, &mut outcome).await?;
        if !assets.is_empty() {
            self.resolver
                .store()
                .ensure_dir(kind.content_dir())
                .await
                .with_context(|| format!("cannot prepare content directory '{}'", kind.content_dir()))?;
            let pool = FetchPool::new(self.resolver.clone(), self.config.fetch_concurrency);
            let mut handler = AttachAssets {
                db: &self.db,
                store: self.resolver.store(),
                outcome: &mut outcome,
            };
            let stats = pool.run(assets, &mut handler).await;
            info!(
                target = "import",
                run_id = %outcome.run_id,
                submitted = stats.submitted,
                resolved = stats.succeeded,
                attached = outcome.assets_stored,
                failed = outcome.assets_failed,
                reused = outcome.assets_reused,
                "asset phase done"
            );
        }

        self.enter(ImportPhase::RelationSync, &outcome);
        if let Some(cache) = cache.as_mut() {
            let report = sync_relations(&self.db, cache, &staged.relations)
                .await
                .context("amenity sync aborted")?;
            outcome.relations_linked = report.links_added;
            for failure in report.failures {
                outcome.record(failure);
            }
        }

        self.enter(ImportPhase::Completed, &outcome);
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        outcome.log_summary();
        Ok(outcome)
    }

    /// Leaves out sources an earlier run already stored on the same owner.
    async fn drop_known_assets(
        &self,
        assets: Vec<PendingAsset>,
        outcome: &mut ImportOutcome,
    ) -> Result<Vec<PendingAsset>> {
        let mut fresh = Vec::with_capacity(assets.len());
        for asset in assets {
            match known_asset(&self.db, asset.kind, asset.owner_id, &asset.source_url).await? {
                Some(reference) => {
                    debug!(
                        target = "import",
                        owner = %asset.owner_name,
                        url = %asset.source_url,
                        %reference,
                        "image already stored"
                    );
                    outcome.assets_reused += 1;
                }
                None => fresh.push(asset),
            }
        }
        Ok(fresh)
    }

    async fn process_rows(
        &self,
        kind: ImportKind,
        rows: &[ImportRow],
        outcome: &mut ImportOutcome,
    ) -> Result<Staged> {
        let mut staged = Staged::default();
        for row in rows.iter().filter(|r| !r.is_blank()) {
            let record = match normalize_row(kind, row) {
                Normalized::Record(record) => record,
                Normalized::Skip(reason) => {
                    outcome.record(ImportFailure::RowSkipped {
                        line: row.line,
                        reason,
                    });
                    continue;
                }
                Normalized::Invalid(errors) => {
                    outcome.record(ImportFailure::ValidationFailed {
                        line: row.line,
                        errors,
                    });
                    continue;
                }
            };

            let owner_id = match upsert_record(&self.db, &record).await {
                Ok(UpsertOutcome::Saved { id, created }) => {
                    debug!(target = "import", line = row.line, name = record.name(), id, created, "row saved");
                    id
                }
                Ok(UpsertOutcome::Rejected(error)) => {
                    outcome.record(ImportFailure::ValidationFailed {
                        line: row.line,
                        errors: vec![error],
                    });
                    continue;
                }
                Err(e) => {
                    if !self.db.ping().await {
                        return Err(e.context("database unavailable"));
                    }
                    outcome.record(ImportFailure::PersistFailed {
                        line: row.line,
                        name: record.name().to_string(),
                        reason: format!("{e:#}"),
                    });
                    continue;
                }
            };
            outcome.imported += 1;

            let slot = kind.asset_slot();
            staged
                .assets
                .extend(record.image_sources().into_iter().map(|source_url| PendingAsset {
                    kind,
                    owner_id,
                    owner_name: record.name().to_string(),
                    line: row.line,
                    source_url,
                    slot,
                }));

            if let Some(spec) = record.relation_spec() {
                let tokens = parse_tokens(spec);
                if !tokens.is_empty() {
                    staged.relations.push(PendingRelations {
                        owner_id,
                        owner_name: record.name().to_string(),
                        line: row.line,
                        tokens,
                    });
                }
            }
        }
        Ok(staged)
    }
}

/// Resolver over `reqwest` and the local content store, sized from `config`.
pub fn shared_resolver(config: &ImportConfig) -> Result<Arc<AssetResolver>> {
    let fetcher = ReqwestFetcher::new(config.fetch_timeout)?;
    let store = LocalContentStore::new(&config.content_root);
    Ok(Arc::new(AssetResolver::new(
        Arc::new(fetcher),
        Arc::new(store),
        config.min_image_bytes,
    )))
}

/// Writes each stored image onto its owner as it arrives.
struct AttachAssets<'a> {
    db: &'a Db,
    store: &'a Arc<dyn ContentStore>,
    outcome: &'a mut ImportOutcome,
}

#[async_trait]
impl<'a> CompletionHandler for AttachAssets<'a> {
    async fn on_success(&mut self, asset: PendingAsset, resolved: ResolvedAsset) {
        let attached = attach_asset(
            self.db,
            asset.kind,
            asset.owner_id,
            asset.slot,
            &asset.source_url,
            resolved.reference(),
        )
        .await;
        let Err(e) = attached else {
            self.outcome.assets_stored += 1;
            return;
        };
        let mut reason = format!("owner not updated: {e:#}");
        if let ResolvedAsset::Stored { path, .. } = &resolved {
            match self.store.remove(path).await {
                Ok(()) => reason.push_str(&format!(" (removed {path})")),
                Err(rm) => reason.push_str(&format!(" (left {path} behind: {rm:#})")),
            }
        }
        self.outcome.record(ImportFailure::AssetFetchFailed {
            line: asset.line,
            owner: asset.owner_name,
            url: asset.source_url,
            reason,
        });
    }

    async fn on_failure(&mut self, asset: PendingAsset, failure: AssetFailure) {
        self.outcome.record(ImportFailure::AssetFetchFailed {
            line: asset.line,
            owner: asset.owner_name,
            url: asset.source_url,
            reason: failure.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::AssetSlot;
    use crate::media::resolver::tests::{png_body, CannedFetcher};
    use crate::media::ImageFormat;

    fn pipeline(db: &Db, fetcher: impl Into<Arc<CannedFetcher>>, root: &Path) -> ImportPipeline {
        let fetcher: Arc<CannedFetcher> = fetcher.into();
        let resolver = Arc::new(AssetResolver::new(
            fetcher,
            Arc::new(LocalContentStore::new(root)),
            500,
        ));
        let config = ImportConfig {
            content_root: root.to_path_buf(),
            ..ImportConfig::default()
        };
        ImportPipeline::new(db.clone(), resolver, config)
    }

    #[tokio::test]
    async fn mixed_rows_import_skip_and_default() {
        let db = Db::connect_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let csv = "name,latitude,longitude,status,is_free,price\n\
                   Hoan Kiem Lake,21.0288,105.8525,active,yes,50.000đ\n\
                   ,21.0,105.0,active,no,\n\
                   Temple of Literature,21.0294,105.8355,closed,no,\"30,000\"\n";
        let mut p = pipeline(&db, CannedFetcher::default(), tmp.path());

        let outcome = p
            .run_bytes(ImportKind::CheckinPlaces, csv.as_bytes(), SheetFormat::Csv)
            .await
            .unwrap();

        assert_eq!(p.phase(), ImportPhase::Completed);
        assert_eq!((outcome.imported, outcome.skipped, outcome.failed), (2, 1, 0));
        assert!(matches!(
            outcome.failures[0],
            ImportFailure::RowSkipped { line: 3, .. }
        ));
        let (status, price): (String, i64) =
            sqlx::query_as("SELECT status, price FROM checkin_places WHERE name = ?")
                .bind("Temple of Literature")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(status, "active");
        assert_eq!(price, 30000);
        let free_price: i64 =
            sqlx::query_scalar("SELECT price FROM checkin_places WHERE name = 'Hoan Kiem Lake'")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        assert_eq!(free_price, 0);
    }

    #[tokio::test]
    async fn png_url_grows_owner_images_by_one() {
        let db = Db::connect_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = CannedFetcher::default()
            .with("https://cdn.test/metropole.png", 200, png_body(1000));
        let mut p = pipeline(&db, fetcher, tmp.path());
        let rows = vec![ImportRow::new(2)
            .with("name", "Metropole")
            .with("latitude", "21.025")
            .with("longitude", "105.856")
            .with("images", "https://cdn.test/metropole.png | https://cdn.test/gone.jpg")];

        let outcome = p.run(ImportKind::Hotels, rows).await.unwrap();

        assert_eq!(outcome.imported, 1);
        assert_eq!(outcome.assets_stored, 1);
        assert_eq!(outcome.assets_failed, 1);
        let images: String = sqlx::query_scalar("SELECT images FROM hotels WHERE name = 'Metropole'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let images: Vec<String> = serde_json::from_str(&images).unwrap();
        assert_eq!(images.len(), 1);
        assert!(images[0].starts_with("hotels/") && images[0].ends_with(".png"));
        assert!(tmp.path().join(&images[0]).exists());
    }

    #[tokio::test]
    async fn rooms_link_amenities_and_reimport_is_stable() {
        let db = Db::connect_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let hotels = vec![ImportRow::new(2)
            .with("name", "Metropole")
            .with("latitude", "21.025")
            .with("longitude", "105.856")];
        pipeline(&db, CannedFetcher::default(), tmp.path())
            .run(ImportKind::Hotels, hotels)
            .await
            .unwrap();

        let rooms = || {
            vec![
                ImportRow::new(2)
                    .with("name", "Deluxe")
                    .with("hotel", "Metropole")
                    .with("price", "2.500.000")
                    .with("amenities", "Wifi, Bathtub, wifi"),
                ImportRow::new(3)
                    .with("name", "Ghost")
                    .with("hotel", "Nowhere")
                    .with("price", "100"),
            ]
        };
        let mut p = pipeline(&db, CannedFetcher::default(), tmp.path());
        let first = p.run(ImportKind::HotelRooms, rooms()).await.unwrap();
        assert_eq!((first.imported, first.failed), (1, 1));
        assert_eq!(first.relations_linked, 2);

        let second = p.run(ImportKind::HotelRooms, rooms()).await.unwrap();
        assert_eq!(second.relations_linked, 0);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(db.count_rows("hotel_rooms").await.unwrap(), 1);
        assert_eq!(db.count_rows("amenities").await.unwrap(), 2);
        assert_eq!(db.count_rows("room_amenity").await.unwrap(), 2);
    }
    #[tokio::test]
    async fn reimport_reuses_stored_images_without_refetching() {
        let db = Db::connect_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let url = "https://cdn.test/metropole.png";
        let fetcher = Arc::new(CannedFetcher::default().with(url, 200, png_body(1000)));
        let mut p = pipeline(&db, fetcher.clone(), tmp.path());
        let rows = || {
            vec![ImportRow::new(2)
                .with("name", "Metropole")
                .with("latitude", "21.025")
                .with("longitude", "105.856")
                .with("images", &format!("hotels/existing.jpg | {url}"))]
        };

        let first = p.run(ImportKind::Hotels, rows()).await.unwrap();
        assert_eq!((first.assets_stored, first.assets_reused), (2, 0));
        let second = p.run(ImportKind::Hotels, rows()).await.unwrap();
        assert_eq!((second.assets_stored, second.assets_reused), (0, 2));

        let images: String = sqlx::query_scalar("SELECT images FROM hotels WHERE name = 'Metropole'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let images: Vec<String> = serde_json::from_str(&images).unwrap();
        assert_eq!(images.len(), 2);
        assert!(images.contains(&"hotels/existing.jpg".to_string()));
        let fetched = fetcher.calls.lock().unwrap().iter().filter(|c| *c == url).count();
        assert_eq!(fetched, 1);
        assert_eq!(std::fs::read_dir(tmp.path().join("hotels")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn failed_attach_removes_the_stored_file() {
        let db = Db::connect_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let store: Arc<dyn ContentStore> = Arc::new(LocalContentStore::new(tmp.path()));
        store.put("hotels/orphan.png", &png_body(1000)).await.unwrap();
        let mut outcome = ImportOutcome::new(ImportKind::Hotels);
        let mut handler = AttachAssets {
            db: &db,
            store: &store,
            outcome: &mut outcome,
        };
        let asset = PendingAsset {
            kind: ImportKind::Hotels,
            owner_id: 404,
            owner_name: "Gone".into(),
            line: 2,
            source_url: "https://cdn.test/orphan.png".into(),
            slot: AssetSlot::List("images"),
        };
        let resolved = ResolvedAsset::Stored {
            path: "hotels/orphan.png".into(),
            format: ImageFormat::Png,
            sniffed: true,
        };

        handler.on_success(asset, resolved).await;

        assert!(!store.exists("hotels/orphan.png").await.unwrap());
        assert_eq!((outcome.assets_stored, outcome.assets_failed), (0, 1));
        assert!(matches!(
            &outcome.failures[0],
            ImportFailure::AssetFetchFailed { reason, .. } if reason.contains("removed hotels/orphan.png")
        ));
    }

    #[tokio::test]
    async fn undecodable_cell_does_not_sink_the_batch() {
        let db = Db::connect_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let csv = b"name,description\nNoodles,ok\nRice,\xC3\x28\nSoup,fine\n";
        let mut p = pipeline(&db, CannedFetcher::default(), tmp.path());
        let outcome = p
            .run_bytes(ImportKind::Categories, csv, SheetFormat::Csv)
            .await
            .unwrap();
        assert_eq!((outcome.imported, outcome.failed), (3, 0));
        assert_eq!(db.count_rows("categories").await.unwrap(), 3);
    }
}
