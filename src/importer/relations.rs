//! Room ↔ amenity links, synced once per run after every row is staged.

use super::ImportFailure;
use crate::util::db::Db;
use anyhow::{Context, Result};
use itertools::Itertools;
use sqlx::{Acquire, Row, SqliteConnection};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Amenity lookups for one run. Built once before any row is processed and
/// passed explicitly into the sync phase.
#[derive(Debug, Default, Clone)]
pub struct RelationCache {
    by_name: HashMap<String, i64>,
    known_ids: HashSet<i64>,
}

impl RelationCache {
    pub async fn load(db: &Db) -> Result<Self> {
        let rows = sqlx::query("SELECT id, name FROM amenities")
            .fetch_all(&db.pool)
            .await
            .context("cannot load amenities")?;
        let mut cache = Self::default();
        for r in rows {
            let id: i64 = r.try_get("id")?;
            let name: String = r.try_get("name")?;
            cache.insert(&name, id);
        }
        debug!(target = "relations", amenities = cache.len(), "relation cache loaded");
        Ok(cache)
    }

    fn key(name: &str) -> String {
        name.trim().to_lowercase()
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.by_name.get(&Self::key(name)).copied()
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.known_ids.contains(&id)
    }

    fn insert(&mut self, name: &str, id: i64) {
        self.by_name.insert(Self::key(name), id);
        self.known_ids.insert(id);
    }

    fn len(&self) -> usize {
        self.known_ids.len()
    }

    fn absorb(&mut self, other: RelationCache) {
        self.by_name.extend(other.by_name);
        self.known_ids.extend(other.known_ids);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationToken {
    Id(i64),
    Name(String),
}

impl RelationToken {
    fn label(&self) -> String {
        match self {
            RelationToken::Id(id) => id.to_string(),
            RelationToken::Name(n) => n.clone(),
        }
    }
}

/// `"Wifi, 3, wifi , Pool"` → `[Name(Wifi), Id(3), Name(Pool)]`; duplicates
/// are dropped case-insensitively.
pub fn parse_tokens(raw: &str) -> Vec<RelationToken> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unique_by(|t| t.to_lowercase())
        .map(|t| match t.parse::<i64>() {
            Ok(id) => RelationToken::Id(id),
            Err(_) => RelationToken::Name(t.to_string()),
        })
        .collect()
}

/// Relation specification captured while a room row was staged.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRelations {
    pub owner_id: i64,
    pub owner_name: String,
    pub line: usize,
    pub tokens: Vec<RelationToken>,
}

#[derive(Debug, Default, Clone)]
pub struct RelationSyncReport {
    pub owners_synced: usize,
    pub owners_failed: usize,
    pub links_added: usize,
    pub links_removed: usize,
    pub amenities_created: usize,
    pub failures: Vec<ImportFailure>,
}

struct OwnerResolution {
    ids: BTreeSet<i64>,
    created: Vec<(String, i64)>,
    failures: Vec<ImportFailure>,
}

/// Syncs every owner inside one transaction. A database error for one owner
/// rolls back that owner's savepoint only; failing to open or commit the
/// transaction aborts the phase. Amenities created here reach `cache` only
/// once the transaction has committed.
pub async fn sync_relations(
    db: &Db,
    cache: &mut RelationCache,
    pending: &[PendingRelations],
) -> Result<RelationSyncReport> {
    let mut report = RelationSyncReport::default();
    if pending.is_empty() {
        return Ok(report);
    }

    let mut tx = db
        .pool
        .begin()
        .await
        .context("cannot open relation transaction")?;
    let mut created_in_tx = RelationCache::default();

    for owner in pending {
        let mut sp = (&mut *tx)
            .begin()
            .await
            .context("cannot open savepoint")?;
        match sync_owner(&mut sp, cache, &created_in_tx, owner).await {
            Ok((resolution, added, removed)) => {
                sp.commit().await.context("cannot release savepoint")?;
                for (name, id) in &resolution.created {
                    created_in_tx.insert(name, *id);
                }
                report.amenities_created += resolution.created.len();
                report.links_added += added;
                report.links_removed += removed;
                report.owners_synced += 1;
                report.failures.extend(resolution.failures);
            }
            Err(e) => {
                sp.rollback().await.context("cannot roll back savepoint")?;
                warn!(target = "relations", owner = %owner.owner_name, error = %e, "amenity sync failed");
                report.owners_failed += 1;
                report.failures.push(ImportFailure::RelationResolutionFailed {
                    line: owner.line,
                    owner: owner.owner_name.clone(),
                    token: owner.tokens.iter().map(RelationToken::label).join(", "),
                    reason: e.to_string(),
                });
            }
        }
    }

    tx.commit().await.context("cannot commit relation transaction")?;
    cache.absorb(created_in_tx);
    info!(
        target = "relations",
        owners = report.owners_synced,
        failed = report.owners_failed,
        added = report.links_added,
        removed = report.links_removed,
        created = report.amenities_created,
        "amenity sync done"
    );
    Ok(report)
}

async fn resolve_tokens(
    conn: &mut SqliteConnection,
    cache: &RelationCache,
    created_in_tx: &RelationCache,
    owner: &PendingRelations,
) -> Result<OwnerResolution> {
    let mut out = OwnerResolution {
        ids: BTreeSet::new(),
        created: Vec::new(),
        failures: Vec::new(),
    };
    let mut staged: HashMap<String, i64> = HashMap::new();

    for token in &owner.tokens {
        match token {
            RelationToken::Id(id) => {
                if cache.contains_id(*id)
                    || created_in_tx.contains_id(*id)
                    || staged.values().any(|v| v == id)
                {
                    out.ids.insert(*id);
                } else {
                    out.failures.push(ImportFailure::RelationResolutionFailed {
                        line: owner.line,
                        owner: owner.owner_name.clone(),
                        token: id.to_string(),
                        reason: format!("amenity id {id} does not exist"),
                    });
                }
            }
            RelationToken::Name(name) => {
                let key = RelationCache::key(name);
                if let Some(id) = cache
                    .get(name)
                    .or_else(|| created_in_tx.get(name))
                    .or_else(|| staged.get(&key).copied())
                {
                    out.ids.insert(id);
                    continue;
                }
                sqlx::query("INSERT OR IGNORE INTO amenities (name) VALUES (?)")
                    .bind(name)
                    .execute(&mut *conn)
                    .await?;
                let id: i64 = sqlx::query_scalar("SELECT id FROM amenities WHERE name = ?")
                    .bind(name)
                    .fetch_one(&mut *conn)
                    .await?;
                debug!(target = "relations", amenity = %name, id, "amenity created");
                staged.insert(key, id);
                out.created.push((name.clone(), id));
                out.ids.insert(id);
            }
        }
    }
    Ok(out)
}

/// Replaces the owner's links when every token resolved; otherwise only adds.
async fn sync_owner(
    conn: &mut SqliteConnection,
    cache: &RelationCache,
    created_in_tx: &RelationCache,
    owner: &PendingRelations,
) -> Result<(OwnerResolution, usize, usize)> {
    let resolution = resolve_tokens(conn, cache, created_in_tx, owner).await?;

    let existing: BTreeSet<i64> =
        sqlx::query_scalar::<_, i64>("SELECT amenity_id FROM room_amenity WHERE room_id = ?")
            .bind(owner.owner_id)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    let mut added = 0usize;
    for id in resolution.ids.difference(&existing) {
        added += sqlx::query("INSERT OR IGNORE INTO room_amenity (room_id, amenity_id) VALUES (?, ?)")
            .bind(owner.owner_id)
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected() as usize;
    }

    let mut removed = 0usize;
    if resolution.failures.is_empty() {
        for id in existing.difference(&resolution.ids) {
            removed += sqlx::query("DELETE FROM room_amenity WHERE room_id = ? AND amenity_id = ?")
                .bind(owner.owner_id)
                .bind(id)
                .execute(&mut *conn)
                .await?
                .rows_affected() as usize;
        }
    }
    Ok((resolution, added, removed))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_room(db: &Db, name: &str) -> i64 {
        let hotel_id: i64 = sqlx::query_scalar(
            "INSERT INTO hotels (name, latitude, longitude) VALUES (?, 21.0, 105.8)
             ON CONFLICT(name) DO UPDATE SET name = excluded.name RETURNING id",
        )
        .bind("Metropole")
        .fetch_one(&db.pool)
        .await
        .unwrap();
        sqlx::query_scalar(
            "INSERT INTO hotel_rooms (hotel_id, name, price) VALUES (?, ?, 100) RETURNING id",
        )
        .bind(hotel_id)
        .bind(name)
        .fetch_one(&db.pool)
        .await
        .unwrap()
    }

    async fn links(db: &Db, room_id: i64) -> Vec<String> {
        sqlx::query_scalar(
            "SELECT a.name FROM room_amenity ra JOIN amenities a ON a.id = ra.amenity_id
             WHERE ra.room_id = ? ORDER BY a.name",
        )
        .bind(room_id)
        .fetch_all(&db.pool)
        .await
        .unwrap()
    }

    fn pending(owner_id: i64, raw: &str) -> PendingRelations {
        PendingRelations {
            owner_id,
            owner_name: format!("room {owner_id}"),
            line: 2,
            tokens: parse_tokens(raw),
        }
    }

    #[test]
    fn tokens_dedupe_and_classify() {
        assert_eq!(
            parse_tokens("Wifi, 3, wifi ,, Pool"),
            vec![
                RelationToken::Name("Wifi".into()),
                RelationToken::Id(3),
                RelationToken::Name("Pool".into()),
            ]
        );
    }

    #[tokio::test]
    async fn sync_twice_is_idempotent() {
        let db = Db::connect_memory().await.unwrap();
        let room = seed_room(&db, "Deluxe").await;
        let mut cache = RelationCache::load(&db).await.unwrap();

        let first = sync_relations(&db, &mut cache, &[pending(room, "Wifi, Minibar")])
            .await
            .unwrap();
        assert_eq!(first.links_added, 2);
        assert_eq!(first.amenities_created, 2);

        let second = sync_relations(&db, &mut cache, &[pending(room, "wifi, Minibar")])
            .await
            .unwrap();
        assert_eq!(second.links_added, 0);
        assert_eq!(second.amenities_created, 0);
        assert_eq!(links(&db, room).await, vec!["Minibar", "Wifi"]);
        assert_eq!(db.count_rows("room_amenity").await.unwrap(), 2);
        assert_eq!(db.count_rows("amenities").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn complete_resolution_replaces_links() {
        let db = Db::connect_memory().await.unwrap();
        let room = seed_room(&db, "Suite").await;
        let mut cache = RelationCache::load(&db).await.unwrap();
        sync_relations(&db, &mut cache, &[pending(room, "Wifi, Bathtub")])
            .await
            .unwrap();
        let report = sync_relations(&db, &mut cache, &[pending(room, "Wifi")])
            .await
            .unwrap();
        assert_eq!(report.links_removed, 1);
        assert_eq!(links(&db, room).await, vec!["Wifi"]);
    }

    #[tokio::test]
    async fn unknown_id_merges_without_dropping_and_isolates_owners() {
        let db = Db::connect_memory().await.unwrap();
        let a = seed_room(&db, "A").await;
        let b = seed_room(&db, "B").await;
        let mut cache = RelationCache::load(&db).await.unwrap();
        sync_relations(&db, &mut cache, &[pending(a, "Balcony")])
            .await
            .unwrap();

        let report = sync_relations(
            &db,
            &mut cache,
            &[pending(a, "Wifi, 999"), pending(b, "Wifi")],
        )
        .await
        .unwrap();
        assert_eq!(report.owners_synced, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            &report.failures[0],
            ImportFailure::RelationResolutionFailed { token, .. } if token == "999"
        ));
        // Partial resolution keeps the existing link.
        assert_eq!(links(&db, a).await, vec!["Balcony", "Wifi"]);
        assert_eq!(links(&db, b).await, vec!["Wifi"]);
        assert_eq!(db.count_rows("amenities").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn numeric_tokens_link_existing_amenities() {
        let db = Db::connect_memory().await.unwrap();
        let room = seed_room(&db, "Twin").await;
        let pool_id: i64 =
            sqlx::query_scalar("INSERT INTO amenities (name) VALUES ('Pool') RETURNING id")
                .fetch_one(&db.pool)
                .await
                .unwrap();
        let mut cache = RelationCache::load(&db).await.unwrap();
        let report = sync_relations(&db, &mut cache, &[pending(room, &pool_id.to_string())])
            .await
            .unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(links(&db, room).await, vec!["Pool"]);
    }
    #[tokio::test]
    async fn cache_only_learns_amenities_that_were_committed() {
        let db = Db::connect_memory().await.unwrap();
        let room = seed_room(&db, "Family").await;
        let mut cache = RelationCache::load(&db).await.unwrap();

        // Room 9999 does not exist, so its link insert fails and the
        // savepoint that created "Sauna" is rolled back.
        let report = sync_relations(
            &db,
            &mut cache,
            &[pending(room, "Wifi"), pending(9999, "Sauna"), pending(room, "wifi")],
        )
        .await
        .unwrap();
        assert_eq!(report.owners_failed, 1);
        assert_eq!(report.amenities_created, 1);
        assert!(cache.get("WIFI").is_some());
        assert_eq!(cache.get("Sauna"), None);
        assert_eq!(db.count_rows("amenities").await.unwrap(), 1);
    }
}
