use super::{
    AssetSlot, CategoryRecord, CheckinPlaceRecord, CuisineRecord, HotelRecord, HotelRef,
    ImportKind, ImportRecord, RoomRecord,
};
use crate::normalization::FieldError;
use crate::util::db::Db;
use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Saved { id: i64, created: bool },
    /// The record points at something that does not exist.
    Rejected(FieldError),
}

/// Creates or updates the owner row keyed by its natural key. Image columns
/// are left alone; they only change when the fetch phase stores an asset.
pub async fn upsert_record(db: &Db, record: &ImportRecord) -> Result<UpsertOutcome> {
    match record {
        ImportRecord::Hotel(r) => upsert_hotel(db, r).await,
        ImportRecord::Room(r) => upsert_room(db, r).await,
        ImportRecord::CheckinPlace(r) => upsert_checkin_place(db, r).await,
        ImportRecord::Category(r) => upsert_category(db, r).await,
        ImportRecord::Cuisine(r) => upsert_cuisine(db, r).await,
    }
}

async fn existing_id(db: &Db, sql: &str, name: &str) -> Result<Option<i64>> {
    Ok(sqlx::query_scalar::<_, i64>(sql)
        .bind(name)
        .fetch_optional(&db.pool)
        .await?)
}

async fn upsert_hotel(db: &Db, r: &HotelRecord) -> Result<UpsertOutcome> {
    let before = existing_id(db, "SELECT id FROM hotels WHERE name = ?", &r.name).await?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO hotels (name, address, description, phone, email, website, latitude, longitude, price, rating)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
            address = excluded.address,
            description = excluded.description,
            phone = excluded.phone,
            email = excluded.email,
            website = excluded.website,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            price = excluded.price,
            rating = excluded.rating,
            updated_at = CURRENT_TIMESTAMP
         RETURNING id",
    )
    .bind(&r.name)
    .bind(&r.address)
    .bind(&r.description)
    .bind(&r.phone)
    .bind(&r.email)
    .bind(&r.website)
    .bind(r.latitude)
    .bind(r.longitude)
    .bind(r.price)
    .bind(r.rating)
    .fetch_one(&db.pool)
    .await
    .with_context(|| format!("hotel '{}'", r.name))?;
    Ok(UpsertOutcome::Saved {
        id,
        created: before.is_none(),
    })
}

/// Resolves a room's hotel reference to an existing id.
pub async fn find_hotel(db: &Db, hotel: &HotelRef) -> Result<Option<i64>> {
    let id = match hotel {
        HotelRef::Id(id) => {
            sqlx::query_scalar::<_, i64>("SELECT id FROM hotels WHERE id = ?")
                .bind(id)
                .fetch_optional(&db.pool)
                .await?
        }
        HotelRef::Name(name) => {
            existing_id(db, "SELECT id FROM hotels WHERE name = ? COLLATE NOCASE", name).await?
        }
    };
    Ok(id)
}

async fn upsert_room(db: &Db, r: &RoomRecord) -> Result<UpsertOutcome> {
    let Some(hotel_id) = find_hotel(db, &r.hotel).await? else {
        let label = match &r.hotel {
            HotelRef::Id(id) => format!("hotel id {id} does not exist"),
            HotelRef::Name(name) => format!("hotel '{name}' does not exist"),
        };
        return Ok(UpsertOutcome::Rejected(FieldError::new("hotel", label)));
    };

    let before: Option<i64> =
        sqlx::query_scalar("SELECT id FROM hotel_rooms WHERE hotel_id = ? AND name = ?")
            .bind(hotel_id)
            .bind(&r.name)
            .fetch_optional(&db.pool)
            .await?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO hotel_rooms (hotel_id, name, description, price, max_guests, status)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(hotel_id, name) DO UPDATE SET
            description = excluded.description,
            price = excluded.price,
            max_guests = excluded.max_guests,
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP
         RETURNING id",
    )
    .bind(hotel_id)
    .bind(&r.name)
    .bind(&r.description)
    .bind(r.price)
    .bind(r.max_guests)
    .bind(r.status)
    .fetch_one(&db.pool)
    .await
    .with_context(|| format!("room '{}'", r.name))?;
    Ok(UpsertOutcome::Saved {
        id,
        created: before.is_none(),
    })
}

async fn upsert_checkin_place(db: &Db, r: &CheckinPlaceRecord) -> Result<UpsertOutcome> {
    let before = existing_id(db, "SELECT id FROM checkin_places WHERE name = ?", &r.name).await?;
    let hours = serde_json::to_string(&r.operating_hours)?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO checkin_places (name, address, description, latitude, longitude, operating_hours, is_free, price, status)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
            address = excluded.address,
            description = excluded.description,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            operating_hours = excluded.operating_hours,
            is_free = excluded.is_free,
            price = excluded.price,
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP
         RETURNING id",
    )
    .bind(&r.name)
    .bind(&r.address)
    .bind(&r.description)
    .bind(r.latitude)
    .bind(r.longitude)
    .bind(hours)
    .bind(r.is_free)
    .bind(r.price)
    .bind(r.status)
    .fetch_one(&db.pool)
    .await
    .with_context(|| format!("check-in place '{}'", r.name))?;
    Ok(UpsertOutcome::Saved {
        id,
        created: before.is_none(),
    })
}

async fn upsert_category(db: &Db, r: &CategoryRecord) -> Result<UpsertOutcome> {
    let before = existing_id(db, "SELECT id FROM categories WHERE name = ?", &r.name).await?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO categories (name, description) VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET
            description = COALESCE(excluded.description, categories.description),
            updated_at = CURRENT_TIMESTAMP
         RETURNING id",
    )
    .bind(&r.name)
    .bind(&r.description)
    .fetch_one(&db.pool)
    .await
    .with_context(|| format!("category '{}'", r.name))?;
    Ok(UpsertOutcome::Saved {
        id,
        created: before.is_none(),
    })
}

/// Looks a category up by name (case-insensitive), creating it when missing.
pub async fn ensure_category(db: &Db, name: &str) -> Result<i64> {
    let name = name.trim();
    sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
        .bind(name)
        .execute(&db.pool)
        .await?;
    let id: i64 = sqlx::query_scalar("SELECT id FROM categories WHERE name = ?")
        .bind(name)
        .fetch_one(&db.pool)
        .await
        .with_context(|| format!("category '{name}'"))?;
    debug!(target = "import", category = %name, id, "category ensured");
    Ok(id)
}

async fn upsert_cuisine(db: &Db, r: &CuisineRecord) -> Result<UpsertOutcome> {
    let category_id = match r.category.as_deref() {
        Some(name) => Some(ensure_category(db, name).await?),
        None => None,
    };
    let before = existing_id(db, "SELECT id FROM cuisines WHERE name = ?", &r.name).await?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO cuisines (name, category_id, description, price, is_vegetarian, status)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
            category_id = COALESCE(excluded.category_id, cuisines.category_id),
            description = excluded.description,
            price = excluded.price,
            is_vegetarian = excluded.is_vegetarian,
            status = excluded.status,
            updated_at = CURRENT_TIMESTAMP
         RETURNING id",
    )
    .bind(&r.name)
    .bind(category_id)
    .bind(&r.description)
    .bind(r.price)
    .bind(r.is_vegetarian)
    .bind(r.status)
    .fetch_one(&db.pool)
    .await
    .with_context(|| format!("cuisine '{}'", r.name))?;
    Ok(UpsertOutcome::Saved {
        id,
        created: before.is_none(),
    })
}

/// Reference an earlier run stored for this owner and source, if any.
pub async fn known_asset(
    db: &Db,
    kind: ImportKind,
    owner_id: i64,
    source_url: &str,
) -> Result<Option<String>> {
    Ok(sqlx::query_scalar(
        "SELECT reference FROM imported_assets
         WHERE owner_table = ? AND owner_id = ? AND source_url = ?",
    )
    .bind(kind.table())
    .bind(owner_id)
    .bind(source_url.trim())
    .fetch_optional(&db.pool)
    .await?)
}

/// Writes a stored asset reference onto its owner: appended to a JSON array
/// column (unless already present) or replacing a single-reference column.
/// The source is remembered so later runs can skip it.
pub async fn attach_asset(
    db: &Db,
    kind: ImportKind,
    owner_id: i64,
    slot: AssetSlot,
    source_url: &str,
    reference: &str,
) -> Result<()> {
    let table = kind.table();
    let column = slot.column();
    let update =
        format!("UPDATE {table} SET {column} = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?");
    let mut tx = db.pool.begin().await?;
    match slot {
        AssetSlot::List(_) => {
            let select = format!("SELECT {column} FROM {table} WHERE id = ?");
            let current: Option<String> = sqlx::query_scalar(&select)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await?
                .with_context(|| format!("{table} #{owner_id} disappeared"))?;
            let mut list = match current
                .as_deref()
                .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            if !list.iter().any(|v| v.as_str() == Some(reference)) {
                list.push(Value::String(reference.to_string()));
                sqlx::query(&update)
                    .bind(serde_json::to_string(&list)?)
                    .bind(owner_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        AssetSlot::Single(_) => {
            let updated = sqlx::query(&update)
                .bind(reference)
                .bind(owner_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if updated == 0 {
                anyhow::bail!("{table} #{owner_id} disappeared");
            }
        }
    }
    sqlx::query(
        "INSERT OR REPLACE INTO imported_assets (owner_table, owner_id, source_url, reference)
         VALUES (?, ?, ?, ?)",
    )
    .bind(table)
    .bind(owner_id)
    .bind(source_url.trim())
    .bind(reference)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    debug!(target = "import", table, owner_id, reference, "asset attached");
    Ok(())
}
