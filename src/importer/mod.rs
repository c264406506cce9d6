//! Bulk import of catalogue spreadsheets.
//!
//! A run moves through [`pipeline::ImportPhase`]: rows are normalized and
//! upserted first, their images are fetched afterwards by the bounded
//! [`fetch_pool::FetchPool`], and room amenities are synced last in one
//! transaction.

pub mod config;
pub mod fetch_pool;
pub mod outcome;
pub mod pipeline;
pub mod relations;
pub mod sheet;
pub mod upsert;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use config::ImportConfig;
pub use outcome::{ImportFailure, ImportOutcome};
pub use pipeline::{ImportPhase, ImportPipeline};

/// Entity types a sheet can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Hotels,
    HotelRooms,
    CheckinPlaces,
    Categories,
    Cuisines,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Hotels => "hotels",
            ImportKind::HotelRooms => "hotel_rooms",
            ImportKind::CheckinPlaces => "checkin_places",
            ImportKind::Categories => "categories",
            ImportKind::Cuisines => "cuisines",
        }
    }

    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    /// Sub-directory of the content store that receives this kind's images.
    pub fn content_dir(&self) -> &'static str {
        match self {
            ImportKind::Hotels => "hotels",
            ImportKind::HotelRooms => "rooms",
            ImportKind::CheckinPlaces => "checkin_places",
            ImportKind::Categories => "categories",
            ImportKind::Cuisines => "cuisines",
        }
    }

    /// Owner column that stored image references land in.
    pub fn asset_slot(&self) -> AssetSlot {
        match self {
            ImportKind::Hotels | ImportKind::HotelRooms | ImportKind::CheckinPlaces => {
                AssetSlot::List("images")
            }
            ImportKind::Categories | ImportKind::Cuisines => AssetSlot::Single("image"),
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "hotels" | "hotel" => ImportKind::Hotels,
            "hotel_rooms" | "rooms" | "room" => ImportKind::HotelRooms,
            "checkin_places" | "checkins" | "places" => ImportKind::CheckinPlaces,
            "categories" | "category" => ImportKind::Categories,
            "cuisines" | "cuisine" | "dishes" => ImportKind::Cuisines,
            other => bail!(
                "unknown import kind '{other}' (expected one of: hotels, hotel_rooms, checkin_places, categories, cuisines)"
            ),
        };
        Ok(kind)
    }
}

/// Where a resolved asset reference is written on the owner row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSlot {
    /// JSON array column; references are appended.
    List(&'static str),
    /// Single text column; the latest reference wins.
    Single(&'static str),
}

impl AssetSlot {
    pub fn column(&self) -> &'static str {
        match self {
            AssetSlot::List(c) | AssetSlot::Single(c) => c,
        }
    }
}

/// One header-mapped sheet line. `line` is 1-based with the header on line 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRow {
    pub line: usize,
    pub fields: IndexMap<String, String>,
}

impl ImportRow {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            fields: IndexMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: &str) -> Self {
        self.fields.insert(column.to_string(), value.to_string());
        self
    }

    /// Trimmed cell value; blank cells read as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HotelRecord {
    pub name: String,
    pub address: Option<String>,
    pub description: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub price: Option<i64>,
    pub rating: Option<f64>,
    pub images: Vec<String>,
}

/// How a room row points at its hotel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotelRef {
    Id(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub hotel: HotelRef,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub max_guests: i64,
    pub status: &'static str,
    pub images: Vec<String>,
    /// Raw amenity tokens, synced after every row is staged.
    pub amenities: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckinPlaceRecord {
    pub name: String,
    pub address: Option<String>,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub operating_hours: serde_json::Value,
    pub is_free: bool,
    pub price: Option<i64>,
    pub status: &'static str,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRecord {
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CuisineRecord {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub is_vegetarian: bool,
    pub status: &'static str,
    pub image: Option<String>,
}

/// A normalized row ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportRecord {
    Hotel(HotelRecord),
    Room(RoomRecord),
    CheckinPlace(CheckinPlaceRecord),
    Category(CategoryRecord),
    Cuisine(CuisineRecord),
}

impl ImportRecord {
    pub fn kind(&self) -> ImportKind {
        match self {
            ImportRecord::Hotel(_) => ImportKind::Hotels,
            ImportRecord::Room(_) => ImportKind::HotelRooms,
            ImportRecord::CheckinPlace(_) => ImportKind::CheckinPlaces,
            ImportRecord::Category(_) => ImportKind::Categories,
            ImportRecord::Cuisine(_) => ImportKind::Cuisines,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ImportRecord::Hotel(r) => &r.name,
            ImportRecord::Room(r) => &r.name,
            ImportRecord::CheckinPlace(r) => &r.name,
            ImportRecord::Category(r) => &r.name,
            ImportRecord::Cuisine(r) => &r.name,
        }
    }

    /// Image references still to be resolved for this record.
    pub fn image_sources(&self) -> Vec<String> {
        match self {
            ImportRecord::Hotel(r) => r.images.clone(),
            ImportRecord::Room(r) => r.images.clone(),
            ImportRecord::CheckinPlace(r) => r.images.clone(),
            ImportRecord::Category(r) => r.image.iter().cloned().collect(),
            ImportRecord::Cuisine(r) => r.image.iter().cloned().collect(),
        }
    }

    pub fn relation_spec(&self) -> Option<&str> {
        match self {
            ImportRecord::Room(r) => r.amenities.as_deref(),
            _ => None,
        }
    }
}

/// An image waiting for the fetch phase. Exists only in memory for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAsset {
    pub kind: ImportKind,
    pub owner_id: i64,
    pub owner_name: String,
    pub line: usize,
    pub source_url: String,
    pub slot: AssetSlot,
}
