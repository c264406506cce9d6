//! Bulk spreadsheet import for the travel catalogue: hotels, rooms, check-in
//! places, dish categories and dishes.

pub mod api;
pub mod importer;
pub mod media;
pub mod normalization;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use importer::{ImportConfig, ImportFailure, ImportKind, ImportOutcome, ImportPipeline};
pub use util::db::Db;
