//! Row validation and coercion for imported sheets.

pub mod fields;
pub mod rows;

pub use fields::FieldError;
pub use rows::{normalize_row, Normalized};
