use super::fields::{
    enum_or_default, int_in_or, lenient_json, optional_f64_in, optional_text, parse_bool,
    parse_price, required_f64_in, required_text, split_list, FieldError, NAME_MAX_LEN,
};
use crate::importer::{
    CategoryRecord, CheckinPlaceRecord, CuisineRecord, HotelRecord, HotelRef, ImportKind,
    ImportRecord, ImportRow, RoomRecord,
};

pub const ROOM_STATUSES: [&str; 3] = ["available", "booked", "maintenance"];
pub const PLACE_STATUSES: [&str; 2] = ["active", "inactive"];
pub const CUISINE_STATUSES: [&str; 2] = ["available", "unavailable"];

const TEXT_MAX_LEN: usize = 5000;

/// Result of normalizing one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Record(ImportRecord),
    /// Row carries no usable `name`; it is dropped without persisting anything.
    Skip(String),
    Invalid(Vec<FieldError>),
}

/// Collects field errors while a record is assembled.
#[derive(Default)]
struct Checks {
    errors: Vec<FieldError>,
}

impl Checks {
    fn take<T: Default>(&mut self, r: Result<T, FieldError>) -> T {
        match r {
            Ok(v) => v,
            Err(e) => {
                self.errors.push(e);
                T::default()
            }
        }
    }

    fn finish(self, record: ImportRecord) -> Normalized {
        if self.errors.is_empty() {
            Normalized::Record(record)
        } else {
            Normalized::Invalid(self.errors)
        }
    }
}

pub fn normalize_row(kind: ImportKind, row: &ImportRow) -> Normalized {
    let name = match row.get("name") {
        None => return Normalized::Skip("missing name".to_string()),
        Some(_) => match required_text(row.get("name"), "name", NAME_MAX_LEN) {
            Ok(n) => n,
            Err(e) => return Normalized::Invalid(vec![e]),
        },
    };

    match kind {
        ImportKind::Hotels => hotel(name, row),
        ImportKind::HotelRooms => room(name, row),
        ImportKind::CheckinPlaces => checkin_place(name, row),
        ImportKind::Categories => category(name, row),
        ImportKind::Cuisines => cuisine(name, row),
    }
}

fn hotel(name: String, row: &ImportRow) -> Normalized {
    let mut c = Checks::default();
    let record = HotelRecord {
        name,
        address: c.take(optional_text(row.get("address"), "address", NAME_MAX_LEN)),
        description: c.take(optional_text(row.get("description"), "description", TEXT_MAX_LEN)),
        phone: c.take(optional_text(row.get("phone"), "phone", 32)),
        email: c.take(optional_text(row.get("email"), "email", NAME_MAX_LEN)),
        website: c.take(optional_text(row.get("website"), "website", NAME_MAX_LEN)),
        latitude: c.take(required_f64_in(row.get("latitude"), "latitude", -90.0, 90.0)),
        longitude: c.take(required_f64_in(row.get("longitude"), "longitude", -180.0, 180.0)),
        price: parse_price(row.get("price")),
        rating: c.take(optional_f64_in(row.get("rating"), "rating", 0.0, 5.0)),
        images: split_list(row.get("images")),
    };
    c.finish(ImportRecord::Hotel(record))
}

fn room(name: String, row: &ImportRow) -> Normalized {
    let mut c = Checks::default();
    let hotel = match row.get("hotel").or_else(|| row.get("hotel_id")) {
        Some(v) => match v.parse::<i64>() {
            Ok(id) => HotelRef::Id(id),
            Err(_) => HotelRef::Name(v.to_string()),
        },
        None => {
            c.errors.push(FieldError::new("hotel", "is required"));
            HotelRef::Id(0)
        }
    };
    let price = match parse_price(row.get("price")) {
        Some(p) => p,
        None => {
            c.errors.push(FieldError::new("price", "is required"));
            0
        }
    };
    let record = RoomRecord {
        hotel,
        name,
        description: c.take(optional_text(row.get("description"), "description", TEXT_MAX_LEN)),
        price,
        max_guests: c.take(int_in_or(row.get("max_guests"), "max_guests", 1, 50, 2)),
        status: enum_or_default(row.get("status"), &ROOM_STATUSES, "available"),
        images: split_list(row.get("images")),
        amenities: row.get("amenities").map(str::to_string),
    };
    c.finish(ImportRecord::Room(record))
}

fn checkin_place(name: String, row: &ImportRow) -> Normalized {
    let mut c = Checks::default();
    let is_free = parse_bool(row.get("is_free"));
    let record = CheckinPlaceRecord {
        name,
        address: c.take(optional_text(row.get("address"), "address", NAME_MAX_LEN)),
        description: c.take(optional_text(row.get("description"), "description", TEXT_MAX_LEN)),
        latitude: c.take(required_f64_in(row.get("latitude"), "latitude", -90.0, 90.0)),
        longitude: c.take(required_f64_in(row.get("longitude"), "longitude", -180.0, 180.0)),
        operating_hours: lenient_json(row.get("operating_hours")),
        is_free,
        price: if is_free {
            Some(0)
        } else {
            parse_price(row.get("price"))
        },
        status: enum_or_default(row.get("status"), &PLACE_STATUSES, "active"),
        images: split_list(row.get("images")),
    };
    c.finish(ImportRecord::CheckinPlace(record))
}

fn category(name: String, row: &ImportRow) -> Normalized {
    let mut c = Checks::default();
    let record = CategoryRecord {
        name,
        description: c.take(optional_text(row.get("description"), "description", TEXT_MAX_LEN)),
        image: row.get("image").map(str::to_string),
    };
    c.finish(ImportRecord::Category(record))
}

fn cuisine(name: String, row: &ImportRow) -> Normalized {
    let mut c = Checks::default();
    let record = CuisineRecord {
        name,
        category: c.take(optional_text(
            row.get("category").or_else(|| row.get("category_name")),
            "category",
            NAME_MAX_LEN,
        )),
        description: c.take(optional_text(row.get("description"), "description", TEXT_MAX_LEN)),
        price: parse_price(row.get("price")),
        is_vegetarian: parse_bool(row.get("is_vegetarian")),
        status: enum_or_default(row.get("status"), &CUISINE_STATUSES, "available"),
        image: row.get("image").map(str::to_string),
    };
    c.finish(ImportRecord::Cuisine(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn place_row() -> ImportRow {
        ImportRow::new(2)
            .with("name", "Hoan Kiem Lake")
            .with("latitude", "21.0287")
            .with("longitude", "105.8524")
            .with("is_free", "Có")
            .with("price", "50.000đ")
            .with("status", "closed")
            .with("operating_hours", "{broken")
            .with("images", "https://cdn.example.com/a.png, local/b.png")
    }

    #[test]
    fn missing_name_is_a_skip() {
        let row = ImportRow::new(3).with("name", "   ").with("latitude", "1");
        assert!(matches!(
            normalize_row(ImportKind::Hotels, &row),
            Normalized::Skip(_)
        ));
    }

    #[test]
    fn checkin_place_applies_defaults_and_tolerant_parsing() {
        let Normalized::Record(ImportRecord::CheckinPlace(p)) =
            normalize_row(ImportKind::CheckinPlaces, &place_row())
        else {
            panic!("expected a check-in place record");
        };
        assert!(p.is_free);
        assert_eq!(p.price, Some(0));
        assert_eq!(p.status, "active");
        assert_eq!(p.operating_hours, json!([]));
        assert_eq!(p.images.len(), 2);
    }

    #[test]
    fn hotel_collects_every_field_error() {
        let row = ImportRow::new(4)
            .with("name", "Metropole")
            .with("latitude", "123")
            .with("rating", "9");
        let Normalized::Invalid(errors) = normalize_row(ImportKind::Hotels, &row) else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["latitude", "longitude", "rating"]);
    }

    #[test]
    fn room_reads_hotel_reference_and_amenities() {
        let row = ImportRow::new(2)
            .with("name", "Deluxe King")
            .with("hotel", "7")
            .with("price", "1.500.000")
            .with("status", "BOOKED")
            .with("amenities", "Wifi, Minibar");
        let Normalized::Record(ImportRecord::Room(r)) = normalize_row(ImportKind::HotelRooms, &row)
        else {
            panic!("expected a room record");
        };
        assert_eq!(r.hotel, HotelRef::Id(7));
        assert_eq!(r.price, 1_500_000);
        assert_eq!(r.status, "booked");
        assert_eq!(r.max_guests, 2);
        assert_eq!(r.amenities.as_deref(), Some("Wifi, Minibar"));
    }

    #[test]
    fn room_without_hotel_or_price_is_invalid() {
        let row = ImportRow::new(2).with("name", "Suite");
        let Normalized::Invalid(errors) = normalize_row(ImportKind::HotelRooms, &row) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn cuisine_price_and_flags() {
        let row = ImportRow::new(2)
            .with("name", "Phở bò")
            .with("category", "Noodles")
            .with("price", "35.000đ")
            .with("is_vegetarian", "no");
        let Normalized::Record(ImportRecord::Cuisine(c)) = normalize_row(ImportKind::Cuisines, &row)
        else {
            panic!("expected a cuisine record");
        };
        assert_eq!(c.price, Some(35000));
        assert!(!c.is_vegetarian);
        assert_eq!(c.category.as_deref(), Some("Noodles"));
        assert_eq!(c.status, "available");
    }
}
