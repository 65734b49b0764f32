use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of vehicle being catalogued. Each fleet lives in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fleet {
    #[default]
    Car,
    Scooter,
}

impl Fleet {
    pub fn table(self) -> &'static str {
        match self {
            Self::Car => "cars",
            Self::Scooter => "scooter_ev",
        }
    }

    pub fn id_column(self) -> &'static str {
        match self {
            Self::Car => "car_id",
            Self::Scooter => "scooter_id",
        }
    }

    pub fn name_column(self) -> &'static str {
        match self {
            Self::Car => "car_name",
            Self::Scooter => "scooter_name",
        }
    }

    /// Columns holding the two powertrain descriptors.
    pub fn powertrain_columns(self) -> [&'static str; 2] {
        match self {
            Self::Car => ["engine_type", "fuel_type"],
            Self::Scooter => ["motor_type", "battery_type"],
        }
    }
}

impl fmt::Display for Fleet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Car => "car",
            Self::Scooter => "scooter",
        })
    }
}

/// One of the five image columns of a listing.
///
/// This enum is the only source of column names that end up in SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSlot {
    ImageData,
    FrontView,
    BackView,
    LeftSideView,
    RightSideView,
}

impl ImageSlot {
    pub const ALL: [Self; 5] = [
        Self::ImageData,
        Self::FrontView,
        Self::BackView,
        Self::LeftSideView,
        Self::RightSideView,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Self::ImageData => "image_data",
            Self::FrontView => "front_view",
            Self::BackView => "back_view",
            Self::LeftSideView => "left_side_view",
            Self::RightSideView => "right_side_view",
        }
    }
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown image column '{0}'")]
pub struct UnknownSlot(pub String);

impl FromStr for ImageSlot {
    type Err = UnknownSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.column() == s)
            .ok_or_else(|| UnknownSlot(s.to_owned()))
    }
}

/// Uniqueness key of a listing within its fleet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub segment_id: i32,
    pub segment_name: String,
    pub model_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub name: String,
    pub segment_id: i32,
    pub segment_name: String,
    pub model_type: String,
    pub year: i32,
    /// `engine_type`/`fuel_type` for cars, `motor_type`/`battery_type` for scooters.
    pub powertrain: [String; 2],
    pub price: f64,
    pub images: BTreeMap<ImageSlot, String>,
}

impl Listing {
    pub fn key(&self) -> ListingKey {
        ListingKey {
            segment_id: self.segment_id,
            segment_name: self.segment_name.clone(),
            model_type: self.model_type.clone(),
        }
    }
}

/// Current value of one image column for a stored listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredImage {
    pub id: i32,
    pub segment_id: i32,
    pub segment_name: String,
    pub model_type: String,
    pub image_url: Option<String>,
}
