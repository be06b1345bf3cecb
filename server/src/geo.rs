//! Geographic primitives: areas of interest, bounding boxes and date windows
//!
//! Everything that reaches an upstream imagery request passes through these
//! types, so the validation rules live here and nowhere else.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Date format used on the wire and in persisted records
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors raised while validating geographic input
#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("Polygon needs at least 4 coordinates, got {0}")]
    TooFewPoints(usize),

    #[error("Polygon ring is not closed (first and last coordinates differ)")]
    NotClosed,

    #[error("Polygon contains a non-finite coordinate at index {0}")]
    NonFinite(usize),

    #[error(
        "Invalid polygon bounds: lng [{min_lng}, {max_lng}], lat [{min_lat}, {max_lat}]"
    )]
    DegenerateBounds {
        min_lng: f64,
        max_lng: f64,
        min_lat: f64,
        max_lat: f64,
    },

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Invalid date range: {from} is after {to}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
}

/// A `(longitude, latitude)` pair, serialized as `[lon, lat]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat(pub f64, pub f64);

impl LngLat {
    pub fn lng(&self) -> f64 {
        self.0
    }

    pub fn lat(&self) -> f64 {
        self.1
    }
}

impl From<[f64; 2]> for LngLat {
    fn from(c: [f64; 2]) -> Self {
        Self(c[0], c[1])
    }
}

/// A closed polygon ring over which imagery and statistics are requested
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    ring: Vec<LngLat>,
    bbox: BoundingBox,
}

impl AreaOfInterest {
    /// Validate a ring: at least 4 finite points, closed, non-degenerate bbox
    pub fn new(ring: Vec<LngLat>) -> Result<Self, GeoError> {
        if ring.len() < 4 {
            return Err(GeoError::TooFewPoints(ring.len()));
        }
        if let Some(idx) = ring
            .iter()
            .position(|p| !p.lng().is_finite() || !p.lat().is_finite())
        {
            return Err(GeoError::NonFinite(idx));
        }
        if ring.first() != ring.last() {
            return Err(GeoError::NotClosed);
        }

        let bbox = BoundingBox::enclosing(&ring)?;
        Ok(Self { ring, bbox })
    }

    pub fn from_coords(coords: &[[f64; 2]]) -> Result<Self, GeoError> {
        Self::new(coords.iter().copied().map(LngLat::from).collect())
    }

    pub fn ring(&self) -> &[LngLat] {
        &self.ring
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }
}

impl Serialize for AreaOfInterest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ring.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AreaOfInterest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ring = Vec::<LngLat>::deserialize(deserializer)?;
        Self::new(ring).map_err(serde::de::Error::custom)
    }
}

/// Axis-aligned bounding box in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box enclosing `points`; rejects zero-width or zero-height boxes
    pub fn enclosing(points: &[LngLat]) -> Result<Self, GeoError> {
        let mut bbox = Self {
            min_lng: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lng: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for p in points {
            bbox.min_lng = bbox.min_lng.min(p.lng());
            bbox.max_lng = bbox.max_lng.max(p.lng());
            bbox.min_lat = bbox.min_lat.min(p.lat());
            bbox.max_lat = bbox.max_lat.max(p.lat());
        }

        // Also catches the empty input, where min stays at +inf
        if !(bbox.min_lng < bbox.max_lng && bbox.min_lat < bbox.max_lat) {
            return Err(GeoError::DegenerateBounds {
                min_lng: bbox.min_lng,
                max_lng: bbox.max_lng,
                min_lat: bbox.min_lat,
                max_lat: bbox.max_lat,
            });
        }
        Ok(bbox)
    }

    /// Image corners in top-left, top-right, bottom-right, bottom-left order
    pub fn corners(&self) -> Corners {
        Corners([
            LngLat(self.min_lng, self.max_lat),
            LngLat(self.max_lng, self.max_lat),
            LngLat(self.max_lng, self.min_lat),
            LngLat(self.min_lng, self.min_lat),
        ])
    }

    /// Closed rectangular ring covering the box
    pub fn to_ring(&self) -> Vec<LngLat> {
        let c = self.corners().0;
        vec![c[3], c[2], c[1], c[0], c[3]]
    }
}

/// Four image corners, serialized as `[[lng, lat]; 4]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Corners(pub [LngLat; 4]);

/// A calendar day used to build a 24-hour UTC acquisition window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateSelection(NaiveDate);

impl DateSelection {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn parse(s: &str) -> Result<Self, GeoError> {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Self)
            .map_err(|_| GeoError::InvalidDate(s.to_string()))
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// `(from, to)` RFC 3339 bounds of the day: 00:00:00Z to 23:59:59Z
    pub fn time_window(&self) -> (String, String) {
        let day = self.0.format(DATE_FORMAT);
        (format!("{day}T00:00:00Z"), format!("{day}T23:59:59Z"))
    }
}

impl fmt::Display for DateSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl Serialize for DateSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, GeoError> {
        if from > to {
            return Err(GeoError::InvalidRange { from, to });
        }
        Ok(Self { from, to })
    }

    /// Parse two `YYYY-MM-DD` strings; a trailing time part (`T...`) is ignored
    pub fn parse(from: &str, to: &str) -> Result<Self, GeoError> {
        Self::new(parse_day(from)?, parse_day(to)?)
    }
}

fn parse_day(s: &str) -> Result<NaiveDate, GeoError> {
    let day = s.split('T').next().unwrap_or(s);
    DateSelection::parse(day).map(|d| d.date())
}
