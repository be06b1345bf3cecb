//! Persisted farm records and legacy schema migration
//!
//! Polygon records written by older dashboard builds store the bounding box
//! as a string (JSON array, sometimes with trailing junk, or a comma-separated
//! list) and dates as either a single string or a keyed map of entries with
//! inconsistent field names. `migrate_polygon` turns any of those shapes into
//! the current `PolygonRecord` and reports what it could not interpret.
//! Each field degrades independently: a broken bbox still yields the dates.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::geo::{AreaOfInterest, BoundingBox, DATE_FORMAT, GeoError, LngLat};

/// Current persisted polygon schema
pub const SCHEMA_VERSION: u32 = 2;

/// Problems found while interpreting a stored record
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("Bounding box not found for this polygon")]
    MissingBbox,

    #[error("Invalid bounding box format. Expected JSON array or CSV. Got: {0}")]
    BboxFormat(String),

    #[error("Bounding box is not a usable polygon: {0}")]
    BboxGeometry(String),

    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    #[error("Date entry {key} has no date value")]
    MissingDate { key: String },

    #[error("Date entry {key} has conflicting date '{date}' and Date '{legacy}'; using '{date}'")]
    ConflictingDateKeys {
        key: String,
        date: String,
        legacy: String,
    },
}

/// A monitored field as stored under `users/<uid>/polygons/<id>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonRecord {
    pub schema_version: u32,
    /// Closed ring; `None` when the stored bbox could not be interpreted
    pub ring: Option<Vec<LngLat>>,
    /// Acquisition dates with imagery, ascending and unique
    #[serde(default)]
    pub dates: Vec<NaiveDate>,
    /// Default time-series window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<NaiveDate>,
}

impl PolygonRecord {
    pub fn area(&self) -> Option<Result<AreaOfInterest, GeoError>> {
        self.ring.clone().map(AreaOfInterest::new)
    }
}

/// Outcome of interpreting one stored polygon
#[derive(Debug, Clone)]
pub struct Migration {
    pub record: PolygonRecord,
    pub errors: Vec<ParseError>,
    /// `true` when the stored value was not already a current record
    pub migrated: bool,
}

/// Interpret a stored polygon value of any known schema
pub fn migrate_polygon(raw: &Value) -> Migration {
    if raw.get("schema_version").and_then(Value::as_u64) == Some(u64::from(SCHEMA_VERSION))
        && let Ok(record) = serde_json::from_value::<PolygonRecord>(raw.clone())
    {
        return Migration {
            record,
            errors: Vec::new(),
            migrated: false,
        };
    }

    let mut errors = Vec::new();

    let ring = match raw.get("bbox").map(parse_bbox) {
        None => {
            errors.push(ParseError::MissingBbox);
            None
        }
        Some(Err(e)) => {
            errors.push(e);
            None
        }
        Some(Ok(ring)) => Some(ring),
    };

    let dates = raw
        .get("date")
        .map(|v| parse_dates(v, &mut errors))
        .unwrap_or_default();

    let from = raw.get("from").and_then(Value::as_str).and_then(parse_day);
    let to = raw.get("to").and_then(Value::as_str).and_then(parse_day);

    Migration {
        record: PolygonRecord {
            schema_version: SCHEMA_VERSION,
            ring,
            dates,
            from,
            to,
        },
        errors,
        migrated: true,
    }
}

/// Parse a stored bbox into a validated, closed ring
pub fn parse_bbox(value: &Value) -> Result<Vec<LngLat>, ParseError> {
    let points = match value {
        Value::String(s) => parse_bbox_str(s)?,
        Value::Array(items) => points_from_array(items)
            .ok_or_else(|| ParseError::BboxFormat(preview(&value.to_string())))?,
        Value::Null => return Err(ParseError::MissingBbox),
        other => return Err(ParseError::BboxFormat(preview(&other.to_string()))),
    };
    normalize_ring(points)
}

fn parse_bbox_str(raw: &str) -> Result<Vec<LngLat>, ParseError> {
    let cleaned = raw.trim();

    // Outermost [...] when the string carries extra characters
    let json = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(json)
        && let Some(points) = points_from_array(&items)
    {
        return Ok(points);
    }

    if cleaned.contains(',') {
        let values: Vec<f64> = cleaned
            .split(',')
            .map(|v| v.trim().trim_matches(|c| c == '[' || c == ']').trim())
            .filter_map(|v| v.parse::<f64>().ok())
            .collect();
        if values.len() >= 4 && values.iter().all(|v| v.is_finite()) {
            return Ok(rectangle(values[0], values[1], values[2], values[3]));
        }
    }

    Err(ParseError::BboxFormat(preview(raw)))
}

/// `[[lng, lat], ...]`, a GeoJSON-style `[[[lng, lat], ...]]`, or a flat
/// `[lng1, lat1, lng2, lat2]`
fn points_from_array(items: &[Value]) -> Option<Vec<LngLat>> {
    if items.len() == 1
        && let Some(inner) = items[0].as_array()
        && inner.first().is_some_and(Value::is_array)
    {
        return points_from_array(inner);
    }

    if items.len() >= 4 && items.iter().all(Value::is_number) {
        let v: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
        return Some(rectangle(v[0], v[1], v[2], v[3]));
    }

    items
        .iter()
        .map(|item| {
            let pair = item.as_array()?;
            match pair.as_slice() {
                [lng, lat, ..] => Some(LngLat(lng.as_f64()?, lat.as_f64()?)),
                _ => None,
            }
        })
        .collect()
}

fn rectangle(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> Vec<LngLat> {
    vec![
        LngLat(lng1, lat1),
        LngLat(lng2, lat1),
        LngLat(lng2, lat2),
        LngLat(lng1, lat2),
        LngLat(lng1, lat1),
    ]
}

/// Two points are a corner pair; open rings are closed
fn normalize_ring(mut points: Vec<LngLat>) -> Result<Vec<LngLat>, ParseError> {
    if points.len() == 2 {
        return BoundingBox::enclosing(&points)
            .map(|bbox| bbox.to_ring())
            .map_err(|e| ParseError::BboxGeometry(e.to_string()));
    }
    if let (Some(first), Some(last)) = (points.first().copied(), points.last().copied())
        && first != last
    {
        points.push(first);
    }
    AreaOfInterest::new(points)
        .map(|area| area.ring().to_vec())
        .map_err(|e| ParseError::BboxGeometry(e.to_string()))
}

/// Collect valid dates from any legacy date shape, ascending and unique
pub fn parse_dates(value: &Value, errors: &mut Vec<ParseError>) -> Vec<NaiveDate> {
    let mut dates = BTreeSet::new();
    let mut accept = |candidate: &str, errors: &mut Vec<ParseError>| match parse_strict(candidate)
    {
        Some(day) => {
            dates.insert(day);
        }
        None => errors.push(ParseError::InvalidDate(candidate.to_string())),
    };

    match value {
        Value::String(s) => accept(s, errors),
        Value::Object(entries) => {
            for (key, entry) in entries {
                if let Some(s) = date_from_entry(key, entry, errors) {
                    accept(&s, errors);
                }
            }
        }
        // Realtime databases return keyed maps with numeric keys as arrays
        Value::Array(entries) => {
            for (idx, entry) in entries.iter().enumerate() {
                if entry.is_null() {
                    continue;
                }
                if let Some(s) = date_from_entry(&idx.to_string(), entry, errors) {
                    accept(&s, errors);
                }
            }
        }
        Value::Null => {}
        other => errors.push(ParseError::InvalidDate(other.to_string())),
    }

    dates.into_iter().collect()
}

fn date_from_entry(key: &str, entry: &Value, errors: &mut Vec<ParseError>) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Object(fields) => {
            let lower = fields.get("date").and_then(Value::as_str);
            let upper = fields.get("Date").and_then(Value::as_str);
            match (lower, upper) {
                (Some(date), Some(legacy)) => {
                    if date != legacy {
                        errors.push(ParseError::ConflictingDateKeys {
                            key: key.to_string(),
                            date: date.to_string(),
                            legacy: legacy.to_string(),
                        });
                    }
                    Some(date.to_string())
                }
                (Some(date), None) => Some(date.to_string()),
                (None, Some(legacy)) => Some(legacy.to_string()),
                (None, None) => {
                    let found = fields
                        .values()
                        .filter_map(Value::as_str)
                        .find(|s| looks_like_date(s))
                        .map(str::to_string);
                    if found.is_none() {
                        errors.push(ParseError::MissingDate {
                            key: key.to_string(),
                        });
                    }
                    found
                }
            }
        }
        _ => {
            errors.push(ParseError::MissingDate {
                key: key.to_string(),
            });
            None
        }
    }
}

/// Shape check for `YYYY-MM-DD`
fn looks_like_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

fn parse_strict(s: &str) -> Option<NaiveDate> {
    if !looks_like_date(s) {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Accepts `YYYY-MM-DD` with an optional `T...` time part
fn parse_day(s: &str) -> Option<NaiveDate> {
    parse_strict(s.split('T').next().unwrap_or(s))
}

fn preview(s: &str) -> String {
    let mut out: String = s.chars().take(50).collect();
    if s.chars().count() > 50 {
        out.push_str("...");
    }
    out
}
