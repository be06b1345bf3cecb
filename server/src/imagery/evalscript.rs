//! NDVI classification tables and the evalscripts generated from them
//!
//! The bucket thresholds, palette and cloud classes are defined once here.
//! The evalscripts sent upstream and the legend served to clients are both
//! rendered through `ndvi_bucket`, `bucket_color` and `is_cloud`, so the
//! colours drawn by the processing API always match the legend.

use std::fmt::Write;

use serde::Serialize;

/// Upper (exclusive) bound of each bucket but the last
pub const NDVI_THRESHOLDS: [f64; 20] = [
    -0.5, -0.2, -0.1, 0.0, 0.025, 0.05, 0.075, 0.1, 0.125, 0.15, 0.175, 0.2, 0.25, 0.3, 0.35,
    0.4, 0.45, 0.5, 0.55, 0.6,
];

/// RGB colour (0..=1) of each bucket
pub const NDVI_PALETTE: [[f64; 3]; 21] = [
    [0.05, 0.05, 0.05],
    [0.75, 0.75, 0.75],
    [0.86, 0.86, 0.86],
    [0.92, 0.92, 0.92],
    [1.0, 0.98, 0.8],
    [0.93, 0.91, 0.71],
    [0.87, 0.85, 0.61],
    [0.8, 0.78, 0.51],
    [0.74, 0.72, 0.42],
    [0.69, 0.76, 0.38],
    [0.64, 0.8, 0.35],
    [0.57, 0.75, 0.32],
    [0.5, 0.7, 0.28],
    [0.44, 0.64, 0.25],
    [0.38, 0.59, 0.21],
    [0.31, 0.54, 0.18],
    [0.25, 0.49, 0.14],
    [0.19, 0.43, 0.11],
    [0.13, 0.38, 0.07],
    [0.06, 0.33, 0.04],
    [0.0, 0.27, 0.0],
];

pub const BUCKET_COUNT: usize = NDVI_PALETTE.len();

/// Sentinel-2 scene classification (SCL) codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SceneClass {
    NoData = 0,
    SaturatedDefective = 1,
    DarkFeatureShadow = 2,
    CloudShadow = 3,
    Vegetation = 4,
    NotVegetated = 5,
    Water = 6,
    CloudLowProbability = 7,
    CloudMediumProbability = 8,
    CloudHighProbability = 9,
    ThinCirrus = 10,
    SnowIce = 11,
}

/// SCL codes counted as cloud
pub const CLOUD_CLASSES: [SceneClass; 3] = [
    SceneClass::CloudMediumProbability,
    SceneClass::CloudHighProbability,
    SceneClass::ThinCirrus,
];

/// Bucket index of `value`: the first threshold it falls below, else the last bucket
///
/// NaN compares false against every threshold and lands in the last bucket,
/// the same as the evalscript's `if/else` chain.
pub fn ndvi_bucket(value: f64) -> usize {
    NDVI_THRESHOLDS
        .iter()
        .position(|t| value < *t)
        .unwrap_or(NDVI_THRESHOLDS.len())
}

pub fn bucket_color(value: f64) -> [f64; 3] {
    NDVI_PALETTE[ndvi_bucket(value)]
}

pub fn is_cloud(scl: u8) -> bool {
    CLOUD_CLASSES.iter().any(|c| *c as u8 == scl)
}

/// One legend row for clients drawing a colour key
#[derive(Debug, Clone, Serialize)]
pub struct LegendEntry {
    /// Inclusive lower bound; `None` for the first bucket
    pub lower: Option<f64>,
    /// Exclusive upper bound; `None` for the last bucket
    pub upper: Option<f64>,
    /// `#rrggbb`
    pub color: String,
}

/// One entry per bucket, coloured by classifying the bucket's lower bound
pub fn legend() -> Vec<LegendEntry> {
    (0..BUCKET_COUNT)
        .map(|i| {
            let lower = i.checked_sub(1).map(|j| NDVI_THRESHOLDS[j]);
            let [r, g, b] = bucket_color(lower.unwrap_or(f64::NEG_INFINITY));
            let to_u8 = |c: f64| (c * 255.0).round() as u8;
            LegendEntry {
                lower,
                upper: NDVI_THRESHOLDS.get(i).copied(),
                color: format!("#{:02x}{:02x}{:02x}", to_u8(r), to_u8(g), to_u8(b)),
            }
        })
        .collect()
}

fn write_is_cloud(script: &mut String) {
    let codes: Vec<String> = (0..=u8::MAX)
        .filter(|scl| is_cloud(*scl))
        .map(|scl| format!("scl == {}", scl))
        .collect();
    let _ = write!(
        script,
        "\nfunction isCloud(scl) {{\n  return {};\n}}\n",
        codes.join(" || ")
    );
}

fn js_rgb(rgb: [f64; 3]) -> String {
    format!("{},{},{}", rgb[0], rgb[1], rgb[2])
}

/// Evalscript for the processing API: coloured PNG, raw index, cloud flag
pub fn ndvi_visualization_script() -> String {
    let mut script = String::from(
        r#"//VERSION=3

function setup() {
  return {
    input: ["B04", "B08", "SCL", "dataMask"],
    output: [
      { id: "default", bands: 4 },
      { id: "index", bands: 1, sampleType: "FLOAT32" },
      { id: "eobrowserStats", bands: 2, sampleType: "FLOAT32" },
      { id: "dataMask", bands: 1 }
    ]
  };
}

function evaluatePixel(samples) {
  let val = index(samples.B08, samples.B04);
  const indexVal = samples.dataMask === 1 ? val : NaN;
  let imgVals = null;
"#,
    );

    for (i, threshold) in NDVI_THRESHOLDS.iter().enumerate() {
        let keyword = if i == 0 { "if" } else { "else if" };
        let _ = writeln!(
            script,
            "  {keyword} (val < {threshold}) imgVals = [{},samples.dataMask];",
            js_rgb(NDVI_PALETTE[i])
        );
    }
    let _ = writeln!(
        script,
        "  else imgVals = [{},samples.dataMask];",
        js_rgb(NDVI_PALETTE[BUCKET_COUNT - 1])
    );

    script.push_str(
        r#"
  return {
    default: imgVals,
    index: [indexVal],
    eobrowserStats: [val, isCloud(samples.SCL) ? 1 : 0],
    dataMask: [samples.dataMask]
  };
}
"#,
    );
    write_is_cloud(&mut script);
    script
}

/// Evalscript for the statistical API: NDVI with clouds and no-data masked out
pub fn ndvi_statistics_script() -> String {
    let mut script = String::from(
        r#"//VERSION=3

function setup() {
  return {
    input: [{ bands: ["B04", "B08", "SCL", "dataMask"] }],
    output: [
      { id: "ndvi", bands: 1, sampleType: "FLOAT32" },
      { id: "dataMask", bands: 1 }
    ]
  };
}

function evaluatePixel(samples) {
  let ndvi = index(samples.B08, samples.B04);
  let valid = samples.dataMask === 1 && !isCloud(samples.SCL) && isFinite(ndvi);
  return {
    ndvi: [ndvi],
    dataMask: [valid ? 1 : 0]
  };
}
"#,
    );
    write_is_cloud(&mut script);
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_strictly_increasing() {
        for pair in NDVI_THRESHOLDS.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        assert_eq!(BUCKET_COUNT, NDVI_THRESHOLDS.len() + 1);
    }

    #[test]
    fn test_bucket_partition_is_total() {
        // Every value maps to exactly one bucket and bucket indices never decrease
        let mut last = 0;
        let mut v = -2.0;
        while v <= 2.0 {
            let b = ndvi_bucket(v);
            assert!(b < BUCKET_COUNT);
            assert!(b >= last, "bucket went backwards at {}", v);
            last = b;
            v += 0.001;
        }
        assert_eq!(ndvi_bucket(f64::NEG_INFINITY), 0);
        assert_eq!(ndvi_bucket(f64::INFINITY), BUCKET_COUNT - 1);
        assert_eq!(ndvi_bucket(f64::NAN), BUCKET_COUNT - 1);
    }

    #[test]
    fn test_bucket_boundaries_are_lower_inclusive() {
        assert_eq!(ndvi_bucket(-0.51), 0);
        assert_eq!(ndvi_bucket(-0.5), 1);
        assert_eq!(ndvi_bucket(-0.0001), 3);
        assert_eq!(ndvi_bucket(0.0), 4);
        assert_eq!(ndvi_bucket(0.599), 19);
        assert_eq!(ndvi_bucket(0.6), 20);
        for (i, t) in NDVI_THRESHOLDS.iter().enumerate() {
            assert_eq!(ndvi_bucket(*t), i + 1);
        }
    }

    #[test]
    fn test_bucket_colors() {
        assert_eq!(bucket_color(-0.9), [0.05, 0.05, 0.05]);
        assert_eq!(bucket_color(0.01), [1.0, 0.98, 0.8]);
        assert_eq!(bucket_color(0.9), [0.0, 0.27, 0.0]);
    }

    #[test]
    fn test_cloud_classification() {
        for scl in [8u8, 9, 10] {
            assert!(is_cloud(scl), "{} should be cloud", scl);
        }
        for scl in [0u8, 1, 2, 3, 4, 5, 6, 7, 11, 12, 255] {
            assert!(!is_cloud(scl), "{} should not be cloud", scl);
        }
    }

    #[test]
    fn test_visualization_script_matches_tables() {
        let script = ndvi_visualization_script();
        assert!(script.starts_with("//VERSION=3"));
        assert!(script.contains("if (val < -0.5) imgVals = [0.05,0.05,0.05,samples.dataMask];"));
        assert!(script.contains("else if (val < 0.025) imgVals = [1,0.98,0.8,samples.dataMask];"));
        assert!(script.contains("else imgVals = [0,0.27,0,samples.dataMask];"));
        assert_eq!(script.matches("imgVals = [").count(), BUCKET_COUNT);
        assert!(script.contains("return scl == 8 || scl == 9 || scl == 10;"));
    }

    #[test]
    fn test_statistics_script_masks_clouds() {
        let script = ndvi_statistics_script();
        assert!(script.contains("!isCloud(samples.SCL)"));
        assert!(script.contains("id: \"ndvi\""));
        assert!(script.contains("function isCloud(scl)"));
    }

    #[test]
    fn test_legend_covers_all_buckets() {
        let legend = legend();
        assert_eq!(legend.len(), BUCKET_COUNT);
        assert_eq!(legend[0].lower, None);
        assert_eq!(legend[0].upper, Some(-0.5));
        assert_eq!(legend[20].lower, Some(0.6));
        assert_eq!(legend[20].upper, None);
        assert_eq!(legend[20].color, "#004500");

        // Every entry's colour is the palette colour of its own bucket
        for (i, entry) in legend.iter().enumerate() {
            let [r, g, b] = NDVI_PALETTE[i];
            let to_u8 = |c: f64| (c * 255.0).round() as u8;
            assert_eq!(
                entry.color,
                format!("#{:02x}{:02x}{:02x}", to_u8(r), to_u8(g), to_u8(b))
            );
        }
    }
}
