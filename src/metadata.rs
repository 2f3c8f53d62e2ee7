//! Best-effort EXIF extraction: camera fields and GPS coordinates.
//!
//! Any parse failure yields an empty map and null coordinates; ingestion
//! continues regardless.

use exif::{In, Tag, Value};
use std::io::BufReader;
use std::path::Path;

/// Parsed camera metadata destined for the record's opaque JSON blob.
#[derive(Debug, Default)]
pub struct CameraMeta {
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

const STRING_FIELDS: &[(Tag, &str)] = &[
    (Tag::Make, "camera_maker"),
    (Tag::Model, "camera_model"),
    (Tag::FNumber, "f_number"),
    (Tag::ExposureTime, "exposure_time"),
    (Tag::PhotographicSensitivity, "iso"),
    (Tag::ExposureBiasValue, "exposure_bias"),
    (Tag::FocalLength, "focal_length"),
    (Tag::MaxApertureValue, "max_aperture"),
    (Tag::MeteringMode, "metering_mode"),
    (Tag::Flash, "flash"),
    (Tag::FocalLengthIn35mmFilm, "focal_length_35mm"),
];

/// Extract metadata from the image container. Never fails: parse errors
/// return an empty result.
pub fn extract(path: &Path) -> CameraMeta {
    match try_extract(path) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "exif parse failed");
            CameraMeta::default()
        }
    }
}

fn try_extract(path: &Path) -> Result<CameraMeta, Box<dyn std::error::Error>> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader)?;

    let mut meta = CameraMeta::default();
    for (tag, key) in STRING_FIELDS {
        if let Some(field) = exif.get_field(*tag, In::PRIMARY) {
            let rendered = field.display_value().with_unit(&exif).to_string();
            let trimmed = rendered.trim().trim_matches('"').to_string();
            if !trimmed.is_empty() {
                meta.fields.insert((*key).to_string(), serde_json::Value::String(trimmed));
            }
        }
    }

    meta.latitude = coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S");
    meta.longitude = coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W");
    Ok(meta)
}

/// Degrees/minutes/seconds rationals to signed decimal degrees.
fn coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag, negative_ref: &str) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(ref dms) = field.value else {
        return None;
    };
    if dms.len() < 3 {
        return None;
    }
    let degrees = dms[0].to_f64() + dms[1].to_f64() / 60.0 + dms[2].to_f64() / 3600.0;
    if !degrees.is_finite() {
        return None;
    }

    let sign = exif
        .get_field(ref_tag, In::PRIMARY)
        .map(|f| f.display_value().to_string())
        .map(|r| if r.trim().eq_ignore_ascii_case(negative_ref) { -1.0 } else { 1.0 })
        .unwrap_or(1.0);
    Some(sign * degrees)
}
