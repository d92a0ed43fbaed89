// Geometry archives
//
// A zip holding one GeoJSON FeatureCollection. Each feature carries its
// region code in a properties attribute (`ISO_A2` for countries,
// `ISO_3166_2` for subdivisions, matched case-insensitively). If the
// attribute doesn't exist the archive yields nothing and geometry stays unset.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::io::{Cursor, Read};

use super::{FetchTarget, HttpFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryLevel {
    Country,
    Subdivision,
}

impl GeometryLevel {
    pub fn code_attribute(&self) -> &'static str {
        match self {
            GeometryLevel::Country => "ISO_A2",
            GeometryLevel::Subdivision => "ISO_3166_2",
        }
    }
}

pub struct GeometryArchive {
    target: FetchTarget,
    level: GeometryLevel,
}

impl GeometryArchive {
    pub fn new(target: FetchTarget, level: GeometryLevel) -> Self {
        GeometryArchive { target, level }
    }

    /// (region code, serialized geometry) pairs
    pub fn load(&self, http: &HttpFetcher) -> Result<Vec<(String, String)>> {
        let bytes = self.target.read_bytes(http)?;
        Self::read_archive(&bytes, self.level)
            .with_context(|| format!("Failed to read geometry archive {}", self.target.describe()))
    }

    pub fn read_archive(bytes: &[u8], level: GeometryLevel) -> Result<Vec<(String, String)>> {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).context("Not a zip archive")?;

        let mut body = None;
        for idx in 0..archive.len() {
            let mut entry = archive.by_index(idx)?;
            let name = entry.name().to_ascii_lowercase();
            if name.ends_with(".geojson") || name.ends_with(".json") {
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .with_context(|| format!("Failed to read {}", name))?;
                body = Some(text);
                break;
            }
        }

        let Some(body) = body else {
            bail!("Archive contains no .geojson/.json entry");
        };

        let collection: Value =
            serde_json::from_str(&body).context("Geometry entry is not valid JSON")?;
        Ok(Self::features(&collection, level))
    }

    /// Extract code → geometry from a FeatureCollection.
    pub fn features(collection: &Value, level: GeometryLevel) -> Vec<(String, String)> {
        let Some(features) = collection.get("features").and_then(Value::as_array) else {
            return Vec::new();
        };

        let wanted = level.code_attribute();
        let mut out = Vec::new();
        let mut saw_attribute = false;

        for feature in features {
            let Some(props) = feature.get("properties").and_then(Value::as_object) else {
                continue;
            };
            let Some(code) = props
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(wanted))
                .map(|(_, v)| v)
            else {
                continue;
            };
            saw_attribute = true;

            let (Some(code), Some(geometry)) = (code.as_str(), feature.get("geometry")) else {
                continue;
            };
            if geometry.is_null() || code.trim().is_empty() {
                continue;
            }

            out.push((code.trim().to_string(), geometry.to_string()));
        }

        if !saw_attribute {
            tracing::info!(attribute = wanted, "Geometry attribute not present; skipping");
        }

        out
    }
}
