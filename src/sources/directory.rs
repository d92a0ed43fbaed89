// Region reference directory
//
// CSV export of the ISO 3166 country and subdivision lists:
//   kind,code,name,common_name
//   country,KR,"Korea, Republic of",
//   country,TW,"Taiwan, Province of China",Taiwan
//   subdivision,AU-NSW,New South Wales,

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;

use super::{FetchTarget, HttpFetcher};
use crate::model::RegionKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub kind: RegionKind,
    pub code: String,
    /// Official ISO name
    pub name: String,
    /// Everyday name, when the directory has one
    pub common_name: Option<String>,
}

impl DirectoryEntry {
    /// Common name when present, official name otherwise.
    pub fn preferred_name(&self) -> &str {
        self.common_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryRow {
    kind: String,
    code: String,
    name: String,
    #[serde(default)]
    common_name: Option<String>,
}

pub struct RegionDirectory {
    target: FetchTarget,
}

impl RegionDirectory {
    pub fn new(target: FetchTarget) -> Self {
        RegionDirectory { target }
    }

    pub fn load(&self, http: &HttpFetcher) -> Result<Vec<DirectoryEntry>> {
        let body = self.target.read_text(http)?;
        Self::parse_reader(body.as_bytes())
            .with_context(|| format!("Failed to read region directory {}", self.target.describe()))
    }

    /// Rows with an unknown `kind` or empty code/name are skipped.
    /// A CSV that can't be read at all is an error.
    pub fn parse_reader<R: Read>(reader: R) -> Result<Vec<DirectoryEntry>> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entries = Vec::new();
        for result in rdr.deserialize::<DirectoryRow>() {
            let row = result.context("Failed to deserialize directory row")?;

            let kind = match row.kind.to_ascii_lowercase().as_str() {
                "country" => RegionKind::Country,
                "subdivision" => RegionKind::Subdivision,
                other => {
                    tracing::debug!(kind = other, code = %row.code, "Unknown directory kind");
                    continue;
                }
            };
            if row.code.is_empty() || row.name.is_empty() {
                continue;
            }

            entries.push(DirectoryEntry {
                kind,
                code: row.code.to_ascii_uppercase(),
                name: row.name,
                common_name: row.common_name.filter(|s| !s.is_empty()),
            });
        }

        Ok(entries)
    }
}
