// 🧭 Region Resolver - source location token → canonical region code
//
// Two kinds of input:
// - Feature ids from stats feeds: accepted only with an `iso1:`/`iso2:`
//   scheme prefix and a well-formed ISO code after it.
// - Free-text names from tables: exact (case-insensitive) lookup over the
//   reference names. No partial or fuzzy matching.
//
// The resolver also owns the reference pass for regions: display-name
// overrides, naming diagnostics and the exclusion set.

use std::collections::{BTreeMap, HashMap};

use crate::error::RecordError;
use crate::model::{Region, RegionKind};
use crate::quality::{check_country_name, check_subdivision_name, NamingIssue};
use crate::sources::{DirectoryEntry, Location};

/// Display names that the directory renders badly.
pub const NAME_OVERRIDES: [(&str, &str); 18] = [
    ("CC", "Cocos Islands"),
    ("CF", "Central African Republic"),
    ("CI", "Ivory Coast"),
    ("CD", "DR Congo"),
    ("DO", "Dominican Republic"),
    ("FK", "Falkland Islands"),
    ("FM", "Federated States of Micronesia"),
    ("IR", "Iran"),
    ("KR", "South Korea"),
    ("LA", "Laos"),
    ("MF", "Saint Martin"),
    ("KP", "North Korea"),
    ("PS", "Palestine"),
    ("SX", "Sint Maarten"),
    ("SY", "Syria"),
    ("VA", "Vatican City"),
    ("VG", "British Virgin Islands"),
    ("VI", "U.S. Virgin Islands"),
];

/// Codes never materialized, whatever the sources say.
pub const EXCLUDED_REGIONS: [&str; 3] = ["CN-MO", "CN-HK", "CN-TW"];

pub fn name_override(code: &str) -> Option<&'static str> {
    NAME_OVERRIDES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

pub fn is_excluded(code: &str) -> bool {
    EXCLUDED_REGIONS.contains(&code)
}

// ============================================================================
// FEATURE ID VALIDATION
// ============================================================================

fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase())
}

fn is_subdivision_code(code: &str) -> bool {
    match code.split_once('-') {
        Some((country, sub)) => {
            is_country_code(country)
                && (1..=3).contains(&sub.len())
                && sub.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        }
        None => false,
    }
}

/// `iso1:US` → `US`, `iso2:AU-NSW` → `AU-NSW`; anything else is rejected.
pub fn parse_feature_id(token: &str) -> Result<(RegionKind, String), RecordError> {
    let token = token.trim();

    for kind in [RegionKind::Country, RegionKind::Subdivision] {
        if let Some(code) = token.strip_prefix(kind.scheme_prefix()) {
            let code = code.trim();
            let well_formed = match kind {
                RegionKind::Country => is_country_code(code),
                RegionKind::Subdivision => is_subdivision_code(code),
            };
            if well_formed {
                return Ok((kind, code.to_string()));
            }
        }
    }

    Err(RecordError::UnresolvedRegion(token.to_string()))
}

fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// NAME INDEX
// ============================================================================

/// name → code; `None` marks a name shared by several codes.
#[derive(Debug, Default, Clone)]
struct NameIndex {
    entries: HashMap<String, Option<String>>,
}

impl NameIndex {
    fn insert(&mut self, name: &str, code: &str) {
        let key = name_key(name);
        if key.is_empty() {
            return;
        }
        let next = match self.entries.get(&key) {
            None => Some(code.to_string()),
            Some(Some(existing)) if existing != code => None,
            _ => return,
        };
        self.entries.insert(key, next);
    }

    /// Outer `None`: no entry. Inner `None`: ambiguous.
    fn lookup(&self, name: &str) -> Option<Option<&str>> {
        self.entries.get(&name_key(name)).map(|code| code.as_deref())
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct RegionResolver {
    regions: BTreeMap<String, Region>,
    country_names: NameIndex,
    subdivision_names: NameIndex,
    issues: Vec<NamingIssue>,
}

impl RegionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference pass over the directory: pick display names, apply
    /// overrides, report ugly names, drop excluded codes.
    pub fn from_directory(entries: &[DirectoryEntry]) -> Self {
        let mut resolver = Self::new();

        for entry in entries {
            let display = match entry.kind {
                RegionKind::Country => match name_override(&entry.code) {
                    Some(name) => name.to_string(),
                    None => {
                        let name = entry.preferred_name().to_string();
                        if let Some(rule) = check_country_name(&name) {
                            resolver.report(&entry.code, &name, rule);
                        }
                        name
                    }
                },
                RegionKind::Subdivision => {
                    if let Some(rule) = check_subdivision_name(&entry.name) {
                        resolver.report(&entry.code, &entry.name, rule);
                    }
                    entry.name.clone()
                }
            };

            resolver.index_name(entry.kind, &entry.name, &entry.code);
            if let Some(common) = &entry.common_name {
                resolver.index_name(entry.kind, common, &entry.code);
            }
            resolver.add_region(Region::new(&entry.code, display, entry.kind));
        }

        resolver.apply_exclusions();
        resolver
    }

    /// Resolver over regions already in the canonical store.
    pub fn from_regions(regions: impl IntoIterator<Item = Region>) -> Self {
        let mut resolver = Self::new();
        for region in regions {
            resolver.add_region(region);
        }
        resolver.apply_exclusions();
        resolver
    }

    fn report(&mut self, code: &str, name: &str, rule: crate::quality::NamingRule) {
        tracing::warn!(code, name, rule = rule.as_str(), "Ugly region name");
        self.issues.push(NamingIssue {
            code: code.to_string(),
            name: name.to_string(),
            rule,
        });
    }

    fn index_name(&mut self, kind: RegionKind, name: &str, code: &str) {
        match kind {
            RegionKind::Country => self.country_names.insert(name, code),
            RegionKind::Subdivision => self.subdivision_names.insert(name, code),
        }
    }

    /// Add (or replace) a region; its display name becomes resolvable too.
    pub fn add_region(&mut self, region: Region) {
        self.index_name(region.kind, &region.name, &region.code);
        if let Some(name) = name_override(&region.code) {
            self.index_name(region.kind, name, &region.code);
        }
        self.regions.insert(region.code.clone(), region);
    }

    fn apply_exclusions(&mut self) {
        for code in EXCLUDED_REGIONS {
            self.regions.remove(code);
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.regions.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn issues(&self) -> &[NamingIssue] {
        &self.issues
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn into_regions(self) -> Vec<Region> {
        self.regions.into_values().collect()
    }

    /// Set geometry on a known region. Unknown codes are ignored.
    pub fn attach_geometry(&mut self, code: &str, geometry: String) -> bool {
        match self.regions.get_mut(code) {
            Some(region) => {
                region.geometry = Some(geometry);
                true
            }
            None => false,
        }
    }

    /// Exact, case-insensitive name lookup; countries before subdivisions.
    pub fn resolve_name(&self, name: &str) -> Result<String, RecordError> {
        let code = self
            .country_names
            .lookup(name)
            .or_else(|| self.subdivision_names.lookup(name))
            .flatten()
            .ok_or_else(|| RecordError::UnresolvedRegion(name.trim().to_string()))?;

        if is_excluded(code) {
            return Err(RecordError::ExcludedRegion(code.to_string()));
        }
        Ok(code.to_string())
    }

    /// Feature id → code. The code is not checked against the region set;
    /// the store filters unknown regions at persistence time.
    pub fn resolve_feature(&self, token: &str) -> Result<String, RecordError> {
        let (_, code) = parse_feature_id(token)?;
        if is_excluded(&code) {
            return Err(RecordError::ExcludedRegion(code));
        }
        Ok(code)
    }

    pub fn resolve(&self, location: &Location) -> Result<String, RecordError> {
        match location {
            Location::Feature(token) => self.resolve_feature(token),
            Location::Name(name) => self.resolve_name(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: RegionKind, code: &str, name: &str, common: Option<&str>) -> DirectoryEntry {
        DirectoryEntry {
            kind,
            code: code.to_string(),
            name: name.to_string(),
            common_name: common.map(|s| s.to_string()),
        }
    }

    fn directory() -> Vec<DirectoryEntry> {
        vec![
            entry(RegionKind::Country, "US", "United States", None),
            entry(RegionKind::Country, "KR", "Korea, Republic of", None),
            entry(RegionKind::Country, "BO", "Bolivia, Plurinational State of", Some("Bolivia")),
            entry(RegionKind::Country, "CZ", "Czech Republic", None),
            entry(RegionKind::Country, "GE", "Georgia", None),
            entry(RegionKind::Subdivision, "US-GA", "Georgia", None),
            entry(RegionKind::Subdivision, "AU-NSW", "New South Wales", None),
            entry(RegionKind::Subdivision, "CN-HK", "Hong Kong SAR", None),
            entry(RegionKind::Subdivision, "GH-CP", "Central", None),
            entry(RegionKind::Subdivision, "ZM-02", "Central", None),
        ]
    }

    #[test]
    fn test_feature_ids_need_scheme_prefix() {
        let resolver = RegionResolver::new();

        assert_eq!(resolver.resolve_feature("iso1:US").unwrap(), "US");
        assert_eq!(resolver.resolve_feature("iso2:AU-NSW").unwrap(), "AU-NSW");
        assert_eq!(resolver.resolve_feature("iso2:ZM-02").unwrap(), "ZM-02");

        for token in ["US", "5-digit-fips:36047", "iso1:USA", "iso2:US", "iso1:", "facility 12"] {
            assert!(
                matches!(resolver.resolve_feature(token), Err(RecordError::UnresolvedRegion(_))),
                "{} should be rejected",
                token
            );
        }
    }

    #[test]
    fn test_excluded_feature_ids() {
        let resolver = RegionResolver::new();
        assert_eq!(
            resolver.resolve_feature("iso2:CN-HK"),
            Err(RecordError::ExcludedRegion("CN-HK".to_string()))
        );
    }

    #[test]
    fn test_directory_display_names() {
        let resolver = RegionResolver::from_directory(&directory());

        let names: BTreeMap<_, _> = resolver
            .regions()
            .map(|r| (r.code.clone(), r.name.clone()))
            .collect();

        assert_eq!(names["KR"], "South Korea");
        assert_eq!(names["BO"], "Bolivia");
        assert_eq!(names["US"], "United States");
    }

    #[test]
    fn test_exclusion_set_never_materialized() {
        let resolver = RegionResolver::from_directory(&directory());
        assert!(!resolver.contains("CN-HK"));
        assert!(resolver.contains("AU-NSW"));
    }

    #[test]
    fn test_ugly_names_reported_not_blocking() {
        let resolver = RegionResolver::from_directory(&directory());

        // KR is overridden, so only CZ is reported
        let codes: Vec<_> = resolver.issues().iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["CZ"]);
        assert!(resolver.contains("CZ"));
    }

    #[test]
    fn test_resolve_name_exact_only() {
        let resolver = RegionResolver::from_directory(&directory());

        assert_eq!(resolver.resolve_name("South Korea").unwrap(), "KR");
        assert_eq!(resolver.resolve_name("korea, republic of").unwrap(), "KR");
        assert_eq!(resolver.resolve_name("  United   States ").unwrap(), "US");
        assert_eq!(resolver.resolve_name("Bolivia").unwrap(), "BO");
        assert!(resolver.resolve_name("United").is_err());
        assert!(resolver.resolve_name("United States of Americaa").is_err());
    }

    #[test]
    fn test_countries_win_and_ambiguous_names_reject() {
        let resolver = RegionResolver::from_directory(&directory());

        assert_eq!(resolver.resolve_name("Georgia").unwrap(), "GE");
        assert_eq!(resolver.resolve_name("New South Wales").unwrap(), "AU-NSW");
        assert!(matches!(
            resolver.resolve_name("Central"),
            Err(RecordError::UnresolvedRegion(_))
        ));
        assert_eq!(
            resolver.resolve_name("Hong Kong SAR"),
            Err(RecordError::ExcludedRegion("CN-HK".to_string()))
        );
    }

    #[test]
    fn test_ambiguous_country_name_does_not_fall_through() {
        let resolver = RegionResolver::from_regions(vec![
            Region::new("CG", "Congo", RegionKind::Country),
            Region::new("CD", "Congo", RegionKind::Country),
            Region::new("XX-CG", "Congo", RegionKind::Subdivision),
            Region::new("XX-KO", "Kouilou", RegionKind::Subdivision),
        ]);

        assert_eq!(
            resolver.resolve_name("Congo"),
            Err(RecordError::UnresolvedRegion("Congo".to_string()))
        );
        assert_eq!(resolver.resolve_name("Kouilou").unwrap(), "XX-KO");
    }

    #[test]
    fn test_resolution_is_stable() {
        let resolver = RegionResolver::from_directory(&directory());
        let a = resolver.resolve(&Location::Name("South Korea".into()));
        let b = resolver.resolve(&Location::Name("South Korea".into()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_from_regions_and_geometry() {
        let mut resolver = RegionResolver::from_regions(vec![
            Region::new("FR", "France", RegionKind::Country),
            Region::new("CN-TW", "Taiwan", RegionKind::Subdivision),
        ]);

        assert_eq!(resolver.len(), 1);
        assert_eq!(resolver.resolve_name("france").unwrap(), "FR");
        assert!(resolver.attach_geometry("FR", "{}".to_string()));
        assert!(!resolver.attach_geometry("DE", "{}".to_string()));
    }
}
