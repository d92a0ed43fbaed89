// Population figures from a SPARQL endpoint
//
// Returns (region, population, date) triples for countries (P297) and
// subdivisions (P300), dated 2000 or later.

use anyhow::Result;
use serde_json::Value;

use super::HttpFetcher;

pub const WIKIDATA_URL: &str = "https://query.wikidata.org/sparql";

pub const POPULATION_QUERY: &str = r#"
SELECT DISTINCT ?region ?population ?date {
    {
        ?country p:P1082 [ ps:P1082 ?population ; pq:P585 ?date ] .
        ?country wdt:P297 ?region .
    } UNION {
        ?province p:P1082 [ ps:P1082 ?population ; pq:P585 ?date ] .
        ?province wdt:P300 ?region .
    }

    FILTER (YEAR(?date) >= 2000)
}
"#;

/// One binding, not yet validated against the region set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationRow {
    pub region: String,
    pub population: i64,
    /// `YYYY-MM-DD`, first ten characters of the xsd:dateTime
    pub date: String,
}

pub struct PopulationQuery {
    endpoint: String,
}

impl PopulationQuery {
    pub fn new(endpoint: &str) -> Self {
        PopulationQuery {
            endpoint: endpoint.to_string(),
        }
    }

    pub fn fetch(&self, http: &HttpFetcher) -> Result<Vec<PopulationRow>> {
        let body = http.get_json(
            &self.endpoint,
            &[("query", POPULATION_QUERY), ("format", "json")],
        )?;
        Ok(Self::parse_bindings(&body))
    }

    /// Bindings that are missing a field or carry a non-integer population
    /// are logged and skipped.
    pub fn parse_bindings(body: &Value) -> Vec<PopulationRow> {
        let Some(bindings) = body
            .pointer("/results/bindings")
            .and_then(Value::as_array)
        else {
            tracing::warn!("Population response has no results.bindings");
            return Vec::new();
        };

        bindings
            .iter()
            .filter_map(|binding| match parse_binding(binding) {
                Some(row) => Some(row),
                None => {
                    tracing::warn!(binding = %binding, "Skipping unparseable population row");
                    None
                }
            })
            .collect()
    }
}

fn binding_value<'a>(binding: &'a Value, name: &str) -> Option<&'a str> {
    binding.get(name)?.get("value")?.as_str()
}

fn parse_binding(binding: &Value) -> Option<PopulationRow> {
    let region = binding_value(binding, "region")?.trim();
    let population = binding_value(binding, "population")?.trim().parse::<i64>().ok()?;
    let date = binding_value(binding, "date")?.get(..10)?;

    if region.is_empty() {
        return None;
    }

    Some(PopulationRow {
        region: region.to_string(),
        population,
        date: date.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_bindings() {
        let body = json!({
            "results": { "bindings": [
                { "region": { "value": "FR" },
                  "population": { "value": "67000000" },
                  "date": { "value": "2020-01-01T00:00:00Z" } },
                { "region": { "value": "AU-NSW" },
                  "population": { "value": "8.1e6" },
                  "date": { "value": "2019-06-30T00:00:00Z" } },
                { "region": { "value": "DE" },
                  "population": { "value": "83000000" } },
                { "region": { "value": "IT" },
                  "population": { "value": "59000000" },
                  "date": { "value": "2020" } }
            ]}
        });

        let rows = PopulationQuery::parse_bindings(&body);

        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0],
            PopulationRow {
                region: "FR".to_string(),
                population: 67_000_000,
                date: "2020-01-01".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_bindings() {
        assert!(PopulationQuery::parse_bindings(&json!({ "head": {} })).is_empty());
    }
}
