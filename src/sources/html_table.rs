// HTML tables with one row per country and one column per reporting date
//
// Each `TableSpec` says which table to read, which column names the place,
// which metric the cells carry and how column headers map to dates. Every
// non-blank cell becomes one partial observation; cases and deaths from
// different tables meet again in the merger.

use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};

use super::{
    FetchTarget, HttpFetcher, Location, Observations, RawObservation, RawValue, SourceAdapter,
    SourceKind,
};
use crate::model::Metric;

pub const SWINE_FLU_URL: &str = "https://en.wikipedia.org/wiki/2009_swine_flu_pandemic_tables";
pub const WIKITABLE_SELECTOR: &str = "table.wikitable.sortable";

/// How to read one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    /// Position among the tables matched by the page selector
    pub table_index: usize,
    /// Accepted headers of the location column
    pub location_headers: Vec<String>,
    pub metric: Metric,
    /// (column header, ISO date)
    pub columns: Vec<(String, String)>,
}

impl TableSpec {
    fn date_for(&self, header: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(h, _)| h.eq_ignore_ascii_case(header))
            .map(|(_, d)| d.as_str())
    }

    fn is_location_header(&self, header: &str) -> bool {
        self.location_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(header))
    }
}

/// The two 2009 H1N1 tables: monthly cumulative cases, then monthly deaths.
pub fn swine_flu_tables() -> Vec<TableSpec> {
    let location_headers = vec!["Country or territory".to_string(), "Country".to_string()];
    let pairs = |items: &[(&str, &str)]| {
        items
            .iter()
            .map(|(h, d)| (h.to_string(), d.to_string()))
            .collect::<Vec<_>>()
    };

    vec![
        TableSpec {
            table_index: 0,
            location_headers: location_headers.clone(),
            metric: Metric::Cases,
            columns: pairs(&[
                ("April", "2009-04-01"),
                ("May", "2009-05-01"),
                ("June", "2009-06-01"),
                ("July", "2009-07-01"),
                ("August", "2009-08-01"),
                ("Latest (9 August)", "2009-08-09"),
            ]),
        },
        TableSpec {
            table_index: 1,
            location_headers,
            metric: Metric::Deaths,
            columns: pairs(&[
                ("Apr", "2009-04-01"),
                ("May", "2009-05-01"),
                ("Jun", "2009-06-01"),
                ("Jul", "2009-07-01"),
                ("Aug", "2009-08-01"),
                ("Sep", "2009-09-09"),
                ("Oct", "2009-10-09"),
                ("Nov", "2009-11-09"),
                ("Dec", "2009-12-09"),
            ]),
        },
    ]
}

pub struct HtmlTableSource {
    target: FetchTarget,
    table_selector: String,
    tables: Vec<TableSpec>,
}

impl HtmlTableSource {
    pub fn new(target: FetchTarget, table_selector: &str, tables: Vec<TableSpec>) -> Self {
        HtmlTableSource {
            target,
            table_selector: table_selector.to_string(),
            tables,
        }
    }

    pub fn swine_flu(target: FetchTarget) -> Self {
        Self::new(target, WIKITABLE_SELECTOR, swine_flu_tables())
    }

    /// Parse a full HTML document.
    pub fn parse_document(&self, html: &str) -> Result<Vec<RawObservation>> {
        let document = Html::parse_document(html);
        let table_sel = selector(&self.table_selector)?;
        let row_sel = selector("tr")?;
        let cell_sel = selector("th, td")?;

        let tables: Vec<ElementRef> = document.select(&table_sel).collect();
        let mut observations = Vec::new();

        for spec in &self.tables {
            let table = match tables.get(spec.table_index) {
                Some(t) => *t,
                None => {
                    tracing::warn!(
                        index = spec.table_index,
                        found = tables.len(),
                        "Table not present in document"
                    );
                    continue;
                }
            };

            observations.extend(read_table(table, spec, &row_sel, &cell_sel));
        }

        Ok(observations)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid CSS selector {:?}: {:?}", css, e))
}

/// Cells of one row, with `colspan` expanded so columns line up with headers.
fn row_cells(row: ElementRef, cell_sel: &Selector) -> Vec<(bool, String)> {
    let mut cells = Vec::new();
    for cell in row.select(cell_sel) {
        let is_header = cell.value().name() == "th";
        let text = normalize_text(&cell.text().collect::<String>());
        let span = cell
            .value()
            .attr("colspan")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);
        for _ in 0..span {
            cells.push((is_header, text.clone()));
        }
    }
    cells
}

fn read_table(
    table: ElementRef,
    spec: &TableSpec,
    row_sel: &Selector,
    cell_sel: &Selector,
) -> Vec<RawObservation> {
    let mut header: Option<Vec<String>> = None;
    let mut observations = Vec::new();

    for row in table.select(row_sel) {
        let cells = row_cells(row, cell_sel);
        if cells.is_empty() {
            continue;
        }

        // First all-<th> row that names the location column is the header
        if header.is_none() {
            if cells.iter().all(|(is_th, _)| *is_th)
                && cells.iter().any(|(_, text)| spec.is_location_header(text))
            {
                header = Some(cells.into_iter().map(|(_, text)| text).collect());
            }
            continue;
        }

        let Some(columns) = header.as_ref() else {
            continue;
        };
        let Some(location_idx) = columns.iter().position(|h| spec.is_location_header(h)) else {
            continue;
        };
        let Some((_, location)) = cells.get(location_idx) else {
            continue;
        };
        if location.is_empty() {
            continue;
        }

        for (idx, column) in columns.iter().enumerate() {
            let Some(date) = spec.date_for(column) else {
                continue;
            };
            let value = cells
                .get(idx)
                .and_then(|(_, text)| RawValue::from_text(&clean_number(text)));

            if value.is_none() {
                continue;
            }

            observations.push(
                RawObservation::new(
                    SourceKind::HtmlTable,
                    Location::Name(location.clone()),
                    date,
                )
                .with_metric(spec.metric, value),
            );
        }
    }

    if header.is_none() {
        tracing::warn!(index = spec.table_index, "No header row found in table");
    }

    observations
}

/// Collapse whitespace and drop footnote markers like `[12]` or `[a]`.
fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip thousands separators; the strict integer parse happens later.
fn clean_number(text: &str) -> String {
    text.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect()
}

impl SourceAdapter for HtmlTableSource {
    fn kind(&self) -> SourceKind {
        SourceKind::HtmlTable
    }

    fn observations(&self, http: &HttpFetcher) -> Result<Observations<'_>> {
        let html = self.target.read_text(http)?;
        let observations = self.parse_document(&html)?;
        Ok(Box::new(observations.into_iter()))
    }
}
