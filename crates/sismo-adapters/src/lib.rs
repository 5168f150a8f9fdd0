//! Source extractors: structured-API ingestion and HTML-table ingestion.
//!
//! Both strategies decode a fetched body and emit [`NormalizedRow`]s in
//! upstream order; the sync pipeline does not care which one produced them.

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map as JsonMap, Value as JsonValue};
use sismo_core::{IngestionStrategy, NormalizedRow, QuakeReport, RowFields};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "sismo-adapters";

pub const DEFAULT_MAX_ROWS: usize = 10;
pub const DEFAULT_TABLE_CLASS: &str = "table";
pub const HTML_PREVIEW_CHARS: usize = 500;

/// A fetched body after the PARSING step.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedBody {
    Json(JsonValue),
    Markup(String),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("decoding {strategy} body: {detail}")]
    Decode {
        strategy: IngestionStrategy,
        detail: String,
    },
    #[error("upstream payload contained no records")]
    NoData,
    #[error("no table element found in document")]
    TableNotFound { preview: String },
    #[error("invalid selector `{selector}`: {detail}")]
    Selector { selector: String, detail: String },
}

pub trait Extractor: Send + Sync {
    fn strategy(&self) -> IngestionStrategy;

    /// `Accept` header sent with the fetch.
    fn accept(&self) -> &'static str;

    fn decode(&self, body: &[u8]) -> Result<DecodedBody, ExtractError>;

    fn extract(&self, decoded: DecodedBody) -> Result<Vec<NormalizedRow>, ExtractError>;

    fn decode_and_extract(&self, body: &[u8]) -> Result<Vec<NormalizedRow>, ExtractError> {
        let decoded = self.decode(body)?;
        self.extract(decoded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorSettings {
    pub max_rows: usize,
    pub table_class: String,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            table_class: DEFAULT_TABLE_CLASS.to_string(),
        }
    }
}

pub fn extractor_for(strategy: IngestionStrategy, settings: &ExtractorSettings) -> Box<dyn Extractor> {
    match strategy {
        IngestionStrategy::Api => Box::new(ApiExtractor::new(settings.max_rows)),
        IngestionStrategy::Html => Box::new(HtmlTableExtractor::new(settings.table_class.clone())),
    }
}

fn decode_error(strategy: IngestionStrategy, detail: impl Into<String>) -> ExtractError {
    ExtractError::Decode {
        strategy,
        detail: detail.into(),
    }
}

// ---------------------------------------------------------------------------
// Row normalization
// ---------------------------------------------------------------------------

/// Text rendering of one JSON field; missing and `null` become empty.
fn json_text(item: &JsonMap<String, JsonValue>, key: &str) -> String {
    match item.get(key) {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn first_non_empty(item: &JsonMap<String, JsonValue>, primary: &str, fallback: &str) -> String {
    let value = json_text(item, primary);
    if value.is_empty() {
        json_text(item, fallback)
    } else {
        value
    }
}

pub fn quake_report_from_json(item: &JsonMap<String, JsonValue>) -> QuakeReport {
    QuakeReport {
        report_code: first_non_empty(item, "codigo", "id"),
        reference: json_text(item, "referencia"),
        local_datetime: first_non_empty(item, "fecha_hora_local", "fecha_local"),
        magnitude: json_text(item, "magnitud"),
        depth: json_text(item, "profundidad"),
        latitude: json_text(item, "latitud"),
        longitude: json_text(item, "longitud"),
    }
}

/// HTML rows keep their header-derived labels; identity and position come later.
pub fn normalize_table_row(mapping: RowFields) -> NormalizedRow {
    NormalizedRow::new(mapping)
}

// ---------------------------------------------------------------------------
// Structured API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiExtractor {
    max_rows: usize,
}

impl ApiExtractor {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }
}

impl Default for ApiExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ROWS)
    }
}

/// Falsy payloads (`null`, `false`, `0`, `""`, `[]`, `{}`) carry no reports.
fn is_absent(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Bool(flag) => !flag,
        JsonValue::Number(n) => n.as_f64() == Some(0.0),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::String(s) => s.is_empty(),
        _ => false,
    }
}

impl Extractor for ApiExtractor {
    fn strategy(&self) -> IngestionStrategy {
        IngestionStrategy::Api
    }

    fn accept(&self) -> &'static str {
        "application/json"
    }

    fn decode(&self, body: &[u8]) -> Result<DecodedBody, ExtractError> {
        serde_json::from_slice(body)
            .map(DecodedBody::Json)
            .map_err(|e| decode_error(self.strategy(), format!("invalid JSON: {e}")))
    }

    fn extract(&self, decoded: DecodedBody) -> Result<Vec<NormalizedRow>, ExtractError> {
        let DecodedBody::Json(value) = decoded else {
            return Err(decode_error(self.strategy(), "expected a JSON body"));
        };
        if is_absent(&value) {
            return Err(ExtractError::NoData);
        }
        let JsonValue::Array(items) = value else {
            return Err(decode_error(self.strategy(), "expected a JSON array of reports"));
        };

        let total = items.len();
        let rows = items
            .iter()
            .take(self.max_rows)
            .enumerate()
            .map(|(idx, item)| {
                item.as_object()
                    .map(|obj| NormalizedRow::from(quake_report_from_json(obj)))
                    .ok_or_else(|| {
                        decode_error(self.strategy(), format!("element {idx} is not an object"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(total, kept = rows.len(), "extracted api reports");
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// HTML table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlTableExtractor {
    table_class: String,
}

impl HtmlTableExtractor {
    pub fn new(table_class: impl Into<String>) -> Self {
        Self {
            table_class: table_class.into(),
        }
    }
}

impl Default for HtmlTableExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CLASS)
    }
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        detail: e.to_string(),
    })
}

fn cell_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Closest ancestor element named `name`.
fn nearest_ancestor<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|anc| anc.value().name() == name)
}

fn owned_by(el: ElementRef<'_>, ancestor_name: &str, owner: ElementRef<'_>) -> bool {
    nearest_ancestor(el, ancestor_name).is_some_and(|anc| anc.id() == owner.id())
}

pub fn html_preview(text: &str) -> String {
    text.chars().take(HTML_PREVIEW_CHARS).collect()
}

impl HtmlTableExtractor {
    fn locate_table<'a>(&self, document: &'a Html) -> Result<Option<ElementRef<'a>>, ExtractError> {
        let tables = selector("table")?;
        let mut all = document.select(&tables);
        let Some(first) = all.next() else {
            return Ok(None);
        };
        let preferred = std::iter::once(first)
            .chain(all)
            .find(|t| t.value().classes().any(|c| c == self.table_class));
        Ok(Some(preferred.unwrap_or(first)))
    }

    /// Header labels, then one mapping per body row with at least one data cell.
    pub fn table_records(&self, markup: &str) -> Result<Vec<RowFields>, ExtractError> {
        let document = Html::parse_document(markup);
        let Some(table) = self.locate_table(&document)? else {
            return Err(ExtractError::TableNotFound {
                preview: html_preview(markup),
            });
        };

        let th = selector("th")?;
        let tr = selector("tr")?;
        let td = selector("td")?;

        let headers: Vec<String> = table
            .select(&th)
            .filter(|th| owned_by(*th, "table", table))
            .map(cell_text)
            .collect();

        let records = table
            .select(&tr)
            .filter(|row| owned_by(*row, "table", table))
            .skip(1)
            .filter_map(|row| {
                let cells: Vec<String> = row
                    .select(&td)
                    .filter(|cell| owned_by(*cell, "tr", row))
                    .map(cell_text)
                    .collect();
                if cells.is_empty() {
                    return None;
                }
                Some(
                    headers
                        .iter()
                        .cloned()
                        .zip(cells)
                        .collect::<RowFields>(),
                )
            })
            .collect::<Vec<_>>();
        debug!(headers = headers.len(), rows = records.len(), "extracted html table");
        Ok(records)
    }
}

impl Extractor for HtmlTableExtractor {
    fn strategy(&self) -> IngestionStrategy {
        IngestionStrategy::Html
    }

    fn accept(&self) -> &'static str {
        "text/html,application/xhtml+xml"
    }

    fn decode(&self, body: &[u8]) -> Result<DecodedBody, ExtractError> {
        Ok(DecodedBody::Markup(String::from_utf8_lossy(body).into_owned()))
    }

    fn extract(&self, decoded: DecodedBody) -> Result<Vec<NormalizedRow>, ExtractError> {
        let DecodedBody::Markup(markup) = decoded else {
            return Err(decode_error(self.strategy(), "expected an HTML body"));
        };
        Ok(self
            .table_records(&markup)?
            .into_iter()
            .map(normalize_table_row)
            .collect())
    }
}
