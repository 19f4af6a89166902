//! Push the TOTAL rows of a run's CSVs into the totals index, one document
//! per filter, period and date.

use std::path::{Path, PathBuf};

use acct_core::{AggTable, TableFileName, TOTAL};
use acct_io::csv_io::read_totals;
use acct_io::{IoError, SearchBackend};
use serde_json::{json, Map, Number, Value};

use crate::PipelineError;

pub const DEFAULT_TOTALS_INDEX: &str = "daily_totals";

/// Column name → document field, e.g. `% Rm'd Jobs` → `pct_rmed_jobs`.
pub fn rename_field(field: &str) -> String {
    field
        .to_lowercase()
        .replace(' ', "_")
        .replace("'d", "ed")
        .replace("w/", "with_")
        .replace('>', "more_than_")
        .replace('<', "less_than_")
        .replace('%', "pct")
        .replace('/', "per")
}

/// Typed totals value; the `-999` sentinel becomes null.
pub fn totals_value(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(i) = raw.parse::<i64>() {
        return if i == -999 { Value::Null } else { Value::from(i) };
    }
    if let Ok(f) = raw.parse::<f64>() {
        if (f + 999.0).abs() < 0.001 {
            return Value::Null;
        }
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn count_field(table: AggTable) -> String {
    format!("num_{}s", table.singular().to_lowercase())
}

struct TableTotals {
    table: AggTable,
    doc: Map<String, Value>,
    entries: usize,
}

fn read_one(path: &Path) -> Result<Option<TableTotals>, PipelineError> {
    let name = TableFileName::parse(path)?;
    let row = match read_totals(path) {
        Ok(row) => row,
        Err(IoError::Invalid(msg)) => {
            tracing::debug!(path = %path.display(), reason = %msg, "empty table, not pushed");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    if row.totals.first().map(String::as_str) != Some(TOTAL) {
        tracing::debug!(path = %path.display(), "no TOTAL row, not pushed");
        return Ok(None);
    }

    let mut doc = Map::new();
    // column 0 is the group name
    for (h, v) in row.header.iter().zip(&row.totals).skip(1) {
        doc.insert(rename_field(h), totals_value(v));
    }
    doc.insert(count_field(name.table), Value::from(row.entries));
    doc.insert("date".into(), Value::from(name.tag_tail()));
    // dashed, as in the file stem
    doc.insert("query".into(), Value::from(name.stem_name()));
    doc.insert("report_period".into(), Value::from(name.tag_head()));
    Ok(Some(TableTotals { table: name.table, doc, entries: row.entries }))
}

/// The document to push: the Schedds totals when present, else the first
/// table's (the last one's if the first is Site), plus every other table's
/// entry count.
pub fn totals_document(csv_files: &[PathBuf]) -> Result<Option<Map<String, Value>>, PipelineError> {
    let mut all = Vec::new();
    for path in csv_files {
        if let Some(t) = read_one(path)? {
            all.push(t);
        }
    }
    if all.is_empty() {
        return Ok(None);
    }

    let pick = match all.iter().position(|t| t.table == AggTable::Schedds) {
        Some(i) => i,
        None if all[0].table == AggTable::Site => all.len() - 1,
        None => 0,
    };
    let chosen = all.remove(pick);
    let mut doc = chosen.doc;
    for other in &all {
        doc.insert(count_field(other.table), Value::from(other.entries));
    }
    Ok(Some(doc))
}

/// Index body: strings as keywords, `date` as a date, numbers detected.
pub fn index_body() -> Value {
    json!({
        "mappings": {
            "dynamic_templates": [{
                "strings_as_keywords": {
                    "match_mapping_type": "string",
                    "mapping": {"type": "keyword", "norms": "false", "ignore_above": 256}
                }
            }],
            "properties": {"date": {"type": "date"}},
            "date_detection": false,
            "numeric_detection": true
        }
    })
}

fn doc_id(doc: &Map<String, Value>) -> String {
    let field = |k: &str| doc.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    format!("{}_{}_{}", field("query"), field("report_period"), field("date"))
}

/// Index the totals document, creating `index` when missing. Returns the
/// document id, or `None` when no CSV carried totals.
pub fn push_totals(
    backend: &dyn SearchBackend,
    csv_files: &[PathBuf],
    index: &str,
) -> Result<Option<String>, PipelineError> {
    let Some(doc) = totals_document(csv_files)? else {
        tracing::info!("no totals to push");
        return Ok(None);
    };
    if !backend.index_exists(index)? {
        tracing::info!(index, "creating totals index");
        backend.create_index(index, &index_body())?;
    }
    let id = doc_id(&doc);
    backend.index_document(index, &id, &Value::Object(doc))?;
    tracing::info!(index, id = %id, "pushed totals");
    Ok(Some(id))
}
