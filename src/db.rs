use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use itertools::Itertools;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::error::{classify_sqlite, PipelineError};
use crate::mapper::{CanonicalRecord, ColumnKind, ColumnSpec, COLUMNS};

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating database directory {}", dir.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("opening database at {}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(&SCHEMA_SQL)?;
    Ok(())
}

// ── Generated schema ──
//
// Table, indexes, search index and the upsert statement all derive from
// `COLUMNS`; nothing below hand-lists a column name.

fn search_columns() -> impl Iterator<Item = &'static ColumnSpec> {
    COLUMNS.iter().filter(|c| c.search.is_some())
}

static SCHEMA_SQL: LazyLock<String> = LazyLock::new(|| {
    let cols = COLUMNS
        .iter()
        .map(|c| match c.name {
            "nct_id" => format!("{} TEXT PRIMARY KEY NOT NULL", c.name),
            _ => format!("{} {}", c.name, c.kind.sql_type()),
        })
        .join(",\n            ");
    let indexes = COLUMNS
        .iter()
        .filter(|c| c.indexed)
        .map(|c| format!("CREATE INDEX IF NOT EXISTS idx_trials_{0} ON trials({0});", c.name))
        .join("\n        ");
    let fts = search_columns().map(|c| c.name).join(", ");
    let new_vals = search_columns().map(|c| format!("new.{}", c.name)).join(", ");
    let old_vals = search_columns().map(|c| format!("old.{}", c.name)).join(", ");

    format!(
        "
        CREATE TABLE IF NOT EXISTS trials (
            {cols},
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        {indexes}
        CREATE INDEX IF NOT EXISTS idx_trials_created_at ON trials(created_at);

        CREATE VIRTUAL TABLE IF NOT EXISTS trials_fts USING fts5(
            {fts},
            content='trials'
        );

        CREATE TRIGGER IF NOT EXISTS trials_fts_ai AFTER INSERT ON trials BEGIN
            INSERT INTO trials_fts(rowid, {fts}) VALUES (new.rowid, {new_vals});
        END;
        CREATE TRIGGER IF NOT EXISTS trials_fts_ad AFTER DELETE ON trials BEGIN
            INSERT INTO trials_fts(trials_fts, rowid, {fts}) VALUES ('delete', old.rowid, {old_vals});
        END;
        CREATE TRIGGER IF NOT EXISTS trials_fts_au AFTER UPDATE ON trials BEGIN
            INSERT INTO trials_fts(trials_fts, rowid, {fts}) VALUES ('delete', old.rowid, {old_vals});
            INSERT INTO trials_fts(rowid, {fts}) VALUES (new.rowid, {new_vals});
        END;
        "
    )
});

static UPSERT_SQL: LazyLock<String> = LazyLock::new(|| {
    let names = COLUMNS.iter().map(|c| c.name).join(", ");
    let placeholders = (1..=COLUMNS.len()).map(|i| format!("?{}", i)).join(", ");
    let updates = COLUMNS
        .iter()
        .skip(1)
        .map(|c| format!("{0} = excluded.{0}", c.name))
        .join(", ");
    format!(
        "INSERT INTO trials ({names}) VALUES ({placeholders})
         ON CONFLICT(nct_id) DO UPDATE SET {updates}, updated_at = datetime('now')"
    )
});

// ── Upsert ──

/// Validate and store one canonical record. Rerunning with the same record
/// leaves the row unchanged except `updated_at`; rerunning with a changed
/// record overwrites every data column, nulls included.
pub fn upsert_trial(conn: &Connection, record: &CanonicalRecord) -> Result<(), PipelineError> {
    validate(record)?;
    conn.execute(&UPSERT_SQL, rusqlite::params_from_iter(bind_values(record)))
        .map_err(classify_sqlite)?;
    Ok(())
}

pub fn validate(record: &CanonicalRecord) -> Result<(), PipelineError> {
    if record.values.len() != COLUMNS.len() {
        return Err(PipelineError::Validation(format!(
            "expected {} columns, found {}",
            COLUMNS.len(),
            record.values.len()
        )));
    }
    if !record.nct_id().is_some_and(|id| !id.trim().is_empty()) {
        return Err(PipelineError::Validation("record has no nct_id".into()));
    }
    for (col, v) in COLUMNS.iter().zip(&record.values) {
        let Some(v) = v else { continue };
        let ok = match col.kind {
            ColumnKind::Integer => v.is_i64() || v.is_u64(),
            ColumnKind::Text | ColumnKind::Date => v.is_string(),
            ColumnKind::JsonArr => v.is_array(),
            ColumnKind::JsonObj => v.is_object() || v.is_array(),
        };
        if !ok {
            return Err(PipelineError::Validation(format!(
                "column {} holds a {} value",
                col.name,
                json_type(v)
            )));
        }
    }
    Ok(())
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn bind_values(record: &CanonicalRecord) -> Vec<rusqlite::types::Value> {
    use rusqlite::types::Value as Sql;
    COLUMNS
        .iter()
        .zip(&record.values)
        .map(|(col, v)| match v {
            None | Some(Value::Null) => Sql::Null,
            Some(v) => match col.kind {
                ColumnKind::Integer => v.as_i64().map_or(Sql::Null, Sql::Integer),
                ColumnKind::Text | ColumnKind::Date => match v {
                    Value::String(s) => Sql::Text(s.clone()),
                    other => Sql::Text(other.to_string()),
                },
                ColumnKind::JsonArr | ColumnKind::JsonObj => Sql::Text(v.to_string()),
            },
        })
        .collect()
}

// ── Reads ──

/// Rehydrate one stored trial as JSON, parsing the JSON-document columns
/// back into structure.
pub fn fetch_canonical(conn: &Connection, nct_id: &str) -> Result<Option<Value>> {
    let sql = format!(
        "SELECT {} FROM trials WHERE nct_id = ?1",
        COLUMNS.iter().map(|c| c.name).join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([nct_id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut map = Map::new();
    for (i, col) in COLUMNS.iter().enumerate() {
        let v = match col.kind {
            ColumnKind::Integer => row.get::<_, Option<i64>>(i)?.map(Value::from),
            ColumnKind::Text | ColumnKind::Date => {
                row.get::<_, Option<String>>(i)?.map(Value::String)
            }
            ColumnKind::JsonArr | ColumnKind::JsonObj => row
                .get::<_, Option<String>>(i)?
                .and_then(|s| serde_json::from_str(&s).ok()),
        };
        map.insert(col.name.to_string(), v.unwrap_or(Value::Null));
    }
    Ok(Some(Value::Object(map)))
}

pub struct OverviewRow {
    pub nct_id: String,
    pub brief_title: String,
    pub status: String,
    pub phase: String,
    pub study_type: String,
    pub primary_sponsor: String,
    pub target_enrollment: Option<i64>,
    pub start_date: String,
}

pub fn fetch_overview(
    conn: &Connection,
    status: Option<&str>,
    phase: Option<&str>,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(s) = status {
        conditions.push(format!("status LIKE ?{}", params.len() + 1));
        params.push(Box::new(s.to_string()));
    }
    if let Some(p) = phase {
        conditions.push(format!("phase LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", p)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT nct_id, COALESCE(brief_title,''), COALESCE(status,''), COALESCE(phase,''),
                COALESCE(study_type,''), COALESCE(primary_sponsor,''),
                target_enrollment, COALESCE(start_date,'')
         FROM trials{}
         ORDER BY start_date DESC, nct_id
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(OverviewRow {
                nct_id: row.get(0)?,
                brief_title: row.get(1)?,
                status: row.get(2)?,
                phase: row.get(3)?,
                study_type: row.get(4)?,
                primary_sponsor: row.get(5)?,
                target_enrollment: row.get(6)?,
                start_date: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Search ──

pub struct SearchHit {
    pub nct_id: String,
    pub brief_title: String,
    pub status: String,
    pub phase: String,
    pub rank: f64,
}

/// Ranked full-text query. Terms are quoted and implicitly ANDed; column
/// weights follow the declared search tiers.
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let match_expr = fts_match_expr(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }
    let weights = search_columns()
        .map(|c| format!("{:.1}", c.search.map(|w| w.bm25()).unwrap_or(1.0)))
        .join(", ");
    let sql = format!(
        "SELECT t.nct_id, COALESCE(t.brief_title,''), COALESCE(t.status,''), COALESCE(t.phase,''),
                bm25(trials_fts, {weights}) AS rank
         FROM trials_fts
         JOIN trials t ON t.rowid = trials_fts.rowid
         WHERE trials_fts MATCH ?1
         ORDER BY rank
         LIMIT {limit}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([&match_expr], |row| {
            Ok(SearchHit {
                nct_id: row.get(0)?,
                brief_title: row.get(1)?,
                status: row.get(2)?,
                phase: row.get(3)?,
                rank: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn fts_match_expr(raw: &str) -> String {
    raw.split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .join(" ")
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub enriched: usize,
    pub extraction_only: usize,
    pub by_status: Vec<(String, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM trials", [], |r| r.get(0))?;
    let enriched: usize = conn.query_row(
        "SELECT COUNT(*) FROM trials WHERE analyzed_data IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let mut stmt = conn.prepare(
        "SELECT COALESCE(status, 'UNKNOWN'), COUNT(*)
         FROM trials GROUP BY 1 ORDER BY 2 DESC, 1",
    )?;
    let by_status = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stats {
        total,
        enriched,
        extraction_only: total - enriched,
        by_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractedRecord, Intervention};
    use crate::mapper::to_canonical;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn record(nct_id: &str, title: &str) -> CanonicalRecord {
        let mut rec = ExtractedRecord::default();
        rec.basic_info.nct_id = Some(nct_id.into());
        rec.basic_info.brief_title = Some(title.into());
        rec.basic_info.overall_status = Some("RECRUITING".into());
        rec.eligibility.minimum_age = Some("18 Years".into());
        rec.interventions = vec![Intervention {
            name: Some("Pembrolizumab".into()),
            intervention_type: Some("DRUG".into()),
            ..Default::default()
        }];
        to_canonical(&rec, None)
    }

    fn row_count(conn: &Connection) -> usize {
        conn.query_row("SELECT COUNT(*) FROM trials", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn schema_init_is_idempotent() {
        let conn = test_conn();
        init_schema(&conn).unwrap();
        let cols: usize = conn
            .query_row("SELECT COUNT(*) FROM pragma_table_info('trials')", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(cols, COLUMNS.len() + 2);
    }

    #[test]
    fn upsert_then_fetch_round_trips() {
        let conn = test_conn();
        let rec = record("NCT01234567", "Melanoma vaccine study");
        upsert_trial(&conn, &rec).unwrap();

        let stored = fetch_canonical(&conn, "NCT01234567").unwrap().unwrap();
        assert_eq!(stored["nct_id"], "NCT01234567");
        assert_eq!(stored["brief_title"], "Melanoma vaccine study");
        assert_eq!(stored["min_age"], 18);
        assert_eq!(stored["interventions"][0]["name"], "Pembrolizumab");
        assert_eq!(stored["drug_names"], serde_json::json!(["Pembrolizumab"]));
        assert!(stored["analyzed_data"].is_null());
    }

    #[test]
    fn upsert_is_idempotent() {
        let conn = test_conn();
        let rec = record("NCT01234567", "Melanoma vaccine study");
        upsert_trial(&conn, &rec).unwrap();
        upsert_trial(&conn, &rec).unwrap();
        assert_eq!(row_count(&conn), 1);

        let stored = fetch_canonical(&conn, "NCT01234567").unwrap().unwrap();
        assert_eq!(stored["brief_title"], "Melanoma vaccine study");
    }

    #[test]
    fn rerun_overwrites_every_column() {
        let conn = test_conn();
        upsert_trial(&conn, &record("NCT01234567", "Old title")).unwrap();

        let mut rec = ExtractedRecord::default();
        rec.basic_info.nct_id = Some("NCT01234567".into());
        rec.basic_info.brief_title = Some("New title".into());
        upsert_trial(&conn, &to_canonical(&rec, None)).unwrap();

        assert_eq!(row_count(&conn), 1);
        let stored = fetch_canonical(&conn, "NCT01234567").unwrap().unwrap();
        assert_eq!(stored["brief_title"], "New title");
        assert!(stored["status"].is_null(), "stale status must not survive");
        assert!(stored["min_age"].is_null());
    }

    #[test]
    fn missing_identifier_is_a_validation_error() {
        let conn = test_conn();
        let rec = to_canonical(&ExtractedRecord::default(), None);
        let err = upsert_trial(&conn, &rec).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(row_count(&conn), 0);
    }

    #[test]
    fn shape_mismatch_is_a_validation_error() {
        let conn = test_conn();
        let mut rec = record("NCT01234567", "A title");
        let idx = COLUMNS.iter().position(|c| c.name == "min_age").unwrap();
        rec.values[idx] = Some(serde_json::json!("eighteen"));
        let err = upsert_trial(&conn, &rec).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn search_follows_updates() {
        let conn = test_conn();
        upsert_trial(&conn, &record("NCT01234567", "Melanoma vaccine study")).unwrap();

        let hits = search(&conn, "melanoma", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].nct_id, "NCT01234567");

        upsert_trial(&conn, &record("NCT01234567", "Glioma imaging study")).unwrap();
        assert!(search(&conn, "melanoma", 10).unwrap().is_empty());
        assert_eq!(search(&conn, "glioma", 10).unwrap().len(), 1);
    }

    #[test]
    fn search_ranks_title_hits_first() {
        let conn = test_conn();
        upsert_trial(&conn, &record("NCT00000001", "Melanoma vaccine study")).unwrap();

        let mut rec = ExtractedRecord::default();
        rec.basic_info.nct_id = Some("NCT00000002".into());
        rec.basic_info.brief_title = Some("Unrelated study".into());
        rec.basic_info.lead_sponsor = Some("Melanoma Research Group".into());
        upsert_trial(&conn, &to_canonical(&rec, None)).unwrap();

        let hits = search(&conn, "melanoma", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].nct_id, "NCT00000001");
    }

    #[test]
    fn stats_split_enriched_from_extraction_only() {
        let conn = test_conn();
        upsert_trial(&conn, &record("NCT00000001", "First")).unwrap();

        let mut rec = ExtractedRecord::default();
        rec.basic_info.nct_id = Some("NCT00000002".into());
        rec.basic_info.overall_status = Some("COMPLETED".into());
        let enrichment = serde_json::json!({
            "core_trial_metadata": { "status": "COMPLETED" }
        });
        upsert_trial(&conn, &to_canonical(&rec, Some(&enrichment))).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.enriched, 1);
        assert_eq!(stats.extraction_only, 1);
        assert!(stats.by_status.contains(&("RECRUITING".into(), 1)));
        assert!(stats.by_status.contains(&("COMPLETED".into(), 1)));
    }

    #[test]
    fn overview_filters_by_status_and_phase() {
        let conn = test_conn();
        upsert_trial(&conn, &record("NCT00000001", "First")).unwrap();

        let mut rec = ExtractedRecord::default();
        rec.basic_info.nct_id = Some("NCT00000002".into());
        rec.basic_info.overall_status = Some("COMPLETED".into());
        rec.study_design.phases = vec!["PHASE2".into()];
        upsert_trial(&conn, &to_canonical(&rec, None)).unwrap();

        let all = fetch_overview(&conn, None, None, 50).unwrap();
        assert_eq!(all.len(), 2);

        let recruiting = fetch_overview(&conn, Some("recruiting"), None, 50).unwrap();
        assert_eq!(recruiting.len(), 1);
        assert_eq!(recruiting[0].nct_id, "NCT00000001");

        let phase2 = fetch_overview(&conn, None, Some("PHASE2"), 50).unwrap();
        assert_eq!(phase2.len(), 1);
        assert_eq!(phase2[0].nct_id, "NCT00000002");
    }

    #[test]
    fn fetch_canonical_misses_cleanly() {
        let conn = test_conn();
        assert!(fetch_canonical(&conn, "NCT99999999").unwrap().is_none());
    }
}
