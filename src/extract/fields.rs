use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static NCT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bNCT\d{8}\b").unwrap());
static NUMERIC_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})[-/.](\d{1,2})(?:[-/.](\d{1,2}))?$").unwrap());
static MONTH_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([A-Za-z]+)\.?\s+(?:(\d{1,2})(?:st|nd|rd|th)?,?\s+)?(\d{4})$").unwrap()
});
static LEADING_INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d[\d,]*)").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun",
    "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Walk `doc` along a dot-separated path. Missing segments, non-object
/// intermediates and explicit nulls all yield None. Array indices are not
/// part of path syntax; collections are taken whole at their key.
pub fn value_at<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for seg in path.split('.') {
        cur = cur.as_object()?.get(seg)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

/// First path in `paths` that yields a value.
pub fn first_at<'a>(doc: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    paths.iter().find_map(|p| value_at(doc, p))
}

pub fn text_at(doc: &Value, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| value_at(doc, p).and_then(scalar_text))
}

pub fn int_at(doc: &Value, paths: &[&str]) -> Option<i64> {
    paths.iter().find_map(|p| value_at(doc, p).and_then(parse_int))
}

pub fn date_at(doc: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|p| value_at(doc, p).and_then(scalar_text))
        .and_then(|s| normalize_date(&s))
}

/// Yes/No fields arrive as booleans in the current API shape and as strings
/// in legacy dumps.
pub fn yes_no_at(doc: &Value, paths: &[&str]) -> Option<String> {
    first_at(doc, paths).and_then(|v| match v {
        Value::Bool(true) => Some("Yes".to_string()),
        Value::Bool(false) => Some("No".to_string()),
        other => scalar_text(other),
    })
}

/// Collect a list of strings from the first matching path. Accepts plain
/// string arrays, arrays of objects carrying a `name` or `label` key, and a
/// bare string (wrapped as a singleton).
pub fn string_list_at(doc: &Value, paths: &[&str]) -> Vec<String> {
    match first_at(doc, paths) {
        Some(Value::Array(items)) => items.iter().filter_map(element_text).collect(),
        Some(Value::String(s)) => clean_text(s).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Object array at the first matching path, or empty.
pub fn objects_at<'a>(doc: &'a Value, paths: &[&str]) -> Vec<&'a Value> {
    match first_at(doc, paths) {
        Some(Value::Array(items)) => items.iter().collect(),
        _ => Vec::new(),
    }
}

fn element_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => clean_text(s),
        Value::Object(map) => map
            .get("name")
            .or_else(|| map.get("label"))
            .or_else(|| map.get("agency"))
            .and_then(scalar_text),
        _ => None,
    }
}

/// Scalar to cleaned text: strings trimmed with sentinels dropped, numbers
/// rendered decimal. Objects, arrays and booleans are not text.
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Trim and drop placeholder sentinels.
pub fn clean_text(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(t.to_string())
    }
}

pub fn collapse_ws(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").into_owned()
}

/// Integers from numbers or digit strings. Thousands separators are
/// stripped and a leading integer is accepted from unit-suffixed strings
/// ("18 Years" parses as 18).
pub fn parse_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let caps = LEADING_INT_RE.captures(s.trim())?;
            caps[1].replace(',', "").parse().ok()
        }
        _ => None,
    }
}

/// Normalize a date string without inventing precision: separators become
/// `-`, month-name forms become numeric, year-only stays year-only, and
/// unrecognized forms pass through trimmed.
pub fn normalize_date(raw: &str) -> Option<String> {
    let t = collapse_ws(raw);
    if t.is_empty() || t.eq_ignore_ascii_case("n/a") {
        return None;
    }
    Some(structured_date(&t).unwrap_or(t))
}

fn structured_date(t: &str) -> Option<String> {
    if let Some(caps) = NUMERIC_DATE_RE.captures(t) {
        let month: u32 = caps[2].parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        return match caps.get(3) {
            Some(day) => {
                let day: u32 = day.as_str().parse().ok()?;
                if !(1..=31).contains(&day) {
                    return None;
                }
                Some(format!("{}-{:02}-{:02}", &caps[1], month, day))
            }
            None => Some(format!("{}-{:02}", &caps[1], month)),
        };
    }

    let caps = MONTH_DATE_RE.captures(t)?;
    let month = month_number(&caps[1])?;
    match caps.get(2) {
        Some(day) => {
            let day: u32 = day.as_str().parse().ok()?;
            if !(1..=31).contains(&day) {
                return None;
            }
            Some(format!("{}-{:02}-{:02}", &caps[3], month, day))
        }
        None => Some(format!("{}-{:02}", &caps[3], month)),
    }
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|i| i as u32 + 1)
}

/// Last-resort identifier recovery: scan the serialized document for the
/// registry ID pattern.
pub fn scan_nct_id(doc: &Value) -> Option<String> {
    let raw = doc.to_string();
    NCT_ID_RE
        .find(&raw)
        .map(|m| m.as_str().to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_at_walks_nested_objects() {
        let doc = json!({"a": {"b": {"c": 7}}});
        assert_eq!(value_at(&doc, "a.b.c"), Some(&json!(7)));
        assert_eq!(value_at(&doc, "a.b.missing"), None);
        assert_eq!(value_at(&doc, "a.b.c.d"), None);
    }

    #[test]
    fn value_at_treats_null_as_absent() {
        let doc = json!({"a": null});
        assert_eq!(value_at(&doc, "a"), None);
    }

    #[test]
    fn first_at_respects_order() {
        let doc = json!({"new": "current", "old": "legacy"});
        assert_eq!(
            text_at(&doc, &["missing", "new", "old"]),
            Some("current".to_string())
        );
        assert_eq!(text_at(&doc, &["old", "new"]), Some("legacy".to_string()));
    }

    #[test]
    fn clean_text_drops_sentinels() {
        assert_eq!(clean_text("  hello "), Some("hello".to_string()));
        assert_eq!(clean_text("N/A"), None);
        assert_eq!(clean_text("n/a"), None);
        assert_eq!(clean_text("   "), None);
    }

    #[test]
    fn parse_int_handles_strings_and_units() {
        assert_eq!(parse_int(&json!(42)), Some(42));
        assert_eq!(parse_int(&json!("1,200")), Some(1200));
        assert_eq!(parse_int(&json!("18 Years")), Some(18));
        assert_eq!(parse_int(&json!("approx 20")), None);
        assert_eq!(parse_int(&json!(true)), None);
    }

    #[test]
    fn date_separators_normalize() {
        assert_eq!(normalize_date("2021/06/15"), Some("2021-06-15".to_string()));
        assert_eq!(normalize_date("2021.6.5"), Some("2021-06-05".to_string()));
        assert_eq!(normalize_date("2021-06-15"), Some("2021-06-15".to_string()));
    }

    #[test]
    fn month_name_dates_normalize() {
        assert_eq!(normalize_date("June 2021"), Some("2021-06".to_string()));
        assert_eq!(normalize_date("May 20, 2021"), Some("2021-05-20".to_string()));
        assert_eq!(normalize_date("Sept 3 1999"), Some("1999-09-03".to_string()));
    }

    #[test]
    fn date_granularity_is_preserved() {
        assert_eq!(normalize_date("2021"), Some("2021".to_string()));
        assert_eq!(normalize_date("2021-06"), Some("2021-06".to_string()));
    }

    #[test]
    fn unrecognized_dates_pass_through() {
        assert_eq!(
            normalize_date("  mid 2021  "),
            Some("mid 2021".to_string())
        );
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("N/A"), None);
    }

    #[test]
    fn string_list_wraps_and_unwraps() {
        let doc = json!({
            "plain": ["a", "b"],
            "objs": [{"name": "X"}, {"label": "Y"}, {"other": "Z"}],
            "single": "solo"
        });
        assert_eq!(string_list_at(&doc, &["plain"]), vec!["a", "b"]);
        assert_eq!(string_list_at(&doc, &["objs"]), vec!["X", "Y"]);
        assert_eq!(string_list_at(&doc, &["single"]), vec!["solo"]);
        assert!(string_list_at(&doc, &["missing"]).is_empty());
    }

    #[test]
    fn yes_no_renders_booleans() {
        let doc = json!({"b": true, "s": "No"});
        assert_eq!(yes_no_at(&doc, &["b"]), Some("Yes".to_string()));
        assert_eq!(yes_no_at(&doc, &["s"]), Some("No".to_string()));
    }

    #[test]
    fn scan_finds_identifier_anywhere() {
        let doc = json!({"misc": {"note": "see nct00001372 for details"}});
        assert_eq!(scan_nct_id(&doc), Some("NCT00001372".to_string()));
        assert_eq!(scan_nct_id(&json!({})), None);
    }
}
