use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::fields::collapse_ws;

static INCLUSION_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:INCLUSION|ELIGIBILITY)\s+CRITERIA\s*[:.\-]?\s*(.*?)(?:EXCLUSION\s+CRITERIA|\z)")
        .unwrap()
});
static EXCLUSION_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)EXCLUSION\s+CRITERIA\s*[:.\-]?\s*(.*)\z").unwrap());
static EXCLUSION_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)EXCLUSION\s+CRITERIA").unwrap());
static ITEM_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d{1,3}[.)]|[-*•]|[a-z]\))\s+").unwrap());
static HEADER_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(?:key\s+)?(?:inclusion|exclusion|eligibility)\s+criteria|criteria|note)\s*[:.\-]?\s*$")
        .unwrap()
});

static DEMOGRAPHIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(age|aged|years?\s+old|male|female|men|women|adults?|pediatric|child(?:ren)?|infants?|elderly|pregnan\w*|breast-?feed\w*|lactat\w*|contracept\w*|body\s+mass|bmi|weight|postmenopausal)\b",
    )
    .unwrap()
});
static MEDICAL_CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(diagnos\w*|histolog\w*|confirmed|disease|cancer|carcinoma|tumou?r|leukemia|lymphoma|melanoma|syndrome|disorder|infect\w*|hepati\w*|diabet\w*|hypertensi\w*|malignan\w*|metasta\w*|stage\s+[ivx0-9]+|condition|illness|impair\w*|insufficien\w*|failure|allerg\w*|hypersensitiv\w*|cardiac|myocardial|stroke|seizure|psychiatric|renal|hepatic|pulmonary|hiv|hbv|hcv)\b",
    )
    .unwrap()
});
static LAB_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\bhemoglobin\b|\bhaemoglobin\b|\bplatelets?\b|\bneutrophil\w*\b|\bcreatinine\b|\bbilirubin\b|\btransaminase\w*\b|\bAST\b|\bALT\b|\bANC\b|\bWBC\b|\bINR\b|\balbumin\b|\bglucose\b|\bHbA1c\b|\blaborator\w*\b|\bserum\b|\bclearance\b|\bejection\s+fraction\b|mg/dl|g/dl|mmol|cells/|/mm3|x\s*10)",
    )
    .unwrap()
});
static PRIOR_TREATMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\bprior\b|\bpreviously?\b|\bprevious\b|\bpre-?treat\w*\b|\bwashout\b|\brefractory\b|\brelaps\w*\b|\btreatment-?\s?naive\b|\binvestigational\s+(?:agents?|drugs?|products?)\b|\bconcomitant\s+(?:medications?|therap\w*)\b|\bhistory\s+of\s+(?:treatment|therapy|chemotherapy|radiation)\b|\bvaccinat\w*\b)",
    )
    .unwrap()
});

/// Criterion taxonomy. Matching runs in declaration order and the first hit
/// wins; anything unmatched is Other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Demographic,
    MedicalCondition,
    LabValue,
    PriorTreatment,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub text: String,
    pub category: Category,
    pub raw_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCriteria {
    pub inclusion: Vec<Criterion>,
    pub exclusion: Vec<Criterion>,
}

/// Split a free-text eligibility blob into categorized inclusion and
/// exclusion entries.
pub fn parse(text: &str) -> ParsedCriteria {
    let (inclusion_blob, exclusion_blob) = split_sections(text);
    ParsedCriteria {
        inclusion: parse_section(&inclusion_blob),
        exclusion: parse_section(&exclusion_blob),
    }
}

/// Text before the exclusion header is inclusion; text after it is
/// exclusion. A blob with no recognized header at all is read entirely as
/// inclusion criteria.
fn split_sections(text: &str) -> (String, String) {
    let exclusion = EXCLUSION_SECTION_RE
        .captures(text)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let inclusion = match INCLUSION_SECTION_RE.captures(text) {
        Some(c) => c[1].to_string(),
        None => match EXCLUSION_HEADER_RE.find(text) {
            Some(m) => text[..m.start()].to_string(),
            None => text.to_string(),
        },
    };
    (inclusion, exclusion)
}

fn parse_section(blob: &str) -> Vec<Criterion> {
    let has_markers = blob
        .lines()
        .any(|l| ITEM_START_RE.is_match(l.trim_start()));
    let texts = if has_markers {
        split_marked(blob)
    } else {
        split_plain(blob)
    };
    texts
        .into_iter()
        .enumerate()
        .map(|(raw_index, text)| Criterion {
            category: categorize(&text),
            text,
            raw_index,
        })
        .collect()
}

/// Marker mode: a line starting with an enumeration marker opens a new
/// entry; any other line continues the current one. Text before the first
/// marker is preamble and dropped.
fn split_marked(blob: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    for line in blob.lines() {
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        if let Some(m) = ITEM_START_RE.find(t) {
            flush(&mut items, &mut current);
            current.push_str(&t[m.end()..]);
        } else if !current.is_empty() {
            current.push(' ');
            current.push_str(t);
        }
    }
    flush(&mut items, &mut current);
    items
}

/// Line mode for blobs with no markers at all: each non-trivial line is its
/// own entry, with header-looking and very short noise lines dropped.
fn split_plain(blob: &str) -> Vec<String> {
    blob.lines()
        .map(|l| collapse_ws(l))
        .filter(|t| t.len() > 3 && !HEADER_LINE_RE.is_match(t))
        .collect()
}

fn flush(items: &mut Vec<String>, current: &mut String) {
    let text = collapse_ws(current);
    if !text.is_empty() {
        items.push(text);
    }
    current.clear();
}

fn categorize(text: &str) -> Category {
    if DEMOGRAPHIC_RE.is_match(text) {
        Category::Demographic
    } else if MEDICAL_CONDITION_RE.is_match(text) {
        Category::MedicalCondition
    } else if LAB_VALUE_RE.is_match(text) {
        Category::LabValue
    } else if PRIOR_TREATMENT_RE.is_match(text) {
        Category::PriorTreatment
    } else {
        Category::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_sections_and_categorizes() {
        let blob = "INCLUSION CRITERIA:\n\
                    1. Age 18 years or older\n\
                    2. Histologically confirmed diagnosis of melanoma\n\
                    EXCLUSION CRITERIA:\n\
                    1. Prior treatment with investigational agents";
        let parsed = parse(blob);

        assert_eq!(parsed.inclusion.len(), 2);
        assert_eq!(parsed.inclusion[0].text, "Age 18 years or older");
        assert_eq!(parsed.inclusion[0].category, Category::Demographic);
        assert_eq!(parsed.inclusion[0].raw_index, 0);
        assert_eq!(parsed.inclusion[1].category, Category::MedicalCondition);
        assert_eq!(parsed.inclusion[1].raw_index, 1);

        assert_eq!(parsed.exclusion.len(), 1);
        assert_eq!(
            parsed.exclusion[0].text,
            "Prior treatment with investigational agents"
        );
        assert_eq!(parsed.exclusion[0].category, Category::PriorTreatment);
    }

    #[test]
    fn eligibility_header_counts_as_inclusion() {
        let parsed = parse("ELIGIBILITY CRITERIA:\n- Adults with type 2 diabetes");
        assert_eq!(parsed.inclusion.len(), 1);
        assert!(parsed.exclusion.is_empty());
    }

    #[test]
    fn headerless_blob_is_inclusion() {
        let parsed = parse("1. Age 18 or older\n2. Able to give informed consent");
        assert_eq!(parsed.inclusion.len(), 2);
        assert!(parsed.exclusion.is_empty());
    }

    #[test]
    fn continuation_lines_merge() {
        let blob = "Inclusion Criteria:\n\
                    1. Histologically confirmed diagnosis\n\
                       of stage III or IV disease\n\
                    2. Adequate organ function";
        let parsed = parse(blob);
        assert_eq!(parsed.inclusion.len(), 2);
        assert_eq!(
            parsed.inclusion[0].text,
            "Histologically confirmed diagnosis of stage III or IV disease"
        );
    }

    #[test]
    fn bullet_and_paren_markers() {
        let blob = "Inclusion criteria:\n- First criterion here\n* Second criterion here\n• Third criterion here\na) Fourth criterion here\n2) Fifth criterion here";
        let parsed = parse(blob);
        let texts: Vec<_> = parsed.inclusion.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "First criterion here",
                "Second criterion here",
                "Third criterion here",
                "Fourth criterion here",
                "Fifth criterion here"
            ]
        );
    }

    #[test]
    fn decimal_values_do_not_split_entries() {
        let blob = "Inclusion criteria:\n1. Creatinine below\n2.5 mg/dL at screening";
        let parsed = parse(blob);
        assert_eq!(parsed.inclusion.len(), 1);
        assert_eq!(
            parsed.inclusion[0].text,
            "Creatinine below 2.5 mg/dL at screening"
        );
        assert_eq!(parsed.inclusion[0].category, Category::LabValue);
    }

    #[test]
    fn lab_values_categorize() {
        let parsed = parse("1. Hemoglobin at least 9 g/dL required for entry");
        assert_eq!(parsed.inclusion[0].category, Category::LabValue);
    }

    #[test]
    fn whitespace_collapses() {
        let parsed = parse("1. Age   18\tyears\n   or older");
        assert_eq!(parsed.inclusion[0].text, "Age 18 years or older");
    }

    #[test]
    fn header_only_blob_is_empty() {
        let parsed = parse("Inclusion Criteria:");
        assert!(parsed.inclusion.is_empty());
        assert!(parsed.exclusion.is_empty());
    }

    #[test]
    fn empty_input() {
        let parsed = parse("");
        assert!(parsed.inclusion.is_empty());
        assert!(parsed.exclusion.is_empty());
    }

    #[test]
    fn reparsing_segmented_output_is_stable() {
        let blob = "Inclusion Criteria:\n\
                    1. Age 18 years or older\n\
                    2. Histologically confirmed diagnosis of melanoma\n\
                    3. Adequate organ function per protocol";
        let first = parse(blob);
        let rejoined = first
            .inclusion
            .iter()
            .map(|c| c.text.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let second = parse(&rejoined);
        let first_texts: Vec<_> = first.inclusion.iter().map(|c| &c.text).collect();
        let second_texts: Vec<_> = second.inclusion.iter().map(|c| &c.text).collect();
        assert_eq!(first_texts, second_texts);
    }

    #[test]
    fn categories_serialize_snake_case() {
        let c = Criterion {
            text: "Adults only".into(),
            category: Category::MedicalCondition,
            raw_index: 0,
        };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["category"], "medical_condition");
        assert_eq!(v["raw_index"], 0);
    }
}
