use itertools::Itertools;
use serde_json::{json, Map, Value};

use crate::extract::fields::{clean_text, normalize_date, parse_int, scalar_text, value_at};
use crate::extract::ExtractedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Date,
    JsonArr,
    JsonObj,
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Integer => "INTEGER",
            _ => "TEXT",
        }
    }
}

/// Ranked-search tiers, highest relevance first. Identifier and titles rank
/// above sponsor/phase/status/type, which rank above design descriptors,
/// which rank above demographic descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchWeight {
    A,
    B,
    C,
    D,
}

impl SearchWeight {
    pub fn bm25(self) -> f64 {
        match self {
            SearchWeight::A => 10.0,
            SearchWeight::B => 5.0,
            SearchWeight::C => 2.0,
            SearchWeight::D => 1.0,
        }
    }
}

pub type DeriveFn = fn(&Ctx) -> Option<Value>;

/// One column of the canonical trials table. The table of these drives
/// everything downstream: DDL, upsert SQL and the search index all come
/// from `COLUMNS`, so growing the schema means adding one entry here.
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub enrich: &'static [&'static str],
    pub extract: &'static [&'static str],
    pub derive: Option<DeriveFn>,
    pub search: Option<SearchWeight>,
    pub indexed: bool,
}

impl ColumnSpec {
    const fn new(name: &'static str, kind: ColumnKind) -> Self {
        ColumnSpec {
            name,
            kind,
            enrich: &[],
            extract: &[],
            derive: None,
            search: None,
            indexed: false,
        }
    }

    const fn enrich(mut self, paths: &'static [&'static str]) -> Self {
        self.enrich = paths;
        self
    }

    const fn extract(mut self, paths: &'static [&'static str]) -> Self {
        self.extract = paths;
        self
    }

    const fn derived(mut self, f: DeriveFn) -> Self {
        self.derive = Some(f);
        self
    }

    const fn weight(mut self, w: SearchWeight) -> Self {
        self.search = Some(w);
        self
    }

    const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

const fn text(name: &'static str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnKind::Text)
}
const fn integer(name: &'static str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnKind::Integer)
}
const fn date(name: &'static str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnKind::Date)
}
const fn arr(name: &'static str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnKind::JsonArr)
}
const fn obj(name: &'static str) -> ColumnSpec {
    ColumnSpec::new(name, ColumnKind::JsonObj)
}

use SearchWeight::{A, B, C, D};

/// The canonical schema: 88 data columns. Per column, resolution tries the
/// enrichment paths in order, then the extracted-record paths, then the
/// derive function; the first usable value wins and anything unresolvable
/// is null.
pub const COLUMNS: &[ColumnSpec] = &[
    text("nct_id")
        .enrich(&["core_trial_metadata.nct_id"])
        .extract(&["basic_info.nct_id"])
        .weight(A),
    text("status")
        .enrich(&["core_trial_metadata.status"])
        .extract(&["basic_info.overall_status"])
        .weight(B)
        .indexed(),
    date("registration_date")
        .enrich(&["core_trial_metadata.dates.registration"])
        .extract(&["basic_info.study_first_submit_date"]),
    date("start_date")
        .enrich(&["core_trial_metadata.dates.start"])
        .extract(&["basic_info.start_date"])
        .indexed(),
    date("completion_date")
        .enrich(&["core_trial_metadata.dates.completion"])
        .extract(&["basic_info.completion_date"])
        .indexed(),
    date("last_update_date")
        .enrich(&["core_trial_metadata.dates.last_update"])
        .extract(&["basic_info.last_update_date"]),
    date("study_first_submit_date").extract(&["basic_info.study_first_submit_date"]),
    date("primary_completion_date").extract(&["basic_info.primary_completion_date"]),
    text("phase")
        .enrich(&["core_trial_metadata.phase"])
        .extract(&["study_design.phases"])
        .weight(B)
        .indexed(),
    text("study_type")
        .enrich(&["core_trial_metadata.study_type"])
        .extract(&["study_design.study_type"])
        .weight(B)
        .indexed(),
    integer("target_enrollment")
        .enrich(&["core_trial_metadata.enrollment.target"])
        .extract(&["study_design.enrollment"])
        .indexed(),
    integer("actual_enrollment")
        .enrich(&["core_trial_metadata.enrollment.actual"])
        .indexed(),
    text("enrollment_type")
        .extract(&["study_design.enrollment_type"])
        .indexed(),
    text("primary_sponsor")
        .enrich(&["core_trial_metadata.sponsor_collaborators.primary_sponsor"])
        .extract(&["basic_info.lead_sponsor"])
        .weight(B)
        .indexed(),
    text("primary_sponsor_class")
        .enrich(&["core_trial_metadata.sponsor_collaborators.primary_sponsor_class"])
        .extract(&["basic_info.lead_sponsor_class"])
        .indexed(),
    arr("collaborators")
        .enrich(&["core_trial_metadata.sponsor_collaborators.collaborators"])
        .extract(&["basic_info.collaborators"]),
    text("lead_sponsor").extract(&["basic_info.lead_sponsor"]),
    text("brief_title").extract(&["basic_info.brief_title"]).weight(A),
    text("official_title").extract(&["basic_info.official_title"]).weight(A),
    text("allocation")
        .enrich(&["scientific_content.study_design.allocation"])
        .extract(&["study_design.allocation"])
        .weight(C)
        .indexed(),
    text("intervention_model")
        .enrich(&["scientific_content.study_design.intervention_model"])
        .extract(&["study_design.intervention_model"])
        .weight(C)
        .indexed(),
    text("intervention_model_description")
        .extract(&["study_design.intervention_model_description"]),
    text("masking")
        .enrich(&["scientific_content.study_design.masking"])
        .extract(&["study_design.masking"])
        .weight(C)
        .indexed(),
    text("masking_description").extract(&["study_design.masking_description"]),
    text("primary_purpose")
        .enrich(&["scientific_content.study_design.primary_purpose"])
        .extract(&["study_design.primary_purpose"])
        .weight(C)
        .indexed(),
    arr("interventions")
        .enrich(&["scientific_content.intervention"])
        .extract(&["interventions"]),
    arr("intervention_types").derived(derive_intervention_types),
    arr("drug_names").derived(derive_drug_names),
    arr("dosages").derived(derive_dosages),
    arr("administration_routes").derived(derive_administration_routes),
    arr("mechanisms_of_action").enrich(&["scientific_content.mechanism_of_action"]),
    obj("target_pathways").enrich(&["scientific_content.target_pathway"]),
    arr("target_genes").enrich(&[
        "scientific_content.target_pathway.gene",
        "scientific_content.target_pathway.genes",
    ]),
    arr("target_proteins").enrich(&[
        "scientific_content.target_pathway.protein",
        "scientific_content.target_pathway.proteins",
    ]),
    arr("target_chemical_compounds").enrich(&[
        "scientific_content.target_pathway.chemical_compound",
        "scientific_content.target_pathway.chemical_compounds",
    ]),
    arr("biomarkers").enrich(&[
        "scientific_content.biomarkers",
        "scientific_content.biomarker",
    ]),
    arr("biomarker_types").enrich(&["scientific_content.biomarker_types"]),
    arr("arms_groups")
        .enrich(&["scientific_content.arms_groups"])
        .extract(&["study_design.arms"]),
    integer("number_of_arms").derived(derive_number_of_arms),
    arr("primary_outcomes")
        .enrich(&["scientific_content.outcomes.primary"])
        .extract(&["outcomes.primary"]),
    arr("secondary_outcomes")
        .enrich(&["scientific_content.outcomes.secondary"])
        .extract(&["outcomes.secondary"]),
    arr("other_outcomes").extract(&["outcomes.other"]),
    arr("inclusion_criteria")
        .enrich(&["patient_related_information.eligibility_criteria.inclusion"])
        .extract(&["eligibility.inclusion_criteria"]),
    arr("exclusion_criteria")
        .enrich(&["patient_related_information.eligibility_criteria.exclusion"])
        .extract(&["eligibility.exclusion_criteria"]),
    obj("eligibility_criteria_structured").derived(derive_eligibility_structured),
    integer("min_age")
        .enrich(&["patient_related_information.demographics.age.min"])
        .extract(&["eligibility.minimum_age"])
        .indexed(),
    integer("max_age")
        .enrich(&["patient_related_information.demographics.age.max"])
        .extract(&["eligibility.maximum_age"])
        .indexed(),
    text("eligible_sex")
        .enrich(&["patient_related_information.demographics.sex"])
        .extract(&["eligibility.sex"])
        .weight(D)
        .indexed(),
    text("healthy_volunteers")
        .extract(&["eligibility.healthy_volunteers"])
        .weight(D)
        .indexed(),
    arr("demographics_other").enrich(&["patient_related_information.demographics.other"]),
    arr("conditions").extract(&["basic_info.conditions"]),
    arr("disease_subtypes")
        .enrich(&["patient_related_information.disease_characteristics.subtypes"]),
    arr("disease_stages")
        .enrich(&["patient_related_information.disease_characteristics.stages"]),
    text("disease_severity")
        .enrich(&["patient_related_information.disease_characteristics.severity"])
        .weight(D),
    arr("keywords").extract(&["basic_info.keywords"]),
    arr("required_prior_treatments")
        .enrich(&["patient_related_information.prior_treatments.required"]),
    arr("excluded_prior_treatments")
        .enrich(&["patient_related_information.prior_treatments.excluded"]),
    arr("locations")
        .enrich(&["operational_aspects.locations"])
        .extract(&["operational.locations"]),
    arr("countries").derived(derive_countries),
    arr("facility_names").derived(derive_facility_names),
    arr("facility_status").derived(derive_facility_status),
    arr("investigators").enrich(&["operational_aspects.investigators"]),
    arr("overall_officials").extract(&["operational.overall_officials"]),
    obj("responsible_party").extract(&["operational.responsible_party"]),
    obj("enrollment_status").enrich(&["operational_aspects.enrollment_status"]),
    arr("site_recruitment_status")
        .enrich(&["operational_aspects.enrollment_status.site_specific"]),
    obj("ipd_sharing")
        .enrich(&["operational_aspects.ipd_sharing"])
        .extract(&["operational.ipd_sharing"]),
    text("ipd_sharing_plan")
        .enrich(&["operational_aspects.ipd_sharing.plan"])
        .extract(&["operational.ipd_sharing.plan"]),
    text("ipd_sharing_time_frame")
        .enrich(&["operational_aspects.ipd_sharing.time_frame"])
        .extract(&["operational.ipd_sharing.time_frame"]),
    text("ipd_sharing_access_criteria")
        .enrich(&["operational_aspects.ipd_sharing.access_criteria"])
        .extract(&["operational.ipd_sharing.access_criteria"]),
    text("ipd_sharing_url")
        .enrich(&["operational_aspects.ipd_sharing.url"])
        .extract(&["operational.ipd_sharing.url"]),
    arr("central_contacts").extract(&["operational.central_contacts"]),
    obj("overall_contact").derived(derive_overall_contact),
    obj("overall_contact_backup").derived(derive_overall_contact_backup),
    arr("trial_references").extract(&["operational.references"]),
    arr("results_references").derived(derive_results_references),
    arr("provided_documents").extract(&["operational.provided_documents"]),
    obj("oversight_info").extract(&["operational.oversight"]),
    text("data_monitoring_committee").extract(&["operational.oversight.has_dmc"]),
    text("why_stopped").extract(&["basic_info.why_stopped"]),
    text("has_expanded_access").extract(&["basic_info.has_expanded_access"]),
    obj("expanded_access_info").extract(&["basic_info.expanded_access_info"]),
    integer("analysis_score").enrich(&["validation.overall_assessment.score"]),
    text("analysis_rationale").enrich(&["validation.overall_assessment.rationale"]),
    arr("missing_info").enrich(&["validation.missing_info"]),
    arr("recommendations").enrich(&["validation.recommendations"]),
    obj("original_data").derived(derive_original_data),
    obj("analyzed_data").derived(derive_analyzed_data),
];

const ANALYSIS_SECTIONS: &[&str] = &[
    "core_trial_metadata",
    "scientific_content",
    "patient_related_information",
    "operational_aspects",
];

/// Inputs visible to derive functions. `resolved` holds the columns already
/// resolved ahead of the current one, so derived columns see the merged
/// value (enrichment-or-extracted) of their sources.
pub struct Ctx<'a> {
    pub enrich: &'a Value,
    pub extracted: &'a Value,
    resolved: &'a [Option<Value>],
}

impl Ctx<'_> {
    fn resolved(&self, name: &str) -> Option<&Value> {
        let idx = COLUMNS.iter().position(|c| c.name == name)?;
        self.resolved.get(idx)?.as_ref()
    }
}

/// The 88 canonical values, positionally parallel to `COLUMNS`.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub values: Vec<Option<Value>>,
}

impl CanonicalRecord {
    pub fn get(&self, name: &str) -> Option<&Value> {
        let idx = COLUMNS.iter().position(|c| c.name == name)?;
        self.values.get(idx)?.as_ref()
    }

    pub fn nct_id(&self) -> Option<&str> {
        self.get("nct_id")?.as_str()
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (col, v) in COLUMNS.iter().zip(&self.values) {
            map.insert(col.name.to_string(), v.clone().unwrap_or(Value::Null));
        }
        Value::Object(map)
    }
}

/// Map an extracted record plus an optional (already normalized) enrichment
/// document onto the canonical shape. Mapping never fails and is
/// deterministic; enrichment wins per column only when it yields a usable
/// value.
pub fn to_canonical(extracted: &ExtractedRecord, enrichment: Option<&Value>) -> CanonicalRecord {
    let ex = serde_json::to_value(extracted).unwrap_or(Value::Null);
    let en = enrichment.cloned().unwrap_or(Value::Null);
    let mut values: Vec<Option<Value>> = Vec::with_capacity(COLUMNS.len());
    for col in COLUMNS {
        let v = resolve_column(col, &en, &ex, &values);
        values.push(v);
    }
    CanonicalRecord { values }
}

fn resolve_column(
    col: &ColumnSpec,
    enrich: &Value,
    extracted: &Value,
    resolved: &[Option<Value>],
) -> Option<Value> {
    for path in col.enrich {
        if let Some(v) = coerce(col.kind, value_at(enrich, path)) {
            return Some(v);
        }
    }
    for path in col.extract {
        if let Some(v) = coerce(col.kind, value_at(extracted, path)) {
            return Some(v);
        }
    }
    if let Some(f) = col.derive {
        let ctx = Ctx {
            enrich,
            extracted,
            resolved,
        };
        if let Some(raw) = f(&ctx) {
            return coerce(col.kind, Some(&raw));
        }
    }
    None
}

// ── Coercions ──

fn coerce(kind: ColumnKind, v: Option<&Value>) -> Option<Value> {
    let v = v?;
    if v.is_null() {
        return None;
    }
    match kind {
        ColumnKind::Text => coerce_text(v).map(Value::String),
        ColumnKind::Integer => parse_int(v).map(Value::from),
        ColumnKind::Date => coerce_date(v),
        ColumnKind::JsonArr => coerce_arr(v),
        ColumnKind::JsonObj => match v {
            Value::Object(_) | Value::Array(_) => Some(v.clone()),
            _ => None,
        },
    }
}

fn coerce_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => clean_text(s),
        Value::Bool(b) => Some(if *b { "Yes" } else { "No" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}

fn coerce_date(v: &Value) -> Option<Value> {
    match v {
        Value::String(s) => normalize_date(s).map(Value::String),
        Value::Number(n) => Some(Value::String(n.to_string())),
        _ => None,
    }
}

/// Arrays pass with sentinel elements filtered; a bare string or object
/// wraps into a singleton. An array left empty after filtering counts as
/// absent so resolution can fall through to the next source.
fn coerce_arr(v: &Value) -> Option<Value> {
    let items: Vec<Value> = match v {
        Value::Array(items) => items.iter().filter(|x| !is_sentinel(x)).cloned().collect(),
        Value::String(s) => clean_text(s).map(Value::String).into_iter().collect(),
        Value::Object(_) => vec![v.clone()],
        _ => return None,
    };
    if items.is_empty() {
        None
    } else {
        Some(Value::Array(items))
    }
}

fn is_sentinel(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => clean_text(s).is_none(),
        _ => false,
    }
}

// ── Derived columns ──

fn resolved_array<'a>(ctx: &'a Ctx, name: &str) -> Option<&'a Vec<Value>> {
    ctx.resolved(name)?.as_array()
}

fn string_key(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| v.get(*k).and_then(scalar_text))
}

fn strings_to_value(items: Vec<String>) -> Option<Value> {
    if items.is_empty() {
        None
    } else {
        Some(Value::Array(items.into_iter().map(Value::String).collect()))
    }
}

fn derive_intervention_types(ctx: &Ctx) -> Option<Value> {
    let items = resolved_array(ctx, "interventions")?;
    strings_to_value(
        items
            .iter()
            .filter_map(|i| string_key(i, &["type", "intervention_type"]))
            .unique()
            .collect(),
    )
}

fn derive_drug_names(ctx: &Ctx) -> Option<Value> {
    let items = resolved_array(ctx, "interventions")?;
    strings_to_value(
        items
            .iter()
            .filter(|i| {
                string_key(i, &["type", "intervention_type"])
                    .map(|t| {
                        let t = t.to_lowercase();
                        t.starts_with("drug") || t.starts_with("biolog")
                    })
                    .unwrap_or(false)
            })
            .filter_map(|i| string_key(i, &["name", "drug_name"]))
            .unique()
            .collect(),
    )
}

fn derive_dosages(ctx: &Ctx) -> Option<Value> {
    let items = resolved_array(ctx, "interventions")?;
    strings_to_value(
        items
            .iter()
            .filter_map(|i| string_key(i, &["dosage", "dose"]))
            .unique()
            .collect(),
    )
}

fn derive_administration_routes(ctx: &Ctx) -> Option<Value> {
    let items = resolved_array(ctx, "interventions")?;
    strings_to_value(
        items
            .iter()
            .filter_map(|i| string_key(i, &["administration_route", "route"]))
            .unique()
            .collect(),
    )
}

fn derive_number_of_arms(ctx: &Ctx) -> Option<Value> {
    let arms = resolved_array(ctx, "arms_groups")?;
    Some(Value::from(arms.len() as i64))
}

fn derive_countries(ctx: &Ctx) -> Option<Value> {
    let locations = resolved_array(ctx, "locations")?;
    strings_to_value(
        locations
            .iter()
            .filter_map(|l| string_key(l, &["country"]))
            .unique()
            .collect(),
    )
}

fn derive_facility_names(ctx: &Ctx) -> Option<Value> {
    let locations = resolved_array(ctx, "locations")?;
    strings_to_value(
        locations
            .iter()
            .filter_map(|l| string_key(l, &["facility", "facility_name", "name"]))
            .unique()
            .collect(),
    )
}

fn derive_facility_status(ctx: &Ctx) -> Option<Value> {
    let locations = resolved_array(ctx, "locations")?;
    let pairs: Vec<Value> = locations
        .iter()
        .filter_map(|l| {
            let facility = string_key(l, &["facility", "facility_name", "name"])?;
            let status = string_key(l, &["status", "recruitment_status"])?;
            Some(json!({ "facility": facility, "status": status }))
        })
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(Value::Array(pairs))
    }
}

fn derive_overall_contact(ctx: &Ctx) -> Option<Value> {
    resolved_array(ctx, "central_contacts")?.first().cloned()
}

fn derive_overall_contact_backup(ctx: &Ctx) -> Option<Value> {
    resolved_array(ctx, "central_contacts")?.get(1).cloned()
}

fn derive_results_references(ctx: &Ctx) -> Option<Value> {
    let refs = resolved_array(ctx, "trial_references")?;
    let results: Vec<Value> = refs
        .iter()
        .filter(|r| {
            string_key(r, &["type"])
                .map(|t| t.eq_ignore_ascii_case("result"))
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    if results.is_empty() {
        None
    } else {
        Some(Value::Array(results))
    }
}

fn derive_eligibility_structured(ctx: &Ctx) -> Option<Value> {
    value_at(ctx.extracted, "eligibility").cloned()
}

fn derive_original_data(ctx: &Ctx) -> Option<Value> {
    if ctx.extracted.is_null() {
        None
    } else {
        Some(ctx.extracted.clone())
    }
}

fn derive_analyzed_data(ctx: &Ctx) -> Option<Value> {
    let sections = ctx.enrich.as_object()?;
    let mut out = Map::new();
    for key in ANALYSIS_SECTIONS {
        if let Some(v) = sections.get(*key) {
            if !v.is_null() {
                out.insert((*key).to_string(), v.clone());
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(Value::Object(out))
    }
}
