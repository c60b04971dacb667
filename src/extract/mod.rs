pub mod criteria;
pub mod fields;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::criteria::Criterion;
use self::fields::{
    date_at, first_at, int_at, objects_at, scalar_text, scan_nct_id, string_list_at, text_at,
    value_at, yes_no_at,
};

/// Normalized intermediate record for one trial, produced without any
/// external service. Every sub-record is always present; a field the
/// document does not carry is null (scalars) or empty (lists).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub basic_info: BasicInfo,
    pub study_design: StudyDesign,
    pub eligibility: Eligibility,
    pub interventions: Vec<Intervention>,
    pub outcomes: Outcomes,
    pub operational: Operational,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub nct_id: Option<String>,
    pub brief_title: Option<String>,
    pub official_title: Option<String>,
    pub overall_status: Option<String>,
    pub why_stopped: Option<String>,
    pub start_date: Option<String>,
    pub completion_date: Option<String>,
    pub primary_completion_date: Option<String>,
    pub study_first_submit_date: Option<String>,
    pub last_update_date: Option<String>,
    pub lead_sponsor: Option<String>,
    pub lead_sponsor_class: Option<String>,
    pub collaborators: Vec<String>,
    pub conditions: Vec<String>,
    pub keywords: Vec<String>,
    pub has_expanded_access: Option<String>,
    pub expanded_access_info: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyDesign {
    pub study_type: Option<String>,
    pub phases: Vec<String>,
    pub allocation: Option<String>,
    pub intervention_model: Option<String>,
    pub intervention_model_description: Option<String>,
    pub masking: Option<String>,
    pub masking_description: Option<String>,
    pub who_masked: Vec<String>,
    pub primary_purpose: Option<String>,
    pub enrollment: Option<i64>,
    pub enrollment_type: Option<String>,
    pub arms: Vec<ArmGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Eligibility {
    pub inclusion_criteria: Vec<Criterion>,
    pub exclusion_criteria: Vec<Criterion>,
    pub minimum_age: Option<String>,
    pub maximum_age: Option<String>,
    pub sex: Option<String>,
    pub healthy_volunteers: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub intervention_type: Option<String>,
    pub description: Option<String>,
    pub arm_group_labels: Vec<String>,
    pub other_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmGroup {
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub arm_type: Option<String>,
    pub description: Option<String>,
    pub intervention_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub measure: Option<String>,
    pub description: Option<String>,
    pub time_frame: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcomes {
    pub primary: Vec<Outcome>,
    pub secondary: Vec<Outcome>,
    pub other: Vec<Outcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub facility: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub role: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Official {
    pub name: Option<String>,
    pub affiliation: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub pmid: Option<String>,
    #[serde(rename = "type")]
    pub ref_type: Option<String>,
    pub citation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponsibleParty {
    #[serde(rename = "type")]
    pub party_type: Option<String>,
    pub investigator_full_name: Option<String>,
    pub investigator_title: Option<String>,
    pub investigator_affiliation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Oversight {
    pub has_dmc: Option<String>,
    pub is_fda_regulated_drug: Option<String>,
    pub is_fda_regulated_device: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpdSharing {
    pub plan: Option<String>,
    pub description: Option<String>,
    pub info_types: Vec<String>,
    pub time_frame: Option<String>,
    pub access_criteria: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operational {
    pub locations: Vec<Location>,
    pub central_contacts: Vec<Contact>,
    pub overall_officials: Vec<Official>,
    pub responsible_party: Option<ResponsibleParty>,
    pub oversight: Option<Oversight>,
    pub ipd_sharing: Option<IpdSharing>,
    pub references: Vec<Reference>,
    pub provided_documents: Vec<Value>,
}

// ── Path tables ──
//
// First path addresses the current registry API shape; the rest cover
// legacy flat dumps. First hit wins.

const NCT_ID: &[&str] = &[
    "protocolSection.identificationModule.nctId",
    "nct_id",
    "nctId",
    "id_info.nct_id",
];
const BRIEF_TITLE: &[&str] = &[
    "protocolSection.identificationModule.briefTitle",
    "brief_title",
    "briefTitle",
];
const OFFICIAL_TITLE: &[&str] = &[
    "protocolSection.identificationModule.officialTitle",
    "official_title",
    "officialTitle",
];
const OVERALL_STATUS: &[&str] = &[
    "protocolSection.statusModule.overallStatus",
    "overall_status",
    "status",
];
const WHY_STOPPED: &[&str] = &["protocolSection.statusModule.whyStopped", "why_stopped"];
const START_DATE: &[&str] = &[
    "protocolSection.statusModule.startDateStruct.date",
    "start_date",
];
const COMPLETION_DATE: &[&str] = &[
    "protocolSection.statusModule.completionDateStruct.date",
    "completion_date",
];
const PRIMARY_COMPLETION_DATE: &[&str] = &[
    "protocolSection.statusModule.primaryCompletionDateStruct.date",
    "primary_completion_date",
];
const STUDY_FIRST_SUBMIT_DATE: &[&str] = &[
    "protocolSection.statusModule.studyFirstSubmitDate",
    "study_first_submitted",
    "study_first_submit_date",
];
const LAST_UPDATE_DATE: &[&str] = &[
    "protocolSection.statusModule.lastUpdatePostDateStruct.date",
    "last_update_posted",
    "last_update_date",
];
const LEAD_SPONSOR: &[&str] = &[
    "protocolSection.sponsorCollaboratorsModule.leadSponsor.name",
    "sponsors.lead_sponsor.agency",
    "lead_sponsor",
];
const LEAD_SPONSOR_CLASS: &[&str] = &[
    "protocolSection.sponsorCollaboratorsModule.leadSponsor.class",
    "sponsors.lead_sponsor.agency_class",
    "lead_sponsor_class",
];
const COLLABORATORS: &[&str] = &[
    "protocolSection.sponsorCollaboratorsModule.collaborators",
    "sponsors.collaborator",
    "collaborators",
];
const CONDITIONS: &[&str] = &[
    "protocolSection.conditionsModule.conditions",
    "condition",
    "conditions",
];
const KEYWORDS: &[&str] = &[
    "protocolSection.conditionsModule.keywords",
    "keyword",
    "keywords",
];
const HAS_EXPANDED_ACCESS: &[&str] = &[
    "protocolSection.statusModule.expandedAccessInfo.hasExpandedAccess",
    "has_expanded_access",
];
const EXPANDED_ACCESS_INFO: &[&str] = &[
    "protocolSection.statusModule.expandedAccessInfo",
    "expanded_access_info",
];

const STUDY_TYPE: &[&str] = &["protocolSection.designModule.studyType", "study_type"];
const PHASES: &[&str] = &["protocolSection.designModule.phases", "phase", "phases"];
const ALLOCATION: &[&str] = &[
    "protocolSection.designModule.designInfo.allocation",
    "study_design_info.allocation",
    "allocation",
];
const INTERVENTION_MODEL: &[&str] = &[
    "protocolSection.designModule.designInfo.interventionModel",
    "study_design_info.intervention_model",
    "intervention_model",
];
const INTERVENTION_MODEL_DESC: &[&str] = &[
    "protocolSection.designModule.designInfo.interventionModelDescription",
    "study_design_info.intervention_model_description",
];
const MASKING: &[&str] = &[
    "protocolSection.designModule.designInfo.maskingInfo.masking",
    "study_design_info.masking",
    "masking",
];
const MASKING_DESC: &[&str] = &[
    "protocolSection.designModule.designInfo.maskingInfo.maskingDescription",
    "study_design_info.masking_description",
];
const WHO_MASKED: &[&str] = &["protocolSection.designModule.designInfo.maskingInfo.whoMasked"];
const PRIMARY_PURPOSE: &[&str] = &[
    "protocolSection.designModule.designInfo.primaryPurpose",
    "study_design_info.primary_purpose",
    "primary_purpose",
];
const ENROLLMENT: &[&str] = &[
    "protocolSection.designModule.enrollmentInfo.count",
    "enrollment.count",
    "enrollment",
];
const ENROLLMENT_TYPE: &[&str] = &[
    "protocolSection.designModule.enrollmentInfo.type",
    "enrollment.type",
    "enrollment_type",
];
const ARM_GROUPS: &[&str] = &[
    "protocolSection.armsInterventionsModule.armGroups",
    "arm_group",
];
const INTERVENTIONS: &[&str] = &[
    "protocolSection.armsInterventionsModule.interventions",
    "intervention",
];

const ELIGIBILITY_TEXT: &[&str] = &[
    "protocolSection.eligibilityModule.eligibilityCriteria",
    "eligibility.criteria",
    "eligibility.criteria.textblock",
    "eligibility_criteria",
];
const MINIMUM_AGE: &[&str] = &[
    "protocolSection.eligibilityModule.minimumAge",
    "eligibility.minimum_age",
];
const MAXIMUM_AGE: &[&str] = &[
    "protocolSection.eligibilityModule.maximumAge",
    "eligibility.maximum_age",
];
const SEX: &[&str] = &[
    "protocolSection.eligibilityModule.sex",
    "eligibility.sex",
    "eligibility.gender",
];
const HEALTHY_VOLUNTEERS: &[&str] = &[
    "protocolSection.eligibilityModule.healthyVolunteers",
    "eligibility.healthy_volunteers",
];

const PRIMARY_OUTCOMES: &[&str] = &[
    "protocolSection.outcomesModule.primaryOutcomes",
    "primary_outcome",
];
const SECONDARY_OUTCOMES: &[&str] = &[
    "protocolSection.outcomesModule.secondaryOutcomes",
    "secondary_outcome",
];
const OTHER_OUTCOMES: &[&str] = &[
    "protocolSection.outcomesModule.otherOutcomes",
    "other_outcome",
];

const LOCATIONS: &[&str] = &[
    "protocolSection.contactsLocationsModule.locations",
    "location",
];
const CENTRAL_CONTACTS: &[&str] = &["protocolSection.contactsLocationsModule.centralContacts"];
const OVERALL_OFFICIALS: &[&str] = &[
    "protocolSection.contactsLocationsModule.overallOfficials",
    "overall_official",
];
const RESPONSIBLE_PARTY: &[&str] = &[
    "protocolSection.sponsorCollaboratorsModule.responsibleParty",
    "responsible_party",
];
const OVERSIGHT: &[&str] = &["protocolSection.oversightModule", "oversight_info"];
const IPD_SHARING: &[&str] = &["protocolSection.ipdSharingStatementModule", "patient_data"];
const REFERENCES: &[&str] = &["protocolSection.referencesModule.references", "reference"];
const PROVIDED_DOCUMENTS: &[&str] = &[
    "documentSection.largeDocumentModule.largeDocs",
    "large_docs",
];

// ── Assembly ──

/// Extract the normalized record from a raw registry document. Never fails:
/// an empty or unrecognizable document yields a well-formed record of nulls
/// and empty lists. A document wrapping an array of trials contributes its
/// first element.
pub fn extract_record(doc: &Value) -> ExtractedRecord {
    let doc = unwrap_batch(doc);
    ExtractedRecord {
        basic_info: extract_basic_info(doc),
        study_design: extract_study_design(doc),
        eligibility: extract_eligibility(doc),
        interventions: extract_interventions(doc),
        outcomes: extract_outcomes(doc),
        operational: extract_operational(doc),
    }
}

fn unwrap_batch(doc: &Value) -> &Value {
    match doc {
        Value::Array(items) => items.first().unwrap_or(doc),
        _ => doc,
    }
}

fn extract_basic_info(doc: &Value) -> BasicInfo {
    BasicInfo {
        nct_id: text_at(doc, NCT_ID)
            .map(|s| s.to_ascii_uppercase())
            .or_else(|| scan_nct_id(doc)),
        brief_title: text_at(doc, BRIEF_TITLE),
        official_title: text_at(doc, OFFICIAL_TITLE),
        overall_status: text_at(doc, OVERALL_STATUS),
        why_stopped: text_at(doc, WHY_STOPPED),
        start_date: date_at(doc, START_DATE),
        completion_date: date_at(doc, COMPLETION_DATE),
        primary_completion_date: date_at(doc, PRIMARY_COMPLETION_DATE),
        study_first_submit_date: date_at(doc, STUDY_FIRST_SUBMIT_DATE),
        last_update_date: date_at(doc, LAST_UPDATE_DATE),
        lead_sponsor: text_at(doc, LEAD_SPONSOR),
        lead_sponsor_class: text_at(doc, LEAD_SPONSOR_CLASS),
        collaborators: string_list_at(doc, COLLABORATORS),
        conditions: string_list_at(doc, CONDITIONS),
        keywords: string_list_at(doc, KEYWORDS),
        has_expanded_access: yes_no_at(doc, HAS_EXPANDED_ACCESS),
        expanded_access_info: first_at(doc, EXPANDED_ACCESS_INFO).cloned(),
    }
}

fn extract_study_design(doc: &Value) -> StudyDesign {
    StudyDesign {
        study_type: text_at(doc, STUDY_TYPE),
        phases: string_list_at(doc, PHASES),
        allocation: text_at(doc, ALLOCATION),
        intervention_model: text_at(doc, INTERVENTION_MODEL),
        intervention_model_description: text_at(doc, INTERVENTION_MODEL_DESC),
        masking: text_at(doc, MASKING),
        masking_description: text_at(doc, MASKING_DESC),
        who_masked: string_list_at(doc, WHO_MASKED),
        primary_purpose: text_at(doc, PRIMARY_PURPOSE),
        enrollment: int_at(doc, ENROLLMENT),
        enrollment_type: text_at(doc, ENROLLMENT_TYPE),
        arms: objects_at(doc, ARM_GROUPS)
            .into_iter()
            .map(extract_arm)
            .collect(),
    }
}

fn extract_arm(arm: &Value) -> ArmGroup {
    ArmGroup {
        label: text_at(arm, &["label", "arm_group_label"]),
        arm_type: text_at(arm, &["type", "arm_group_type"]),
        description: text_at(arm, &["description"]),
        intervention_names: string_list_at(arm, &["interventionNames", "intervention_names"]),
    }
}

fn extract_eligibility(doc: &Value) -> Eligibility {
    let parsed = text_at(doc, ELIGIBILITY_TEXT)
        .map(|blob| criteria::parse(&blob))
        .unwrap_or_default();
    Eligibility {
        inclusion_criteria: parsed.inclusion,
        exclusion_criteria: parsed.exclusion,
        minimum_age: text_at(doc, MINIMUM_AGE),
        maximum_age: text_at(doc, MAXIMUM_AGE),
        sex: text_at(doc, SEX),
        healthy_volunteers: yes_no_at(doc, HEALTHY_VOLUNTEERS),
    }
}

fn extract_interventions(doc: &Value) -> Vec<Intervention> {
    objects_at(doc, INTERVENTIONS)
        .into_iter()
        .map(|item| Intervention {
            name: text_at(item, &["name", "intervention_name"]),
            intervention_type: text_at(item, &["type", "intervention_type"]),
            description: text_at(item, &["description"]),
            arm_group_labels: string_list_at(item, &["armGroupLabels", "arm_group_label"]),
            other_names: string_list_at(item, &["otherNames", "other_name"]),
        })
        .collect()
}

fn extract_outcomes(doc: &Value) -> Outcomes {
    Outcomes {
        primary: outcome_list(doc, PRIMARY_OUTCOMES),
        secondary: outcome_list(doc, SECONDARY_OUTCOMES),
        other: outcome_list(doc, OTHER_OUTCOMES),
    }
}

fn outcome_list(doc: &Value, paths: &[&str]) -> Vec<Outcome> {
    objects_at(doc, paths)
        .into_iter()
        .map(|item| Outcome {
            measure: text_at(item, &["measure"]),
            description: text_at(item, &["description"]),
            time_frame: text_at(item, &["timeFrame", "time_frame"]),
        })
        .collect()
}

fn extract_operational(doc: &Value) -> Operational {
    Operational {
        locations: objects_at(doc, LOCATIONS)
            .into_iter()
            .map(extract_location)
            .collect(),
        central_contacts: extract_central_contacts(doc),
        overall_officials: objects_at(doc, OVERALL_OFFICIALS)
            .into_iter()
            .map(|item| Official {
                name: text_at(item, &["name", "last_name"]),
                affiliation: text_at(item, &["affiliation"]),
                role: text_at(item, &["role"]),
            })
            .collect(),
        responsible_party: first_at(doc, RESPONSIBLE_PARTY).map(|rp| ResponsibleParty {
            party_type: text_at(rp, &["type", "responsible_party_type"]),
            investigator_full_name: text_at(rp, &["investigatorFullName", "investigator_full_name"]),
            investigator_title: text_at(rp, &["investigatorTitle", "investigator_title"]),
            investigator_affiliation: text_at(
                rp,
                &["investigatorAffiliation", "investigator_affiliation"],
            ),
        }),
        oversight: first_at(doc, OVERSIGHT).map(|ov| Oversight {
            has_dmc: yes_no_at(ov, &["oversightHasDmc", "has_dmc", "oversight_has_dmc"]),
            is_fda_regulated_drug: yes_no_at(ov, &["isFdaRegulatedDrug", "is_fda_regulated_drug"]),
            is_fda_regulated_device: yes_no_at(
                ov,
                &["isFdaRegulatedDevice", "is_fda_regulated_device"],
            ),
        }),
        ipd_sharing: first_at(doc, IPD_SHARING).map(|ipd| IpdSharing {
            plan: text_at(ipd, &["ipdSharing", "sharing_ipd"]),
            description: text_at(ipd, &["description", "ipd_description"]),
            info_types: string_list_at(ipd, &["infoTypes", "ipd_info_types"]),
            time_frame: text_at(ipd, &["timeFrame", "ipd_time_frame"]),
            access_criteria: text_at(ipd, &["accessCriteria", "ipd_access_criteria"]),
            url: text_at(ipd, &["url", "ipd_url"]),
        }),
        references: objects_at(doc, REFERENCES)
            .into_iter()
            .map(|item| Reference {
                pmid: value_at(item, "pmid")
                    .or_else(|| value_at(item, "PMID"))
                    .and_then(scalar_text),
                ref_type: text_at(item, &["type", "reference_type"]),
                citation: text_at(item, &["citation"]),
            })
            .collect(),
        provided_documents: objects_at(doc, PROVIDED_DOCUMENTS)
            .into_iter()
            .cloned()
            .collect(),
    }
}

fn extract_location(loc: &Value) -> Location {
    Location {
        facility: text_at(loc, &["facility", "facility.name"]),
        city: text_at(loc, &["city", "facility.address.city"]),
        state: text_at(loc, &["state", "facility.address.state"]),
        country: text_at(loc, &["country", "facility.address.country"]),
        status: text_at(loc, &["status", "recruitment_status"]),
    }
}

/// Central contacts come as a list in the current shape; legacy dumps carry
/// one `overall_contact` object plus an optional backup.
fn extract_central_contacts(doc: &Value) -> Vec<Contact> {
    let from_list = objects_at(doc, CENTRAL_CONTACTS);
    if !from_list.is_empty() {
        return from_list.into_iter().map(extract_contact).collect();
    }
    ["overall_contact", "overall_contact_backup"]
        .into_iter()
        .filter_map(|p| value_at(doc, p))
        .map(extract_contact)
        .collect()
}

fn extract_contact(item: &Value) -> Contact {
    Contact {
        name: text_at(item, &["name", "last_name"]),
        role: text_at(item, &["role"]),
        phone: text_at(item, &["phone"]),
        email: text_at(item, &["email"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture(name: &str) -> Value {
        let raw = std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn empty_document_yields_wellformed_record() {
        let rec = extract_record(&json!({}));
        assert!(rec.basic_info.nct_id.is_none());
        assert!(rec.basic_info.conditions.is_empty());
        assert!(rec.interventions.is_empty());
        assert!(rec.outcomes.primary.is_empty());
        assert!(rec.eligibility.inclusion_criteria.is_empty());
        assert!(rec.operational.locations.is_empty());
        // Serialized shape keeps every sub-record present.
        let v = serde_json::to_value(&rec).unwrap();
        for key in [
            "basic_info",
            "study_design",
            "eligibility",
            "interventions",
            "outcomes",
            "operational",
        ] {
            assert!(v.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn full_document_extracts() {
        let doc = fixture("nct00001372.json");
        let rec = extract_record(&doc);

        assert_eq!(rec.basic_info.nct_id.as_deref(), Some("NCT00001372"));
        assert!(rec.basic_info.brief_title.is_some());
        assert_eq!(rec.basic_info.overall_status.as_deref(), Some("COMPLETED"));
        assert_eq!(rec.basic_info.start_date.as_deref(), Some("1994-03"));
        assert_eq!(
            rec.basic_info.lead_sponsor.as_deref(),
            Some("National Institute of Allergy and Infectious Diseases (NIAID)")
        );
        assert_eq!(rec.basic_info.conditions.len(), 2);

        assert_eq!(rec.study_design.study_type.as_deref(), Some("INTERVENTIONAL"));
        assert_eq!(rec.study_design.phases, vec!["PHASE1"]);
        assert_eq!(rec.study_design.enrollment, Some(44));
        assert_eq!(rec.study_design.arms.len(), 2);

        assert_eq!(rec.interventions.len(), 2);
        assert_eq!(
            rec.interventions[0].intervention_type.as_deref(),
            Some("DRUG")
        );

        assert!(!rec.eligibility.inclusion_criteria.is_empty());
        assert!(!rec.eligibility.exclusion_criteria.is_empty());
        assert_eq!(rec.eligibility.minimum_age.as_deref(), Some("18 Years"));

        assert_eq!(rec.outcomes.primary.len(), 1);
        assert_eq!(rec.operational.locations.len(), 1);
        assert_eq!(
            rec.operational.locations[0].country.as_deref(),
            Some("United States")
        );
        assert_eq!(rec.operational.overall_officials.len(), 1);
        assert!(rec.operational.ipd_sharing.is_some());
    }

    #[test]
    fn legacy_flat_document_extracts() {
        let doc = fixture("legacy_sparse.json");
        let rec = extract_record(&doc);

        assert_eq!(rec.basic_info.nct_id.as_deref(), Some("NCT90001234"));
        assert_eq!(rec.basic_info.brief_title.as_deref(), Some("A Legacy Trial"));
        assert_eq!(rec.study_design.enrollment, Some(120));
        assert_eq!(rec.study_design.phases, vec!["Phase 2"]);

        let inc = &rec.eligibility.inclusion_criteria;
        assert_eq!(inc.len(), 2);
        assert_eq!(inc[0].text, "Age 18 years or older");
        assert_eq!(inc[0].category, criteria::Category::Demographic);
        let exc = &rec.eligibility.exclusion_criteria;
        assert_eq!(exc.len(), 1);
        assert_eq!(exc[0].category, criteria::Category::PriorTreatment);
    }

    #[test]
    fn array_wrapped_document_takes_first() {
        let doc = json!([
            {"nct_id": "NCT11112222", "brief_title": "First"},
            {"nct_id": "NCT33334444", "brief_title": "Second"}
        ]);
        let rec = extract_record(&doc);
        assert_eq!(rec.basic_info.nct_id.as_deref(), Some("NCT11112222"));
        assert_eq!(rec.basic_info.brief_title.as_deref(), Some("First"));
    }

    #[test]
    fn identifier_recovered_by_scan() {
        let doc = json!({"description": "Follow-up data for NCT55556666."});
        let rec = extract_record(&doc);
        assert_eq!(rec.basic_info.nct_id.as_deref(), Some("NCT55556666"));
    }

    #[test]
    fn classic_nested_locations_flatten() {
        let doc = json!({
            "location": [{
                "facility": {
                    "name": "General Hospital",
                    "address": {"city": "Boston", "state": "Massachusetts", "country": "United States"}
                },
                "status": "Recruiting"
            }]
        });
        let rec = extract_record(&doc);
        let loc = &rec.operational.locations[0];
        assert_eq!(loc.facility.as_deref(), Some("General Hospital"));
        assert_eq!(loc.city.as_deref(), Some("Boston"));
        assert_eq!(loc.status.as_deref(), Some("Recruiting"));
    }
}
