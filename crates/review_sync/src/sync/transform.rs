//! Shaping of source payloads into entity models.
//!
//! Everything here is synchronous and infallible at the batch level: a record
//! that cannot be shaped is reported back to the caller and skipped.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use sea_orm::prelude::Uuid;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::entity::prelude::*;
use crate::entity::{
    SYNC_STATUS_SYNCED, review, review_file_version, review_progress_step, workflow,
};

/// Step name used for a pending step whose template has none.
pub const UNKNOWN_STEP_NAME: &str = "Unknown Step";

// ─── Typed Payloads ──────────────────────────────────────────────────────────

/// Candidate reviewers for a step. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    #[serde(default, deserialize_with = "lenient::list")]
    pub users: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub roles: Vec<Value>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub companies: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CandidateSet {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.roles.is_empty() && self.companies.is_empty()
    }

    /// `{users, roles, companies}` without the extra keys.
    pub fn to_column(&self) -> Value {
        json!({
            "users": self.users,
            "roles": self.roles,
            "companies": self.companies,
        })
    }
}

/// One step of a workflow template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDescriptor {
    #[serde(
        default,
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::int",
        skip_serializing_if = "Option::is_none"
    )]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_allowed: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<CandidateSet>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `approveStatus` object on a file version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalTriple {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceWorkflow {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub project_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub steps: Option<Vec<StepDescriptor>>,
    pub created_by: Option<Value>,
    pub additional_options: Option<Value>,
    pub approval_status_options: Option<Value>,
    pub copy_files_options: Option<Value>,
    pub attached_attributes: Option<Value>,
    pub update_attributes_options: Option<Value>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReview {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub project_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    pub sequence_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub workflow_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub current_step_id: Option<String>,
    pub current_step_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub current_step_due_date: Option<String>,
    pub created_by: Option<Value>,
    pub assigned_to: Option<Value>,
    pub next_action_by: Option<Value>,
    pub archived: Option<bool>,
    pub archived_by: Option<Value>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub archived_at: Option<String>,
    pub archived_reason: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub started_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceFileVersion {
    #[serde(default, deserialize_with = "lenient::string")]
    urn: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    version_urn: Option<String>,
    name: Option<String>,
    file_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    storage_size: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    file_size: Option<i64>,
    file_extension: Option<String>,
    path: Option<String>,
    file_path: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    version_number: Option<i64>,
    approve_status: Option<Value>,
    approval_status: Option<String>,
    approval_label: Option<String>,
    approval_comments: Option<String>,
    review_content: Option<Value>,
    custom_attributes: Option<Value>,
    #[serde(default, deserialize_with = "lenient::string")]
    copied_file_version_urn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceProgressStep {
    #[serde(default, deserialize_with = "lenient::string")]
    step_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    id: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    step_order: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    order: Option<i64>,
    step_name: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    step_type: Option<String>,
    status: Option<String>,
    assigned_to: Option<Value>,
    claimed_by: Option<Value>,
    completed_by: Option<Value>,
    action_by: Option<Value>,
    candidates: Option<CandidateSet>,
    decision: Option<String>,
    comments: Option<String>,
    notes: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    started_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    completed_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    end_time: Option<String>,
}

/// Deserializers that tolerate the loose typing of the source API.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        })
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Parse a source timestamp.
///
/// Accepts RFC 3339 (with `Z` or an offset) and naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]`, which is taken as UTC. Anything else is `None`.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let s = value?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

/// External id of a raw record (`id`, string or number).
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn or_object(value: Option<Value>) -> Value {
    match value {
        Some(Value::Null) | None => json!({}),
        Some(v) => v,
    }
}

fn or_array(value: Option<Value>) -> Value {
    match value {
        Some(Value::Null) | None => json!([]),
        Some(v) => v,
    }
}

/// Unwrap a detail response into its records (`{results: [...]}` or a bare
/// array). Any other shape yields no records.
pub fn detail_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Template steps declared by a workflow payload (empty when absent or
/// malformed).
pub fn template_steps(workflow: &Value) -> Vec<StepDescriptor> {
    workflow
        .get("steps")
        .cloned()
        .and_then(|steps| serde_json::from_value(steps).ok())
        .unwrap_or_default()
}

// ─── Dedup ───────────────────────────────────────────────────────────────────

/// Result of [`dedup_latest`].
#[derive(Debug, Default)]
pub struct Deduped {
    pub records: Vec<Value>,
    /// Records dropped because they carry no id.
    pub missing_id: usize,
    /// Records dropped as older duplicates.
    pub duplicates: usize,
}

/// Keep one record per id, preferring the latest `updatedAt`.
///
/// Ties (including two records without a timestamp) keep the later-fetched
/// record. Output order is the order in which each id was first seen.
pub fn dedup_latest(records: Vec<Value>) -> Deduped {
    let mut out = Deduped::default();
    let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());

    for record in records {
        let Some(id) = record_id(&record) else {
            out.missing_id += 1;
            continue;
        };
        match index.get(&id) {
            Some(&slot) => {
                out.duplicates += 1;
                let incoming = parse_timestamp(record.get("updatedAt").and_then(Value::as_str));
                let existing =
                    parse_timestamp(out.records[slot].get("updatedAt").and_then(Value::as_str));
                if incoming >= existing {
                    out.records[slot] = record;
                }
            }
            None => {
                index.insert(id, out.records.len());
                out.records.push(record);
            }
        }
    }

    out
}

// ─── Record Shaping ──────────────────────────────────────────────────────────

/// Why a record could not be shaped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("record has no id")]
    MissingId,
    #[error("malformed record: {0}")]
    Malformed(String),
}

fn decode<T: serde::de::DeserializeOwned>(record: &Value) -> Result<T, ShapeError> {
    serde_json::from_value(record.clone()).map_err(|e| ShapeError::Malformed(e.to_string()))
}

/// Shape a workflow list record.
pub fn workflow_model(
    record: &Value,
    synced_at: DateTime<FixedOffset>,
) -> Result<workflow::Model, ShapeError> {
    let src: SourceWorkflow = decode(record)?;
    let workflow_id = src.id.ok_or(ShapeError::MissingId)?;
    let steps = serde_json::to_value(src.steps.unwrap_or_default())
        .map_err(|e| ShapeError::Malformed(e.to_string()))?;

    Ok(workflow::Model {
        id: Uuid::nil(),
        workflow_id,
        project_id: src.project_id,
        name: src.name.unwrap_or_else(|| "Unnamed Workflow".to_string()),
        description: src.description,
        notes: src.notes,
        status: src
            .status
            .as_deref()
            .map(WorkflowStatus::from_source)
            .unwrap_or_default(),
        steps,
        created_by: or_object(src.created_by),
        additional_options: or_object(src.additional_options),
        approval_status_options: or_array(src.approval_status_options),
        copy_files_options: or_object(src.copy_files_options),
        attached_attributes: or_array(src.attached_attributes),
        update_attributes_options: or_object(src.update_attributes_options),
        created_at: parse_timestamp(src.created_at.as_deref()),
        updated_at: parse_timestamp(src.updated_at.as_deref()),
        synced_at,
        sync_status: SYNC_STATUS_SYNCED.to_string(),
    })
}

/// Shape a review list record. `project_id` overrides the record's own.
pub fn review_model(
    record: &Value,
    project_id: Option<&str>,
    synced_at: DateTime<FixedOffset>,
) -> Result<review::Model, ShapeError> {
    let src: SourceReview = decode(record)?;
    let review_id = src.id.ok_or(ShapeError::MissingId)?;

    Ok(review::Model {
        id: Uuid::nil(),
        review_id,
        project_id: project_id.map(str::to_string).or(src.project_id),
        sequence_id: src.sequence_id,
        name: src.name.unwrap_or_else(|| "Unnamed Review".to_string()),
        description: src.description,
        notes: src.notes,
        status: src
            .status
            .as_deref()
            .map(ReviewStatus::from_source)
            .unwrap_or_default(),
        workflow_id: src.workflow_id,
        current_step_id: src.current_step_id,
        current_step_name: src.current_step_name,
        current_step_due_date: parse_timestamp(src.current_step_due_date.as_deref()),
        created_by: or_object(src.created_by),
        assigned_to: or_array(src.assigned_to),
        next_action_by: or_object(src.next_action_by),
        archived: src.archived.unwrap_or(false),
        archived_by: or_object(src.archived_by),
        archived_at: parse_timestamp(src.archived_at.as_deref()),
        archived_reason: src.archived_reason,
        created_at: parse_timestamp(src.created_at.as_deref()),
        updated_at: parse_timestamp(src.updated_at.as_deref()),
        started_at: parse_timestamp(src.started_at.as_deref()),
        finished_at: parse_timestamp(src.finished_at.as_deref()),
        synced_at,
        sync_status: SYNC_STATUS_SYNCED.to_string(),
    })
}

/// Rows shaped from one review's detail records.
#[derive(Debug)]
pub struct Shaped<M> {
    pub rows: Vec<M>,
    /// One message per skipped record.
    pub warnings: Vec<String>,
}

impl<M> Default for Shaped<M> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

fn extension_of(name: Option<&str>) -> Option<String> {
    let (stem, ext) = name?.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Shape the file versions attached to a review.
///
/// A version without `urn` or `versionUrn` is skipped with a warning.
pub fn file_version_models(
    review_id: &str,
    records: &[Value],
    synced_at: DateTime<FixedOffset>,
) -> Shaped<review_file_version::Model> {
    let mut out = Shaped::default();

    for (idx, record) in records.iter().enumerate() {
        let src: SourceFileVersion = match decode(record) {
            Ok(src) => src,
            Err(e) => {
                out.warnings.push(format!("file version #{idx}: {e}"));
                continue;
            }
        };
        let Some(urn) = src.urn.or(src.version_urn) else {
            out.warnings
                .push(format!("file version #{idx}: missing urn, skipped"));
            continue;
        };

        let (approval_status, approval_status_id, approval_status_value, approval_label) =
            match src.approve_status {
                Some(Value::Object(map)) => {
                    let triple: ApprovalTriple =
                        serde_json::from_value(Value::Object(map)).unwrap_or_default();
                    let value = triple.value.unwrap_or_else(|| "PENDING".to_string());
                    (
                        ApprovalStatus::from_source(&value),
                        triple.id,
                        Some(value),
                        triple.label,
                    )
                }
                _ => (
                    src.approval_status
                        .as_deref()
                        .map(ApprovalStatus::from_source)
                        .unwrap_or_default(),
                    None,
                    None,
                    src.approval_label,
                ),
            };

        let file_name = src.file_name.or(src.name);
        let file_extension = src
            .file_extension
            .or_else(|| extension_of(file_name.as_deref()));

        out.rows.push(review_file_version::Model {
            id: Uuid::nil(),
            review_id: review_id.to_string(),
            file_version_urn: urn,
            file_name,
            file_size: src.file_size.or(src.storage_size),
            file_extension,
            file_path: src.file_path.or(src.path),
            version_number: src.version_number.and_then(|n| i32::try_from(n).ok()),
            approval_status,
            approval_status_id,
            approval_status_value,
            approval_label,
            approval_comments: src.approval_comments,
            review_content: or_object(src.review_content),
            custom_attributes: or_array(src.custom_attributes),
            copied_file_version_urn: src.copied_file_version_urn,
            synced_at,
        });
    }

    out
}

fn candidates_or_template(
    own: Option<CandidateSet>,
    template: Option<&StepDescriptor>,
) -> CandidateSet {
    match own {
        Some(set) if !set.is_empty() => set,
        _ => template
            .and_then(|t| t.candidates.clone())
            .filter(|set| !set.is_empty())
            .unwrap_or_default(),
    }
}

/// Shape the progress records of a review.
///
/// Each record's order (`stepOrder`, `order`, else its 1-based position) picks
/// the template step at that position. Executed steps with no candidates take
/// the template's. When executed steps exist and the workflow defines the next
/// order, a `PENDING` row for that template step is appended unless the batch
/// already covers it.
pub fn progress_models(
    review_id: &str,
    records: &[Value],
    template: &[StepDescriptor],
    synced_at: DateTime<FixedOffset>,
) -> Shaped<review_progress_step::Model> {
    let mut out = Shaped::default();

    for (idx, record) in records.iter().enumerate() {
        let src: SourceProgressStep = match decode(record) {
            Ok(src) => src,
            Err(e) => {
                out.warnings.push(format!("progress step #{idx}: {e}"));
                continue;
            }
        };
        let Some(step_id) = src.step_id.or(src.id) else {
            out.warnings
                .push(format!("progress step #{idx}: missing stepId, skipped"));
            continue;
        };

        let order = src
            .step_order
            .filter(|o| *o != 0)
            .or(src.order.filter(|o| *o != 0))
            .unwrap_or(idx as i64 + 1);
        let template_step = usize::try_from(order)
            .ok()
            .filter(|o| *o >= 1)
            .and_then(|o| template.get(o - 1));
        let candidates = candidates_or_template(src.candidates, template_step);

        out.rows.push(review_progress_step::Model {
            id: Uuid::nil(),
            review_id: review_id.to_string(),
            step_id,
            template_step_id: template_step.and_then(|t| t.id.clone()),
            step_name: src.step_name.or(src.name),
            step_type: src
                .step_type
                .as_deref()
                .map(StepType::from_source)
                .unwrap_or_default(),
            step_order: i32::try_from(order).unwrap_or(i32::MAX),
            status: src
                .status
                .as_deref()
                .map(StepStatus::from_source)
                .unwrap_or_default(),
            assigned_to: or_array(src.assigned_to),
            claimed_by: or_object(src.claimed_by),
            completed_by: or_object(src.completed_by),
            action_by: or_object(src.action_by),
            candidates: candidates.to_column(),
            decision: src.decision,
            comments: src.comments,
            notes: src.notes,
            due_date: parse_timestamp(src.due_date.as_deref()),
            started_at: parse_timestamp(src.started_at.as_deref()),
            completed_at: parse_timestamp(src.completed_at.as_deref()),
            end_time: parse_timestamp(src.end_time.as_deref()),
            synced_at,
        });
    }

    if let Some(pending) = current_step_row(review_id, &out.rows, template, synced_at) {
        out.rows.push(pending);
    }

    out
}

fn current_step_row(
    review_id: &str,
    executed: &[review_progress_step::Model],
    template: &[StepDescriptor],
    synced_at: DateTime<FixedOffset>,
) -> Option<review_progress_step::Model> {
    let max_order = executed.iter().map(|row| row.step_order).max()?;
    let next = usize::try_from(max_order).ok()? + 1;
    let step = template.get(next - 1)?;
    let template_id = step.id.clone()?;

    if executed
        .iter()
        .any(|row| row.template_step_id.as_deref() == Some(template_id.as_str()))
    {
        return None;
    }

    Some(review_progress_step::Model {
        id: Uuid::nil(),
        review_id: review_id.to_string(),
        step_id: template_id.clone(),
        template_step_id: Some(template_id),
        step_name: Some(
            step.name
                .clone()
                .unwrap_or_else(|| UNKNOWN_STEP_NAME.to_string()),
        ),
        step_type: step
            .step_type
            .as_deref()
            .map(StepType::from_source)
            .unwrap_or_default(),
        step_order: i32::try_from(next).ok()?,
        status: StepStatus::Pending,
        assigned_to: json!([]),
        claimed_by: json!({}),
        completed_by: json!({}),
        action_by: json!({}),
        candidates: step.candidates.clone().unwrap_or_default().to_column(),
        decision: None,
        comments: None,
        notes: Some(String::new()),
        due_date: None,
        started_at: None,
        completed_at: None,
        end_time: None,
        synced_at,
    })
}
