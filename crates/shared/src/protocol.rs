use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{StageId, WellId, WellKind},
    error::{ApiError, ErrorCode},
    order::StageOrder,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellSummary {
    pub well_id: WellId,
    pub kind: WellKind,
    pub team: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellDetail {
    #[serde(flatten)]
    pub well: WellSummary,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_id: StageId,
    pub well_id: WellId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drill_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_change: Option<f64>,
    pub progress: String,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
}

/// A stage to insert. Without `position` it is appended after the well's
/// current last stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewStage {
    #[serde(default)]
    pub stage_name: Option<String>,
    #[serde(default)]
    pub pipe: Option<String>,
    #[serde(default)]
    pub drill_time: Option<f64>,
    #[serde(default)]
    pub stage_change: Option<f64>,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub position: Option<i64>,
}

/// Descriptive edits; absent fields keep their stored value. Position is not
/// editable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageUpdate {
    #[serde(default)]
    pub stage_name: Option<String>,
    #[serde(default)]
    pub pipe: Option<String>,
    #[serde(default)]
    pub drill_time: Option<f64>,
    #[serde(default)]
    pub stage_change: Option<f64>,
    #[serde(default)]
    pub progress: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWell {
    pub kind: WellKind,
    pub team: String,
    pub name: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub stages: Vec<NewStage>,
}

/// Body of `POST /wells/:id/stages/reorder`. Entries stay raw JSON so that
/// malformed ids are reported through the normal error envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorderRequest {
    #[serde(default)]
    pub order: Vec<Value>,
}

impl ReorderRequest {
    pub fn from_order(order: &StageOrder) -> Self {
        Self {
            order: order.ids().iter().map(|id| Value::from(id.0)).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Created<T> {
    pub ok: bool,
    pub id: T,
}

impl<T> Created<T> {
    pub fn new(id: T) -> Self {
        Self { ok: true, id }
    }
}

/// Failure envelope: `{ "ok": false, "code": ..., "error": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub code: ErrorCode,
    pub error: String,
}

impl From<ApiError> for ErrorBody {
    fn from(value: ApiError) -> Self {
        Self {
            ok: false,
            code: value.code,
            error: value.message,
        }
    }
}

impl From<ErrorBody> for ApiError {
    fn from(value: ErrorBody) -> Self {
        ApiError::new(value.code, value.error)
    }
}
