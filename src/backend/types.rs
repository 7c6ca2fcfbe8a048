// Wire types for the scrape backend

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::jobs::types::{ProgressSnapshot, ProgressTotals, StartAck, StartOutcome, StatusReport};

/// Body of a job-start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_order_ids: Option<BTreeSet<String>>,
    pub force_refresh: bool,
}

/// Parameters of a job-status request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQuery {
    pub owner_id: String,
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub status: StartOutcome,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<StartResponse> for StartAck {
    fn from(response: StartResponse) -> Self {
        StartAck {
            outcome: response.status,
            message: response.message,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub processed: Option<u32>,
    #[serde(default)]
    pub successful: Option<u32>,
    #[serde(default)]
    pub failed: Option<u32>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusResponse {
    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percentage: self.percentage.unwrap_or(0.0),
            phase: self.phase.clone().unwrap_or_else(|| self.status.clone()),
            message: self.message.clone().unwrap_or_default(),
            totals: ProgressTotals {
                processed: self.processed.unwrap_or(0),
                successful: self.successful.unwrap_or(0),
                failed: self.failed.unwrap_or(0),
                total: self.total.unwrap_or(0),
            },
        }
    }
}

impl From<StatusResponse> for StatusReport {
    fn from(response: StatusResponse) -> Self {
        match response.status.to_ascii_lowercase().as_str() {
            "completed" => StatusReport::Completed(response.snapshot()),
            "failed" => StatusReport::Failed {
                error: response
                    .error
                    .clone()
                    .or_else(|| response.message.clone())
                    .filter(|msg| !msg.trim().is_empty()),
            },
            "not_found" => StatusReport::NotFound,
            "idle" => StatusReport::Idle,
            _ => StatusReport::Progress(response.snapshot()),
        }
    }
}
