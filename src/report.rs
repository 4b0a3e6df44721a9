//! Report-channel records: the structured, out-of-band log stream emitted
//! by a running setup script.
//!
//! Each instance has an append-only queue of JSON records. The dispatcher
//! drains them every tick; this module owns the record format, terminal
//! verdict evaluation and side-channel fact extraction.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved step names carrying side-channel facts instead of progress.
pub const STEP_REPORT_CPU_ARCH: &str = "report_cpu_arch";
pub const STEP_REPORT_AGENT_ID: &str = "report_agent_id";
pub const STEP_REPORT_OS_VERSION: &str = "report_os_version";
pub const STEP_REPORT_HEALTHZ: &str = "report_healthz";

/// Status field of one record. `-` marks plain progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "-")]
    Progress,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
}

/// One structured record on the report channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub step: String,
    pub log: String,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_status_kwargs: Option<serde_json::Value>,
}

impl ReportRecord {
    /// Parse one raw line. Callers skip unparseable lines with a warning;
    /// a malformed record must never wedge the drain loop.
    pub fn parse(line: &str) -> Result<ReportRecord, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Terminal decision for one instance after a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportVerdict {
    Pending,
    Succeeded,
    Failed { step: String, log: String },
}

/// Evaluate drained records in stream order: the first `FAILED` record
/// fails the instance; the designated success-marker step at `DONE`
/// succeeds it.
pub fn verdict(records: &[ReportRecord], success_step: &str) -> ReportVerdict {
    for record in records {
        match record.status {
            ReportStatus::Failed => {
                return ReportVerdict::Failed {
                    step: record.step.clone(),
                    log: record.log.clone(),
                };
            }
            ReportStatus::Done if record.step == success_step => return ReportVerdict::Succeeded,
            _ => {}
        }
    }
    ReportVerdict::Pending
}

/// Kind of a side-channel fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactKind {
    CpuArch,
    AgentId,
    OsVersion,
    Healthz,
}

impl FactKind {
    fn from_step(step: &str) -> Option<FactKind> {
        match step {
            STEP_REPORT_CPU_ARCH => Some(FactKind::CpuArch),
            STEP_REPORT_AGENT_ID => Some(FactKind::AgentId),
            STEP_REPORT_OS_VERSION => Some(FactKind::OsVersion),
            STEP_REPORT_HEALTHZ => Some(FactKind::Healthz),
            _ => None,
        }
    }
}

/// Best-effort decoded fact payload. Payloads may arrive as plain text,
/// JSON, or base64 over either; anything else is tagged not-parseable and
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FactPayload {
    Json(serde_json::Value),
    Text(String),
    NotParseable(String),
}

impl FactPayload {
    fn decode(raw: &str) -> FactPayload {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(raw) {
            return FactPayload::Json(v);
        }
        if let Ok(bytes) = BASE64.decode(raw.trim()) {
            match String::from_utf8(bytes) {
                Ok(text) => {
                    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&text) {
                        return FactPayload::Json(v);
                    }
                    return FactPayload::Text(text);
                }
                Err(_) => return FactPayload::NotParseable(raw.to_string()),
            }
        }
        FactPayload::Text(raw.to_string())
    }

    /// Canonical string used to deduplicate fact writes.
    pub fn dedup_key(&self) -> String {
        match self {
            FactPayload::Json(v) => v.to_string(),
            FactPayload::Text(t) => t.clone(),
            FactPayload::NotParseable(t) => format!("?{t}"),
        }
    }
}

/// Extract a side-channel fact from a record, if its step is reserved.
pub fn side_fact(record: &ReportRecord) -> Option<(FactKind, FactPayload)> {
    let kind = FactKind::from_step(&record.step)?;
    Some((kind, FactPayload::decode(&record.log)))
}

/// One batched fact write: a distinct (kind, value) with every host that
/// reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct FactUpdate {
    pub kind: FactKind,
    pub payload: FactPayload,
    pub hosts: Vec<String>,
}
