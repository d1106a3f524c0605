//! Batch operations.
//!
//! A batch is an ordered list of tagged operations (`{"op": "mkdir", ...}`).
//! Items are decoded one at a time so that a single bad item becomes a soft
//! failure in the result list instead of rejecting the whole request.

use crate::entry::EntryInput;
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the tag field on every batch item.
pub const OP_FIELD: &str = "op";

const KNOWN_OPS: &[&str] = &["create", "update", "delete", "mkdir", "rmdir"];

/// One operation in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    Create(EntryInput),
    Update(EntryInput),
    Delete { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
}

/// Why a batch item could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchItemError {
    #[error("batch item has no '{OP_FIELD}' field")]
    MissingOp,

    #[error("unknown batch operation '{0}'")]
    UnknownOp(String),

    #[error("malformed '{op}' operation: {reason}")]
    Malformed { op: String, reason: String },
}

impl BatchOp {
    /// Decode one batch item.
    pub fn parse(item: Value) -> Result<Self, BatchItemError> {
        let op = item
            .get(OP_FIELD)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(BatchItemError::MissingOp)?;

        if !KNOWN_OPS.contains(&op.as_str()) {
            return Err(BatchItemError::UnknownOp(op));
        }

        serde_json::from_value(item).map_err(|e| BatchItemError::Malformed {
            op,
            reason: e.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            BatchOp::Create(_) => "create",
            BatchOp::Update(_) => "update",
            BatchOp::Delete { .. } => "delete",
            BatchOp::Mkdir { .. } => "mkdir",
            BatchOp::Rmdir { .. } => "rmdir",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            BatchOp::Create(input) | BatchOp::Update(input) => &input.path,
            BatchOp::Delete { path } | BatchOp::Mkdir { path } | BatchOp::Rmdir { path } => path,
        }
    }
}

/// Error attached to a failed batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of one batch item, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub op: Option<String>,
    pub path: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl BatchItemResult {
    pub fn ok(index: usize, op: &BatchOp) -> Self {
        Self {
            index,
            op: Some(op.name().to_string()),
            path: Some(op.path().to_string()),
            success: true,
            error: None,
        }
    }

    pub fn failed(
        index: usize,
        op: Option<&BatchOp>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            index,
            op: op.map(|o| o.name().to_string()),
            path: op.map(|o| o.path().to_string()),
            success: false,
            error: Some(ItemError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<BatchItemResult>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchResult {
    pub fn from_results(results: Vec<BatchItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self {
            results,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use serde_json::json;

    #[test]
    fn test_parse_known_ops() {
        let op = BatchOp::parse(json!({"op": "mkdir", "path": "C:\\DIR"})).unwrap();
        assert_eq!(
            op,
            BatchOp::Mkdir {
                path: "C:\\DIR".to_string()
            }
        );

        let op = BatchOp::parse(json!({
            "op": "create",
            "path": "C:\\DIR\\A.TXT",
            "content": "a",
            "program": "notepad"
        }))
        .unwrap();
        match op {
            BatchOp::Create(input) => {
                assert_eq!(input.kind, EntryKind::File);
                assert_eq!(input.content.as_deref(), Some("a"));
                assert_eq!(input.program.as_deref(), Some("notepad"));
            }
            other => panic!("unexpected op: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert_eq!(
            BatchOp::parse(json!({"op": "chmod", "path": "C:\\A"})),
            Err(BatchItemError::UnknownOp("chmod".to_string()))
        );
        assert_eq!(
            BatchOp::parse(json!({"path": "C:\\A"})),
            Err(BatchItemError::MissingOp)
        );
        assert!(matches!(
            BatchOp::parse(json!({"op": "rmdir"})),
            Err(BatchItemError::Malformed { .. })
        ));
    }

    #[test]
    fn test_result_counts() {
        let op = BatchOp::Delete {
            path: "C:\\A".to_string(),
        };
        let result = BatchResult::from_results(vec![
            BatchItemResult::ok(0, &op),
            BatchItemResult::failed(1, Some(&op), ErrorCode::NotFound, "missing"),
            BatchItemResult::failed(2, None, ErrorCode::Validation, "bad"),
        ]);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(result.results[2].op, None);
    }
}
