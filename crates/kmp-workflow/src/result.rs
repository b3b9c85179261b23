//! Uniform success/failure envelope.
//!
//! Every action and condition returns a [`ServiceResult`]; the engine never
//! expects a plugin to panic or return a Rust error for an expected failure.
//! Engine operations convert into the same envelope at the outer surface via
//! `From<Result<T>>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Success flag, optional reason, optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResult<T = Value> {
    /// Whether the operation succeeded.
    pub success: bool,

    /// Human-readable reason (failure explanation or informational note).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Machine-readable error code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ServiceResult<T> {
    /// Successful result carrying a payload.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            reason: None,
            code: None,
            data: Some(data),
        }
    }

    /// Successful result with no payload.
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            reason: None,
            code: None,
            data: None,
        }
    }

    /// Failed result with a reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            code: None,
            data: None,
        }
    }

    /// Failed result with a machine-readable code.
    pub fn fail_with_code(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            code: Some(code.into()),
            data: None,
        }
    }

    /// Attach an informational reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Map the payload.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ServiceResult<U> {
        ServiceResult {
            success: self.success,
            reason: self.reason,
            code: self.code,
            data: self.data.map(f),
        }
    }

    /// Failure reason, or a generic message when the plugin gave none.
    pub fn failure_reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "unspecified failure".to_string())
    }
}

impl<T> From<Result<T>> for ServiceResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ServiceResult::ok(data),
            Err(e) => ServiceResult::fail_with_code(e.code(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use serde_json::json;

    #[test]
    fn test_ok_serializes_without_reason() {
        let result = ServiceResult::ok(json!({"granted": true}));
        let text = serde_json::to_string(&result).unwrap();
        assert_eq!(text, r#"{"success":true,"data":{"granted":true}}"#);
    }

    #[test]
    fn test_fail_carries_reason() {
        let result: ServiceResult = ServiceResult::fail("member has no active warrant");
        assert!(!result.is_success());
        assert_eq!(result.failure_reason(), "member has no active warrant");
        assert!(result.data.is_none());
    }

    #[test]
    fn test_failure_reason_default() {
        let result: ServiceResult = ServiceResult {
            success: false,
            reason: None,
            code: None,
            data: None,
        };
        assert_eq!(result.failure_reason(), "unspecified failure");
    }

    #[test]
    fn test_from_error_uses_code() {
        let result: ServiceResult<()> =
            Err(WorkflowError::DefinitionNotFound("officer-hire".into())).into();
        assert!(!result.success);
        assert_eq!(result.code.as_deref(), Some("DefinitionNotFound"));
        assert!(result.reason.unwrap().contains("officer-hire"));
    }

    #[test]
    fn test_map_preserves_flags() {
        let result = ServiceResult::ok(2).with_reason("note").map(|n| n * 10);
        assert_eq!(result.data, Some(20));
        assert_eq!(result.reason.as_deref(), Some("note"));
    }

    #[test]
    fn test_deserialize_minimal() {
        let result: ServiceResult = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!result.success);
        assert!(result.reason.is_none());
    }
}
