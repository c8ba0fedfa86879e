//! Resume-identity validation (4.8 Resume path).
//!
//! Before a paused/failed task resumes, the source is re-resolved and its
//! fresh resume state is compared against what was persisted. A mismatch
//! means the server-side file changed since the last run, and resuming
//! would silently corrupt the output — so it's surfaced as a hard
//! `ValidationFailed` rather than retried.

use crate::error::EngineError;
use crate::model::ResolvedSource;

/// Compares the resume state captured when the task last ran against a
/// fresh `resolve()` of the same URL. `persisted` is `source_resume_state`
/// from the stored `TaskRecord`; `fresh` is what `DownloadSource::resolve`
/// returns right now.
pub fn validate_resume(persisted: &serde_json::Value, fresh: &ResolvedSource, fresh_resume_state: &serde_json::Value) -> Result<(), EngineError> {
    if let (Some(old_etag), Some(new_etag)) = (json_str(persisted, "etag"), json_str(fresh_resume_state, "etag")) {
        if old_etag != new_etag {
            return Err(EngineError::ValidationFailed(format!(
                "etag mismatch: expected {old_etag}, server now reports {new_etag}"
            )));
        }
    }

    if let (Some(old_lm), Some(new_lm)) =
        (json_str(persisted, "last_modified"), json_str(fresh_resume_state, "last_modified"))
    {
        if old_lm != new_lm {
            return Err(EngineError::ValidationFailed(format!(
                "last-modified mismatch: expected {old_lm}, server now reports {new_lm}"
            )));
        }
    }

    if fresh.total_bytes >= 0 {
        if let Some(old_total) = persisted.get("total_bytes").and_then(|v| v.as_i64()) {
            if old_total != fresh.total_bytes {
                return Err(EngineError::ValidationFailed(format!(
                    "size mismatch: expected {old_total} bytes, server now reports {}",
                    fresh.total_bytes
                )));
            }
        }
    }

    Ok(())
}

fn json_str<'a>(v: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SelectionMode;
    use std::collections::HashMap;

    fn resolved(total_bytes: i64) -> ResolvedSource {
        ResolvedSource {
            url: "https://example.com/f.bin".to_string(),
            source_type: "http".to_string(),
            total_bytes,
            supports_resume: true,
            suggested_file_name: None,
            max_segments: 4,
            metadata: HashMap::new(),
            files: Vec::new(),
            selection_mode: SelectionMode::Single,
        }
    }

    #[test]
    fn matching_etag_and_size_passes() {
        let persisted = serde_json::json!({"etag": "v1", "total_bytes": 1000});
        let fresh_state = serde_json::json!({"etag": "v1"});
        assert!(validate_resume(&persisted, &resolved(1000), &fresh_state).is_ok());
    }

    #[test]
    fn etag_mismatch_is_validation_failed() {
        let persisted = serde_json::json!({"etag": "v1"});
        let fresh_state = serde_json::json!({"etag": "v2"});
        let err = validate_resume(&persisted, &resolved(1000), &fresh_state).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn size_mismatch_without_etag_is_validation_failed() {
        let persisted = serde_json::json!({"total_bytes": 1000});
        let fresh_state = serde_json::json!({});
        let err = validate_resume(&persisted, &resolved(2000), &fresh_state).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn missing_identity_fields_are_permissive() {
        let persisted = serde_json::json!({});
        let fresh_state = serde_json::json!({});
        assert!(validate_resume(&persisted, &resolved(-1), &fresh_state).is_ok());
    }
}
