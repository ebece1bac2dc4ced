//! Canonical schema constants for structured logging and events
//!
//! These constants keep log field names stable across the pipeline and the
//! sandbox orchestrator.

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Entity identifiers
pub const FIELD_SANDBOX_ID: &str = "sandbox_id";
pub const FIELD_CHANGE_ID: &str = "change_id";
pub const FIELD_APP_ID: &str = "app_id";
pub const FIELD_ORGANIZATION_ID: &str = "organization_id";

// Pipeline
pub const FIELD_STAGE: &str = "stage";
pub const FIELD_TOTAL_CHANGES: &str = "total_changes";
pub const FIELD_RISK_SCORE: &str = "risk_score";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
pub const EVENT_DEGRADED: &str = "degraded";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_distinct() {
        let events = [EVENT_START, EVENT_END, EVENT_END_ERROR, EVENT_DEGRADED];
        for (i, a) in events.iter().enumerate() {
            for b in &events[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_entity_fields_non_empty() {
        assert!(!FIELD_SANDBOX_ID.is_empty());
        assert!(!FIELD_CHANGE_ID.is_empty());
        assert!(!FIELD_STAGE.is_empty());
    }
}
