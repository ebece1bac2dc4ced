//! Error helpers for the engine
//!
//! Engine operations return the canonical `ExError`; these helpers build the
//! external-service flavours the connectors and timeouts need.

use changegate_core::errors::{ExError, ExErrorKind};
use std::future::Future;
use std::time::Duration;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// A connector call failed
pub fn external(op: &str, message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::ExternalService)
        .with_op(op.to_string())
        .with_message(message)
}

/// A connector call ran past its budget
pub fn timed_out(op: &str, limit: Duration) -> ExError {
    ExError::new(ExErrorKind::Timeout)
        .with_op(op.to_string())
        .with_message(format!("no response within {}s", limit.as_secs_f64()))
}

/// Another sync or submit already holds the sandbox
pub fn busy(sandbox_id: &str) -> ExError {
    ExError::new(ExErrorKind::Concurrency)
        .with_entity_id(sandbox_id)
        .with_message("another sync or submit is in progress for this sandbox")
}

/// The stored status moved underneath a read-modify-write
pub fn status_moved(sandbox_id: &str) -> ExError {
    ExError::new(ExErrorKind::Concurrency)
        .with_entity_id(sandbox_id)
        .with_message("sandbox status changed concurrently; reload and retry")
}

/// Await `fut`, failing with `Timeout` once `limit` elapses
pub async fn with_timeout<T, F>(op: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_elapsed) => Err(timed_out(op, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_timeout_kind() {
        let err = with_timeout("export_snapshot", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ExError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Timeout);
        assert_eq!(err.op(), Some("export_snapshot"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let err = with_timeout("get_app", Duration::from_secs(1), async {
            Err::<(), _>(external("get_app", "502"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::ExternalService);
    }
}
