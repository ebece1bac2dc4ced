use changegate_core_types::{RequestId, TraceId};
use thiserror::Error;

/// Result type alias using GateError
pub type Result<T> = std::result::Result<T, GateError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code usable by the framing layer and by
/// tests. Kinds are grouped into the five caller-facing classes returned by
/// [`ExErrorKind::class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Validation
    InvalidInput,
    InvalidSnapshot,
    QuotaExceeded,

    // Lookup
    NotFound,

    // Conflict
    Conflict,
    InvalidTransition,
    AlreadyExists,
    AlreadyUndone,
    NotUndone,
    PolicyBlocked,
    Concurrency,

    // Access / capability
    Forbidden,
    NotSupported,

    // External collaborators
    ExternalService,
    Timeout,

    // Pipeline
    InternalAnalysis,

    // Integration/IO
    Persistence,
    Serialization,
    Io,

    // Internal
    Internal,
}

/// Caller-facing error class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed input or quota exceeded; rejected before any external call
    Validation,
    /// Missing sandbox, change or app; rejected before mutation
    NotFound,
    /// State disagreement the caller or a reviewer must act on
    Conflict,
    /// Platform, VCS or provisioner failure (including timeouts)
    ExternalService,
    /// Diff, impact or scoring failure
    InternalAnalysis,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::InvalidSnapshot => "ERR_INVALID_SNAPSHOT",
            ExErrorKind::QuotaExceeded => "ERR_QUOTA_EXCEEDED",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Conflict => "ERR_CONFLICT",
            ExErrorKind::InvalidTransition => "ERR_INVALID_TRANSITION",
            ExErrorKind::AlreadyExists => "ERR_ALREADY_EXISTS",
            ExErrorKind::AlreadyUndone => "ERR_ALREADY_UNDONE",
            ExErrorKind::NotUndone => "ERR_NOT_UNDONE",
            ExErrorKind::PolicyBlocked => "ERR_POLICY_BLOCKED",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::Forbidden => "ERR_FORBIDDEN",
            ExErrorKind::NotSupported => "ERR_NOT_SUPPORTED",
            ExErrorKind::ExternalService => "ERR_EXTERNAL_SERVICE",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::InternalAnalysis => "ERR_INTERNAL_ANALYSIS",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Map the kind onto its caller-facing class
    pub fn class(&self) -> ErrorClass {
        match self {
            ExErrorKind::InvalidInput
            | ExErrorKind::InvalidSnapshot
            | ExErrorKind::QuotaExceeded
            | ExErrorKind::Forbidden
            | ExErrorKind::NotSupported => ErrorClass::Validation,
            ExErrorKind::NotFound => ErrorClass::NotFound,
            ExErrorKind::Conflict
            | ExErrorKind::InvalidTransition
            | ExErrorKind::AlreadyExists
            | ExErrorKind::AlreadyUndone
            | ExErrorKind::NotUndone
            | ExErrorKind::PolicyBlocked
            | ExErrorKind::Concurrency => ErrorClass::Conflict,
            ExErrorKind::ExternalService | ExErrorKind::Timeout => ErrorClass::ExternalService,
            ExErrorKind::InternalAnalysis
            | ExErrorKind::Persistence
            | ExErrorKind::Serialization
            | ExErrorKind::Io
            | ExErrorKind::Internal => ErrorClass::InternalAnalysis,
        }
    }

    /// Whether a caller may retry the same request once the cause is addressed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExErrorKind::Conflict | ExErrorKind::Timeout | ExErrorKind::Concurrency
        )
    }
}

/// Canonical structured error type
///
/// Carries a classification plus enough context (operation, entity, pipeline
/// stage, conflicting paths) for a reviewer to act on it.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    entity_id: Option<String>,
    stage: Option<String>,
    request_id: Option<RequestId>,
    trace_id: Option<TraceId>,
    message: String,
    source: Option<Box<ExError>>,
    paths: Option<Vec<String>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            entity_id: None,
            stage: None,
            request_id: None,
            trace_id: None,
            message: String::new(),
            source: None,
            paths: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add entity ID context (sandbox, change or app id)
    pub fn with_entity_id(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Add the pipeline stage that failed (e.g. `exporting`)
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach conflicting paths (used by conflict detection)
    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Conflicting paths, if any
    pub fn paths(&self) -> Option<&[String]> {
        self.paths.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if let Some(stage) = &self.stage {
            write!(f, " at stage '{}'", stage)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(entity_id) = &self.entity_id {
            write!(f, " (entity_id: {})", entity_id)?;
        }
        if let Some(paths) = &self.paths {
            write!(f, " (paths: {})", paths.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}

// ========== End Error Facility ==========

/// Domain errors raised by the pure core (diffing, scoring, lifecycle rules)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    // ===== Lookup =====
    #[error("Sandbox not found: {sandbox_id}")]
    SandboxNotFound { sandbox_id: String },

    #[error("Change not found: {change_id}")]
    ChangeNotFound { change_id: String },

    #[error("App not found: {app_id}")]
    AppNotFound { app_id: String },

    // ===== Validation =====
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Snapshot is not a JSON document: {reason}")]
    InvalidSnapshot { reason: String },

    #[error("Quota exceeded: {scope} allows {limit} active sandboxes")]
    QuotaExceeded { scope: String, limit: u32 },

    // ===== Lifecycle =====
    #[error("Illegal sandbox transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Sandbox {sandbox_id} is in terminal state {status}")]
    SandboxTerminal { sandbox_id: String, status: String },

    #[error("Sandbox {sandbox_id} has unresolved conflicts on {} path(s)", paths.len())]
    ConflictUnresolved {
        sandbox_id: String,
        paths: Vec<String>,
    },

    #[error("Sandbox {sandbox_id} has no conflict awaiting resolution")]
    NoConflictToResolve { sandbox_id: String },

    #[error("Sandbox {sandbox_id} is blocked by policies: {}", rules.join(", "))]
    AutoBlocked {
        sandbox_id: String,
        rules: Vec<String>,
    },

    #[error("Operation {op} is not supported on platform {platform}")]
    PlatformUnsupported { op: String, platform: String },

    #[error("Actor {actor_id} may not {action}")]
    Forbidden { actor_id: String, action: String },

    // ===== Change state =====
    #[error("Change {change_id} is already undone")]
    ChangeAlreadyUndone { change_id: String },

    #[error("Change {change_id} is not undone")]
    ChangeNotUndone { change_id: String },

    // ===== Pipeline =====
    #[error("Analysis failed in {component}: {reason}")]
    Analysis { component: String, reason: String },

    // ===== Generic =====
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<GateError> for ExError {
    fn from(err: GateError) -> Self {
        let message = err.to_string();
        match err {
            GateError::SandboxNotFound { sandbox_id } => ExError::new(ExErrorKind::NotFound)
                .with_entity_id(sandbox_id)
                .with_message(message),
            GateError::ChangeNotFound { change_id } => ExError::new(ExErrorKind::NotFound)
                .with_entity_id(change_id)
                .with_message(message),
            GateError::AppNotFound { app_id } => ExError::new(ExErrorKind::NotFound)
                .with_entity_id(app_id)
                .with_message(message),

            GateError::InvalidInput { .. } => {
                ExError::new(ExErrorKind::InvalidInput).with_message(message)
            }
            GateError::InvalidSnapshot { .. } => {
                ExError::new(ExErrorKind::InvalidSnapshot).with_message(message)
            }
            GateError::QuotaExceeded { .. } => {
                ExError::new(ExErrorKind::QuotaExceeded).with_message(message)
            }

            GateError::InvalidTransition { .. } => {
                ExError::new(ExErrorKind::InvalidTransition).with_message(message)
            }
            GateError::SandboxTerminal { sandbox_id, .. } => {
                ExError::new(ExErrorKind::InvalidTransition)
                    .with_entity_id(sandbox_id)
                    .with_message(message)
            }
            GateError::ConflictUnresolved { sandbox_id, paths } => {
                ExError::new(ExErrorKind::Conflict)
                    .with_entity_id(sandbox_id)
                    .with_paths(paths)
                    .with_message(message)
            }
            GateError::NoConflictToResolve { sandbox_id } => {
                ExError::new(ExErrorKind::InvalidTransition)
                    .with_entity_id(sandbox_id)
                    .with_message(message)
            }
            GateError::AutoBlocked { sandbox_id, .. } => ExError::new(ExErrorKind::PolicyBlocked)
                .with_entity_id(sandbox_id)
                .with_message(message),
            GateError::PlatformUnsupported { .. } => {
                ExError::new(ExErrorKind::NotSupported).with_message(message)
            }
            GateError::Forbidden { .. } => {
                ExError::new(ExErrorKind::Forbidden).with_message(message)
            }

            GateError::ChangeAlreadyUndone { change_id } => {
                ExError::new(ExErrorKind::AlreadyUndone)
                    .with_entity_id(change_id)
                    .with_message(message)
            }
            GateError::ChangeNotUndone { change_id } => ExError::new(ExErrorKind::NotUndone)
                .with_entity_id(change_id)
                .with_message(message),

            GateError::Analysis { component, .. } => ExError::new(ExErrorKind::InternalAnalysis)
                .with_stage(component)
                .with_message(message),

            GateError::Serialization { .. } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }
            GateError::Internal { .. } => ExError::new(ExErrorKind::Internal).with_message(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_stage_and_entity() {
        let err = ExError::new(ExErrorKind::ExternalService)
            .with_op("sync")
            .with_stage("exporting")
            .with_entity_id("sb-1")
            .with_message("platform returned 502");
        let text = err.to_string();
        assert!(text.starts_with("[ERR_EXTERNAL_SERVICE]"));
        assert!(text.contains("stage 'exporting'"));
        assert!(text.contains("sb-1"));
    }

    #[test]
    fn test_source_chain_exposed() {
        use std::error::Error as _;
        let inner = ExError::new(ExErrorKind::Timeout).with_message("export");
        let outer = ExError::new(ExErrorKind::ExternalService).with_source(inner);
        assert!(outer.source().is_some());
        assert_eq!(
            outer.source_error().map(|e| e.kind()),
            Some(ExErrorKind::Timeout)
        );
    }

    #[test]
    fn test_timeout_is_external_class() {
        assert_eq!(ExErrorKind::Timeout.class(), ErrorClass::ExternalService);
        assert!(ExErrorKind::Timeout.is_retryable());
        assert!(!ExErrorKind::QuotaExceeded.is_retryable());
    }
}
