use crate::errors::{GateError, Result};
use crate::model::{SandboxRequest, SandboxType, SandboxUpdate};

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 1000;

/// Validate a create request before quota checks or external calls
///
/// Rules:
/// 1. Name is non-blank and at most 100 characters
/// 2. Description, when given, is at most 1000 characters
/// 3. CLONE requests name a `source_app_id`; other types name an `app_id`
///    and no source app
///
/// # Errors
/// Returns `InvalidInput` naming the first offending field.
pub fn validate_sandbox_request(request: &SandboxRequest) -> Result<()> {
    validate_name(&request.name)?;
    if let Some(description) = &request.description {
        validate_description(description)?;
    }

    match request.sandbox_type {
        SandboxType::Clone => {
            if blank(request.source_app_id.as_deref()) {
                return Err(invalid("source_app_id", "required for CLONE sandboxes"));
            }
        }
        _ => {
            if blank(request.app_id.as_deref()) {
                return Err(invalid("app_id", "required"));
            }
            if request.source_app_id.is_some() {
                return Err(invalid(
                    "source_app_id",
                    "only CLONE sandboxes have a source app",
                ));
            }
        }
    }
    Ok(())
}

/// # Errors
/// Returns `InvalidInput` if a supplied field breaks the create rules.
pub fn validate_sandbox_update(update: &SandboxUpdate) -> Result<()> {
    if let Some(name) = &update.name {
        validate_name(name)?;
    }
    if let Some(description) = &update.description {
        validate_description(description)?;
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(invalid("name", "must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(invalid(
            "name",
            &format!("must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<()> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(invalid(
            "description",
            &format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
        ));
    }
    Ok(())
}

fn blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn invalid(field: &str, reason: &str) -> GateError {
    GateError::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sandbox_type: SandboxType) -> SandboxRequest {
        SandboxRequest {
            app_id: Some("app-1".into()),
            source_app_id: None,
            name: "checkout rework".into(),
            description: None,
            sandbox_type,
            duration_days: None,
        }
    }

    #[test]
    fn test_valid_personal_request() {
        assert!(validate_sandbox_request(&request(SandboxType::Personal)).is_ok());
    }

    #[test]
    fn test_clone_needs_source_app() {
        let mut req = request(SandboxType::Clone);
        assert!(validate_sandbox_request(&req).is_err());
        req.source_app_id = Some("app-src".into());
        assert!(validate_sandbox_request(&req).is_ok());
    }

    #[test]
    fn test_source_app_only_for_clone() {
        let mut req = request(SandboxType::Team);
        req.source_app_id = Some("app-src".into());
        let err = validate_sandbox_request(&req).unwrap_err();
        assert!(matches!(err, GateError::InvalidInput { ref field, .. } if field == "source_app_id"));
    }

    #[test]
    fn test_blank_and_long_names_rejected() {
        let mut req = request(SandboxType::Feature);
        req.name = "   ".into();
        assert!(validate_sandbox_request(&req).is_err());
        req.name = "x".repeat(101);
        assert!(validate_sandbox_request(&req).is_err());
        assert!(validate_sandbox_update(&SandboxUpdate {
            name: Some(String::new()),
            description: None
        })
        .is_err());
    }
}
