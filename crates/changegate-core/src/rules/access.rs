use crate::errors::{GateError, Result};
use crate::model::{Actor, Change, Sandbox};

/// The actor belongs to the sandbox's organization
///
/// # Errors
/// Returns `SandboxNotFound` so other organizations cannot probe ids.
pub fn ensure_same_organization(actor: &Actor, sandbox: &Sandbox) -> Result<()> {
    if actor.organization_id != sandbox.organization_id {
        return Err(GateError::SandboxNotFound {
            sandbox_id: sandbox.id.clone(),
        });
    }
    Ok(())
}

/// Reviewer or admin role
///
/// # Errors
/// Returns `Forbidden` for members.
pub fn ensure_reviewer(actor: &Actor, action: &str) -> Result<()> {
    if !actor.can_review() {
        return Err(forbidden(actor, action));
    }
    Ok(())
}

/// Owner of the sandbox, or a reviewer
///
/// # Errors
/// Returns `Forbidden` for other members.
pub fn ensure_owner_or_reviewer(actor: &Actor, sandbox: &Sandbox, action: &str) -> Result<()> {
    if sandbox.is_owned_by(&actor.user_id) || actor.can_review() {
        return Ok(());
    }
    Err(forbidden(actor, action))
}

/// The actor belongs to the change's organization
///
/// # Errors
/// Returns `ChangeNotFound` so other organizations cannot probe ids.
pub fn ensure_change_visible(actor: &Actor, change: &Change) -> Result<()> {
    if actor.organization_id != change.organization_id {
        return Err(GateError::ChangeNotFound {
            change_id: change.id.clone(),
        });
    }
    Ok(())
}

/// Author of the change, or a reviewer
///
/// # Errors
/// Returns `Forbidden` for other members.
pub fn ensure_author_or_reviewer(actor: &Actor, change: &Change, action: &str) -> Result<()> {
    if change.author_id.as_deref() == Some(actor.user_id.as_str()) || actor.can_review() {
        return Ok(());
    }
    Err(forbidden(actor, action))
}

fn forbidden(actor: &Actor, action: &str) -> GateError {
    GateError::Forbidden {
        actor_id: actor.user_id.clone(),
        action: action.to_string(),
    }
}
