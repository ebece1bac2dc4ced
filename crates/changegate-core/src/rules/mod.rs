//! Input validation and access rules

pub mod access;
pub mod validation;

pub use access::{
    ensure_author_or_reviewer, ensure_change_visible, ensure_owner_or_reviewer, ensure_reviewer,
    ensure_same_organization,
};
pub use validation::{validate_sandbox_request, validate_sandbox_update};
