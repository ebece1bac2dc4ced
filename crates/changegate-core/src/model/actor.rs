use serde::{Deserialize, Serialize};

/// Role an actor holds inside its organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Member,
    Reviewer,
    Admin,
}

/// The user on whose behalf a mutating operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub organization_id: String,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(
        user_id: impl Into<String>,
        organization_id: impl Into<String>,
        role: ActorRole,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            role,
        }
    }

    pub fn member(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self::new(user_id, organization_id, ActorRole::Member)
    }

    pub fn reviewer(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self::new(user_id, organization_id, ActorRole::Reviewer)
    }

    /// Reviewers and admins may review, resolve conflicts and abandon others' sandboxes
    pub fn can_review(&self) -> bool {
        matches!(self.role, ActorRole::Reviewer | ActorRole::Admin)
    }
}
