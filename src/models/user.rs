use std::fmt;

use serde::{Deserialize, Serialize};

/// Capability interface for the authenticated caller.
///
/// Each accessor returns `None` when the user type does not expose that
/// capability at all, which authorisation rules treat differently from an
/// empty list.
pub trait UserDetails: Send + Sync + fmt::Debug {
    fn id(&self) -> Option<&str> {
        None
    }

    fn roles(&self) -> Option<&[String]> {
        None
    }

    fn permissions(&self) -> Option<&[String]> {
        None
    }

    fn has_role(&self, role: &str) -> bool {
        self.roles()
            .map(|roles| roles.iter().any(|r| r == role))
            .unwrap_or(false)
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.permissions()
            .map(|perms| perms.iter().any(|p| p == permission))
            .unwrap_or(false)
    }
}

/// A user exposing every capability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicUser {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl BasicUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

impl UserDetails for BasicUser {
    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn roles(&self) -> Option<&[String]> {
        Some(&self.roles)
    }

    fn permissions(&self) -> Option<&[String]> {
        Some(&self.permissions)
    }
}
