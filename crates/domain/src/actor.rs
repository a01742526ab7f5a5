//! Authenticated actors and their roles.

use common::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::ParseStatusError;

/// Role tag carried by every authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Librarian,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Librarian => "librarian",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "librarian" => Ok(Role::Librarian),
            other => Err(ParseStatusError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// The role an actor holds does not allow the attempted operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} requires the {required} role, actor is a {actual}")]
pub struct PermissionDenied {
    pub action: &'static str,
    pub required: Role,
    pub actual: Role,
}

/// The user on whose behalf an operation runs.
///
/// Supplied by the identity provider on every call; the role is trusted as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn student(user_id: UserId) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn librarian(user_id: UserId) -> Self {
        Self::new(user_id, Role::Librarian)
    }

    /// Asserts that this actor holds `required` before running `action`.
    pub fn require(&self, required: Role, action: &'static str) -> Result<(), PermissionDenied> {
        if self.role == required {
            Ok(())
        } else {
            Err(PermissionDenied {
                action,
                required,
                actual: self.role,
            })
        }
    }
}
