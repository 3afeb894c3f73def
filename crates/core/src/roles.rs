//! Well-known role names and the capabilities they carry on the board.
//!
//! Role strings come from the external authentication lookup.

use serde::{Deserialize, Serialize};

pub const ROLE_CEO: &str = "ceo";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_DISPATCHER: &str = "dispatcher";
pub const ROLE_ACCOUNTANT: &str = "accountant";
pub const ROLE_VIEWER: &str = "viewer";

/// All valid role strings.
pub const VALID_ROLES: &[&str] = &[
    ROLE_CEO,
    ROLE_ADMIN,
    ROLE_DISPATCHER,
    ROLE_ACCOUNTANT,
    ROLE_VIEWER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Ceo,
    Admin,
    Dispatcher,
    Accountant,
    Viewer,
}

impl Role {
    /// Convert from the role lookup string.
    pub fn from_str_value(s: &str) -> Result<Self, String> {
        match s {
            ROLE_CEO => Ok(Self::Ceo),
            ROLE_ADMIN => Ok(Self::Admin),
            ROLE_DISPATCHER => Ok(Self::Dispatcher),
            ROLE_ACCOUNTANT => Ok(Self::Accountant),
            ROLE_VIEWER => Ok(Self::Viewer),
            _ => Err(format!(
                "Invalid role '{s}'. Must be one of: {}",
                VALID_ROLES.join(", ")
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ceo => ROLE_CEO,
            Self::Admin => ROLE_ADMIN,
            Self::Dispatcher => ROLE_DISPATCHER,
            Self::Accountant => ROLE_ACCOUNTANT,
            Self::Viewer => ROLE_VIEWER,
        }
    }

    /// Whether the role may change anything on the dispatch board.
    pub fn can_mutate(&self) -> bool {
        matches!(self, Self::Ceo | Self::Admin | Self::Dispatcher)
    }

    /// Whether the role may bypass a credit block without an approval code.
    pub fn can_override_credit(&self) -> bool {
        matches!(self, Self::Ceo | Self::Admin)
    }
}

/// The user performing a board action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }
}
