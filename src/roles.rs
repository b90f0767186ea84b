use crate::id::ParticipantId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Capability class of a participant.
///
/// Each identity holds exactly one role at a time; the role decides which
/// stage transitions it may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    /// Never assigned, or explicitly revoked
    #[default]
    Unassigned,
    Farmer,
    Processor,
    Distributor,
    Retailer,
    Consumer,
    Admin,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(pub String);

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Unassigned,
        Role::Farmer,
        Role::Processor,
        Role::Distributor,
        Role::Retailer,
        Role::Consumer,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unassigned => "Unassigned",
            Role::Farmer => "Farmer",
            Role::Processor => "Processor",
            Role::Distributor => "Distributor",
            Role::Retailer => "Retailer",
            Role::Consumer => "Consumer",
            Role::Admin => "Admin",
        }
    }

    /// Stable integer code used by the SQL backend
    pub fn code(&self) -> i64 {
        match self {
            Role::Unassigned => 0,
            Role::Farmer => 1,
            Role::Processor => 2,
            Role::Distributor => 3,
            Role::Retailer => 4,
            Role::Consumer => 5,
            Role::Admin => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Role> {
        Role::ALL.into_iter().find(|role| role.code() == code)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            // "Initial" is what fresh accounts reported before any assignment
            "Initial" | "Unassigned" | "" => Ok(Role::Unassigned),
            other => Role::ALL
                .into_iter()
                .find(|role| role.as_str().eq_ignore_ascii_case(other))
                .ok_or_else(|| ParseRoleError(other.to_string())),
        }
    }
}

/// A registry entry: identity, role and display name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub role: Role,
    pub name: String,
}

impl Participant {
    pub fn new(id: ParticipantId, role: Role, name: impl Into<String>) -> Self {
        Self {
            id,
            role,
            name: name.into(),
        }
    }

    /// Zero-value entry for an identity the registry has never seen
    pub fn unknown(id: ParticipantId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_names() {
        assert_eq!("Farmer".parse::<Role>().unwrap(), Role::Farmer);
        assert_eq!("processor".parse::<Role>().unwrap(), Role::Processor);
        assert_eq!("Initial".parse::<Role>().unwrap(), Role::Unassigned);
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("Farmers".parse::<Role>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_codes_are_unique() {
        for role in Role::ALL {
            assert_eq!(Role::from_code(role.code()), Some(role));
        }
        assert_eq!(Role::from_code(42), None);
    }

    #[test]
    fn test_unknown_participant_is_unassigned() {
        let id = ParticipantId::derive(&[b"stranger"]);
        let p = Participant::unknown(id);
        assert_eq!(p.role, Role::Unassigned);
        assert!(p.name.is_empty());
        assert_eq!(p.id, id);
    }
}
