//! Acting user identity and session token hashing
//!
//! The session service authenticates a bearer token and yields an [`Actor`].
//! Tokens are never stored in clear; the store keys sessions by the SHA-256
//! digest computed here.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Role of the acting user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Warehouse,
    Supervisor,
    Admin,
}

impl Role {
    /// Supervisors and admins may act on and observe any shipment
    pub fn is_supervisory(&self) -> bool {
        matches!(self, Role::Supervisor | Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Driver => "driver",
            Role::Warehouse => "warehouse",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "driver" => Ok(Role::Driver),
            "warehouse" => Ok(Role::Warehouse),
            "supervisor" => Ok(Role::Supervisor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Authenticated user on whose behalf a request runs
///
/// Used for `delivered_by` audit fields and channel authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

/// SHA-256 digest of a session token, as 64 lowercase hex characters
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let a = hash_token("secret-token");
        let b = hash_token("secret-token");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, hash_token("other-token"));
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("Supervisor".parse::<Role>().unwrap(), Role::Supervisor);
        assert_eq!(Role::Driver.to_string(), "driver");
        assert!("courier".parse::<Role>().is_err());
    }

    #[test]
    fn test_supervisory_roles() {
        assert!(Role::Admin.is_supervisory());
        assert!(Role::Supervisor.is_supervisory());
        assert!(!Role::Driver.is_supervisory());
        assert!(!Role::Warehouse.is_supervisory());
    }
}
