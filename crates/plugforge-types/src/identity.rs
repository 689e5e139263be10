//! Principal (authenticated user) types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;

/// Public identifier of an authenticated principal (e.g. `usr_...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    pub fn new(pid: impl Into<String>) -> Self {
        Self(pid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub pid: PrincipalId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_id_transparent_serde() {
        let pid = PrincipalId::new("usr_abc");
        assert_eq!(serde_json::to_string(&pid).unwrap(), "\"usr_abc\"");
        assert_eq!(pid.to_string(), "usr_abc");
    }
}
