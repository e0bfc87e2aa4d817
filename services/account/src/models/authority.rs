//! Authority model: the fixed set of roles a user can be granted

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A role granted to a user. Persisted by name in the `authority` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Authority {
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
    #[serde(rename = "ROLE_USER")]
    User,
    #[serde(rename = "ROLE_ANONYMOUS")]
    Anonymous,
}

impl Authority {
    pub const ALL: [Authority; 3] = [Authority::Admin, Authority::User, Authority::Anonymous];

    pub fn as_str(&self) -> &'static str {
        match self {
            Authority::Admin => "ROLE_ADMIN",
            Authority::User => "ROLE_USER",
            Authority::Anonymous => "ROLE_ANONYMOUS",
        }
    }

    /// Parse every name, failing on the first one that is not a known role
    pub fn parse_all<'a, I>(names: I) -> Result<BTreeSet<Authority>, UnknownAuthority>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names.into_iter().map(|name| name.parse()).collect()
    }

    /// Render a set of roles as the names stored in the database
    pub fn names(authorities: &BTreeSet<Authority>) -> BTreeSet<String> {
        authorities.iter().map(|a| a.as_str().to_string()).collect()
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role name is not one of the known authorities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAuthority(pub String);

impl FromStr for Authority {
    type Err = UnknownAuthority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Authority::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownAuthority(s.to_string()))
    }
}

/// Authority row as exposed by the authority listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthorityRecord {
    pub name: String,
}
