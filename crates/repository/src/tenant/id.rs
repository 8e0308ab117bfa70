//! Organization identifier type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The field every tenant-owned entity stores its organization under.
pub const ORGANIZATION_FIELD: &str = "organizationId";

/// An opaque organization identifier.
///
/// Entities of a tenant-scoped collection carry it in their
/// [`ORGANIZATION_FIELD`].
///
/// # Examples
///
/// ```
/// use docstore_repository::tenant::TenantId;
///
/// let tenant: TenantId = "org-acme".parse().unwrap();
/// assert_eq!(tenant.as_str(), "org-acme");
/// assert!("  ".parse::<TenantId>().is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant ID without checking it.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = ValidationError;

    /// Parses a non-blank ID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ValidationError::InvalidId {
                id: s.to_string(),
                reason: "organization ID must not be empty".to_string(),
            });
        }
        Ok(TenantId::new(s))
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId::new(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_blank() {
        assert!(matches!(
            "".parse::<TenantId>(),
            Err(ValidationError::InvalidId { .. })
        ));
        assert_eq!("org-1".parse::<TenantId>().unwrap(), TenantId::new("org-1"));
    }

    #[test]
    fn test_serde_is_transparent() {
        let tenant = TenantId::new("org-1");
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"org-1\"");

        let parsed: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tenant);
    }

    #[test]
    fn test_debug_and_display() {
        let tenant: TenantId = String::from("org-1").into();
        assert_eq!(tenant.to_string(), "org-1");
        assert_eq!(format!("{:?}", tenant), "TenantId(org-1)");
    }
}
