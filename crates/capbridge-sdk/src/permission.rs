//! Permission declarations
//!
//! Static capability requirements a bridge states at construction. A host
//! authorizer inspects them; enforcement is not done here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource category a permission applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    /// Outbound network access
    Network,
    /// File system access
    Filesystem,
    /// Process or environment access
    Process,
    /// In-memory state owned by the bridge
    Memory,
    /// Persistent or shared storage (event buses, log sinks)
    Storage,
}

impl PermissionKind {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::Network => "network",
            PermissionKind::Filesystem => "filesystem",
            PermissionKind::Process => "process",
            PermissionKind::Memory => "memory",
            PermissionKind::Storage => "storage",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared capability requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Resource category
    pub kind: PermissionKind,
    /// Resource name within the category
    pub resource: String,
    /// Allowed actions on the resource
    pub actions: Vec<String>,
    /// Human description
    pub description: String,
}

impl Permission {
    /// Create a permission
    pub fn new(
        kind: PermissionKind,
        resource: impl Into<String>,
        actions: &[&str],
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            resource: resource.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            description: description.into(),
        }
    }

    /// Check whether `action` is allowed
    pub fn allows(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}]", self.kind, self.resource, self.actions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_display_and_actions() {
        let p = Permission::new(
            PermissionKind::Memory,
            "credentials",
            &["read", "mask"],
            "Credential cache",
        );
        assert!(p.allows("mask"));
        assert!(!p.allows("write"));
        assert_eq!(p.to_string(), "memory:credentials [read, mask]");
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&PermissionKind::Filesystem).unwrap();
        assert_eq!(json, "\"filesystem\"");
    }
}
