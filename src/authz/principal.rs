use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role names and effective permission names of one user.
///
/// This is the value cached per user; it is rebuilt from the store after any
/// assignment or registry mutation that touches the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSnapshot {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// Principal represents the authenticated user with their resolved access.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub active: bool,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            active: true,
            roles: HashSet::new(),
            permissions: HashSet::new(),
        }
    }

    pub fn from_snapshot(user_id: Uuid, active: bool, snapshot: AccessSnapshot) -> Self {
        Self {
            user_id,
            active,
            roles: snapshot.roles.into_iter().collect(),
            permissions: snapshot.permissions.into_iter().collect(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.permissions = perms.into_iter().map(Into::into).collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(super::roles::ADMIN)
    }

    pub fn is(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    /// Sorted role names, for responses.
    pub fn role_names(&self) -> Vec<String> {
        let mut roles: Vec<String> = self.roles.iter().cloned().collect();
        roles.sort();
        roles
    }

    /// Sorted permission names, for responses.
    pub fn permission_names(&self) -> Vec<String> {
        let mut permissions: Vec<String> = self.permissions.iter().cloned().collect();
        permissions.sort();
        permissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_builds_lookup_sets() {
        let snapshot = AccessSnapshot {
            roles: vec!["editor".into()],
            permissions: vec!["edit users".into(), "view users".into()],
        };
        let p = Principal::from_snapshot(Uuid::new_v4(), true, snapshot);
        assert!(p.has_role("editor"));
        assert!(!p.is_admin());
        assert!(p.has_permission("edit users"));
        assert!(!p.has_permission("delete users"));
        assert_eq!(p.permission_names(), vec!["edit users", "view users"]);
    }
}
