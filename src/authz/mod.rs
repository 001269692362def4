//! Authorization: resolved principals, the cached resolver and the policy table.
//!
//! Effective permissions are the union of every assigned role's permissions and
//! the user's direct grants. There are no deny rules.

pub mod policy;
pub mod principal;
pub mod resolver;

pub use policy::{authorize, Action, Decision, PolicyEvaluator, PolicyTable, Resource, ResourceKind};
pub use principal::{AccessSnapshot, Principal};
pub use resolver::Resolver;

/// Guard used when a role or permission is created without one.
pub const DEFAULT_GUARD: &str = "web";

/// Well-known role names
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const EDITOR: &str = "editor";
    pub const USER: &str = "user";
    pub const ROLE_MANAGER: &str = "role_manager";

    /// Roles that can be neither deleted nor renamed.
    pub const PROTECTED: [&str; 2] = [ADMIN, USER];

    pub fn is_protected(name: &str) -> bool {
        PROTECTED.contains(&name)
    }
}

/// Well-known permission names
pub mod permissions {
    pub const VIEW_USERS: &str = "view users";
    pub const CREATE_USERS: &str = "create users";
    pub const EDIT_USERS: &str = "edit users";
    pub const DELETE_USERS: &str = "delete users";

    pub const VIEW_ROLES: &str = "view roles";
    pub const CREATE_ROLES: &str = "create roles";
    pub const EDIT_ROLES: &str = "edit roles";
    pub const DELETE_ROLES: &str = "delete roles";

    pub const VIEW_PERMISSIONS: &str = "view permissions";
    pub const CREATE_PERMISSIONS: &str = "create permissions";
    pub const EDIT_PERMISSIONS: &str = "edit permissions";
    pub const DELETE_PERMISSIONS: &str = "delete permissions";

    pub const VIEW_DASHBOARD: &str = "view dashboard";

    /// Standard catalog seeded by `permissions-setup`, with a short description.
    pub const CATALOG: [(&str, &str); 13] = [
        (VIEW_USERS, "List and view user accounts"),
        (CREATE_USERS, "Create user accounts"),
        (EDIT_USERS, "Edit any user account"),
        (DELETE_USERS, "Delete user accounts"),
        (VIEW_ROLES, "List and view roles"),
        (CREATE_ROLES, "Create roles"),
        (EDIT_ROLES, "Edit roles"),
        (DELETE_ROLES, "Delete roles"),
        (VIEW_PERMISSIONS, "List and view permissions"),
        (CREATE_PERMISSIONS, "Create permissions"),
        (EDIT_PERMISSIONS, "Edit permissions"),
        (DELETE_PERMISSIONS, "Delete permissions"),
        (VIEW_DASHBOARD, "View the dashboard"),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_and_user_are_protected() {
        assert!(roles::is_protected("admin"));
        assert!(roles::is_protected("user"));
        assert!(!roles::is_protected("editor"));
        assert!(!roles::is_protected("Admin"));
    }
}
