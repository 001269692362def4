use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[schema(example = "web")]
    pub guard: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// A role together with the permissions it owns.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleDetail {
    pub id: Uuid,
    pub name: String,
    pub guard: String,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleDetail {
    pub fn new(role: Role, permissions: Vec<Permission>) -> Self {
        Self {
            id: role.id,
            name: role.name,
            guard: role.guard,
            permissions,
            created_at: role.created_at,
            updated_at: role.updated_at,
        }
    }

    pub fn permission_names(&self) -> Vec<String> {
        self.permissions.iter().map(|p| p.name.clone()).collect()
    }
}

impl Loggable for RoleDetail {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleSummary {
    pub id: Uuid,
    pub name: String,
    pub guard: String,
    pub permissions: Vec<String>,
    pub permissions_count: i64,
    pub users_count: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "moderator")]
    pub name: String,
    #[schema(example = "web")]
    pub guard: Option<String>,
    #[schema(example = json!(["view users", "edit users"]))]
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub permissions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SyncPermissionsRequest {
    #[schema(example = json!(["view users", "edit users"]))]
    pub permissions: Vec<String>,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    #[schema(example = "view users")]
    pub name: String,
    #[schema(example = "web")]
    pub guard: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PermissionSummary {
    pub id: Uuid,
    pub name: String,
    pub guard: String,
    pub roles_count: i64,
    pub users_count: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "posts.create")]
    pub name: String,
    #[schema(example = "web")]
    pub guard: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionUpdateRequest {
    pub name: String,
}

// =============================================================================
// ASSIGNMENTS
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRolesRequest {
    #[schema(example = json!(["editor"]))]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RemoveRoleRequest {
    #[schema(example = "editor")]
    pub role: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionsRequest {
    #[schema(example = json!(["delete users"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokePermissionRequest {
    #[schema(example = "delete users")]
    pub permission: String,
}

/// Role set of one user after a ledger mutation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleAssignment {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

impl Loggable for RoleAssignment {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// Direct permission set of one user after a ledger mutation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PermissionGrant {
    pub user_id: Uuid,
    pub permissions: Vec<String>,
}

impl Loggable for PermissionGrant {
    fn entity_type() -> &'static str { "user_permission" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

// =============================================================================
// USER ACCESS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct UserRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Roles, direct grants and the effective union for one user.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserAccess {
    pub user: UserRef,
    pub roles: Vec<Role>,
    pub direct_permissions: Vec<Permission>,
    pub all_permissions: Vec<Permission>,
}
