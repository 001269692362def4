use std::collections::HashMap;

use uuid::Uuid;

use super::permissions;
use super::principal::Principal;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ViewAny,
    View,
    Create,
    Update,
    Delete,
    /// Read a user's role and permission assignments.
    ViewAccess,
    /// Change a user's role and permission assignments.
    AssignAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    User,
    Role,
    Permission,
}

/// The target of a request. Collection-level actions carry no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Users,
    User(Uuid),
    Roles,
    Role(Uuid),
    Permissions,
    Permission(Uuid),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Users | Resource::User(_) => ResourceKind::User,
            Resource::Roles | Resource::Role(_) => ResourceKind::Role,
            Resource::Permissions | Resource::Permission(_) => ResourceKind::Permission,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Resource::User(id) | Resource::Role(id) | Resource::Permission(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    fn allow_if(condition: bool, reason: &'static str) -> Self {
        if condition {
            Decision::Allow
        } else {
            Decision::Deny(reason)
        }
    }
}

pub type Rule = fn(&Principal, &Resource) -> Decision;

/// Decides whether a principal may perform an action on a resource.
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, actor: &Principal, action: Action, resource: &Resource) -> Decision;
}

/// Dispatch table keyed by (action, resource kind). Pairs without a rule are denied.
#[derive(Clone)]
pub struct PolicyTable {
    rules: HashMap<(Action, ResourceKind), Rule>,
}

impl PolicyTable {
    pub fn empty() -> Self {
        Self { rules: HashMap::new() }
    }

    pub fn with_rule(mut self, action: Action, kind: ResourceKind, rule: Rule) -> Self {
        self.rules.insert((action, kind), rule);
        self
    }

    pub fn standard() -> Self {
        use Action::*;

        let mut table = Self::empty()
            // TODO: gate listing behind "view users" once clients send it; any account may browse today.
            .with_rule(ViewAny, ResourceKind::User, |_, _| Decision::Allow)
            .with_rule(View, ResourceKind::User, |_, _| Decision::Allow)
            .with_rule(Create, ResourceKind::User, |actor, _| {
                Decision::allow_if(actor.has_permission(permissions::CREATE_USERS), "missing permission: create users")
            })
            .with_rule(Update, ResourceKind::User, |actor, target| {
                let own = target.id().map(|id| actor.is(id)).unwrap_or(false);
                Decision::allow_if(
                    own || actor.has_permission(permissions::EDIT_USERS),
                    "you may only edit your own account",
                )
            })
            .with_rule(Delete, ResourceKind::User, |actor, target| match target.id() {
                Some(id) if actor.is(id) => Decision::Deny("you cannot delete your own account"),
                Some(_) => Decision::allow_if(
                    actor.has_permission(permissions::DELETE_USERS),
                    "missing permission: delete users",
                ),
                None => Decision::Deny("a target user is required"),
            })
            .with_rule(ViewAccess, ResourceKind::User, |actor, target| {
                let own = target.id().map(|id| actor.is(id)).unwrap_or(false);
                Decision::allow_if(own || actor.is_admin(), "the admin role is required")
            })
            .with_rule(AssignAccess, ResourceKind::User, require_admin);

        for kind in [ResourceKind::Role, ResourceKind::Permission] {
            for action in [ViewAny, View, Create, Update, Delete] {
                table = table.with_rule(action, kind, require_admin);
            }
        }
        table
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn require_admin(actor: &Principal, _: &Resource) -> Decision {
    Decision::allow_if(actor.is_admin(), "the admin role is required")
}

impl PolicyEvaluator for PolicyTable {
    fn evaluate(&self, actor: &Principal, action: Action, resource: &Resource) -> Decision {
        if !actor.active {
            return Decision::Deny("account is inactive");
        }

        match self.rules.get(&(action, resource.kind())) {
            Some(rule) => rule(actor, resource),
            None => Decision::Deny("no policy for this action"),
        }
    }
}

/// Evaluates the policy and converts a denial into `Forbidden`.
pub fn authorize(
    policy: &dyn PolicyEvaluator,
    actor: &Principal,
    action: Action,
    resource: Resource,
) -> AppResult<()> {
    match policy.evaluate(actor, action, &resource) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            tracing::warn!(
                user_id = %actor.user_id,
                action = ?action,
                resource = ?resource,
                reason,
                "authorization denied"
            );
            Err(AppError::forbidden(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::roles;

    fn everything() -> Vec<&'static str> {
        permissions::CATALOG.iter().map(|(name, _)| *name).collect()
    }

    #[test]
    fn self_deletion_is_denied_even_with_every_permission() {
        let table = PolicyTable::standard();
        let id = Uuid::new_v4();
        let actor = Principal::new(id)
            .with_roles([roles::ADMIN])
            .with_permissions(everything());

        let decision = table.evaluate(&actor, Action::Delete, &Resource::User(id));
        assert_eq!(decision, Decision::Deny("you cannot delete your own account"));
    }

    #[test]
    fn deleting_others_requires_delete_users() {
        let table = PolicyTable::standard();
        let target = Resource::User(Uuid::new_v4());

        let without = Principal::new(Uuid::new_v4()).with_permissions(["edit users"]);
        assert!(!table.evaluate(&without, Action::Delete, &target).is_allowed());

        let with = Principal::new(Uuid::new_v4()).with_permissions([permissions::DELETE_USERS]);
        assert!(table.evaluate(&with, Action::Delete, &target).is_allowed());
    }

    #[test]
    fn update_allows_self_or_edit_users() {
        let table = PolicyTable::standard();
        let me = Uuid::new_v4();
        let plain = Principal::new(me);

        assert!(table.evaluate(&plain, Action::Update, &Resource::User(me)).is_allowed());
        assert!(!table.evaluate(&plain, Action::Update, &Resource::User(Uuid::new_v4())).is_allowed());

        let editor = Principal::new(Uuid::new_v4()).with_permissions([permissions::EDIT_USERS]);
        assert!(table.evaluate(&editor, Action::Update, &Resource::User(me)).is_allowed());
    }

    #[test]
    fn create_is_gated_by_permission_only() {
        let table = PolicyTable::standard();
        let plain = Principal::new(Uuid::new_v4());
        assert!(!table.evaluate(&plain, Action::Create, &Resource::Users).is_allowed());

        let creator = plain.clone().with_permissions([permissions::CREATE_USERS]);
        assert!(table.evaluate(&creator, Action::Create, &Resource::Users).is_allowed());
    }

    #[test]
    fn viewing_users_is_open_to_any_active_account() {
        let table = PolicyTable::standard();
        let plain = Principal::new(Uuid::new_v4());
        assert!(table.evaluate(&plain, Action::ViewAny, &Resource::Users).is_allowed());
        assert!(table.evaluate(&plain, Action::View, &Resource::User(Uuid::new_v4())).is_allowed());

        let inactive = plain.inactive();
        assert!(!table.evaluate(&inactive, Action::ViewAny, &Resource::Users).is_allowed());
    }

    #[test]
    fn role_administration_requires_admin_role() {
        let table = PolicyTable::standard();
        let holder_of_everything = Principal::new(Uuid::new_v4()).with_permissions(everything());
        assert!(!table.evaluate(&holder_of_everything, Action::Create, &Resource::Roles).is_allowed());

        let admin = Principal::new(Uuid::new_v4()).with_roles([roles::ADMIN]);
        assert!(table.evaluate(&admin, Action::Delete, &Resource::Role(Uuid::new_v4())).is_allowed());
        assert!(table.evaluate(&admin, Action::Update, &Resource::Permission(Uuid::new_v4())).is_allowed());
        assert!(table.evaluate(&admin, Action::AssignAccess, &Resource::User(Uuid::new_v4())).is_allowed());
    }

    #[test]
    fn access_introspection_is_self_or_admin() {
        let table = PolicyTable::standard();
        let me = Uuid::new_v4();
        let plain = Principal::new(me);
        assert!(table.evaluate(&plain, Action::ViewAccess, &Resource::User(me)).is_allowed());
        assert!(!table.evaluate(&plain, Action::ViewAccess, &Resource::User(Uuid::new_v4())).is_allowed());
    }

    #[test]
    fn missing_rules_deny() {
        let table = PolicyTable::empty();
        let admin = Principal::new(Uuid::new_v4()).with_roles([roles::ADMIN]);
        assert!(!table.evaluate(&admin, Action::View, &Resource::Users).is_allowed());
    }

    #[test]
    fn authorize_maps_denial_to_forbidden() {
        let table = PolicyTable::standard();
        let plain = Principal::new(Uuid::new_v4());
        let err = authorize(&table, &plain, Action::Create, Resource::Roles).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
