use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::login,
		routes::auth::logout,
		routes::auth::me,
		routes::users::list_users,
		routes::users::create_user,
		routes::users::get_user,
		routes::users::update_user,
		routes::users::delete_user,
		routes::user_access::get_user_roles,
		routes::user_access::assign_roles,
		routes::user_access::remove_role,
		routes::user_access::get_user_access,
		routes::user_access::assign_permissions,
		routes::user_access::revoke_permission,
		routes::roles::list_roles,
		routes::roles::create_role,
		routes::roles::get_role,
		routes::roles::update_role,
		routes::roles::sync_role_permissions,
		routes::roles::delete_role,
		routes::permissions::list_permissions,
		routes::permissions::create_permission,
		routes::permissions::get_permission,
		routes::permissions::update_permission,
		routes::permissions::delete_permission,
		routes::dashboard::dashboard,
		routes::dashboard::stats,
		routes::dashboard::recent_users
	),
	components(
		schemas(
			routes::health::HealthResponse,
			routes::auth::MessageResponse,
			models::user::User,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::MeResponse,
			models::user::CreateUserRequest,
			models::user::UpdateUserRequest,
			models::user::UserPage,
			models::rbac::Role,
			models::rbac::RoleDetail,
			models::rbac::RoleSummary,
			models::rbac::RoleCreateRequest,
			models::rbac::RoleUpdateRequest,
			models::rbac::SyncPermissionsRequest,
			models::rbac::Permission,
			models::rbac::PermissionSummary,
			models::rbac::PermissionCreateRequest,
			models::rbac::PermissionUpdateRequest,
			models::rbac::AssignRolesRequest,
			models::rbac::RemoveRoleRequest,
			models::rbac::AssignPermissionsRequest,
			models::rbac::RevokePermissionRequest,
			models::rbac::RoleAssignment,
			models::rbac::PermissionGrant,
			models::rbac::UserRef,
			models::rbac::UserAccess,
			models::dashboard::DashboardStats,
			models::dashboard::Dashboard
		)
	),
	tags(
		(name = "Health", description = "Liveness and database check"),
		(name = "Auth", description = "Login, logout and the current user"),
		(name = "Users", description = "User accounts"),
		(name = "User access", description = "Role and direct permission assignments"),
		(name = "Roles", description = "Role registry (admin only)"),
		(name = "Permissions", description = "Permission catalog (admin only)"),
		(name = "Dashboard", description = "Cached user statistics")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

	normalize_path_operations(&mut doc);
	ensure_security_components(&mut doc);
	add_examples(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> Router {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc = Arc::new(doc);

	let json_route = get(move || {
		let doc = Arc::clone(&doc);
		async move { Json((*doc).clone()) }
	});

	Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config))
}

fn normalize_path_operations(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		let snapshot = paths.clone();
		for (path, item) in snapshot {
			if let Some(ops) = item.as_object() {
				let mut normalized = Map::new();
				for (method, val) in ops {
					let key = method.to_lowercase();
					if let Some(existing) = normalized.get_mut(&key) {
						merge_values(existing, val);
					} else {
						normalized.insert(key, val.clone());
					}
				}
				paths.insert(path, Value::Object(normalized));
			}
		}
	}
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else { return; };
	let Some(components) = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
	else {
		return;
	};
	let Some(schemes) = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
	else {
		return;
	};

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
}

fn add_examples(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		for item in paths.values_mut() {
			if let Some(operations) = item.as_object_mut() {
				for operation in operations.values_mut() {
					apply_parameter_examples(operation);
					apply_request_examples(operation);
				}
			}
		}
	}
}

fn apply_parameter_examples(operation: &mut Value) {
	let Some(parameters) = operation.get_mut("parameters").and_then(Value::as_array_mut) else { return; };

	for parameter in parameters.iter_mut() {
		if parameter.get("name").and_then(Value::as_str) == Some("id") {
			if let Some(obj) = parameter.as_object_mut() {
				obj.entry("example")
					.or_insert_with(|| json!("00000000-0000-0000-0000-000000000000"));
			}
		}
	}
}

fn apply_request_examples(operation: &mut Value) {
	let Some(request_body) = operation.get_mut("requestBody") else { return; };
	let Some(content) = request_body.get_mut("content").and_then(Value::as_object_mut) else { return; };
	let Some(app_json) = content.get_mut("application/json").and_then(Value::as_object_mut) else { return; };
	let Some(schema) = app_json.get("schema").and_then(Value::as_object) else { return; };
	let Some(reference) = schema.get("$ref").and_then(Value::as_str) else { return; };

	let example = match reference {
		"#/components/schemas/LoginRequest" => Some(json!({
			"email": "admin@example.com",
			"password": "password"
		})),
		"#/components/schemas/CreateUserRequest" => Some(json!({
			"name": "Ada Lovelace",
			"email": "ada@example.com",
			"password": "S3cureP@ssw0rd",
			"active": true
		})),
		"#/components/schemas/UpdateUserRequest" => Some(json!({
			"name": "Ada King",
			"active": false
		})),
		"#/components/schemas/RoleCreateRequest" => Some(json!({
			"name": "moderator",
			"permissions": ["view users", "edit users"]
		})),
		"#/components/schemas/AssignRolesRequest" => Some(json!({ "roles": ["editor"] })),
		"#/components/schemas/AssignPermissionsRequest" => Some(json!({ "permissions": ["delete users"] })),
		_ => None,
	};

	if let Some(example) = example {
		app_json.insert("example".to_string(), example);
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

fn merge_values(target: &mut Value, addition: &Value) {
	match (target, addition) {
		(Value::Object(dest), Value::Object(src)) => {
			for (key, value) in src {
				if let Some(existing) = dest.get_mut(key) {
					merge_values(existing, value);
				} else {
					dest.insert(key.clone(), value.clone());
				}
			}
		}
		(Value::Array(dest), Value::Array(src)) => {
			for item in src {
				if !dest.contains(item) {
					dest.push(item.clone());
				}
			}
		}
		_ => {}
	}
}
