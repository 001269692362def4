pub mod dashboard;
pub mod rbac;
pub mod user;
