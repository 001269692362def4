use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use user_admin::authz::{roles, Resolver};
use user_admin::cache::NoopCache;
use user_admin::db::users;
use user_admin::events::{self, log_activity};
use user_admin::models::user::User;
use user_admin::rbac::{setup_permissions, Rbac};

#[derive(Parser, Debug)]
#[command(author, version, about = "user-admin maintenance tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Create the standard permissions and roles and make the first user an admin
    PermissionsSetup {
        /// Delete every existing role and permission first
        #[arg(long)]
        fresh: bool,
    },
    /// Create a user, optionally with a role
    CreateUser {
        email: String,
        name: String,
        password: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        inactive: bool,
    },
    /// Create test_<role>@example.com with password "password" and the given role
    CreateTestUser {
        #[arg(default_value = roles::ROLE_MANAGER)]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::PermissionsSetup { fresh } => {
            let rbac = get_rbac().await?;
            if fresh {
                println!("Removing existing roles and permissions...");
            }
            let summary = setup_permissions(&rbac, fresh).await?;

            println!(
                "Permissions: {} created, {} total",
                summary.permissions_created, summary.permissions_total
            );
            for role in &summary.roles {
                println!("  {:<14} {} permissions", role.name, role.permissions.len());
            }
            match &summary.admin_assigned_to {
                Some(email) => println!("Admin role assigned to {}", email),
                None => println!("No users yet; create one and run this again to assign the admin role"),
            }
        }
        Commands::CreateUser {
            email,
            name,
            password,
            role,
            inactive,
        } => {
            let rbac = get_rbac().await?;
            create_user(&rbac, &email, &name, &password, role.as_deref(), !inactive).await?;
        }
        Commands::CreateTestUser { role } => {
            let rbac = get_rbac().await?;
            let email = format!("test_{}@example.com", role);
            let name = display_name(&role);
            create_user(&rbac, &email, &name, "password", Some(&role), true).await?;
            println!("Password: password");
        }
    }

    Ok(())
}

/// `role_manager` -> `Role manager`
fn display_name(role: &str) -> String {
    let spaced = role.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

/// Creates the user and assigns `role`; the user is removed again if the role cannot be assigned.
///
/// A successful creation is recorded as `user.created` with no actor.
async fn create_user(
    rbac: &Rbac,
    email: &str,
    name: &str,
    password: &str,
    role: Option<&str>,
    active: bool,
) -> anyhow::Result<()> {
    if users::find_by_email(rbac.pool(), email).await?.is_some() {
        anyhow::bail!("user {} already exists", email);
    }

    let user = User::from(users::insert_user(rbac.pool(), name, email, password, active).await?);

    if let Some(role) = role {
        if let Err(err) = rbac.grant_role(user.id, role).await {
            users::soft_delete(rbac.pool(), user.id).await?;
            anyhow::bail!("could not assign role {}: {}", role, err);
        }
    }

    let (event_bus, rx) = events::init_event_bus();
    let listener = tokio::spawn(events::start_activity_listener(rx, rbac.pool().clone()));
    log_activity(&event_bus, "created", None, &user);
    // closing the bus lets the listener drain and exit before the process does
    drop(event_bus);
    listener.await.context("activity listener failed")?;

    let permissions = rbac.resolver().effective_permissions(user.id).await?;

    println!("User created:");
    println!("Email: {}", user.email);
    println!("Active: {}", user.active);
    if let Some(role) = role {
        println!("Role: {}", role);
    }
    println!(
        "Permissions: {}",
        permissions.into_iter().collect::<Vec<_>>().join(", ")
    );

    Ok(())
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

// The CLI is short-lived, so it reads through to the store on every check.
async fn get_rbac() -> anyhow::Result<Rbac> {
    let pool = get_pool().await?;
    let resolver = Resolver::new(pool.clone(), Arc::new(NoopCache), std::time::Duration::ZERO);
    Ok(Rbac::new(pool, resolver))
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if !desc.is_empty() { desc } else { "unknown" };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Try local ./migrations first (when running from repo root). If that
    // doesn't exist (common in containers where CWD differs), fall back to
    // the crate-local migrations folder determined by CARGO_MANIFEST_DIR.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_are_capitalized() {
        assert_eq!(display_name("role_manager"), "Role manager");
        assert_eq!(display_name("admin"), "Admin");
    }

    #[test]
    fn migration_names_are_sanitized() {
        assert_eq!(sanitize_name("Add Audit-Log"), "add_audit_log");
    }

    async fn migrated_rbac() -> anyhow::Result<(Rbac, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let opts = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(dir.path().join("cli.db"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
            .await?
            .run(&pool)
            .await?;

        let resolver = Resolver::new(pool.clone(), Arc::new(NoopCache), std::time::Duration::ZERO);
        Ok((Rbac::new(pool, resolver), dir))
    }

    async fn created_events(pool: &SqlitePool, email: &str) -> anyhow::Result<i64> {
        let id: String = sqlx::query_scalar("SELECT id FROM users WHERE email = ? AND deleted_at IS NULL")
            .bind(email)
            .fetch_one(pool)
            .await?;
        let count = sqlx::query_scalar("SELECT COUNT(1) FROM activity_log WHERE event_name = 'user.created' AND subject_id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    #[tokio::test]
    async fn console_created_users_are_logged_once() -> anyhow::Result<()> {
        let (rbac, _dir) = migrated_rbac().await?;
        setup_permissions(&rbac, false).await?;

        create_user(&rbac, "ops@example.com", "Ops", "password123", Some("editor"), true).await?;
        assert_eq!(created_events(rbac.pool(), "ops@example.com").await?, 1);

        // a failed creation records nothing
        assert!(create_user(&rbac, "ops@example.com", "Ops", "password123", None, true).await.is_err());
        assert!(create_user(&rbac, "ghost@example.com", "Ghost", "password123", Some("wizard"), true).await.is_err());
        let total: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM activity_log WHERE event_name = 'user.created'")
            .fetch_one(rbac.pool())
            .await?;
        assert_eq!(total, 1);

        Ok(())
    }
}
