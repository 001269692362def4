//! Permission catalog, role registry and the user assignment ledger.
//!
//! Every write that can change somebody's effective permissions runs in a
//! single transaction and drops the resolver snapshot of each affected user
//! before returning.

use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::authz::Resolver;
use crate::db::row_parsers::parse_uuid;
use crate::errors::AppResult;

mod catalog;
mod ledger;
pub mod setup;

pub use setup::{setup_permissions, SetupSummary};

#[derive(Clone)]
pub struct Rbac {
    pool: SqlitePool,
    resolver: Resolver,
}

impl Rbac {
    pub fn new(pool: SqlitePool, resolver: Resolver) -> Self {
        Self { pool, resolver }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }
}

/// De-duplicates a requested name set, keeping first-seen order.
fn unique_names(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .iter()
        .map(|name| name.trim().to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Runs a single-parameter query returning user ids. Reuse the parameter with `?1`.
async fn user_ids(tx: &mut Transaction<'_, Sqlite>, sql: &str, bind: &str) -> AppResult<Vec<Uuid>> {
    let raw: Vec<String> = sqlx::query_scalar(sql)
        .bind(bind)
        .fetch_all(&mut **tx)
        .await?;

    raw.iter().map(|id| parse_uuid(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_trims_and_dedupes() {
        let names = vec![" edit users".to_string(), "view users".into(), "edit users ".into()];
        assert_eq!(unique_names(&names), vec!["edit users", "view users"]);
    }
}
