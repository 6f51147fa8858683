use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// True when the error is a PostgreSQL unique constraint violation
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    has_sql_state(error, UNIQUE_VIOLATION)
}

/// True when the error is a PostgreSQL foreign key violation
pub fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    has_sql_state(error, FOREIGN_KEY_VIOLATION)
}

fn has_sql_state(error: &sqlx::Error, state: &str) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == state)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_foreign_key_violation(&sqlx::Error::PoolTimedOut));
    }
}
