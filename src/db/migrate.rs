//! Embedded schema migrations, applied in order and recorded by name.

use sqlx::PgPool;

pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_init_schema",
        sql: include_str!("../../sql/001_init_schema.sql"),
    },
    Migration {
        name: "002_history_indexes",
        sql: include_str!("../../sql/002_history_indexes.sql"),
    },
];

const LEDGER_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "_migrations" (
    "id" SERIAL PRIMARY KEY,
    "name" TEXT NOT NULL UNIQUE,
    "applied_at" TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migration `{name}` failed: {source}")]
    Migration {
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Migrations from `all` whose names are not in `applied`, in order.
pub fn pending<'a>(all: &'a [Migration], applied: &[String]) -> Vec<&'a Migration> {
    all.iter()
        .filter(|m| !applied.iter().any(|name| name == m.name))
        .collect()
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    sqlx::query(LEDGER_DDL).execute(pool).await?;

    let applied: Vec<String> = sqlx::query_scalar(r#"SELECT "name" FROM "_migrations" ORDER BY "id""#)
        .fetch_all(pool)
        .await?;

    let todo = pending(MIGRATIONS, &applied);
    if todo.is_empty() {
        tracing::info!(applied = applied.len(), "schema up to date");
        return Ok(());
    }

    for migration in &todo {
        // Each file and its ledger row commit together.
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrationError::Migration { name: migration.name, source })?;
        sqlx::query(r#"INSERT INTO "_migrations" ("name") VALUES ($1)"#)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(migration = migration.name, "migration applied");
    }

    tracing::info!(count = todo.len(), "schema migrated");
    Ok(())
}
