use log::info;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{PersistOutcome, RepositoryPersister, RepositoryRecord, StdResult};

const CREATE_REPOSITORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id SERIAL PRIMARY KEY,
    owner_name TEXT NOT NULL,
    repo_name TEXT NOT NULL,
    stars INTEGER,
    created_at TIMESTAMPTZ,
    last_updated TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (owner_name, repo_name)
)
"#;

const UPSERT_REPOSITORY: &str = r#"
INSERT INTO repositories (owner_name, repo_name, stars, created_at, last_updated)
VALUES ($1, $2, $3, $4, CURRENT_TIMESTAMP)
ON CONFLICT (owner_name, repo_name) DO UPDATE
SET stars = EXCLUDED.stars,
    created_at = COALESCE(repositories.created_at, EXCLUDED.created_at),
    last_updated = EXCLUDED.last_updated
RETURNING xmax = 0 AS inserted
"#;

/// A persister that stores repository metadata in a PostgreSQL database.
pub struct PostgresSqlPersister {
    pool: PgPool,
}

impl PostgresSqlPersister {
    /// Creates a new `PostgresSqlPersister` instance.
    pub async fn try_new(connection_string: &str) -> StdResult<Self> {
        Ok(Self {
            pool: PgPoolOptions::new()
                .max_connections(1)
                .connect(connection_string)
                .await?,
        })
    }

    /// Creates the repositories table and its uniqueness constraint if missing.
    pub async fn ensure_schema(&self) -> StdResult<()> {
        sqlx::query(CREATE_REPOSITORIES_TABLE)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Releases the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

#[async_trait::async_trait]
impl RepositoryPersister for PostgresSqlPersister {
    async fn persist(&self, data: &[RepositoryRecord]) -> StdResult<PersistOutcome> {
        let mut outcome = PersistOutcome::default();
        let mut transaction = self.pool.begin().await?;
        for repository in data {
            let stars = i32::try_from(**repository.stars())?;
            let (inserted,): (bool,) = sqlx::query_as(UPSERT_REPOSITORY)
                .bind(repository.owner_name().as_str())
                .bind(repository.repo_name().as_str())
                .bind(stars)
                .bind(*repository.created_at())
                .fetch_one(&mut *transaction)
                .await?;
            if inserted {
                info!("Inserted {repository}");
                outcome.inserted += 1;
            } else {
                info!("Updated {repository}");
                outcome.updated += 1;
            }
        }
        transaction.commit().await?;

        Ok(outcome)
    }
}
