use std::collections::BTreeMap;

use chrono::Utc;
use log::info;
use tokio::sync::Mutex;

use crate::{PersistOutcome, RepositoryPersister, RepositoryRecord, StdResult, StoredRepository};

#[derive(Debug, Default)]
struct InMemoryTable {
    rows: BTreeMap<(String, String), StoredRepository>,
    last_id: i64,
}

/// A persister keeping the repositories table in memory, with the same upsert semantics as the database.
///
/// A batch is applied entirely or not at all.
#[derive(Debug, Default)]
pub struct InMemoryPersister {
    table: Mutex<InMemoryTable>,
}

impl InMemoryPersister {
    /// Creates a new empty `InMemoryPersister` instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the stored rows, ordered by owner and repository name.
    pub async fn rows(&self) -> Vec<StoredRepository> {
        let table = self.table.lock().await;

        table.rows.values().cloned().collect()
    }

    /// Returns the stored row for a repository, if any.
    pub async fn find(&self, owner_name: &str, repo_name: &str) -> Option<StoredRepository> {
        let table = self.table.lock().await;

        table
            .rows
            .get(&(owner_name.to_string(), repo_name.to_string()))
            .cloned()
    }
}

#[async_trait::async_trait]
impl RepositoryPersister for InMemoryPersister {
    async fn persist(&self, data: &[RepositoryRecord]) -> StdResult<PersistOutcome> {
        let stars = data
            .iter()
            .map(|repository| i32::try_from(**repository.stars()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut outcome = PersistOutcome::default();
        let mut table = self.table.lock().await;
        let now = Utc::now();
        for (repository, stars) in data.iter().zip(stars) {
            let key = (
                repository.owner_name().to_string(),
                repository.repo_name().to_string(),
            );
            match table.rows.get_mut(&key) {
                Some(row) => {
                    row.stars = stars;
                    row.created_at = row.created_at.or(Some(*repository.created_at()));
                    row.last_updated = now;
                    info!("Updated {repository}");
                    outcome.updated += 1;
                }
                None => {
                    table.last_id += 1;
                    let row = StoredRepository {
                        id: table.last_id,
                        owner_name: key.0.clone(),
                        repo_name: key.1.clone(),
                        stars,
                        created_at: Some(*repository.created_at()),
                        last_updated: now,
                    };
                    table.rows.insert(key, row);
                    info!("Inserted {repository}");
                    outcome.inserted += 1;
                }
            }
        }

        Ok(outcome)
    }
}
