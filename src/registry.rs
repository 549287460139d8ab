//! Trainee↔trainer assignment registry.
//!
//! A trainee's trainer list only changes through a full replace: every
//! submitted username must be an active trainer, or nothing is written.
//! Writers of the same trainee are serialized by a per-trainee lock;
//! different trainees never share one.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::errors::AssignmentError;
use crate::models::assignment::ReplaceOutcome;
use crate::store::AssignmentRepository;

pub struct AssignmentRegistry {
    store: Arc<dyn AssignmentRepository>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Drop repeated usernames, keeping the first occurrence of each.
fn dedupe(usernames: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    usernames
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

impl AssignmentRegistry {
    pub fn new(store: Arc<dyn AssignmentRepository>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, trainee: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(trainee.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Replace the trainer set of `trainee` with exactly `usernames`.
    ///
    /// Duplicates collapse to one edge. Fails with `UnknownTrainers` naming
    /// every username that is missing, not a trainer, or inactive, in input
    /// order, and leaves the previous set untouched.
    pub async fn replace_trainer_list(
        &self,
        trainee: &str,
        usernames: &[String],
    ) -> Result<BTreeSet<String>, AssignmentError> {
        let requested = dedupe(usernames);

        let lock = self.lock_for(trainee);
        let outcome = {
            let _guard = lock.lock().await;
            self.store.replace_trainers(trainee, &requested).await
        };
        drop(lock);
        // Forget the lock once nobody else holds or waits on it.
        self.locks
            .remove_if(trainee, |_, l| Arc::strong_count(l) == 1);

        match outcome? {
            ReplaceOutcome::Replaced(set) => {
                tracing::info!(
                    trainee = %trainee,
                    trainers = set.len(),
                    "trainer list replaced"
                );
                Ok(set)
            }
            ReplaceOutcome::UnknownTrainers(names) => {
                tracing::warn!(
                    trainee = %trainee,
                    unknown = ?names,
                    "trainer list rejected"
                );
                Err(AssignmentError::UnknownTrainers(names))
            }
            ReplaceOutcome::TraineeNotFound => {
                Err(AssignmentError::TraineeNotFound(trainee.to_string()))
            }
        }
    }

    pub async fn trainers_of(&self, trainee: &str) -> Result<BTreeSet<String>, AssignmentError> {
        self.store
            .trainers_of(trainee)
            .await?
            .ok_or_else(|| AssignmentError::TraineeNotFound(trainee.to_string()))
    }
}
