use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One trainee→trainer edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub trainee: String,
    pub trainer: String,
}

/// Trainer as resolved from the credential store during a replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerRef {
    pub username: String,
    pub active: bool,
}

/// Outcome of a backend replace. Validation failures are values, not
/// errors, so the caller can report them without treating them as faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced(BTreeSet<String>),
    UnknownTrainers(Vec<String>),
    TraineeNotFound,
}

/// Usernames from `requested` that are not in `resolved` as active trainers,
/// in input order.
pub fn unresolved(requested: &[String], resolved: &[TrainerRef]) -> Vec<String> {
    requested
        .iter()
        .filter(|name| {
            !resolved
                .iter()
                .any(|t| t.active && &t.username == *name)
        })
        .cloned()
        .collect()
}

pub fn edges(trainee: &str, trainers: &BTreeSet<String>) -> Vec<Assignment> {
    trainers
        .iter()
        .map(|trainer| Assignment {
            trainee: trainee.to_string(),
            trainer: trainer.clone(),
        })
        .collect()
}
