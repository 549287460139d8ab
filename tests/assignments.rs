//! Assignment registry: set semantics, all-or-nothing replace and
//! concurrent writers.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use gym_access::errors::AssignmentError;
use gym_access::models::user::{UserRecord, UserRole};
use gym_access::registry::AssignmentRegistry;
use gym_access::store::memory::MemoryStore;

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn set(v: &[&str]) -> BTreeSet<String> {
    v.iter().map(|s| s.to_string()).collect()
}

async fn gym() -> Arc<AssignmentRegistry> {
    let store = Arc::new(MemoryStore::new());
    let people = [
        ("tina", UserRole::Trainee, true),
        ("tom", UserRole::Trainee, true),
        ("a", UserRole::Trainer, true),
        ("b", UserRole::Trainer, true),
        ("c", UserRole::Trainer, true),
        ("gone", UserRole::Trainer, false),
    ];
    for (name, role, active) in people {
        store
            .add_user(UserRecord {
                username: name.into(),
                password_hash: String::new(),
                active,
                role,
            })
            .await
            .unwrap();
    }
    Arc::new(AssignmentRegistry::new(store))
}

#[tokio::test]
async fn test_duplicate_input_equals_deduplicated_input() {
    let reg = gym().await;
    let dup = reg
        .replace_trainer_list("tina", &names(&["c", "a", "c", "a"]))
        .await
        .unwrap();
    let plain = reg
        .replace_trainer_list("tina", &names(&["a", "c"]))
        .await
        .unwrap();
    assert_eq!(dup, plain);
    assert_eq!(plain, set(&["a", "c"]));
}

/// One bad name and the previous list survives intact.
#[tokio::test]
async fn test_replace_is_all_or_nothing() {
    let reg = gym().await;
    reg.replace_trainer_list("tina", &names(&["a", "b"]))
        .await
        .unwrap();

    let err = reg
        .replace_trainer_list("tina", &names(&["c", "nobody", "gone", "tom"]))
        .await
        .unwrap_err();
    match err {
        AssignmentError::UnknownTrainers(bad) => {
            // input order; a trainee is not a trainer
            assert_eq!(bad, names(&["nobody", "gone", "tom"]));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(reg.trainers_of("tina").await.unwrap(), set(&["a", "b"]));
}

#[tokio::test]
async fn test_trainees_are_independent() {
    let reg = gym().await;
    reg.replace_trainer_list("tina", &names(&["a"])).await.unwrap();
    reg.replace_trainer_list("tom", &names(&["b", "c"])).await.unwrap();
    reg.replace_trainer_list("tina", &[]).await.unwrap();

    assert!(reg.trainers_of("tina").await.unwrap().is_empty());
    assert_eq!(reg.trainers_of("tom").await.unwrap(), set(&["b", "c"]));
}

/// Racing writers on two trainees: each trainee ends up with exactly one
/// of the lists submitted for it, never a blend.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_replaces_never_interleave() {
    let reg = gym().await;
    let lists: Vec<Vec<String>> = vec![
        names(&["a"]),
        names(&["b", "c"]),
        names(&["a", "b", "c"]),
        names(&[]),
        names(&["c"]),
    ];

    let mut tasks = Vec::new();
    for round in 0..40 {
        for trainee in ["tina", "tom"] {
            let reg = reg.clone();
            let list = lists[round % lists.len()].clone();
            tasks.push(tokio::spawn(async move {
                reg.replace_trainer_list(trainee, &list).await
            }));
        }
    }

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let allowed: Vec<BTreeSet<String>> = lists
        .iter()
        .map(|l| l.iter().cloned().collect())
        .collect();
    for trainee in ["tina", "tom"] {
        let current = reg.trainers_of(trainee).await.unwrap();
        assert!(
            allowed.contains(&current),
            "{} ended with a blended list: {:?}",
            trainee,
            current
        );
    }
}

/// Serialized writers: the last one to finish wins.
#[tokio::test]
async fn test_last_write_wins_sequentially() {
    let reg = gym().await;
    for list in [names(&["a"]), names(&["b"]), names(&["c", "a"])] {
        reg.replace_trainer_list("tom", &list).await.unwrap();
    }
    assert_eq!(reg.trainers_of("tom").await.unwrap(), set(&["a", "c"]));
}

/// One writer per trainee, both running at once: each trainee ends with
/// the last list its own writer submitted.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_trainees_end_with_their_last_write() {
    let reg = gym().await;
    let plans: Vec<(&'static str, Vec<Vec<String>>)> = vec![
        (
            "tina",
            (0..50)
                .map(|i| if i % 2 == 0 { names(&["a", "b"]) } else { names(&["c"]) })
                .collect(),
        ),
        (
            "tom",
            (0..50)
                .map(|i| if i % 3 == 0 { names(&[]) } else { names(&["b", "a"]) })
                .collect(),
        ),
    ];

    let tasks = plans.iter().cloned().map(|(trainee, writes)| {
        let reg = reg.clone();
        tokio::spawn(async move {
            for list in &writes {
                reg.replace_trainer_list(trainee, list).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    for (trainee, writes) in &plans {
        let last: BTreeSet<String> = writes.last().unwrap().iter().cloned().collect();
        assert_eq!(reg.trainers_of(trainee).await.unwrap(), last);
    }
}
