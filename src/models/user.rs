use serde::{Deserialize, Serialize};

/// Which side of the trainee↔trainer relation an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Trainee,
    Trainer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Trainee => "trainee",
            UserRole::Trainer => "trainer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trainee" => Some(UserRole::Trainee),
            "trainer" => Some(UserRole::Trainer),
            _ => None,
        }
    }
}

/// A row of the credential store. The username is the immutable identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub active: bool,
    pub role: UserRole,
}

impl UserRecord {
    pub fn identity(&self) -> User {
        User {
            username: self.username.clone(),
            role: self.role,
        }
    }
}

/// Resolved identity of an authenticated caller. Carries no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: UserRole,
}
