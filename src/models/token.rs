use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Class of an issued token. Only access tokens exist today; the column is
/// kept so other classes can be added without a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "access" => Some(TokenType::Access),
            _ => None,
        }
    }
}

/// One issued session token. Records are never deleted; revocation only
/// flips `revoked` (and stamps `revoked_at`) once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub username: String,
    pub token_type: TokenType,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn new_access(value: String, username: &str) -> Self {
        Self {
            value,
            username: username.to_string(),
            token_type: TokenType::Access,
            revoked: false,
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    /// Flip the revoked flag. Returns `false` if it was already set.
    pub fn revoke(&mut self, at: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        self.revoked = true;
        self.revoked_at = Some(at);
        true
    }

    pub fn is_valid(&self) -> bool {
        !self.revoked
    }
}

/// Mask a token value for logs and listings: `gym_…a1b2`.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    } else {
        "****".to_string()
    }
}

/// Token as shown to its owner in listings. The full value is never echoed.
#[derive(Debug, Serialize)]
pub struct TokenSummary {
    pub token: String,
    pub token_type: TokenType,
    pub created_at: DateTime<Utc>,
}

impl From<&Token> for TokenSummary {
    fn from(t: &Token) -> Self {
        Self {
            token: mask(&t.value),
            token_type: t.token_type,
            created_at: t.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_is_one_way_and_idempotent() {
        let mut t = Token::new_access("gym_v1_abc".into(), "anna");
        assert!(t.is_valid());

        let first = Utc::now();
        assert!(t.revoke(first));
        assert!(!t.is_valid());
        assert_eq!(t.revoked_at, Some(first));

        // second call keeps the original timestamp
        assert!(!t.revoke(Utc::now()));
        assert_eq!(t.revoked_at, Some(first));
    }

    #[test]
    fn test_mask_hides_the_middle() {
        assert_eq!(mask("gym_v1_0123456789abcdef"), "gym_…cdef");
        assert_eq!(mask("short"), "****");
    }

    #[test]
    fn test_token_type_round_trips_through_str() {
        assert_eq!(TokenType::parse(TokenType::Access.as_str()), Some(TokenType::Access));
        assert_eq!(TokenType::parse("refresh"), None);
    }
}
