//! Identity checks: password authentication, the session token ledger and
//! the failed-login tracker. `middleware::gate` drives all three per request;
//! handlers only touch the ledger.

pub mod attempts;
pub mod authenticator;
pub mod ledger;

pub use attempts::LoginAttempts;
pub use authenticator::{Authenticator, PasswordVerifier, Sha256Verifier};
pub use ledger::TokenLedger;
