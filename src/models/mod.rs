pub mod assignment;
pub mod token;
pub mod user;
