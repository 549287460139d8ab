pub mod gate;
pub mod headers;
