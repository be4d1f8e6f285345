pub mod downloads;
pub mod drain;
