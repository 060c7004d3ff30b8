pub mod core;
pub mod evaluations;
pub mod migration;
pub mod stats;
pub mod students;
