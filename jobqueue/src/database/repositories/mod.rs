//! Repository layer for database access.
//!
//! Repositories own every SQL statement; services above them only see
//! models and the repository traits.

pub mod job;

pub use job::*;
