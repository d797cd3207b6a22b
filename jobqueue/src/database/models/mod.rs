//! Database models for jobqueue.
//!
//! These models map directly to the database schema.

pub mod job;

pub use job::*;
