//! Tessa daemon library - exposes modules for testing.

pub mod agent;
pub mod batch;
pub mod config;
pub mod extract;
pub mod jql;
pub mod session;
pub mod similarity;
pub mod summarize;
pub mod vocab;
