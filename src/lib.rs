//! submission-validator - Grade a student submission inside CI
//!
//! Verifies that the reference tests directory and the CI pipeline file are
//! untouched, prepares the environment, runs the track's test framework,
//! parses its summary into a verdict, and reports a pass to the grading
//! service over HTTP. Every stage is fail-fast.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod environment;
pub mod error;
pub mod integrity;
pub mod pipeline;
pub mod process;
pub mod reporter;
pub mod util;
pub mod verdict;
