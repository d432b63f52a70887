//! Fileforge - declarative file-processing pipelines
//!
//! This library crate exposes the CLI's building blocks for integration testing.

pub mod config;
pub mod runner;
