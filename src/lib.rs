//! Analytics LSP - Language server flagging vulnerable dependencies
//!
//! This crate extracts dependency declarations from package.json, pom.xml
//! and requirements files, looks each one up in a remote component-analysis
//! service and publishes the findings as LSP diagnostics, one batch per
//! manifest version.

pub mod aggregator;
pub mod backend;
pub mod cache;
pub mod collectors;
pub mod config;
pub mod error;
pub mod file_types;
pub mod pipeline;
pub mod providers;
pub mod registries;
