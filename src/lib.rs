//! archup: an interactive and headless backup orchestrator.
//!
//! The crate selects files, drives external archivers, optional encryption,
//! splitting, checksums and summaries, uploads the results with bounded retries
//! and reports the final status to notification plugins.

pub mod archive;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod error;
pub mod exclude;
pub mod exec;
pub mod file_util;
pub mod job;
pub mod logging;
pub mod notify;
pub mod path_util;
pub mod selection;
pub mod summary;
pub mod sysexits;
pub mod upload;

pub use error::PipelineError;
