//! adfarm submitter library.
//!
//! This crate primarily ships a `submitter` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod config;
pub mod db;
pub mod protocols;
pub mod submit;
