//! jobvisor scheduler library.
//!
//! This crate primarily ships a `scheduler` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod cluster;
pub mod config;
pub mod creators;
pub mod db;
pub mod scheduler;
