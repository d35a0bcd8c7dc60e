//! # turlsvc — a cluster-safe URL shortener
//!
//! ## Architecture
//!
//! - [`error`]: the crate-wide `Error`/`ErrorKind` taxonomy
//! - [`config`]: YAML + environment configuration, validated at startup
//! - [`codec`]: bijective base-58 short-code encoding
//! - [`sequence`]: segmented, CAS-backed monotonic ID allocation
//! - [`storage`]: the relational store contract and its SQLite implementation
//! - [`cache`]: the two-tier (in-process + remote) cache proxy
//! - [`ratelimit`]: the local and remote rate limiter family
//! - [`service`]: the orchestrator composing the above into Create/Retrieve/Lookup/Delete
//! - [`api`]: the HTTP surface
//! - [`app`]: process bootstrap — wiring every component together from `Config`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod app;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod sequence;
pub mod service;
pub mod storage;

/// Crate version, as set in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, as set in `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
