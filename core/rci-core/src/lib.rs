//! # rci-core
//!
//! Core library for the remote command interface (RCI) agent: a registry of
//! named hooks mapped to shell lines or in-process handlers, plus the engines
//! that run them.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Background work runs on named threads.
//! - **Thread-safe**: One [`RciService`] is shared by every caller; the registry
//!   and run guard synchronize internally.
//! - **Disk is the job record**: Async job state and logs live as plain files so
//!   a restarted agent can pick up where the old one stopped.
//! - **Errors are values**: Failures are [`RciError`] variants with stable codes;
//!   async failures are encoded into the reply body instead.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rci_core::{Args, RciConfig, RciService};
//!
//! let service = RciService::new(RciConfig::default())?;
//! let reply = service.run(b"", "/rci/ping", &Args::new())?;
//! assert_eq!(reply, br#"{"ping":{"result":["pong"]}}"#);
//! ```

pub mod builtin;
pub mod config;
pub mod error;
pub mod exec;
pub mod jobs;
pub mod liveness;
pub mod registry;
pub mod reload;
pub mod service;
pub mod types;

pub use builtin::{handler, BuiltinHandler};
pub use config::RciConfig;
pub use error::{RciError, Result};
pub use jobs::{ActiveHook, AsyncEngine, JobState, JobStore};
pub use liveness::{ProcessProbe, SystemProbe};
pub use registry::HookRegistry;
pub use reload::{FileSync, ScanReport};
pub use service::RciService;
pub use types::*;
