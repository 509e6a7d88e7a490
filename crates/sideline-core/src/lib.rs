//! sideline-core - Core library for Sideline
//!
//! This crate contains the offline-first game-session engine: the session
//! state machine, undo/redo history, durable local storage, the sync queue,
//! and the remote sync engine, composed behind [`SessionOrchestrator`].

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod history;
pub mod kv;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod sync;
pub mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::{Command, SessionId, SessionSnapshot};
pub use orchestrator::SessionOrchestrator;
