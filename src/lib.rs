//! Traffic engine of a TCP load generator.
//!
//! [`engine::Engine`] spawns one reactor per CPU; callers steer it with
//! single-byte commands through [`engine::CommandChannel`].

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod sys;

pub use engine::{
    Command, CommandChannel, Engine, EngineOptions, Payload, RemoteStats, WorkerReport,
    start_engine,
};
pub use error::{DialError, EngineError};
