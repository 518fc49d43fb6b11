//! dbcollect - database metrics collection engine.
//!
//! Runs configured SQL metrics against fleets of Oracle, MySQL, PostgreSQL
//! and DM databases, remembering unreachable hosts between runs.

pub mod aggregator;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod engine;
pub mod fingerprint;
pub mod loader;
pub mod mask;
pub mod model;
pub mod planner;
pub mod probe;
pub mod registry;
pub mod retry;
pub mod sink;

pub use engine::{CollectionEngine, EngineError};
