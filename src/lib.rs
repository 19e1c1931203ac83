//! galaxyd - Avorion galaxy daemon
//!
//! Supervises a dedicated Avorion server process, turns its log output into
//! typed events, keeps a cache of players, alliances and sectors, and funnels
//! every RCON command through a single ordered queue.

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod metrics;
pub mod rcon;
pub mod server;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use server::{ServerState, ServerStatus, Supervisor};
