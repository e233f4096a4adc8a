//! Online-to-offline runner for punter games.
//!
//! A punter server speaks a stateful, length-prefixed JSON protocol over TCP.
//! An offline client is a subprocess that answers exactly one message per
//! invocation and carries everything it remembers in a `state` blob. This
//! crate bridges the two:
//!
//! - [`ServerConnection`] finds the server (probing a port window if needed)
//! - [`OfflineProcess`] spawns the client, runs its handshake, and threads
//!   the state blob through every turn
//! - [`Duct`] is the state machine relaying between them
//!
//! Framing lives in [`lamduct_core`].

pub mod config;
pub mod duct;
pub mod error;
pub mod offline;
pub mod server;

#[cfg(test)]
mod testing;

pub use config::{Args, FileConfig, Settings};
pub use duct::{Duct, DuctPolicy, DuctState, GameSummary, Inbound, StopRelay};
pub use error::{ConnectionError, DuctError, ProcessError, ProtocolError, Result};
pub use offline::{CommandSpawner, Lifecycle, OfflineProcess, SpawnPolicy, Spawned, Spawner};
pub use server::{ConnectOptions, ServerConnection, probe_ports};
