//! Error taxonomy for a duct session.
//!
//! Every variant is fatal to the current game: the wire protocol has no
//! resumption handshake, so nothing is retried.

use lamduct_core::TransportError;
use std::process::ExitStatus;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DuctError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Failure to reach the game server.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("could not resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("host {0} resolved to no addresses")]
    NoAddress(String),
    #[error("could not connect to {host} on port {port}")]
    Refused { host: String, port: u16 },
    #[error("could not connect to {host}: no candidate port accepted ({tried} tried)")]
    Exhausted { host: String, tried: usize },
    #[error("not connected")]
    NotConnected,
}

/// A peer broke the message contract.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("offline client handshake lacks a \"me\" name: {0}")]
    MissingName(String),
    #[error("offline client is not running")]
    NotRunning,
}

/// The offline client process misbehaved.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start offline client {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("offline client {0} pipe was not captured")]
    MissingPipe(&'static str),
    #[error("offline client exited unexpectedly ({0})")]
    Exited(ExitStatus),
    #[error("offline client did not answer within {0:?}")]
    TurnTimeout(Duration),
    #[error("could not open client log {path}: {source}")]
    Log {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = DuctError> = std::result::Result<T, E>;
