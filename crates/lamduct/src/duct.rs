//! The online/offline bridge.
//!
//! The server runs a stateful session: handshake, setup, a move request per
//! round, a final `stop`. The offline client only answers one message per
//! invocation. The duct sits between them, speaks the server's handshake on
//! the client's behalf, relays every game message, and swallows the server
//! notices the client has no use for.
//!
//! ```text
//! HANDSHAKE --(any non-timeout reply)--> GAMEPLAY --(stop)--> SCORING
//! ```

use crate::error::Result;
use crate::offline::{CommandSpawner, OfflineProcess, Spawner};
use crate::server::ServerConnection;
use lamduct_core::{Me, Message, STOP_KEY, TIMEOUT_KEY, You};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuctState {
    Handshake,
    Gameplay,
    Scoring,
}

/// What the client hears about the server's final `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StopRelay {
    /// Send it with the current state, read nothing back, and let the
    /// client exit.
    #[default]
    Notify,
    /// Run a full turn so the client's final state is kept.
    Turn,
}

/// Behaviour that differs between offline client implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DuctPolicy {
    /// Run `timeout` notices through the client as a turn (reply discarded)
    /// instead of swallowing them.
    pub forward_timeouts: bool,
    pub stop_relay: StopRelay,
}

/// Outcome of handing one server message to the duct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// The server acknowledged our `me`.
    Acknowledged,
    /// Relayed to the client; its reply is owed to the server.
    Relayed,
    /// A notice that needs no reply; the server speaks again next.
    Swallowed,
    /// The game is over.
    Finished,
}

/// What happened over one game.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameSummary {
    /// Our punter id, from the setup message.
    pub punter: Option<u64>,
    /// Server messages relayed to the client.
    pub turns: u32,
    /// Timeout notices received.
    pub timeouts: u32,
    /// Payload of the final `stop` message (moves and scores).
    pub stop: Option<Value>,
}

impl GameSummary {
    /// `(punter, score)` pairs from the `stop` payload.
    pub fn scores(&self) -> Vec<(u64, i64)> {
        self.stop
            .as_ref()
            .and_then(|stop| stop.get("scores"))
            .and_then(Value::as_array)
            .map(|scores| {
                scores
                    .iter()
                    .filter_map(|s| {
                        Some((s.get("punter")?.as_u64()?, s.get("score")?.as_i64()?))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub struct Duct<S = CommandSpawner> {
    offline: OfflineProcess<S>,
    name: Option<String>,
    state: DuctState,
    policy: DuctPolicy,
    introduced: bool,
    pending: Option<Message>,
    summary: GameSummary,
}

impl<S: Spawner> Duct<S> {
    /// Bridge `offline` to a server. Without a `name`, the client's own
    /// handshake name is used.
    pub fn new(offline: OfflineProcess<S>, name: Option<String>, policy: DuctPolicy) -> Self {
        Self {
            offline,
            name,
            state: DuctState::Handshake,
            policy,
            introduced: false,
            pending: None,
            summary: GameSummary::default(),
        }
    }

    /// False once the game has ended.
    pub fn ready(&self) -> bool {
        self.state != DuctState::Scoring
    }

    /// Current protocol phase.
    pub fn state(&self) -> DuctState {
        self.state
    }

    /// The name we play under, once settled.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The offline client handle.
    pub fn offline(&self) -> &OfflineProcess<S> {
        &self.offline
    }

    /// What has happened so far.
    pub fn summary(&self) -> &GameSummary {
        &self.summary
    }

    /// The next message owed to the server, if any.
    pub async fn outbound(&mut self) -> Result<Option<Message>> {
        match self.state {
            DuctState::Handshake if !self.introduced => {
                let name = match &self.name {
                    Some(name) => name.clone(),
                    None => self.offline.name().await?.to_string(),
                };
                self.name = Some(name.clone());
                self.introduced = true;
                Ok(Some(Message::try_from(Me::new(name))?))
            }
            DuctState::Handshake | DuctState::Scoring => Ok(None),
            DuctState::Gameplay => Ok(self.pending.take()),
        }
    }

    /// Hand a server message to the duct.
    pub async fn inbound(&mut self, message: Message) -> Result<Inbound> {
        if message.is_timeout() {
            return self.on_timeout(message).await;
        }

        match self.state {
            DuctState::Handshake => {
                if let Some(you) = You::from_message(&message)
                    && self.name.as_deref() != Some(you.you.as_str())
                {
                    tracing::warn!("server acknowledged us as {}", you.you);
                }
                tracing::debug!("handshake complete");
                self.state = DuctState::Gameplay;
                Ok(Inbound::Acknowledged)
            }
            DuctState::Gameplay if message.is_stop() => {
                self.summary.stop = message.get(STOP_KEY).cloned();
                match self.policy.stop_relay {
                    StopRelay::Notify => self.offline.finish(message).await?,
                    StopRelay::Turn => {
                        self.offline.turn(message).await?;
                    }
                }
                self.summary.turns += 1;
                self.state = DuctState::Scoring;
                tracing::debug!("game over after {} turns", self.summary.turns);
                Ok(Inbound::Finished)
            }
            DuctState::Gameplay => {
                if self.summary.punter.is_none() {
                    self.summary.punter = message.get("punter").and_then(Value::as_u64);
                }
                let reply = self.offline.turn(message).await?;
                self.summary.turns += 1;
                self.pending = Some(reply);
                Ok(Inbound::Relayed)
            }
            DuctState::Scoring => {
                tracing::warn!("ignoring server message after stop: {}", message);
                Ok(Inbound::Finished)
            }
        }
    }

    async fn on_timeout(&mut self, notice: Message) -> Result<Inbound> {
        self.summary.timeouts += 1;
        let timeout = notice.get(TIMEOUT_KEY).unwrap_or(&Value::Null);
        tracing::info!("timeout is {}", timeout);

        if self.policy.forward_timeouts && self.state == DuctState::Gameplay {
            let reply = self.offline.turn(notice).await?;
            tracing::debug!("discarding offline reply to timeout notice: {}", reply);
        }
        Ok(Inbound::Swallowed)
    }

    /// Play one game over `server`. Both the connection and the offline
    /// client are closed on return, whether the game ended or failed.
    pub async fn run<R, W>(mut self, mut server: ServerConnection<R, W>) -> Result<GameSummary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.relay(&mut server).await;
        server.close().await;
        self.offline.close();
        result.map(|()| std::mem::take(&mut self.summary))
    }

    async fn relay<R, W>(&mut self, server: &mut ServerConnection<R, W>) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while self.ready() && server.is_connected() {
            if let Some(message) = self.outbound().await? {
                server.send(&message).await?;
            }
            loop {
                let message = server.receive().await?;
                if self.inbound(message).await? != Inbound::Swallowed {
                    break;
                }
            }
        }
        Ok(())
    }
}
