//! In-memory offline clients for tests.

use crate::error::Result;
use crate::offline::{Spawned, Spawner};
use lamduct_core::{FramedTransport, Me, Message, You};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};

type Peer = FramedTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

pub const FAKE_NAME: &str = "fake-punter";

/// How a fake offline client behaves after it is spawned.
#[derive(Debug, Clone, Copy)]
pub enum FakeClient {
    /// Answers every request, `stop` included, counting turns in its state.
    Counter,
    /// Opens with a message that has no `me`.
    Nameless,
    /// Handshakes, then reads requests without ever answering.
    Silent,
    /// Handshakes, reads one request, then hangs up.
    HangUp,
}

#[derive(Debug, Default)]
struct Log {
    requests: Vec<Message>,
    acknowledged: Vec<String>,
}

/// Spawner whose processes are tasks on the test runtime.
#[derive(Debug, Clone)]
pub struct FakeSpawner {
    behavior: FakeClient,
    log: Arc<Mutex<Log>>,
}

impl FakeSpawner {
    pub fn new(behavior: FakeClient) -> Self {
        Self {
            behavior,
            log: Arc::default(),
        }
    }

    /// Every request received so far, across all spawned instances.
    pub fn requests(&self) -> Vec<Message> {
        self.log.lock().unwrap().requests.clone()
    }

    pub async fn wait_for_requests(&self, n: usize) -> Vec<Message> {
        self.wait_for(|log| (log.requests.len() >= n).then(|| log.requests.clone()))
            .await
    }

    pub async fn wait_for_acknowledged(&self, n: usize) -> Vec<String> {
        self.wait_for(|log| (log.acknowledged.len() >= n).then(|| log.acknowledged.clone()))
            .await
    }

    async fn wait_for<T>(&self, check: impl Fn(&Log) -> Option<T>) -> T {
        for _ in 0..400 {
            if let Some(found) = check(&self.log.lock().unwrap()) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("fake offline client never reached the expected state");
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&mut self) -> Result<Spawned> {
        let (ours, theirs) = duplex(64 * 1024);
        let (r, w) = split(theirs);
        tokio::spawn(run(FramedTransport::new(r, w), self.behavior, self.log.clone()));

        let (r, w) = split(ours);
        Ok(Spawned {
            transport: FramedTransport::new(r, w).boxed(),
            child: None,
        })
    }
}

async fn run(mut peer: Peer, behavior: FakeClient, log: Arc<Mutex<Log>>) {
    let hello = match behavior {
        FakeClient::Nameless => json!({"hello": FAKE_NAME}),
        _ => json!({"me": FAKE_NAME}),
    };
    let Ok(hello) = Message::try_from(hello) else {
        return;
    };
    if peer.send(&hello).await.is_err() {
        return;
    }

    let Ok(ack) = peer.receive().await else {
        return;
    };
    if let Some(you) = You::from_message(&ack) {
        log.lock().unwrap().acknowledged.push(you.you);
    }

    while let Ok(request) = peer.receive().await {
        log.lock().unwrap().requests.push(request.clone());

        match behavior {
            FakeClient::Counter => {
                if peer.send(&counter_reply(&request)).await.is_err() {
                    return;
                }
            }
            FakeClient::HangUp => return,
            _ => {}
        }
    }
}

fn counter_reply(request: &Message) -> Message {
    let turns = request
        .get("state")
        .and_then(|state| state.get("turns"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut reply = Message::new();
    if request.is_stop() {
        reply.insert("stopped", true);
    } else if let Some(punter) = request.get("punter") {
        reply.insert("ready", punter.clone());
    } else if let Some(turn) = request.get("turn") {
        reply.insert("seen", turn.clone());
    } else {
        reply.insert("pass", json!({"punter": 0}));
    }
    reply.with_state(json!({"turns": turns + 1}))
}

/// A `me` message naming `name`.
pub fn me(name: &str) -> Message {
    Message::try_from(Me::new(name)).unwrap()
}
