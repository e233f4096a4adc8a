//! A minimal offline client that passes every move.
//!
//! Speaks the offline protocol on stdin/stdout and keeps its punter id and a
//! turn counter in the `state` blob, so it works whether it is spawned once
//! per game or once per turn. Diagnostics go to stderr.
//!
//!   lamduct --cmd "lamduct-pass my-name"

use lamduct_core::{FramedTransport, Me, Message, TransportError, You};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

const DEFAULT_NAME: &str = "lamduct-pass";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PassState {
    punter: u64,
    turns: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("lamduct_pass=info".parse()?))
        .init();

    let name = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_NAME.to_string());
    let mut transport = FramedTransport::new(tokio::io::stdin(), tokio::io::stdout());

    transport.send(&Message::try_from(Me::new(name.clone()))?).await?;
    let ack = transport.receive().await?;
    match You::from_message(&ack) {
        Some(you) if you.you == name => {}
        _ => tracing::warn!("unexpected handshake reply: {}", ack),
    }

    loop {
        let mut request = match transport.receive().await {
            Ok(request) => request,
            Err(TransportError::UnexpectedEof { buffered: 0 }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if request.is_stop() {
            let stop = request.get("stop").unwrap_or(&Value::Null);
            tracing::info!("game over: {}", stop);
            return Ok(());
        }

        let state = request.take_state();
        let reply = respond(&request, state)?;
        transport.send(&reply).await?;
    }
}

fn respond(request: &Message, state: Value) -> anyhow::Result<Message> {
    if let Some(punter) = request.get("punter").and_then(Value::as_u64) {
        let state = PassState { punter, turns: 0 };
        return Ok(Message::try_from(json!({"ready": punter}))?.with_state(serde_json::to_value(state)?));
    }

    let mut state: PassState = serde_json::from_value(state).unwrap_or_default();
    if request.contains_key("move") {
        state.turns += 1;
        let reply = json!({"pass": {"punter": state.punter}});
        return Ok(Message::try_from(reply)?.with_state(serde_json::to_value(state)?));
    }

    // Anything else (a forwarded timeout notice) leaves the state untouched.
    Ok(Message::new().with_state(serde_json::to_value(state)?))
}
