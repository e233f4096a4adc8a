//! Online runner.
//!
//! Connects to a punter server and plays one game with an offline client:
//!
//!   lamduct --cmd ./punter
//!   lamduct -a 10.0.0.2 -p 9004 -n duct-bot --spawn persistent --cmd "python3 bot.py"
//!
//! Without `--port` the ports 9010 down to 9001 are tried in turn.

use anyhow::Context;
use clap::Parser;
use lamduct::{Args, CommandSpawner, Duct, GameSummary, OfflineProcess, ServerConnection, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load(Args::parse())?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(settings.log_directive().parse()?))
        .init();

    let spawner = CommandSpawner::parse(&settings.cmd)?
        .with_log(&settings.log)
        .with_context(|| format!("offline client {}", settings.cmd))?;
    let offline = OfflineProcess::new(spawner, settings.spawn).with_turn_timeout(settings.turn_timeout);
    let duct = Duct::new(offline, settings.name.clone(), settings.policy);

    let server = ServerConnection::connect(&settings.host, settings.port, &settings.connect).await?;

    tokio::select! {
        result = duct.run(server) => {
            let summary = result.context("game aborted")?;
            report(&summary);
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted");
            anyhow::bail!("interrupted before the game ended")
        }
    }
}

fn report(summary: &GameSummary) {
    tracing::info!(
        "game over: {} turns, {} timeout notices",
        summary.turns,
        summary.timeouts
    );
    for (punter, score) in summary.scores() {
        let marker = if summary.punter == Some(punter) { " (us)" } else { "" };
        tracing::info!("punter {} scored {}{}", punter, score, marker);
    }
}
