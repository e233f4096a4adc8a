//! The offline client subprocess.
//!
//! An offline client is memoryless: everything it needs to resume a game
//! travels in the `state` field of each message. This handle owns the
//! process, its pipes, and the current state blob; it attaches the blob to
//! every request and keeps whatever the client hands back.

use crate::error::{DuctError, ProcessError, ProtocolError, Result};
use lamduct_core::{BoxedTransport, FramedTransport, Me, Message, TransportError, You};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Grace period for noticing that a client which closed its pipe has exited.
const EXIT_PROBE: Duration = Duration::from_millis(100);

/// How long a client may take to exit after the final message, when no turn
/// timeout is set.
const EXIT_GRACE: Duration = Duration::from_secs(1);

/// How long an offline client process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SpawnPolicy {
    /// One process serves the whole game.
    Persistent,
    /// A fresh process per turn, killed once its reply is read.
    #[default]
    PerTurn,
}

/// Process lifecycle as seen by the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    Terminated,
}

/// A freshly started offline client: its framed stdio and, for real
/// processes, the child handle.
pub struct Spawned {
    pub transport: BoxedTransport,
    pub child: Option<Child>,
}

/// Starts offline client instances.
pub trait Spawner {
    fn spawn(&mut self) -> Result<Spawned>;
}

/// Spawns the offline client as an OS process.
#[derive(Debug)]
pub struct CommandSpawner {
    program: String,
    args: Vec<String>,
    log: Option<File>,
}

impl CommandSpawner {
    /// Run `program` with `args`; stderr is discarded until a log is set.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            log: None,
        }
    }

    /// Split a command line on whitespace into program and arguments.
    pub fn parse(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| DuctError::Config("offline client command is empty".into()))?;
        Ok(Self::new(program, words.collect()))
    }

    /// Append the client's stderr to `path`.
    pub fn with_log(mut self, path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ProcessError::Log {
                path: path.display().to_string(),
                source,
            })?;
        self.log = Some(file);
        Ok(self)
    }

    /// Program path or name.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Spawner for CommandSpawner {
    fn spawn(&mut self) -> Result<Spawned> {
        let stderr = match &self.log {
            Some(file) => match file.try_clone() {
                Ok(file) => Stdio::from(file),
                Err(e) => {
                    tracing::warn!("client log unavailable, discarding stderr: {}", e);
                    Stdio::null()
                }
            },
            None => Stdio::null(),
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        tracing::debug!("spawned offline client {} (pid {:?})", self.program, child.id());

        Ok(Spawned {
            transport: FramedTransport::new(stdout, stdin).boxed(),
            child: Some(child),
        })
    }
}

/// Handle on the offline client: spawn, handshake, one message per turn,
/// teardown.
pub struct OfflineProcess<S = CommandSpawner> {
    spawner: S,
    policy: SpawnPolicy,
    turn_timeout: Option<Duration>,
    name: Option<String>,
    state: Value,
    live: Option<Spawned>,
    lifecycle: Lifecycle,
    spawns: usize,
}

impl<S: Spawner> OfflineProcess<S> {
    /// A handle that starts no process until first needed.
    pub fn new(spawner: S, policy: SpawnPolicy) -> Self {
        Self {
            spawner,
            policy,
            turn_timeout: None,
            name: None,
            state: Value::Null,
            live: None,
            lifecycle: Lifecycle::NotStarted,
            spawns: 0,
        }
    }

    /// Bound each handshake and turn by a wall-clock limit.
    pub fn with_turn_timeout(mut self, limit: Option<Duration>) -> Self {
        self.turn_timeout = limit;
        self
    }

    /// Start a process and run its handshake, unless one is already live.
    pub async fn ensure_started(&mut self) -> Result<()> {
        if self.live.is_some() {
            return Ok(());
        }

        let spawned = self.spawner.spawn()?;
        self.spawns += 1;
        self.lifecycle = Lifecycle::Running;
        let live = self.live.insert(spawned);

        let result = bounded(self.turn_timeout, handshake(&mut live.transport)).await;
        let result = match result {
            Ok(name) => Ok(name),
            Err(e) => Err(explain(live, e).await),
        };

        match result {
            Ok(name) => {
                tracing::debug!("offline client introduced itself as {}", name);
                self.name.get_or_insert(name);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// The name from the client's handshake, starting a process if needed.
    pub async fn name(&mut self) -> Result<&str> {
        if self.name.is_none() {
            self.ensure_started().await?;
        }
        self.name
            .as_deref()
            .ok_or_else(|| ProtocolError::NotRunning.into())
    }

    /// Run one turn: send `request` with the held state, return the reply
    /// with its state removed and retained.
    pub async fn turn(&mut self, request: Message) -> Result<Message> {
        self.ensure_started().await?;
        let request = request.with_state(self.state.clone());
        let limit = self.turn_timeout;

        let result = match self.live.as_mut() {
            Some(live) => match bounded(limit, exchange(&mut live.transport, &request)).await {
                Ok(reply) => Ok(reply),
                Err(e) => Err(explain(live, e).await),
            },
            None => Err(ProtocolError::NotRunning.into()),
        };

        match result {
            Ok(mut reply) => {
                if self.policy == SpawnPolicy::PerTurn {
                    let failed = self.live.as_mut().and_then(failed_exit);
                    self.close();
                    if let Some(status) = failed {
                        return Err(ProcessError::Exited(status).into());
                    }
                }
                self.state = reply.take_state();
                Ok(reply)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Send the last message of the game with the held state, then close
    /// the client's input and give it up to the turn timeout to exit on its
    /// own before it is killed. No reply is read.
    pub async fn finish(&mut self, request: Message) -> Result<()> {
        self.ensure_started().await?;
        let request = request.with_state(self.state.clone());

        let result = match self.live.as_mut() {
            Some(live) => {
                let sent = live.transport.send(&request).await;
                if let Err(e) = live.transport.close().await {
                    tracing::debug!("offline client input already closed: {}", e);
                }
                if let Some(child) = live.child.as_mut() {
                    let grace = self.turn_timeout.unwrap_or(EXIT_GRACE);
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(Ok(status)) => tracing::debug!("offline client exited ({})", status),
                        _ => tracing::debug!("offline client still running after {:?}", grace),
                    }
                }
                sent.map_err(DuctError::from)
            }
            None => Err(ProtocolError::NotRunning.into()),
        };

        self.close();
        result
    }

    /// Number of processes started so far.
    pub fn spawn_count(&self) -> usize {
        self.spawns
    }
}

impl<S> OfflineProcess<S> {
    /// Kill the process, if any. Never waits for it to exit.
    pub fn close(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        if let Some(child) = live.child.as_mut()
            && let Err(e) = child.start_kill()
        {
            tracing::debug!("offline client already gone: {}", e);
        }
        self.lifecycle = Lifecycle::Terminated;
        tracing::trace!("offline client closed");
    }

    /// Where the current process is in its life.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The state blob the next request will carry.
    pub fn session_state(&self) -> &Value {
        &self.state
    }
}

impl<S> Drop for OfflineProcess<S> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn handshake(transport: &mut BoxedTransport) -> Result<String> {
    let hello = transport.receive().await?;
    let Some(me) = Me::from_message(&hello) else {
        return Err(ProtocolError::MissingName(hello.to_string()).into());
    };
    transport.send(&Message::try_from(You::new(me.me.clone()))?).await?;
    Ok(me.me)
}

async fn exchange(transport: &mut BoxedTransport, request: &Message) -> Result<Message> {
    transport.send(request).await?;
    Ok(transport.receive().await?)
}

async fn bounded<T>(limit: Option<Duration>, work: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| Err(ProcessError::TurnTimeout(limit).into())),
        None => work.await,
    }
}

/// A non-zero exit status, if the client has already exited. Never waits.
fn failed_exit(live: &mut Spawned) -> Option<ExitStatus> {
    let child = live.child.as_mut()?;
    match child.try_wait() {
        Ok(Some(status)) if !status.success() => Some(status),
        _ => None,
    }
}

/// A closed pipe from a client that has exited is reported as the exit.
async fn explain(live: &mut Spawned, error: DuctError) -> DuctError {
    let closed = matches!(
        error,
        DuctError::Transport(TransportError::UnexpectedEof { .. } | TransportError::Io(_))
    );
    if let (true, Some(child)) = (closed, live.child.as_mut())
        && let Ok(Ok(status)) = tokio::time::timeout(EXIT_PROBE, child.wait()).await
    {
        return ProcessError::Exited(status).into();
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClient, FakeSpawner};
    use serde_json::json;

    fn message(value: Value) -> Message {
        Message::try_from(value).unwrap()
    }

    #[tokio::test]
    async fn name_comes_from_handshake() {
        let spawner = FakeSpawner::new(FakeClient::Counter);
        let mut offline = OfflineProcess::new(spawner.clone(), SpawnPolicy::Persistent);
        assert_eq!(offline.lifecycle(), Lifecycle::NotStarted);

        assert_eq!(offline.name().await.unwrap(), "fake-punter");
        assert_eq!(offline.lifecycle(), Lifecycle::Running);
        // Cached; no second handshake.
        assert_eq!(offline.name().await.unwrap(), "fake-punter");
        assert_eq!(offline.spawn_count(), 1);
        assert_eq!(spawner.wait_for_acknowledged(1).await, ["fake-punter"]);
    }

    #[tokio::test]
    async fn state_round_trips_across_turns() {
        let spawner = FakeSpawner::new(FakeClient::Counter);
        let mut offline = OfflineProcess::new(spawner.clone(), SpawnPolicy::Persistent);

        for turn in 0..5 {
            let reply = offline
                .turn(message(json!({"move": {"moves": []}, "turn": turn})))
                .await
                .unwrap();
            assert!(!reply.contains_key("state"));
            assert_eq!(reply.get("seen"), Some(&json!(turn)));
            assert_eq!(offline.session_state(), &json!({"turns": turn + 1}));
        }

        let requests = spawner.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].get("state"), Some(&Value::Null));
        for k in 1..5 {
            assert_eq!(requests[k].get("state"), Some(&json!({"turns": k})));
        }
        assert_eq!(offline.spawn_count(), 1);
    }

    #[tokio::test]
    async fn state_is_the_last_request_field() {
        let spawner = FakeSpawner::new(FakeClient::Counter);
        let mut offline = OfflineProcess::new(spawner.clone(), SpawnPolicy::Persistent);
        offline
            .turn(message(json!({"b": 1, "a": 2})))
            .await
            .unwrap();
        let keys: Vec<String> = spawner.requests()[0].iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, ["b", "a", "state"]);
    }

    #[tokio::test]
    async fn per_turn_policy_restarts_every_turn() {
        let spawner = FakeSpawner::new(FakeClient::Counter);
        let mut offline = OfflineProcess::new(spawner.clone(), SpawnPolicy::PerTurn);

        for turn in 0..3 {
            offline.turn(message(json!({"turn": turn}))).await.unwrap();
            assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
        }

        assert_eq!(offline.spawn_count(), 3);
        assert_eq!(offline.session_state(), &json!({"turns": 3}));
        let requests = spawner.requests();
        assert_eq!(requests[2].get("state"), Some(&json!({"turns": 2})));
    }

    #[tokio::test]
    async fn per_turn_name_lookup_serves_the_first_turn() {
        let spawner = FakeSpawner::new(FakeClient::Counter);
        let mut offline = OfflineProcess::new(spawner, SpawnPolicy::PerTurn);
        offline.name().await.unwrap();
        offline.turn(message(json!({"turn": 0}))).await.unwrap();
        assert_eq!(offline.spawn_count(), 1);
    }

    #[tokio::test]
    async fn handshake_without_me_is_a_protocol_error() {
        let spawner = FakeSpawner::new(FakeClient::Nameless);
        let mut offline = OfflineProcess::new(spawner, SpawnPolicy::Persistent);
        let err = offline.ensure_started().await.unwrap_err();
        assert!(matches!(err, DuctError::Protocol(ProtocolError::MissingName(_))));
        assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let spawner = FakeSpawner::new(FakeClient::Silent);
        let mut offline = OfflineProcess::new(spawner, SpawnPolicy::Persistent)
            .with_turn_timeout(Some(Duration::from_millis(50)));
        let err = offline.turn(message(json!({"move": {}}))).await.unwrap_err();
        assert!(matches!(err, DuctError::Process(ProcessError::TurnTimeout(_))));
        assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
    }

    #[tokio::test]
    async fn client_hanging_up_mid_turn() {
        let spawner = FakeSpawner::new(FakeClient::HangUp);
        let mut offline = OfflineProcess::new(spawner, SpawnPolicy::Persistent);
        let err = offline.turn(message(json!({"move": {}}))).await.unwrap_err();
        assert!(matches!(
            err,
            DuctError::Transport(TransportError::UnexpectedEof { .. })
        ));
    }

    #[tokio::test]
    async fn finish_sends_state_and_terminates() {
        let spawner = FakeSpawner::new(FakeClient::Counter);
        let mut offline = OfflineProcess::new(spawner.clone(), SpawnPolicy::Persistent);
        offline.turn(message(json!({"turn": 0}))).await.unwrap();
        offline.finish(message(json!({"stop": {"moves": []}}))).await.unwrap();
        assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
        assert_eq!(offline.spawn_count(), 1);

        let requests = spawner.wait_for_requests(2).await;
        assert_eq!(requests[1].get("state"), Some(&json!({"turns": 1})));
        assert!(requests[1].is_stop());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let spawner = FakeSpawner::new(FakeClient::Counter);
        let mut offline = OfflineProcess::new(spawner, SpawnPolicy::Persistent);
        offline.close();
        assert_eq!(offline.lifecycle(), Lifecycle::NotStarted);
        offline.ensure_started().await.unwrap();
        offline.close();
        offline.close();
        assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandSpawner {
        CommandSpawner::new("sh", vec!["-c".into(), script.into()])
    }

    #[cfg(unix)]
    fn exit_code(err: DuctError) -> Option<i32> {
        match err {
            DuctError::Process(ProcessError::Exited(status)) => status.code(),
            other => panic!("expected an exit, got {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_client_reports_exit_status() {
        let mut offline = OfflineProcess::new(sh("exit 3"), SpawnPolicy::Persistent);
        let err = offline.ensure_started().await.unwrap_err();
        assert_eq!(exit_code(err), Some(3));
        assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn client_stderr_is_appended_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("client.log");
        std::fs::write(&log, "earlier\n").unwrap();

        let spawner = sh("echo oops >&2; exit 3").with_log(&log).unwrap();
        let mut offline = OfflineProcess::new(spawner, SpawnPolicy::Persistent);
        offline.ensure_started().await.unwrap_err();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "earlier\noops\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn per_turn_reply_then_failure_is_an_error() {
        // The backgrounded sleep keeps stdin open after sh exits.
        let script = r#"printf '15:{"me":"sh-bot"}11:{"ready":0}'; sleep 1 <&0 & exit 7"#;
        let mut offline = OfflineProcess::new(sh(script), SpawnPolicy::PerTurn)
            .with_turn_timeout(Some(Duration::from_secs(5)));
        offline.ensure_started().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let err = offline.turn(message(json!({"punter": 0}))).await.unwrap_err();
        assert_eq!(exit_code(err), Some(7));
        assert_eq!(offline.session_state(), &Value::Null);
        assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn finish_kills_a_client_that_ignores_eof() {
        let script = r#"printf '15:{"me":"sh-bot"}'; exec sleep 30"#;
        let mut offline = OfflineProcess::new(sh(script), SpawnPolicy::Persistent)
            .with_turn_timeout(Some(Duration::from_millis(200)));
        assert_eq!(offline.name().await.unwrap(), "sh-bot");

        let started = std::time::Instant::now();
        offline.finish(message(json!({"stop": {"moves": []}}))).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(offline.lifecycle(), Lifecycle::Terminated);
    }

    #[test]
    fn parse_command_line() {
        let spawner = CommandSpawner::parse("  ./punter --seed 7 ").unwrap();
        assert_eq!(spawner.program(), "./punter");
        assert_eq!(spawner.args, ["--seed", "7"]);
        assert!(CommandSpawner::parse("   ").is_err());
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let spawner = CommandSpawner::new("/nonexistent/lamduct-offline-client", vec![]);
        let mut offline = OfflineProcess::new(spawner, SpawnPolicy::Persistent);
        let err = offline.ensure_started().await.unwrap_err();
        assert!(matches!(err, DuctError::Process(ProcessError::Spawn { .. })));
    }
}
