// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The broker server: accepts worker connections on a local Unix stream
//! socket, speaks newline-delimited JSON frames, and serializes all
//! coordination state behind a single actor task.
//!
//! Modeled on the single-mpsc-actor shape used elsewhere in this codebase
//! for in-process coordination hubs: handlers never touch shared state
//! directly, they send a command and await a reply.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use clio_config::BrokerConfig;

use crate::protocol::{decode_line, encode_line, BlockedFile, ClientFrame, ServerFrame};
use crate::scheduler::{ReleaseInfo, SlotDecision};
use crate::state::BrokerState;

struct ActorRequest {
    agent_id: Option<String>,
    frame: ClientFrame,
    reply: oneshot::Sender<ServerFrame>,
}

enum ActorMsg {
    Frame(ActorRequest),
    Disconnect(String),
    Sweep,
}

/// Handle used by connection tasks to reach the single state-owning actor.
#[derive(Clone)]
struct ActorHandle(mpsc::Sender<ActorMsg>);

impl ActorHandle {
    async fn call(&self, agent_id: Option<String>, frame: ClientFrame) -> ServerFrame {
        let (tx, rx) = oneshot::channel();
        if self.0.send(ActorMsg::Frame(ActorRequest { agent_id, frame, reply: tx })).await.is_err() {
            return ServerFrame::Error { message: "broker shut down".into() };
        }
        rx.await.unwrap_or(ServerFrame::Error { message: "broker dropped the reply".into() })
    }

    async fn disconnect(&self, agent_id: String) {
        let _ = self.0.send(ActorMsg::Disconnect(agent_id)).await;
    }
}

/// The coordination broker, bound to a Unix stream socket.
pub struct BrokerServer {
    listener: UnixListener,
    actor: ActorHandle,
}

impl BrokerServer {
    /// Bind the broker's well-known per-session socket path. Any stale
    /// socket file left behind by a previous crashed broker is removed
    /// first (a fresh broker owns no locks, so there is nothing to
    /// preserve).
    pub fn bind(socket_path: impl AsRef<Path>, config: BrokerConfig) -> anyhow::Result<Self> {
        let socket_path = socket_path.as_ref();
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        let actor = spawn_actor(config);
        Ok(Self { listener, actor })
    }

    /// Accept connections forever. Each connection runs in its own task;
    /// state is owned entirely by the actor spawned in `bind`.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("broker listening");
        loop {
            let (stream, _addr) = self.listener.accept().await?;
            let actor = self.actor.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, actor).await {
                    debug!(error = %e, "connection closed");
                }
            });
        }
    }
}

async fn handle_connection(stream: UnixStream, actor: ActorHandle) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut agent_id: Option<String> = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "socket read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: ClientFrame = match decode_line(&line) {
            Ok(f) => f,
            Err(e) => {
                let reply = ServerFrame::Error { message: e.to_string() };
                write_half.write_all(encode_line(&reply)?.as_bytes()).await?;
                continue;
            }
        };

        if let ClientFrame::Register { agent_id: ref id, .. } = frame {
            agent_id = Some(id.clone());
        }

        let reply = actor.call(agent_id.clone(), frame).await;
        write_half.write_all(encode_line(&reply)?.as_bytes()).await?;
    }

    if let Some(id) = agent_id {
        actor.disconnect(id).await;
    }
    Ok(())
}

fn spawn_actor(config: BrokerConfig) -> ActorHandle {
    let (tx, mut rx) = mpsc::channel::<ActorMsg>(256);
    let handle = ActorHandle(tx.clone());

    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let disconnect_timeout = Duration::from_secs(config.disconnect_timeout_secs);

    tokio::spawn(async move {
        let mut state = BrokerState::new(config.max_parallel_api_slots);
        let mut sweep = tokio::time::interval(heartbeat_interval);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        ActorMsg::Frame(req) => handle_frame(&mut state, req),
                        ActorMsg::Disconnect(id) => {
                            info!(agent_id = %id, "client disconnected");
                            state.disconnect(&id);
                        }
                        ActorMsg::Sweep => {
                            for id in state.stale_clients(Instant::now(), disconnect_timeout) {
                                warn!(agent_id = %id, "client heartbeat timeout");
                                state.disconnect(&id);
                            }
                        }
                    }
                }
                _ = sweep.tick() => {
                    let _ = tx.try_send(ActorMsg::Sweep);
                }
            }
        }
    });

    handle
}

fn handle_frame(state: &mut BrokerState, req: ActorRequest) {
    let now = Instant::now();
    let reply = match req.frame {
        ClientFrame::Register { ref agent_id, ref task } => {
            state.register(agent_id, task, now);
            ServerFrame::Ack
        }
        ClientFrame::Heartbeat => with_agent(&req.agent_id, |id| {
            state.heartbeat(id, now);
            ServerFrame::Ack
        }),
        ClientFrame::RequestFileLock { ref files, mode } => with_agent(&req.agent_id, |id| {
            match state.request_file_lock(id, files, mode) {
                Ok(lock_id) => ServerFrame::LockGranted { lock_id },
                Err(blocked) => ServerFrame::LockDenied {
                    blocked: blocked.into_iter().map(|(file, held_by)| BlockedFile { file, held_by }).collect(),
                },
            }
        }),
        ClientFrame::ReleaseFileLock { ref files } => with_agent(&req.agent_id, |id| {
            state.release_file_lock(id, files);
            ServerFrame::Ack
        }),
        ClientFrame::RequestGitLock => with_agent(&req.agent_id, |id| match state.request_git_lock(id) {
            Ok(lock_id) => ServerFrame::GitLockGranted { lock_id },
            Err(holder) => ServerFrame::GitLockDenied { holder },
        }),
        ClientFrame::ReleaseGitLock => with_agent(&req.agent_id, |id| {
            state.release_git_lock(id);
            ServerFrame::Ack
        }),
        ClientFrame::RequestApiSlot => match state.scheduler.request(now) {
            SlotDecision::Granted => ServerFrame::ApiSlotGranted,
            SlotDecision::Wait { delay, reason } => ServerFrame::ApiSlotWait { delay_ms: delay.as_millis() as u64, reason },
        },
        ClientFrame::ReleaseApiSlot { ref headers, status } => {
            let info = parse_release_info(headers, status);
            state.scheduler.release(now, &info);
            ServerFrame::Ack
        }
        ClientFrame::Send { ref to, ref msg_type, ref content } => with_agent(&req.agent_id, |id| {
            state.send(id, to, msg_type, content.clone(), &chrono::Utc::now().to_rfc3339());
            ServerFrame::Delivered
        }),
        ClientFrame::Poll => with_agent(&req.agent_id, |id| ServerFrame::Messages { messages: state.poll(id) }),
        ClientFrame::PollUserInbox => ServerFrame::Messages { messages: state.poll_user_inbox() },
        ClientFrame::Acknowledge { ref ids } => {
            state.acknowledge(ids.as_deref());
            ServerFrame::Ack
        }
        ClientFrame::GetMessageHistory => ServerFrame::History { messages: state.message_history() },
        ClientFrame::GetStatus => {
            let status = state.status();
            ServerFrame::Status {
                registered_clients: status.registered_clients,
                locked_files: status.locked_files,
                git_lock_holder: status.git_lock_holder,
                api_slots_in_use: status.api_slots_in_use,
                api_slots_max: status.api_slots_max,
            }
        }
    };
    let _ = req.reply.send(reply);
}

fn with_agent(agent_id: &Option<String>, f: impl FnOnce(&str) -> ServerFrame) -> ServerFrame {
    match agent_id {
        Some(id) => f(id),
        None => ServerFrame::Error { message: "register before sending further frames".into() },
    }
}

fn parse_release_info(headers: &std::collections::HashMap<String, String>, status: u16) -> ReleaseInfo {
    ReleaseInfo {
        status,
        retry_after_secs: headers.get("retry-after").and_then(|v| v.parse().ok()),
        remaining: headers.get("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
        reset_in_secs: headers.get("x-ratelimit-reset").and_then(|v| v.parse().ok()),
        quota_used: headers.get("x-ratelimit-quota-used").and_then(|v| v.parse().ok()),
    }
}

/// Generate the well-known per-session socket path the spec calls for.
pub fn socket_path_for_session(session_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("clio-broker-{session_id}.sock"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BrokerClient;
    use clio_config::BrokerConfig;

    async fn spawn_test_broker() -> PathBuf {
        let path = std::env::temp_dir().join(format!("clio-broker-test-{}.sock", uuid::Uuid::new_v4()));
        let server = BrokerServer::bind(&path, BrokerConfig::default()).unwrap();
        tokio::spawn(server.run());
        path
    }

    #[tokio::test]
    async fn register_then_heartbeat_acks() {
        let path = spawn_test_broker().await;
        let mut client = BrokerClient::connect(&path, "a1", "task").await.unwrap();
        assert!(matches!(client.heartbeat().await.unwrap(), ServerFrame::Ack));
    }

    #[tokio::test]
    async fn file_lock_contention_across_two_clients() {
        let path = spawn_test_broker().await;
        let mut c1 = BrokerClient::connect(&path, "a1", "task").await.unwrap();
        let mut c2 = BrokerClient::connect(&path, "a2", "task").await.unwrap();

        let granted = c1.request_file_lock(vec!["/ws/f.rs".into()], crate::protocol::LockMode::Write).await.unwrap();
        assert!(matches!(granted, ServerFrame::LockGranted { .. }));

        let denied = c2.request_file_lock(vec!["/ws/f.rs".into()], crate::protocol::LockMode::Write).await.unwrap();
        assert!(matches!(denied, ServerFrame::LockDenied { .. }));
    }

    #[tokio::test]
    async fn disconnect_releases_locks_for_next_client() {
        let path = spawn_test_broker().await;
        {
            let mut c1 = BrokerClient::connect(&path, "a1", "task").await.unwrap();
            c1.request_file_lock(vec!["/ws/f.rs".into()], crate::protocol::LockMode::Write).await.unwrap();
        } // c1 drops here, closing the socket.

        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut c2 = BrokerClient::connect(&path, "a2", "task").await.unwrap();
        let granted = c2.request_file_lock(vec!["/ws/f.rs".into()], crate::protocol::LockMode::Write).await.unwrap();
        assert!(matches!(granted, ServerFrame::LockGranted { .. }));
    }

    #[tokio::test]
    async fn message_bus_send_and_poll_round_trips() {
        let path = spawn_test_broker().await;
        let mut c1 = BrokerClient::connect(&path, "a1", "task").await.unwrap();
        let mut c2 = BrokerClient::connect(&path, "a2", "task").await.unwrap();

        c1.send("a2", "status", serde_json::json!("halfway done")).await.unwrap();
        let ServerFrame::Messages { messages } = c2.poll().await.unwrap() else { panic!("wrong frame") };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, serde_json::json!("halfway done"));
    }

    #[tokio::test]
    async fn status_reports_registered_clients_and_held_lock_owner() {
        let path = spawn_test_broker().await;
        let mut c1 = BrokerClient::connect(&path, "a1", "task").await.unwrap();
        let mut c2 = BrokerClient::connect(&path, "a2", "task").await.unwrap();
        c1.request_file_lock(vec!["/ws/f.rs".into()], crate::protocol::LockMode::Write).await.unwrap();

        let denied = c2.request_file_lock(vec!["/ws/f.rs".into()], crate::protocol::LockMode::Write).await.unwrap();
        match denied {
            ServerFrame::LockDenied { blocked } => {
                assert_eq!(blocked.len(), 1);
                assert_eq!(blocked[0].file, "/ws/f.rs");
                assert_eq!(blocked[0].held_by, "a1");
            }
            other => panic!("wrong frame: {other:?}"),
        }

        match c1.get_status().await.unwrap() {
            ServerFrame::Status { registered_clients, locked_files, .. } => {
                assert_eq!(locked_files, 1);
                assert_eq!(registered_clients.len(), 2);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_returns_error_and_keeps_connection_open() {
        let path = spawn_test_broker().await;
        let mut client = BrokerClient::connect(&path, "a1", "task").await.unwrap();
        let raw = client.send_raw_line("not json at all").await.unwrap();
        assert!(matches!(raw, ServerFrame::Error { .. }));
        // Connection survives: a well-formed frame still works afterward.
        assert!(matches!(client.heartbeat().await.unwrap(), ServerFrame::Ack));
    }
}
