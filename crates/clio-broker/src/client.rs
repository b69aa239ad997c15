// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Worker-side client for the coordination broker. One JSON frame per
//! line in, one frame per line out; a request lock serializes full
//! round-trips so concurrent callers on the same client don't interleave.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::protocol::{decode_line, encode_line, BusMessage, ClientFrame, LockMode, ServerFrame};

pub struct BrokerClient {
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    request_lock: Mutex<()>,
}

impl BrokerClient {
    /// Connect and register in one step, as every worker must before
    /// issuing any other frame.
    pub async fn connect(socket_path: impl AsRef<Path>, agent_id: &str, task: &str) -> anyhow::Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();
        let client = Self {
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            request_lock: Mutex::new(()),
        };
        client
            .roundtrip(ClientFrame::Register { agent_id: agent_id.to_string(), task: task.to_string() })
            .await?;
        Ok(client)
    }

    async fn roundtrip(&self, frame: ClientFrame) -> anyhow::Result<ServerFrame> {
        let _guard = self.request_lock.lock().await;
        {
            let mut writer = self.writer.lock().await;
            writer.write_all(encode_line(&frame)?.as_bytes()).await?;
        }
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            anyhow::bail!("broker closed the connection");
        }
        decode_line(&line)
    }

    /// Only used by tests to exercise the malformed-frame error path.
    #[cfg(test)]
    pub async fn send_raw_line(&self, raw: &str) -> anyhow::Result<ServerFrame> {
        let _guard = self.request_lock.lock().await;
        {
            let mut writer = self.writer.lock().await;
            writer.write_all(raw.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        decode_line(&line)
    }

    pub async fn heartbeat(&self) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::Heartbeat).await
    }

    pub async fn request_file_lock(&self, files: Vec<String>, mode: LockMode) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::RequestFileLock { files, mode }).await
    }

    pub async fn release_file_lock(&self, files: Vec<String>) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::ReleaseFileLock { files }).await
    }

    pub async fn request_git_lock(&self) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::RequestGitLock).await
    }

    pub async fn release_git_lock(&self) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::ReleaseGitLock).await
    }

    pub async fn request_api_slot(&self) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::RequestApiSlot).await
    }

    pub async fn release_api_slot(&self, headers: HashMap<String, String>, status: u16) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::ReleaseApiSlot { headers, status }).await
    }

    pub async fn send(&self, to: &str, msg_type: &str, content: Value) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::Send { to: to.to_string(), msg_type: msg_type.to_string(), content }).await
    }

    pub async fn poll(&self) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::Poll).await
    }

    pub async fn poll_user_inbox(&self) -> anyhow::Result<Vec<BusMessage>> {
        match self.roundtrip(ClientFrame::PollUserInbox).await? {
            ServerFrame::Messages { messages } => Ok(messages),
            other => anyhow::bail!("unexpected reply: {other:?}"),
        }
    }

    pub async fn acknowledge(&self, ids: Option<Vec<String>>) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::Acknowledge { ids }).await
    }

    pub async fn get_message_history(&self) -> anyhow::Result<Vec<BusMessage>> {
        match self.roundtrip(ClientFrame::GetMessageHistory).await? {
            ServerFrame::History { messages } => Ok(messages),
            other => anyhow::bail!("unexpected reply: {other:?}"),
        }
    }

    pub async fn get_status(&self) -> anyhow::Result<ServerFrame> {
        self.roundtrip(ClientFrame::GetStatus).await
    }

    /// Request an API slot, sleeping and retrying while the broker reports
    /// `ApiSlotWait`, until it is granted.
    pub async fn acquire_api_slot(&self) -> anyhow::Result<()> {
        loop {
            match self.request_api_slot().await? {
                ServerFrame::ApiSlotGranted => return Ok(()),
                ServerFrame::ApiSlotWait { delay_ms, .. } => {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms.max(1))).await;
                }
                other => anyhow::bail!("unexpected reply: {other:?}"),
            }
        }
    }
}
