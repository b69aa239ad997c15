// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod protocol;
mod scheduler;
mod server;
mod state;

pub use client::BrokerClient;
pub use protocol::{BlockedFile, BusMessage, ClientFrame, LockMode, ServerFrame};
pub use scheduler::{ApiSlotScheduler, ReleaseInfo, SlotDecision};
pub use server::{socket_path_for_session, BrokerServer};
