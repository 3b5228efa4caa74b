// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation engine for the qbot chat client.
//!
//! - [`session`]: session id and normalized bot metadata, with snapshot persistence
//! - [`transcript`]: ordered entries and their merge rules
//! - [`engine`]: the [`Reconciler`], one entry point per inbound event kind
//! - [`citation`], [`thought`], [`usage`]: display preparation helpers
//! - [`client`]: the actor that owns the reconciler and drives a transport

pub mod citation;
pub mod client;
pub mod engine;
pub mod session;
pub mod thought;
pub mod transcript;
pub mod usage;

pub use client::{ChatClient, ChatHandle, ClientCommand, ClientOptions};
pub use engine::{Reconciler, ReconcilerOptions, StopTicket};
pub use session::{FileSnapshot, MemorySnapshot, SessionStore, SnapshotStore};
pub use transcript::Transcript;
pub use usage::{summarize, UsageSummary};
