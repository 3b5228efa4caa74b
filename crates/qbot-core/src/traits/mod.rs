// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions at the seams between the engine and its transports.

pub mod transport;

pub use transport::{InboundHandler, Transport, TransportKind};
