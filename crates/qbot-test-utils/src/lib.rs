// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for qbot integration tests.
//!
//! Provides mock adapters and message builders for fast, deterministic
//! tests without a backend.
//!
//! # Components
//!
//! - [`MockTransport`] - Transport with injectable inbound events and captured sends
//! - [`fixtures`] - Builders for wire payloads in the backend's shape

pub mod fixtures;
pub mod mock_transport;

pub use mock_transport::MockTransport;
