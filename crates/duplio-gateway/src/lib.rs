// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket transport endpoint and process interface for Duplio.
//!
//! Accepts persistent bidirectional connections, authenticates the first
//! frame (JWT or guest token), binds a session through the manager, and
//! bridges socket frames to the session's controller. Also serves the
//! health, readiness, and metrics endpoints.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod ws;

pub use auth::{AuthIdentity, AuthSettings, generate_guest_token, validate_token};
pub use server::{GatewayState, ServerConfig, router, start_server};
