// SPDX-FileCopyrightText: 2026 Duplio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle and the conversation state machine for Duplio.
//!
//! The [`SessionManager`] owns the user→session map (cap, grace window,
//! idle eviction); each [`Session`] carries the bounded outbound queue and
//! the connection attachment point; the [`state`] module provides the
//! single-consumer state actor that serializes all transitions for a
//! session.

pub mod manager;
pub mod session;
pub mod state;

pub use manager::{BindOutcome, ManagerConfig, SessionManager};
pub use session::{ClientEvent, Session, SessionChannels, SessionProfile};
pub use state::{
    ConversationState, Rejected, StateHandle, StateMachine, Transition, Trigger,
    spawn_state_actor,
};
