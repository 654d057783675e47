//! # Video Quiz Synchronizer
//!
//! This library binds quiz checkpoints to timestamps of an embedded video and
//! enforces them during playback. It polls the playhead, detects seeks,
//! matches checkpoints within a tolerance window, pauses the player for a
//! quiz, enforces the pause, runs a countdown, and resolves each quiz exactly
//! once by answer or timeout while keeping presence counters.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
use serde::{Deserialize, Serialize};

pub mod constants;

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod matching;
pub mod player;
pub mod presence;
pub mod quiz;
pub mod runtime;
pub mod session;
pub mod session_id;
pub mod submission;

pub use engine::SyncMessage;

impl SyncMessage {
    /// Converts the snapshot to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Messages sent to the host UI as the synchronizer changes
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum UpdateMessage {
    /// Polling lifecycle
    Sync(engine::UpdateMessage),
    /// Quiz lifecycle
    Quiz(quiz::UpdateMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Alarm messages for the synchronizer's timed activities
///
/// The host schedules these through the function handed to the engine and
/// delivers them back when their delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::From, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Playhead polling and seek rechecks
    Sync(engine::AlarmMessage),
    /// Pause enforcement and countdown of an open quiz
    Quiz(quiz::AlarmMessage),
}

impl AlarmMessage {
    /// Session this alarm was scheduled for
    pub fn session(&self) -> session_id::SessionId {
        match self {
            Self::Sync(alarm) => alarm.session(),
            Self::Quiz(alarm) => alarm.session(),
        }
    }
}
