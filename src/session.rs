//! Host UI channel
//!
//! This module defines the trait for tunneling messages from the synchronizer
//! to whatever renders the quiz overlay. The tunnel abstraction keeps the
//! engine independent of the UI technology.

use super::{SyncMessage, UpdateMessage};

/// Trait for sending messages to the host UI
///
/// Implementations might render directly, forward over a channel, or
/// serialize with [`UpdateMessage::to_message`] for a remote client.
pub trait Tunnel {
    /// Sends an update message to the host UI
    ///
    /// Update messages describe a single change: a quiz opened, the
    /// countdown advanced, a submission failed, a quiz resolved.
    ///
    /// # Arguments
    ///
    /// * `message` - The update message to send
    fn send_message(&self, message: &UpdateMessage);

    /// Sends a full state snapshot to the host UI
    ///
    /// Snapshots are used when the UI mounts late or needs to re-render
    /// from scratch.
    ///
    /// # Arguments
    ///
    /// * `state` - The snapshot to send
    fn send_state(&self, state: &SyncMessage);
}
