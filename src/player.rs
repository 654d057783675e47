//! Media player contract
//!
//! The synchronizer never subscribes to fine-grained time updates. It only
//! receives coarse lifecycle events and queries the player on demand, so the
//! player is modelled as a small capability trait that any embed can
//! implement.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use web_time::SystemTime;

/// Playback state reported by the player
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    /// The player has loaded but playback never began
    #[default]
    Unstarted,
    /// Video is advancing
    Playing,
    /// Video is paused
    Paused,
    /// Video is waiting for data
    Buffering,
    /// Video reached its end
    Ended,
}

/// Coarse lifecycle events emitted by the player
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerEvent {
    /// The player API finished loading and accepts queries
    Ready,
    /// Playback started or resumed
    Playing,
    /// Playback paused
    Paused,
    /// Playback stalled waiting for data
    Buffering,
    /// Playback reached the end of the video
    Ended,
}

/// Errors reported by a player query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The player could not answer the query
    #[error("player unavailable: {0}")]
    Unavailable(String),
    /// The player reported a time that is negative or not finite
    #[error("player reported invalid time {0}")]
    InvalidTime(f64),
}

/// Capability wrapper around an external media player
///
/// Implementations must tolerate redundant calls: `pause()` on a paused
/// player and `play()` on a playing player are no-ops.
pub trait PlayerAdapter {
    /// Current playhead position in seconds
    ///
    /// # Errors
    ///
    /// Returns an error when the player cannot be queried.
    fn current_time(&self) -> Result<f64, Error>;

    /// Current playback state
    ///
    /// # Errors
    ///
    /// Returns an error when the player cannot be queried.
    fn playback_state(&self) -> Result<PlaybackState, Error>;

    /// Starts or resumes playback
    fn play(&self);

    /// Pauses playback
    fn pause(&self);
}

/// Reads the playhead and rejects values the synchronizer cannot use
///
/// # Errors
///
/// Propagates the player's own error, and returns `Error::InvalidTime` for
/// negative, NaN or infinite readings.
pub fn read_time<P: PlayerAdapter>(player: &P) -> Result<f64, Error> {
    let time = player.current_time()?;
    if time.is_finite() && time >= 0. {
        Ok(time)
    } else {
        Err(Error::InvalidTime(time))
    }
}

/// One-shot record of player readiness
///
/// The player API announces readiness exactly once per mount, but hosts may
/// relay the announcement more than once. Only the first call to
/// [`Readiness::mark_ready`] succeeds.
#[derive(Debug, Default)]
pub struct Readiness {
    ready_at: once_cell_serde::sync::OnceCell<SystemTime>,
}

impl Readiness {
    /// Records readiness, returning `true` only for the first call
    pub fn mark_ready(&self) -> bool {
        self.ready_at.set(SystemTime::now()).is_ok()
    }

    /// Whether readiness has been recorded
    pub fn is_ready(&self) -> bool {
        self.ready_at.get().is_some()
    }

    /// When readiness was recorded
    pub fn ready_at(&self) -> Option<SystemTime> {
        self.ready_at.get().copied()
    }
}
