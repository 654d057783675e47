//! Checkpoint matching and seek detection
//!
//! Pure functions over a playhead reading. Ordinary polls match with a
//! narrow window so that passing near a checkpoint twice does not trigger it
//! twice; the pass that follows a seek gets a wider window because the
//! landing position of a scrub is imprecise.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{CheckpointId, QuizCheckpoint},
    config::SyncConfig,
};

/// Which tolerance window a matching pass uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tolerance {
    /// The window used by every poll tick
    Normal,
    /// The one-shot window used right after a seek
    Wide,
}

impl Tolerance {
    /// Window width in seconds under `config`
    pub fn seconds(self, config: &SyncConfig) -> f64 {
        match self {
            Self::Normal => config.normal_tolerance_seconds,
            Self::Wide => config.wide_tolerance_seconds,
        }
    }
}

/// Finds the unanswered checkpoint nearest to `time_seconds`
///
/// Only checkpoints within `tolerance_seconds` qualify. The smallest distance
/// wins; equal distances go to the earlier timestamp.
pub fn nearest_unanswered<'a>(
    checkpoints: &'a [QuizCheckpoint],
    answered: &HashSet<CheckpointId>,
    time_seconds: f64,
    tolerance_seconds: f64,
) -> Option<&'a QuizCheckpoint> {
    checkpoints
        .iter()
        .filter(|c| !answered.contains(&c.id))
        .map(|c| (c, c.distance_to(time_seconds)))
        .filter(|(_, distance)| *distance <= tolerance_seconds)
        .min_by(|(a, da), (b, db)| {
            da.total_cmp(db)
                .then_with(|| a.timestamp_seconds.total_cmp(&b.timestamp_seconds))
        })
        .map(|(c, _)| c)
}

/// Whether the jump from `last_seconds` to `time_seconds` is a seek
///
/// A first reading (`last_seconds == 0`) never counts as a seek.
pub fn is_seek(last_seconds: f64, time_seconds: f64, threshold_seconds: f64) -> bool {
    last_seconds > 0. && (time_seconds - last_seconds).abs() > threshold_seconds
}
