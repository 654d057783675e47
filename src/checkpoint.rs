//! Quiz checkpoints and the per-session checkpoint store
//!
//! A checkpoint is a quiz bound to a timestamp of the video. Checkpoints
//! arrive from an external collaborator, are validated once at the store
//! boundary and are never mutated afterwards. Invalid data (negative or
//! duplicate timestamps, duplicate ids, malformed questions) is rejected
//! here so the synchronizer never sees it.

use std::collections::HashSet;

use async_trait::async_trait;
use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants, session_id::VideoId};

/// Identifier of a checkpoint, unique within one video
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Validate,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct CheckpointId(
    #[garde(length(min = 1, max = crate::constants::checkpoint::MAX_ID_LENGTH))] String,
);

impl From<&str> for CheckpointId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

fn validate_timestamp(val: &f64, _ctx: &()) -> garde::Result {
    if val.is_finite() && *val >= 0. {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "timestamp {val} must be a finite, non-negative number of seconds"
        )))
    }
}

/// An immutable quiz descriptor bound to a video timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct QuizCheckpoint {
    /// Identifier of this checkpoint
    #[garde(dive)]
    pub id: CheckpointId,
    /// Position in the video, in seconds, at which the quiz is due
    #[garde(custom(validate_timestamp))]
    pub timestamp_seconds: f64,
    /// The question presented to the viewer
    #[garde(length(min = 1, max = crate::constants::checkpoint::MAX_QUESTION_LENGTH))]
    pub question: String,
    /// Ordered answer options
    #[garde(
        length(
            min = crate::constants::checkpoint::MIN_OPTION_COUNT,
            max = crate::constants::checkpoint::MAX_OPTION_COUNT
        ),
        inner(length(min = 1, max = crate::constants::checkpoint::MAX_OPTION_LENGTH))
    )]
    pub options: Vec<String>,
    /// Optional explanation revealed once the quiz resolves
    #[garde(length(max = crate::constants::checkpoint::MAX_EXPLANATION_LENGTH))]
    #[serde(default)]
    pub explanation: Option<String>,
}

impl QuizCheckpoint {
    /// Distance in seconds between this checkpoint and a playhead position
    pub fn distance_to(&self, time_seconds: f64) -> f64 {
        (self.timestamp_seconds - time_seconds).abs()
    }

    /// Whether `index` names one of the answer options
    pub fn has_option(&self, index: usize) -> bool {
        index < self.options.len()
    }
}

/// Errors raised while loading or validating checkpoints
#[derive(Error, Debug)]
pub enum Error {
    /// A checkpoint failed field validation
    #[error("checkpoint {id} is invalid: {report}")]
    Invalid {
        /// The offending checkpoint
        id: CheckpointId,
        /// Field-level validation failures
        report: garde::Report,
    },
    /// Two checkpoints share an identifier
    #[error("checkpoint id {0} appears more than once")]
    DuplicateId(CheckpointId),
    /// Two checkpoints share a timestamp
    #[error("more than one checkpoint at {0}s")]
    DuplicateTimestamp(f64),
    /// The video has more checkpoints than allowed
    #[error("{0} checkpoints exceed the limit of {max}", max = constants::checkpoint::MAX_CHECKPOINT_COUNT)]
    TooMany(usize),
    /// The checkpoint source could not provide the list
    #[error("checkpoints unavailable: {0}")]
    Unavailable(String),
}

/// The validated, timestamp-ordered checkpoints of one video
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckpointStore {
    checkpoints: Vec<QuizCheckpoint>,
}

impl CheckpointStore {
    /// Validates and orders a list of checkpoints
    ///
    /// # Errors
    ///
    /// * `Error::TooMany` - more checkpoints than the configured limit
    /// * `Error::Invalid` - a checkpoint has malformed fields
    /// * `Error::DuplicateId` - two checkpoints share an id
    /// * `Error::DuplicateTimestamp` - two checkpoints share a timestamp
    pub fn new(checkpoints: Vec<QuizCheckpoint>) -> Result<Self, Error> {
        if checkpoints.len() > constants::checkpoint::MAX_CHECKPOINT_COUNT {
            return Err(Error::TooMany(checkpoints.len()));
        }

        for checkpoint in &checkpoints {
            checkpoint.validate().map_err(|report| Error::Invalid {
                id: checkpoint.id.clone(),
                report,
            })?;
        }

        let mut seen = HashSet::new();
        if let Some(duplicate) = checkpoints.iter().find(|c| !seen.insert(&c.id)) {
            return Err(Error::DuplicateId(duplicate.id.clone()));
        }

        let checkpoints = checkpoints
            .into_iter()
            .sorted_by(|a, b| a.timestamp_seconds.total_cmp(&b.timestamp_seconds))
            .collect_vec();

        if let Some((a, _)) = checkpoints
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.timestamp_seconds == b.timestamp_seconds)
        {
            return Err(Error::DuplicateTimestamp(a.timestamp_seconds));
        }

        Ok(Self { checkpoints })
    }

    /// Returns the checkpoints in timestamp order
    pub fn checkpoints(&self) -> &[QuizCheckpoint] {
        &self.checkpoints
    }

    /// Returns the number of checkpoints
    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    /// Checks whether the video has no checkpoints
    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

/// External collaborator that provides the checkpoints of a video
///
/// The list is fetched once when a session starts and never refetched
/// while the session lives.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    /// Loads the checkpoints of `video_id`, in any order
    ///
    /// # Errors
    ///
    /// Returns `Error::Unavailable` when the backend cannot be reached.
    async fn load_checkpoints(&self, video_id: &VideoId) -> Result<Vec<QuizCheckpoint>, Error>;
}
