//! Answer submission contract
//!
//! Submissions are evaluated by an external service. The engine hands out a
//! [`SubmissionRequest`] carrying a [`SubmissionTicket`]; the host performs
//! the call and feeds the outcome back with the same ticket, which is how a
//! late or stale response is recognised.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{checkpoint::CheckpointId, quiz::QuizId, session_id::SessionId};

/// Identifies one submission attempt of one quiz in one session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionTicket {
    /// Session the quiz belonged to
    pub session: SessionId,
    /// Quiz instance the answer is for
    pub quiz: QuizId,
    /// Checkpoint the quiz was opened for
    pub checkpoint_id: CheckpointId,
    /// Attempt number within the quiz, starting at 1
    pub attempt: u32,
}

/// Payload sent to the submission service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Ticket to hand back with the outcome
    pub ticket: SubmissionTicket,
    /// Checkpoint being answered
    pub checkpoint_id: CheckpointId,
    /// Index of the selected option
    pub selected_index: usize,
    /// Player time at which the quiz opened, in seconds
    pub observed_time_seconds: f64,
}

/// Evaluation returned by the submission service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    /// Whether the selected option was correct
    pub is_correct: bool,
    /// Presence figure recomputed by the service, if it provides one
    #[serde(default)]
    pub updated_presence_score: Option<f64>,
}

/// Errors reported by the submission service
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Error {
    /// The service could not be reached
    #[error("submission failed to reach the service: {0}")]
    Network(String),
    /// The service refused the submission
    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// External collaborator that evaluates answers
#[async_trait]
pub trait SubmissionService: Send + Sync {
    /// Evaluates a submission
    ///
    /// # Errors
    ///
    /// Returns an error when the service fails; the quiz then stays open and
    /// the viewer may retry.
    async fn submit(&self, request: SubmissionRequest) -> Result<SubmissionResponse, Error>;
}

/// What applying a submission outcome did to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmissionOutcome {
    /// The quiz resolved as answered and playback resumed
    Resolved,
    /// The call failed; the quiz is still open and may be retried
    Retry,
    /// The quiz had already timed out; the result only informed scoring
    Late,
    /// The ticket belongs to another session or attempt and was discarded
    Stale,
}
