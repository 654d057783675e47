//! A single open quiz
//!
//! A [`QuizSession`] is created the instant a checkpoint matches and lives
//! until it resolves, either through an answered submission or through its
//! countdown reaching zero. Resolution is a checked transition out of
//! `Pending`, so whichever path reaches it first wins and the other becomes a
//! no-op.

use std::{fmt::Display, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay, skip_serializing_none};
use thiserror::Error;
use uuid::Uuid;
use web_time::SystemTime;

use crate::{
    checkpoint::{CheckpointId, QuizCheckpoint},
    presence::PresenceSummary,
    session_id::SessionId,
    submission::{SubmissionRequest, SubmissionResponse, SubmissionTicket},
};

/// A unique identifier for one opened quiz
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct QuizId(Uuid);

impl QuizId {
    /// Creates a new random quiz ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QuizId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for QuizId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for QuizId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// How a quiz ended, or `Pending` while it is open
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Waiting for a submission or the countdown
    #[default]
    Pending,
    /// A submission was evaluated
    Answered {
        /// Index of the selected option
        selected_index: usize,
        /// Whether the service judged it correct
        is_correct: bool,
    },
    /// The countdown reached zero first
    TimedOut,
}

impl Resolution {
    /// Whether this resolution is final
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Result of one countdown step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Countdown {
    /// Time remains; carries the seconds left
    Running(u32),
    /// The budget is exhausted
    Expired,
}

/// Errors rejecting a submission before it reaches the service
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmitError {
    /// No quiz is open
    #[error("no quiz is open")]
    NoActiveQuiz,
    /// The selected index does not name an option
    #[error("option {selected} does not exist; the quiz has {count} options")]
    OptionOutOfRange {
        /// Index that was submitted
        selected: usize,
        /// Number of options of the quiz
        count: usize,
    },
    /// A previous submission has not come back yet
    #[error("a submission is already in flight")]
    SubmissionInFlight,
}

/// Alarm messages for the timers of an open quiz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Re-assert the paused state if the player resumed on its own
    EnforcePause {
        /// Session the quiz belongs to
        session: SessionId,
        /// Quiz the enforcement is for
        quiz: QuizId,
    },
    /// Decrement the remaining time by one step
    Countdown {
        /// Session the quiz belongs to
        session: SessionId,
        /// Quiz the countdown is for
        quiz: QuizId,
    },
}

impl AlarmMessage {
    /// Session this alarm was scheduled for
    pub fn session(&self) -> SessionId {
        match self {
            Self::EnforcePause { session, .. } | Self::Countdown { session, .. } => *session,
        }
    }
}

/// Update messages sent to the host UI while quizzes open and close
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub enum UpdateMessage {
    /// A checkpoint matched and playback is paused for its quiz
    QuizOpened {
        /// Checkpoint that matched
        checkpoint_id: CheckpointId,
        /// Question to display
        question: String,
        /// Options to display, in order
        options: Vec<String>,
        /// Countdown budget in seconds
        budget_seconds: u32,
    },
    /// The countdown advanced
    CountdownTick {
        /// Seconds left to answer
        remaining_seconds: u32,
    },
    /// A submission could not be evaluated; the quiz stays open
    SubmissionFailed {
        /// Checkpoint of the open quiz
        checkpoint_id: CheckpointId,
        /// Human readable failure
        reason: String,
    },
    /// The quiz closed and playback resumed
    QuizResolved {
        /// Checkpoint of the closed quiz
        checkpoint_id: CheckpointId,
        /// How it closed
        resolution: Resolution,
        /// Explanation to reveal, if the checkpoint has one
        explanation: Option<String>,
        /// Presence counters after the resolution
        presence: PresenceSummary,
    },
}

/// Runtime state of one open quiz
#[derive(Debug, Clone)]
pub struct QuizSession {
    id: QuizId,
    checkpoint: QuizCheckpoint,
    budget_seconds: u32,
    remaining_seconds: u32,
    resolution: Resolution,
    observed_time_seconds: f64,
    opened_at: SystemTime,
    attempts: u32,
    in_flight: Option<(SubmissionTicket, usize)>,
}

impl QuizSession {
    /// Opens a quiz for `checkpoint`, observed at player time `observed_time_seconds`
    ///
    /// The countdown starts at `budget_seconds` and runs in whole seconds.
    pub fn open(checkpoint: QuizCheckpoint, budget_seconds: u32, observed_time_seconds: f64) -> Self {
        Self {
            id: QuizId::new(),
            checkpoint,
            budget_seconds,
            remaining_seconds: budget_seconds,
            resolution: Resolution::Pending,
            observed_time_seconds,
            opened_at: SystemTime::now(),
            attempts: 0,
            in_flight: None,
        }
    }

    /// Identifier of this quiz instance
    pub fn id(&self) -> QuizId {
        self.id
    }

    /// Checkpoint that opened this quiz
    pub fn checkpoint(&self) -> &QuizCheckpoint {
        &self.checkpoint
    }

    /// Seconds left before the quiz times out
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    /// Full countdown budget in seconds
    pub fn budget_seconds(&self) -> u32 {
        self.budget_seconds
    }

    /// Current resolution
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Player time at which the quiz opened
    pub fn observed_time_seconds(&self) -> f64 {
        self.observed_time_seconds
    }

    /// Wall-clock time elapsed since the quiz opened
    pub fn elapsed(&self) -> Duration {
        self.opened_at.elapsed().unwrap_or_default()
    }

    /// Ticket of the submission currently awaiting a response
    pub fn in_flight(&self) -> Option<&SubmissionTicket> {
        self.in_flight.as_ref().map(|(ticket, _)| ticket)
    }

    /// Attempts to leave `Pending` for a terminal resolution
    ///
    /// Returns `true` if the transition happened, `false` if the quiz had
    /// already resolved.
    fn resolve(&mut self, after: Resolution) -> bool {
        if self.resolution.is_terminal() {
            false
        } else {
            self.resolution = after;
            self.in_flight = None;
            true
        }
    }

    /// Advances the countdown by one step
    ///
    /// A resolved quiz always reports `Expired` so its timer stops.
    pub fn tick(&mut self) -> Countdown {
        if self.resolution.is_terminal() {
            return Countdown::Expired;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        match self.remaining_seconds {
            0 => Countdown::Expired,
            remaining => Countdown::Running(remaining),
        }
    }

    /// Validates a selection and records it as in flight
    ///
    /// # Errors
    ///
    /// * `SubmitError::NoActiveQuiz` - the quiz already resolved
    /// * `SubmitError::OptionOutOfRange` - the index names no option
    /// * `SubmitError::SubmissionInFlight` - an earlier attempt is pending
    pub fn begin_submission(
        &mut self,
        session: SessionId,
        selected_index: usize,
    ) -> Result<SubmissionRequest, SubmitError> {
        if self.resolution.is_terminal() {
            return Err(SubmitError::NoActiveQuiz);
        }
        if !self.checkpoint.has_option(selected_index) {
            return Err(SubmitError::OptionOutOfRange {
                selected: selected_index,
                count: self.checkpoint.options.len(),
            });
        }
        if self.in_flight.is_some() {
            return Err(SubmitError::SubmissionInFlight);
        }

        self.attempts += 1;
        let ticket = SubmissionTicket {
            session,
            quiz: self.id,
            checkpoint_id: self.checkpoint.id.clone(),
            attempt: self.attempts,
        };
        self.in_flight = Some((ticket.clone(), selected_index));

        Ok(SubmissionRequest {
            ticket,
            checkpoint_id: self.checkpoint.id.clone(),
            selected_index,
            observed_time_seconds: self.observed_time_seconds,
        })
    }

    /// Option submitted with `ticket`, if `ticket` is the attempt in flight
    fn in_flight_selection(&self, ticket: &SubmissionTicket) -> Option<usize> {
        self.in_flight
            .as_ref()
            .filter(|(in_flight, _)| in_flight == ticket)
            .map(|(_, selected_index)| *selected_index)
    }

    /// Clears a failed attempt so the viewer may retry
    ///
    /// Returns `false` if `ticket` is not the attempt in flight.
    pub fn fail_submission(&mut self, ticket: &SubmissionTicket) -> bool {
        if self.in_flight_selection(ticket).is_some() {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Resolves the quiz as answered with the service's evaluation
    ///
    /// Returns `false` if `ticket` is not the attempt in flight or the quiz
    /// already resolved.
    pub fn answer(&mut self, ticket: &SubmissionTicket, response: &SubmissionResponse) -> bool {
        match self.in_flight_selection(ticket) {
            Some(selected_index) => self.resolve(Resolution::Answered {
                selected_index,
                is_correct: response.is_correct,
            }),
            None => false,
        }
    }

    /// Resolves the quiz as timed out
    ///
    /// Returns `false` if the quiz already resolved.
    pub fn time_out(&mut self) -> bool {
        self.resolve(Resolution::TimedOut)
    }

    /// The message announcing this quiz to the host UI
    pub fn opened_message(&self) -> UpdateMessage {
        UpdateMessage::QuizOpened {
            checkpoint_id: self.checkpoint.id.clone(),
            question: self.checkpoint.question.clone(),
            options: self.checkpoint.options.clone(),
            budget_seconds: self.budget_seconds,
        }
    }

    /// The message announcing this quiz's resolution to the host UI
    pub fn resolved_message(&self, presence: PresenceSummary) -> UpdateMessage {
        UpdateMessage::QuizResolved {
            checkpoint_id: self.checkpoint.id.clone(),
            resolution: self.resolution,
            explanation: self.checkpoint.explanation.clone(),
            presence,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::checkpoint::tests::checkpoint;

    fn open_quiz(budget_seconds: u32) -> QuizSession {
        QuizSession::open(checkpoint("q", 30.), budget_seconds, 28.5)
    }

    fn correct() -> SubmissionResponse {
        SubmissionResponse {
            is_correct: true,
            updated_presence_score: None,
        }
    }

    #[test]
    fn test_open_quiz_is_pending() {
        let quiz = open_quiz(60);
        assert_eq!(quiz.resolution(), Resolution::Pending);
        assert_eq!(quiz.remaining_seconds(), 60);
        assert_eq!(quiz.budget_seconds(), 60);
        assert_eq!(quiz.observed_time_seconds(), 28.5);
        assert!(quiz.in_flight().is_none());
        assert!(quiz.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_countdown_expires_at_zero() {
        let mut quiz = open_quiz(3);
        assert_eq!(quiz.tick(), Countdown::Running(2));
        assert_eq!(quiz.tick(), Countdown::Running(1));
        assert_eq!(quiz.tick(), Countdown::Expired);
        assert_eq!(quiz.remaining_seconds(), 0);
    }

    #[test]
    fn test_submission_then_answer() {
        let session = SessionId::new();
        let mut quiz = open_quiz(60);
        let request = quiz.begin_submission(session, 1).unwrap();
        assert_eq!(request.selected_index, 1);
        assert_eq!(request.ticket.attempt, 1);
        assert_eq!(request.ticket.session, session);
        assert_eq!(request.observed_time_seconds, 28.5);

        assert!(quiz.answer(&request.ticket, &correct()));
        assert_eq!(
            quiz.resolution(),
            Resolution::Answered {
                selected_index: 1,
                is_correct: true
            }
        );
        assert!(quiz.in_flight().is_none());
        assert!(!quiz.time_out());
        assert_eq!(quiz.tick(), Countdown::Expired);
    }

    #[test]
    fn test_timeout_wins_over_late_answer() {
        let mut quiz = open_quiz(60);
        let request = quiz.begin_submission(SessionId::new(), 0).unwrap();
        assert!(quiz.time_out());
        assert!(!quiz.answer(&request.ticket, &correct()));
        assert_eq!(quiz.resolution(), Resolution::TimedOut);
    }

    #[test]
    fn test_out_of_range_option_rejected() {
        let mut quiz = open_quiz(60);
        assert_eq!(
            quiz.begin_submission(SessionId::new(), 3),
            Err(SubmitError::OptionOutOfRange {
                selected: 3,
                count: 3
            })
        );
        assert!(quiz.in_flight().is_none());
    }

    #[test]
    fn test_second_submission_while_in_flight_rejected() {
        let session = SessionId::new();
        let mut quiz = open_quiz(60);
        quiz.begin_submission(session, 0).unwrap();
        assert_eq!(
            quiz.begin_submission(session, 1),
            Err(SubmitError::SubmissionInFlight)
        );
    }

    #[test]
    fn test_failed_submission_allows_retry() {
        let session = SessionId::new();
        let mut quiz = open_quiz(60);
        let first = quiz.begin_submission(session, 0).unwrap();
        assert!(quiz.fail_submission(&first.ticket));
        assert!(!quiz.fail_submission(&first.ticket));

        let second = quiz.begin_submission(session, 2).unwrap();
        assert_eq!(second.ticket.attempt, 2);
        assert!(!quiz.answer(&first.ticket, &correct()));
        assert!(quiz.answer(&second.ticket, &correct()));
    }

    #[test]
    fn test_submission_after_resolution_rejected() {
        let mut quiz = open_quiz(60);
        quiz.time_out();
        assert_eq!(
            quiz.begin_submission(SessionId::new(), 0),
            Err(SubmitError::NoActiveQuiz)
        );
    }

    #[test]
    fn test_quiz_id_round_trip_through_string() {
        let id = QuizId::new();
        assert_eq!(id.to_string().parse::<QuizId>().unwrap(), id);
    }

    #[test]
    fn test_resolved_message_carries_explanation() {
        let mut quiz = open_quiz(60);
        quiz.time_out();
        let json = serde_json::to_string(&quiz.resolved_message(PresenceSummary::default()))
            .unwrap();
        assert!(json.contains("QuizResolved"));
        assert!(json.contains("TimedOut"));
        assert!(json.contains("Watch the highlighted line."));
    }
}
