//! Presence bookkeeping
//!
//! Tracks how the viewer engaged with the checkpoints of one video session:
//! how many quizzes were answered, how many of those were correct, and how
//! many ran out of time. Counters only ever grow, and only the two quiz
//! resolution paths touch them.

use serde::{Deserialize, Serialize};

/// Snapshot of presence counters handed to the host UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceSummary {
    /// Quizzes resolved by a submission
    pub quizzes_answered: u32,
    /// Answered quizzes whose submission was correct
    pub quizzes_correct: u32,
    /// Quizzes that timed out without a submission
    pub quizzes_unanswered: u32,
    /// Correct answers over resolved quizzes, 0 before any resolution
    pub presence_score: f64,
    /// Latest presence figure reported by the submission service, if any
    pub reported_score: Option<f64>,
}

impl PresenceSummary {
    /// Number of checkpoints that have resolved either way
    pub fn total_resolved(&self) -> u32 {
        self.quizzes_answered + self.quizzes_unanswered
    }
}

/// Accumulates quiz outcomes for a single video session
#[derive(Debug, Clone, Default)]
pub struct PresenceTracker {
    answered: u32,
    correct: u32,
    unanswered: u32,
    reported_score: Option<f64>,
}

impl PresenceTracker {
    /// Records a quiz resolved by a submission
    pub fn record_answer(&mut self, is_correct: bool) {
        self.answered += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    /// Records a quiz that timed out
    pub fn record_timeout(&mut self) {
        self.unanswered += 1;
    }

    /// Stores the presence figure computed by the submission service
    ///
    /// Figures that are not finite are ignored.
    pub fn record_reported(&mut self, score: Option<f64>) {
        if let Some(score) = score.filter(|s| s.is_finite()) {
            self.reported_score = Some(score);
        }
    }

    /// Correct answers over resolved quizzes, unanswered counted as incorrect
    pub fn presence_score(&self) -> f64 {
        match self.answered + self.unanswered {
            0 => 0.,
            total => f64::from(self.correct) / f64::from(total),
        }
    }

    /// Returns a snapshot of the counters
    pub fn summary(&self) -> PresenceSummary {
        PresenceSummary {
            quizzes_answered: self.answered,
            quizzes_correct: self.correct,
            quizzes_unanswered: self.unanswered,
            presence_score: self.presence_score(),
            reported_score: self.reported_score,
        }
    }
}
