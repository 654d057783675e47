//! Runtime configuration for the synchronizer
//!
//! The tolerance windows, seek threshold, intervals and quiz budget were
//! tuned empirically, so all of them are configurable. [`SyncConfig`] is
//! deserialized from JSON and validated against the bounds in
//! [`crate::constants`].

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;

type ValidationResult = garde::Result;

/// Validates that a duration, in milliseconds, falls within the given bounds
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is outside `[MIN_MS, MAX_MS]`.
pub fn validate_millis<const MIN_MS: u64, const MAX_MS: u64>(
    val: &Duration,
    _ctx: &(),
) -> ValidationResult {
    let millis = u64::try_from(val.as_millis()).unwrap_or(u64::MAX);
    if (MIN_MS..=MAX_MS).contains(&millis) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_MS}ms,{MAX_MS}ms]",
        )))
    }
}

/// Validates that a duration, in whole seconds, falls within the given bounds
///
/// # Errors
///
/// Returns a `garde::Error` if the duration is outside
/// `[MIN_SECONDS, MAX_SECONDS]`.
pub fn validate_seconds<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
    _ctx: &(),
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS}s,{MAX_SECONDS}s]",
        )))
    }
}

fn validate_poll_interval(val: &Duration, ctx: &()) -> ValidationResult {
    validate_millis::<
        { constants::sync::MIN_POLL_INTERVAL_MS },
        { constants::sync::MAX_POLL_INTERVAL_MS },
    >(val, ctx)
}

fn validate_seek_grace(val: &Duration, ctx: &()) -> ValidationResult {
    validate_millis::<0, { constants::sync::MAX_SEEK_GRACE_MS }>(val, ctx)
}

fn validate_enforcement_interval(val: &Duration, ctx: &()) -> ValidationResult {
    validate_millis::<
        { constants::quiz::MIN_ENFORCEMENT_INTERVAL_MS },
        { constants::quiz::MAX_ENFORCEMENT_INTERVAL_MS },
    >(val, ctx)
}

fn validate_quiz_budget(val: &Duration, ctx: &()) -> ValidationResult {
    validate_seconds::<
        { constants::quiz::MIN_BUDGET_SECONDS },
        { constants::quiz::MAX_BUDGET_SECONDS },
    >(val, ctx)
}

/// Errors produced while loading a configuration
#[derive(Error, Debug)]
pub enum Error {
    /// A field is outside of its allowed bounds
    #[error("invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
    /// The wide tolerance is narrower than the normal tolerance
    #[error("wide tolerance ({wide}s) must not be narrower than normal tolerance ({normal}s)")]
    ToleranceOrder {
        /// Configured normal tolerance in seconds
        normal: f64,
        /// Configured wide tolerance in seconds
        wide: f64,
    },
    /// The input was not valid JSON for this structure
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunable parameters of the synchronizer
#[serde_with::serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between two playhead polls
    #[garde(custom(validate_poll_interval))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Jump in playhead time, in seconds, above which a poll counts as a seek
    #[garde(range(min = 0.5, max = constants::sync::MAX_WINDOW_SECONDS))]
    pub seek_threshold_seconds: f64,
    /// Delay before the wide post-seek matching pass
    #[garde(custom(validate_seek_grace))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub seek_grace: Duration,
    /// Tolerance window for ordinary polls, in seconds
    #[garde(range(min = 0.0, max = constants::sync::MAX_WINDOW_SECONDS))]
    pub normal_tolerance_seconds: f64,
    /// Tolerance window for the one-shot post-seek pass, in seconds
    #[garde(range(min = 0.0, max = constants::sync::MAX_WINDOW_SECONDS))]
    pub wide_tolerance_seconds: f64,
    /// Interval of the pause enforcement loop while a quiz is open
    #[garde(custom(validate_enforcement_interval))]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub enforcement_interval: Duration,
    /// Time budget for answering one quiz
    #[garde(custom(validate_quiz_budget))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub quiz_budget: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(constants::sync::POLL_INTERVAL_MS),
            seek_threshold_seconds: constants::sync::SEEK_THRESHOLD_SECONDS,
            seek_grace: Duration::from_millis(constants::sync::SEEK_GRACE_MS),
            normal_tolerance_seconds: constants::sync::NORMAL_TOLERANCE_SECONDS,
            wide_tolerance_seconds: constants::sync::WIDE_TOLERANCE_SECONDS,
            enforcement_interval: Duration::from_millis(
                constants::quiz::ENFORCEMENT_INTERVAL_MS,
            ),
            quiz_budget: Duration::from_secs(constants::quiz::BUDGET_SECONDS),
        }
    }
}

impl SyncConfig {
    /// Parses a configuration from JSON, filling absent fields with defaults
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed JSON and the errors of
    /// [`SyncConfig::check`] for out-of-bounds values.
    pub fn from_json(input: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(input)?;
        config.check()?;
        Ok(config)
    }

    /// Validates field bounds and the relation between the two tolerances
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if a field is out of bounds and
    /// [`Error::ToleranceOrder`] if the wide window is narrower than the
    /// normal one.
    pub fn check(&self) -> Result<(), Error> {
        self.validate()?;
        if self.wide_tolerance_seconds < self.normal_tolerance_seconds {
            return Err(Error::ToleranceOrder {
                normal: self.normal_tolerance_seconds,
                wide: self.wide_tolerance_seconds,
            });
        }
        Ok(())
    }

    /// Number of whole seconds in the quiz budget
    pub fn budget_seconds(&self) -> u32 {
        u32::try_from(self.quiz_budget.as_secs()).unwrap_or(u32::MAX)
    }

    /// Interval between two countdown decrements
    pub fn countdown_interval(&self) -> Duration {
        Duration::from_millis(constants::quiz::COUNTDOWN_INTERVAL_MS)
    }
}
