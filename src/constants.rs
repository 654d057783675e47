//! Configuration constants for the video quiz synchronizer
//!
//! This module contains the defaults and the validation limits used
//! throughout the crate, so that configuration, checkpoint data and
//! runtime behavior share one set of boundaries.

/// Polling loop and seek detection constants
pub mod sync {
    /// Default interval between two playhead polls, in milliseconds
    pub const POLL_INTERVAL_MS: u64 = 500;
    /// Minimum allowed poll interval, in milliseconds
    pub const MIN_POLL_INTERVAL_MS: u64 = 50;
    /// Maximum allowed poll interval, in milliseconds
    pub const MAX_POLL_INTERVAL_MS: u64 = 5_000;
    /// Default jump in playhead time (seconds) above which a poll counts as a seek
    pub const SEEK_THRESHOLD_SECONDS: f64 = 3.0;
    /// Default delay before the post-seek matching pass, in milliseconds
    pub const SEEK_GRACE_MS: u64 = 1_000;
    /// Maximum allowed post-seek grace delay, in milliseconds
    pub const MAX_SEEK_GRACE_MS: u64 = 5_000;
    /// Default tolerance window for ordinary polls, in seconds
    pub const NORMAL_TOLERANCE_SECONDS: f64 = 3.0;
    /// Default tolerance window for the one-shot post-seek pass, in seconds
    pub const WIDE_TOLERANCE_SECONDS: f64 = 10.0;
    /// Upper bound for any configured tolerance or threshold, in seconds
    pub const MAX_WINDOW_SECONDS: f64 = 120.0;
}

/// Quiz countdown and pause enforcement constants
pub mod quiz {
    /// Default time budget for answering a quiz, in seconds
    pub const BUDGET_SECONDS: u64 = 60;
    /// Minimum allowed quiz budget, in seconds
    pub const MIN_BUDGET_SECONDS: u64 = 5;
    /// Maximum allowed quiz budget, in seconds
    pub const MAX_BUDGET_SECONDS: u64 = 600;
    /// Interval between two countdown decrements, in milliseconds
    pub const COUNTDOWN_INTERVAL_MS: u64 = 1_000;
    /// Default interval of the pause enforcement loop, in milliseconds
    pub const ENFORCEMENT_INTERVAL_MS: u64 = 500;
    /// Minimum allowed enforcement interval, in milliseconds
    pub const MIN_ENFORCEMENT_INTERVAL_MS: u64 = 50;
    /// Maximum allowed enforcement interval, in milliseconds
    pub const MAX_ENFORCEMENT_INTERVAL_MS: u64 = 5_000;
}

/// Checkpoint data limits
pub mod checkpoint {
    /// Maximum number of checkpoints in a single video
    pub const MAX_CHECKPOINT_COUNT: usize = 500;
    /// Maximum length of a checkpoint identifier
    pub const MAX_ID_LENGTH: usize = 128;
    /// Maximum length of a question
    pub const MAX_QUESTION_LENGTH: usize = 1_000;
    /// Minimum number of answer options
    pub const MIN_OPTION_COUNT: usize = 2;
    /// Maximum number of answer options
    pub const MAX_OPTION_COUNT: usize = 8;
    /// Maximum length of a single answer option
    pub const MAX_OPTION_LENGTH: usize = 500;
    /// Maximum length of the explanation shown after resolution
    pub const MAX_EXPLANATION_LENGTH: usize = 2_000;
}
