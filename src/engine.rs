//! Core synchronization engine
//!
//! The [`SyncEngine`] is the single authority deciding when a checkpoint
//! interrupts playback. It owns the [`VideoSession`] of the current video and
//! drives three periodic activities through alarms: the playhead poll, the
//! pause enforcement of an open quiz, and that quiz's countdown. The engine
//! never sleeps; it asks the host to deliver an alarm after a delay and
//! handles it when it comes back. Every alarm names the session (and quiz) it
//! was scheduled for, so an alarm that outlives its session or quiz is
//! ignored.

use std::{collections::HashSet, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    checkpoint::{CheckpointId, CheckpointStore},
    config::{self, SyncConfig},
    matching::{self, Tolerance},
    player::{self, PlaybackState, PlayerAdapter, PlayerEvent, Readiness},
    presence::{PresenceSummary, PresenceTracker},
    quiz::{self, Countdown, QuizSession, SubmitError},
    session::Tunnel,
    session_id::{SessionId, VideoId},
    submission::{self, SubmissionOutcome, SubmissionRequest, SubmissionResponse, SubmissionTicket},
};

/// Alarm messages for the playhead poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Read the playhead, detect seeks and try to match a checkpoint
    Poll {
        /// Session the poll belongs to
        session: SessionId,
    },
    /// The one wide-window matching pass that follows a seek
    SeekRecheck {
        /// Session the seek happened in
        session: SessionId,
        /// Sequence number of the seek within the session
        seek: u64,
    },
}

impl AlarmMessage {
    /// Session this alarm was scheduled for
    pub fn session(&self) -> SessionId {
        match self {
            Self::Poll { session } | Self::SeekRecheck { session, .. } => *session,
        }
    }
}

/// Update messages about the synchronizer itself
#[derive(Debug, Clone, Serialize)]
pub enum UpdateMessage {
    /// Polling started for a video
    Watching {
        /// Video being watched
        video_id: VideoId,
        /// Number of checkpoints in the video
        checkpoint_count: usize,
    },
    /// The video has no checkpoints; nothing will interrupt playback
    Idle {
        /// Video being watched
        video_id: VideoId,
    },
}

/// Full snapshot of the synchronizer, for a host UI that needs to re-render
#[derive(Debug, Clone, Serialize)]
pub enum SyncMessage {
    /// Waiting for the player, or nothing to synchronize
    Idle {
        /// Video being watched
        video_id: VideoId,
    },
    /// Polling the playhead
    Watching {
        /// Video being watched
        video_id: VideoId,
        /// Checkpoints already resolved
        resolved: usize,
        /// Checkpoints in the video
        checkpoint_count: usize,
        /// Presence counters
        presence: PresenceSummary,
    },
    /// A quiz is open and playback is held
    QuizActive {
        /// Video being watched
        video_id: VideoId,
        /// Checkpoint of the open quiz
        checkpoint_id: CheckpointId,
        /// Question to display
        question: String,
        /// Options to display, in order
        options: Vec<String>,
        /// Seconds left to answer
        remaining_seconds: u32,
        /// Full countdown budget in seconds
        budget_seconds: u32,
        /// Presence counters
        presence: PresenceSummary,
    },
}

/// Phase of the synchronizer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Not polling: the player is not ready or there are no checkpoints
    Idle,
    /// Polling the playhead and matching checkpoints
    Watching,
    /// A quiz is open; matching is suspended and pause is enforced
    QuizActive,
}

/// Internal state; the open quiz exists only inside `QuizActive`
#[derive(Debug, Clone)]
enum State {
    Idle,
    Watching,
    QuizActive(Box<QuizSession>),
}

/// One playthrough of one video
#[derive(Debug, Clone)]
pub struct VideoSession {
    id: SessionId,
    video_id: VideoId,
    checkpoints: CheckpointStore,
    answered: HashSet<CheckpointId>,
    state: State,
    last_observed_seconds: f64,
    presence: PresenceTracker,
    seeks: u64,
    pending_seek: Option<u64>,
}

/// Pauses the player again if it resumed while `quiz` is open
fn reassert_pause<P: PlayerAdapter>(player: &P, quiz: &QuizSession) {
    match player.playback_state() {
        Ok(PlaybackState::Playing) => {
            player.pause();
            debug!(quiz = %quiz.id(), "player resumed during quiz, pausing again");
        }
        Ok(_) => {}
        Err(error) => warn!(quiz = %quiz.id(), %error, "cannot read playback state"),
    }
}

impl VideoSession {
    fn new(id: SessionId, video_id: VideoId, checkpoints: CheckpointStore) -> Self {
        Self {
            id,
            video_id,
            checkpoints,
            answered: HashSet::new(),
            state: State::Idle,
            last_observed_seconds: 0.,
            presence: PresenceTracker::default(),
            seeks: 0,
            pending_seek: None,
        }
    }

    /// Identifier of this playthrough
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Video being watched
    pub fn video_id(&self) -> &VideoId {
        &self.video_id
    }

    /// Checkpoints of the video
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Checkpoints that resolved, answered or timed out
    pub fn answered(&self) -> &HashSet<CheckpointId> {
        &self.answered
    }

    /// Last successfully polled playhead position
    pub fn last_observed_seconds(&self) -> f64 {
        self.last_observed_seconds
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        match self.state {
            State::Idle => Phase::Idle,
            State::Watching => Phase::Watching,
            State::QuizActive(_) => Phase::QuizActive,
        }
    }

    /// The open quiz, if any
    pub fn active_quiz(&self) -> Option<&QuizSession> {
        match &self.state {
            State::QuizActive(quiz) => Some(quiz),
            _ => None,
        }
    }

    /// Presence counters
    pub fn presence(&self) -> PresenceSummary {
        self.presence.summary()
    }

    fn start<T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        config: &SyncConfig,
        schedule_message: &mut S,
        tunnel: &T,
    ) {
        if !matches!(self.state, State::Idle) {
            return;
        }

        if self.checkpoints.is_empty() {
            info!(session = %self.id, video = %self.video_id, "no checkpoints, staying idle");
            tunnel.send_message(
                &UpdateMessage::Idle {
                    video_id: self.video_id.clone(),
                }
                .into(),
            );
            return;
        }

        info!(
            session = %self.id,
            video = %self.video_id,
            checkpoints = self.checkpoints.len(),
            "watching playhead"
        );
        self.state = State::Watching;
        schedule_message(
            AlarmMessage::Poll { session: self.id }.into(),
            config.poll_interval,
        );
        tunnel.send_message(
            &UpdateMessage::Watching {
                video_id: self.video_id.clone(),
                checkpoint_count: self.checkpoints.len(),
            }
            .into(),
        );
    }

    fn poll<P: PlayerAdapter, T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        config: &SyncConfig,
        player: &P,
        schedule_message: &mut S,
        tunnel: &T,
    ) {
        if matches!(self.state, State::Idle) {
            return;
        }
        schedule_message(
            AlarmMessage::Poll { session: self.id }.into(),
            config.poll_interval,
        );

        let time = match player::read_time(player) {
            Ok(time) => time,
            Err(error) => {
                warn!(session = %self.id, %error, "skipping poll tick");
                return;
            }
        };

        if let State::QuizActive(quiz) = &self.state {
            reassert_pause(player, quiz);
            self.last_observed_seconds = time;
            return;
        }

        if matching::is_seek(
            self.last_observed_seconds,
            time,
            config.seek_threshold_seconds,
        ) {
            self.seeks += 1;
            self.pending_seek = Some(self.seeks);
            debug!(
                session = %self.id,
                from = self.last_observed_seconds,
                to = time,
                "seek detected"
            );
            schedule_message(
                AlarmMessage::SeekRecheck {
                    session: self.id,
                    seek: self.seeks,
                }
                .into(),
                config.seek_grace,
            );
        }

        self.last_observed_seconds = time;
        self.try_open(config, time, Tolerance::Normal, player, schedule_message, tunnel);
    }

    fn seek_recheck<P: PlayerAdapter, T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        config: &SyncConfig,
        seek: u64,
        player: &P,
        schedule_message: &mut S,
        tunnel: &T,
    ) {
        if self.pending_seek != Some(seek) {
            trace!(session = %self.id, seek, "seek recheck superseded");
            return;
        }
        self.pending_seek = None;

        if !matches!(self.state, State::Watching) {
            return;
        }

        match player::read_time(player) {
            Ok(time) => {
                self.try_open(config, time, Tolerance::Wide, player, schedule_message, tunnel);
            }
            Err(error) => warn!(session = %self.id, %error, "skipping seek recheck"),
        }
    }

    /// Opens a quiz for the best checkpoint near `time`, if there is one
    fn try_open<P: PlayerAdapter, T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        config: &SyncConfig,
        time: f64,
        tolerance: Tolerance,
        player: &P,
        schedule_message: &mut S,
        tunnel: &T,
    ) -> bool {
        let Some(checkpoint) = matching::nearest_unanswered(
            self.checkpoints.checkpoints(),
            &self.answered,
            time,
            tolerance.seconds(config),
        ) else {
            return false;
        };

        player.pause();
        let quiz = QuizSession::open(checkpoint.clone(), config.budget_seconds(), time);
        info!(
            session = %self.id,
            checkpoint = %checkpoint.id,
            time,
            ?tolerance,
            "checkpoint matched, opening quiz"
        );

        schedule_message(
            quiz::AlarmMessage::EnforcePause {
                session: self.id,
                quiz: quiz.id(),
            }
            .into(),
            config.enforcement_interval,
        );
        schedule_message(
            quiz::AlarmMessage::Countdown {
                session: self.id,
                quiz: quiz.id(),
            }
            .into(),
            config.countdown_interval(),
        );
        tunnel.send_message(&quiz.opened_message().into());

        self.state = State::QuizActive(Box::new(quiz));
        true
    }

    fn enforce_pause<P: PlayerAdapter, S: FnMut(crate::AlarmMessage, Duration)>(
        &self,
        config: &SyncConfig,
        quiz_id: quiz::QuizId,
        player: &P,
        schedule_message: &mut S,
    ) {
        let State::QuizActive(quiz) = &self.state else {
            return;
        };
        if quiz.id() != quiz_id {
            return;
        }

        reassert_pause(player, quiz);
        schedule_message(
            quiz::AlarmMessage::EnforcePause {
                session: self.id,
                quiz: quiz_id,
            }
            .into(),
            config.enforcement_interval,
        );
    }

    fn countdown<P: PlayerAdapter, T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        config: &SyncConfig,
        quiz_id: quiz::QuizId,
        player: &P,
        schedule_message: &mut S,
        tunnel: &T,
    ) {
        let State::QuizActive(quiz) = &mut self.state else {
            return;
        };
        if quiz.id() != quiz_id {
            return;
        }

        match quiz.tick() {
            Countdown::Running(remaining_seconds) => {
                tunnel.send_message(
                    &quiz::UpdateMessage::CountdownTick { remaining_seconds }.into(),
                );
                schedule_message(
                    quiz::AlarmMessage::Countdown {
                        session: self.id,
                        quiz: quiz_id,
                    }
                    .into(),
                    config.countdown_interval(),
                );
            }
            Countdown::Expired => self.time_out(player, tunnel),
        }
    }

    /// Leaves `QuizActive`, handing back the quiz that was open
    fn close_quiz(&mut self) -> Option<Box<QuizSession>> {
        match std::mem::replace(&mut self.state, State::Watching) {
            State::QuizActive(quiz) => Some(quiz),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn time_out<P: PlayerAdapter, T: Tunnel>(&mut self, player: &P, tunnel: &T) {
        let State::QuizActive(quiz) = &mut self.state else {
            return;
        };
        if !quiz.time_out() {
            return;
        }
        let Some(quiz) = self.close_quiz() else {
            return;
        };

        self.answered.insert(quiz.checkpoint().id.clone());
        self.presence.record_timeout();
        info!(
            session = %self.id,
            checkpoint = %quiz.checkpoint().id,
            elapsed = ?quiz.elapsed(),
            "quiz timed out, resuming playback"
        );

        player.play();
        tunnel.send_message(&quiz.resolved_message(self.presence.summary()).into());
    }

    fn apply_submission<P: PlayerAdapter, T: Tunnel>(
        &mut self,
        ticket: &SubmissionTicket,
        result: Result<SubmissionResponse, submission::Error>,
        player: &P,
        tunnel: &T,
    ) -> SubmissionOutcome {
        let is_open = matches!(&self.state, State::QuizActive(quiz) if quiz.id() == ticket.quiz);
        if !is_open {
            return self.late_submission(ticket, result);
        }
        let State::QuizActive(quiz) = &mut self.state else {
            return SubmissionOutcome::Stale;
        };

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                if !quiz.fail_submission(ticket) {
                    return SubmissionOutcome::Stale;
                }
                warn!(
                    session = %self.id,
                    checkpoint = %ticket.checkpoint_id,
                    %error,
                    "submission failed, quiz stays open"
                );
                tunnel.send_message(
                    &quiz::UpdateMessage::SubmissionFailed {
                        checkpoint_id: ticket.checkpoint_id.clone(),
                        reason: error.to_string(),
                    }
                    .into(),
                );
                return SubmissionOutcome::Retry;
            }
        };

        if !quiz.answer(ticket, &response) {
            return SubmissionOutcome::Stale;
        }
        let Some(quiz) = self.close_quiz() else {
            return SubmissionOutcome::Stale;
        };

        self.answered.insert(quiz.checkpoint().id.clone());
        self.presence.record_answer(response.is_correct);
        self.presence
            .record_reported(response.updated_presence_score);
        info!(
            session = %self.id,
            checkpoint = %quiz.checkpoint().id,
            correct = response.is_correct,
            elapsed = ?quiz.elapsed(),
            "quiz answered, resuming playback"
        );

        player.play();
        tunnel.send_message(&quiz.resolved_message(self.presence.summary()).into());
        SubmissionOutcome::Resolved
    }

    /// Handles a response whose quiz is no longer open
    fn late_submission(
        &mut self,
        ticket: &SubmissionTicket,
        result: Result<SubmissionResponse, submission::Error>,
    ) -> SubmissionOutcome {
        match result {
            Ok(response) if self.answered.contains(&ticket.checkpoint_id) => {
                self.presence
                    .record_reported(response.updated_presence_score);
                debug!(
                    session = %self.id,
                    checkpoint = %ticket.checkpoint_id,
                    "late submission kept for scoring only"
                );
                SubmissionOutcome::Late
            }
            _ => {
                trace!(session = %self.id, checkpoint = %ticket.checkpoint_id, "stale submission dropped");
                SubmissionOutcome::Stale
            }
        }
    }

    fn state_message(&self) -> SyncMessage {
        match &self.state {
            State::Idle => SyncMessage::Idle {
                video_id: self.video_id.clone(),
            },
            State::Watching => SyncMessage::Watching {
                video_id: self.video_id.clone(),
                resolved: self.answered.len(),
                checkpoint_count: self.checkpoints.len(),
                presence: self.presence.summary(),
            },
            State::QuizActive(quiz) => SyncMessage::QuizActive {
                video_id: self.video_id.clone(),
                checkpoint_id: quiz.checkpoint().id.clone(),
                question: quiz.checkpoint().question.clone(),
                options: quiz.checkpoint().options.clone(),
                remaining_seconds: quiz.remaining_seconds(),
                budget_seconds: quiz.budget_seconds(),
                presence: self.presence.summary(),
            },
        }
    }
}

/// The synchronizer for one mounted player
///
/// The engine is driven entirely from outside: player lifecycle events,
/// alarm deliveries, answer submissions and submission outcomes. Each call
/// runs to completion, which is what makes resolution a single
/// check-and-set.
#[derive(Debug)]
pub struct SyncEngine {
    config: SyncConfig,
    readiness: Readiness,
    last_session: SessionId,
    session: Option<VideoSession>,
}

impl SyncEngine {
    /// Creates an engine for `video_id`; polling starts once the player is ready
    ///
    /// # Errors
    ///
    /// Returns the errors of [`SyncConfig::check`] when `config` is out of
    /// bounds.
    pub fn new(
        config: SyncConfig,
        video_id: VideoId,
        checkpoints: CheckpointStore,
    ) -> Result<Self, config::Error> {
        config.check()?;
        let id = SessionId::new();
        Ok(Self {
            config,
            readiness: Readiness::default(),
            last_session: id,
            session: Some(VideoSession::new(id, video_id, checkpoints)),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether the player has announced readiness
    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }

    /// The current session, or `None` after teardown
    pub fn session(&self) -> Option<&VideoSession> {
        self.session.as_ref()
    }

    /// Current phase, or `None` after teardown
    pub fn phase(&self) -> Option<Phase> {
        self.session.as_ref().map(VideoSession::phase)
    }

    /// The open quiz, if any
    pub fn active_quiz(&self) -> Option<&QuizSession> {
        self.session.as_ref().and_then(VideoSession::active_quiz)
    }

    /// Presence counters of the current session
    pub fn presence(&self) -> Option<PresenceSummary> {
        self.session.as_ref().map(VideoSession::presence)
    }

    /// Snapshot for a host UI that needs to re-render
    pub fn state_message(&self) -> Option<SyncMessage> {
        self.session.as_ref().map(VideoSession::state_message)
    }

    /// Sends the current snapshot through `tunnel`
    pub fn sync<T: Tunnel>(&self, tunnel: &T) {
        if let Some(state) = self.state_message() {
            tunnel.send_state(&state);
        }
    }

    /// Handles a lifecycle event of the player
    ///
    /// # Type Parameters
    ///
    /// * `P` - Player implementation
    /// * `T` - Tunnel to the host UI
    /// * `S` - Function scheduling alarm messages after a delay
    pub fn player_event<P: PlayerAdapter, T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        event: PlayerEvent,
        player: &P,
        mut schedule_message: S,
        tunnel: &T,
    ) {
        match event {
            PlayerEvent::Ready => {
                if !self.readiness.mark_ready() {
                    debug!(ready_at = ?self.readiness.ready_at(), "player readiness already recorded");
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.start(&self.config, &mut schedule_message, tunnel);
                }
            }
            PlayerEvent::Playing => {
                if let Some(quiz) = self.active_quiz() {
                    debug!(quiz = %quiz.id(), "playback started during quiz");
                    player.pause();
                }
            }
            PlayerEvent::Paused | PlayerEvent::Buffering => trace!(?event, "player event"),
            PlayerEvent::Ended => debug!("video ended"),
        }
    }

    /// Handles a scheduled alarm message
    ///
    /// Alarms addressed to another session, or to a quiz that is no longer
    /// open, are ignored; that is how the poll, enforcement and countdown
    /// loops stop.
    ///
    /// # Type Parameters
    ///
    /// * `P` - Player implementation
    /// * `T` - Tunnel to the host UI
    /// * `S` - Function scheduling alarm messages after a delay
    pub fn receive_alarm<P: PlayerAdapter, T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        message: crate::AlarmMessage,
        player: &P,
        mut schedule_message: S,
        tunnel: &T,
    ) {
        let config = &self.config;
        let Some(session) = self.session.as_mut() else {
            trace!(?message, "alarm after teardown");
            return;
        };
        if message.session() != session.id {
            trace!(?message, "alarm for a previous session");
            return;
        }

        match message {
            crate::AlarmMessage::Sync(AlarmMessage::Poll { .. }) => {
                session.poll(config, player, &mut schedule_message, tunnel);
            }
            crate::AlarmMessage::Sync(AlarmMessage::SeekRecheck { seek, .. }) => {
                session.seek_recheck(config, seek, player, &mut schedule_message, tunnel);
            }
            crate::AlarmMessage::Quiz(quiz::AlarmMessage::EnforcePause { quiz, .. }) => {
                session.enforce_pause(config, quiz, player, &mut schedule_message);
            }
            crate::AlarmMessage::Quiz(quiz::AlarmMessage::Countdown { quiz, .. }) => {
                session.countdown(config, quiz, player, &mut schedule_message, tunnel);
            }
        }
    }

    /// Validates an answer to the open quiz and returns the request to send
    ///
    /// # Errors
    ///
    /// * `SubmitError::NoActiveQuiz` - no quiz is open
    /// * `SubmitError::OptionOutOfRange` - the index names no option
    /// * `SubmitError::SubmissionInFlight` - an earlier attempt is pending
    pub fn submit_answer(&mut self, selected_index: usize) -> Result<SubmissionRequest, SubmitError> {
        let session = self.session.as_mut().ok_or(SubmitError::NoActiveQuiz)?;
        let State::QuizActive(quiz) = &mut session.state else {
            return Err(SubmitError::NoActiveQuiz);
        };
        let request = quiz.begin_submission(session.id, selected_index)?;
        debug!(
            session = %session.id,
            checkpoint = %request.checkpoint_id,
            selected_index,
            attempt = request.ticket.attempt,
            "submitting answer"
        );
        Ok(request)
    }

    /// Applies the outcome of a submission previously returned by
    /// [`SyncEngine::submit_answer`]
    pub fn receive_submission<P: PlayerAdapter, T: Tunnel>(
        &mut self,
        ticket: &SubmissionTicket,
        result: Result<SubmissionResponse, submission::Error>,
        player: &P,
        tunnel: &T,
    ) -> SubmissionOutcome {
        match self.session.as_mut() {
            Some(session) if session.id == ticket.session => {
                session.apply_submission(ticket, result, player, tunnel)
            }
            _ => {
                trace!(session = %ticket.session, "submission for a previous session");
                SubmissionOutcome::Stale
            }
        }
    }

    /// Replaces the current session with a fresh one for `video_id`
    ///
    /// Alarms and submissions of the previous session become stale. If the
    /// player is already ready, polling starts immediately.
    pub fn load_video<T: Tunnel, S: FnMut(crate::AlarmMessage, Duration)>(
        &mut self,
        video_id: VideoId,
        checkpoints: CheckpointStore,
        mut schedule_message: S,
        tunnel: &T,
    ) {
        let id = SessionId::next_after(self.last_session);
        info!(session = %id, video = %video_id, "loading video");
        self.last_session = id;

        let mut session = VideoSession::new(id, video_id, checkpoints);
        if self.readiness.is_ready() {
            session.start(&self.config, &mut schedule_message, tunnel);
        }
        self.session = Some(session);
    }

    /// Discards the current session and everything scheduled for it
    pub fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            info!(session = %session.id, video = %session.video_id, "session torn down");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
pub(crate) mod tests {
    use std::{cell::RefCell, rc::Rc};

    use itertools::Itertools;

    use super::*;
    use crate::{
        checkpoint::{QuizCheckpoint, tests::checkpoint},
        player::tests::MockPlayer,
        quiz::Resolution,
    };

    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockTunnel {
        pub messages: Rc<RefCell<Vec<crate::UpdateMessage>>>,
        pub states: Rc<RefCell<Vec<SyncMessage>>>,
    }

    impl Tunnel for MockTunnel {
        fn send_message(&self, message: &crate::UpdateMessage) {
            self.messages.borrow_mut().push(message.clone());
        }

        fn send_state(&self, state: &SyncMessage) {
            self.states.borrow_mut().push(state.clone());
        }
    }

    impl MockTunnel {
        fn opened(&self) -> Vec<CheckpointId> {
            self.messages
                .borrow()
                .iter()
                .filter_map(|m| match m {
                    crate::UpdateMessage::Quiz(quiz::UpdateMessage::QuizOpened {
                        checkpoint_id,
                        ..
                    }) => Some(checkpoint_id.clone()),
                    _ => None,
                })
                .collect_vec()
        }

        fn resolutions(&self) -> Vec<(CheckpointId, Resolution)> {
            self.messages
                .borrow()
                .iter()
                .filter_map(|m| match m {
                    crate::UpdateMessage::Quiz(quiz::UpdateMessage::QuizResolved {
                        checkpoint_id,
                        resolution,
                        ..
                    }) => Some((checkpoint_id.clone(), *resolution)),
                    _ => None,
                })
                .collect_vec()
        }

        fn count(&self, predicate: impl Fn(&crate::UpdateMessage) -> bool) -> usize {
            self.messages.borrow().iter().filter(|m| predicate(*m)).count()
        }
    }

    /// Deterministic clock that delivers alarms in due order and moves the
    /// mock player's playhead while it plays
    struct Sim {
        engine: SyncEngine,
        player: MockPlayer,
        tunnel: MockTunnel,
        now_ms: u64,
        next_seq: u64,
        alarms: Vec<(u64, u64, crate::AlarmMessage)>,
    }

    impl Sim {
        fn new(checkpoints: Vec<QuizCheckpoint>) -> Self {
            Self::with_config(SyncConfig::default(), checkpoints)
        }

        fn with_config(config: SyncConfig, checkpoints: Vec<QuizCheckpoint>) -> Self {
            Self {
                engine: SyncEngine::new(
                    config,
                    "lecture-7".into(),
                    CheckpointStore::new(checkpoints).unwrap(),
                )
                .unwrap(),
                player: MockPlayer::default(),
                tunnel: MockTunnel::default(),
                now_ms: 0,
                next_seq: 0,
                alarms: Vec::new(),
            }
        }

        fn queue(&mut self, pending: Vec<(crate::AlarmMessage, Duration)>) {
            for (alarm, delay) in pending {
                let due = self.now_ms + u64::try_from(delay.as_millis()).unwrap();
                self.alarms.push((due, self.next_seq, alarm));
                self.next_seq += 1;
            }
        }

        fn ready(&mut self) {
            self.event(PlayerEvent::Ready);
        }

        fn event(&mut self, event: PlayerEvent) {
            let mut pending = Vec::new();
            self.engine.player_event(
                event,
                &self.player,
                |alarm, delay| pending.push((alarm, delay)),
                &self.tunnel,
            );
            self.queue(pending);
        }

        /// Ready the player and start playback from the current position
        fn start_playing(&mut self) {
            self.ready();
            self.player.play();
        }

        fn advance(&mut self, ms: u64) {
            let target = self.now_ms + ms;
            loop {
                let next = self
                    .alarms
                    .iter()
                    .enumerate()
                    .filter(|(_, (due, _, _))| *due <= target)
                    .min_by_key(|(_, (due, seq, _))| (*due, *seq))
                    .map(|(index, _)| index);
                let Some(index) = next else {
                    break;
                };

                let (due, _, alarm) = self.alarms.swap_remove(index);
                self.player.advance((due - self.now_ms) as f64 / 1000.);
                self.now_ms = due;

                let mut pending = Vec::new();
                self.engine.receive_alarm(
                    alarm,
                    &self.player,
                    |alarm, delay| pending.push((alarm, delay)),
                    &self.tunnel,
                );
                self.queue(pending);
            }
            self.player.advance((target - self.now_ms) as f64 / 1000.);
            self.now_ms = target;
        }

        fn respond(
            &mut self,
            request: &SubmissionRequest,
            result: Result<SubmissionResponse, submission::Error>,
        ) -> SubmissionOutcome {
            self.engine
                .receive_submission(&request.ticket, result, &self.player, &self.tunnel)
        }

        fn phase(&self) -> Phase {
            self.engine.phase().unwrap()
        }

        fn presence(&self) -> PresenceSummary {
            self.engine.presence().unwrap()
        }

        fn answered(&self) -> &HashSet<CheckpointId> {
            self.engine.session().unwrap().answered()
        }
    }

    fn correct(updated_presence_score: Option<f64>) -> Result<SubmissionResponse, submission::Error> {
        Ok(SubmissionResponse {
            is_correct: true,
            updated_presence_score,
        })
    }

    fn id(value: &str) -> CheckpointId {
        CheckpointId::from(value)
    }

    #[test]
    fn test_normal_playback_triggers_each_checkpoint_once_in_order() {
        let mut sim = Sim::new(vec![checkpoint("c90", 90.), checkpoint("c30", 30.)]);
        sim.start_playing();

        sim.advance(26_500);
        assert_eq!(sim.phase(), Phase::Watching);

        sim.advance(500);
        assert_eq!(sim.phase(), Phase::QuizActive);
        assert!(!sim.player.is_playing());

        sim.advance(250_000);
        assert_eq!(sim.tunnel.opened(), [id("c30"), id("c90")]);
        assert_eq!(
            sim.tunnel.resolutions(),
            [
                (id("c30"), Resolution::TimedOut),
                (id("c90"), Resolution::TimedOut)
            ]
        );
        assert_eq!(sim.presence().quizzes_unanswered, 2);
        assert_eq!(sim.presence().total_resolved(), 2);
        assert_eq!(sim.answered().len(), 2);
        assert_eq!(sim.phase(), Phase::Watching);
        assert!(sim.player.is_playing());
    }

    #[test]
    fn test_seek_into_narrow_window_fires_once() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(5_000);

        sim.player.seek(31.);
        sim.advance(2_000);

        assert_eq!(sim.tunnel.opened(), [id("c30")]);
        assert_eq!(sim.phase(), Phase::QuizActive);
    }

    #[test]
    fn test_seek_outside_narrow_window_fires_on_wide_pass() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(5_000);
        assert!((sim.engine.session().unwrap().last_observed_seconds() - 5.).abs() < 1e-9);

        sim.player.seek(38.);
        sim.advance(500);
        assert_eq!(sim.phase(), Phase::Watching);

        sim.advance(1_000);
        assert_eq!(sim.phase(), Phase::QuizActive);
        assert_eq!(sim.tunnel.opened(), [id("c30")]);
    }

    #[test]
    fn test_idling_near_checkpoint_without_seek_does_not_fire() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.player.seek(38.);
        sim.ready();

        sim.advance(20_000);
        assert!(sim.tunnel.opened().is_empty());
        assert_eq!(sim.phase(), Phase::Watching);
    }

    #[test]
    fn test_wide_window_is_transient() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(5_000);
        sim.player.pause();

        sim.player.seek(41.5);
        sim.advance(2_000);
        assert!(sim.tunnel.opened().is_empty());

        // Small drift back toward the checkpoint is not a seek
        sim.player.seek(39.);
        sim.advance(5_000);
        assert!(sim.tunnel.opened().is_empty());
        assert_eq!(sim.phase(), Phase::Watching);
    }

    #[test]
    fn test_only_latest_seek_gets_a_wide_pass() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(5_000);
        sim.player.pause();

        sim.player.seek(60.);
        sim.advance(500);
        sim.player.seek(38.);
        sim.advance(500);

        // The first seek's recheck is superseded even though it would match
        sim.advance(500);
        assert!(sim.tunnel.opened().is_empty());
        sim.advance(500);
        assert_eq!(sim.tunnel.opened(), [id("c30")]);
    }

    #[test]
    fn test_correct_submission_resolves_and_resumes() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);
        assert_eq!(sim.phase(), Phase::QuizActive);

        sim.advance(45_000);
        assert_eq!(sim.engine.active_quiz().unwrap().remaining_seconds(), 15);

        let request = sim.engine.submit_answer(0).unwrap();
        assert_eq!(request.checkpoint_id, id("c30"));
        assert_eq!(sim.respond(&request, correct(Some(1.))), SubmissionOutcome::Resolved);

        let presence = sim.presence();
        assert_eq!(presence.quizzes_answered, 1);
        assert_eq!(presence.quizzes_correct, 1);
        assert_eq!(presence.quizzes_unanswered, 0);
        assert!((presence.presence_score - 1.).abs() < f64::EPSILON);
        assert_eq!(presence.reported_score, Some(1.));
        assert!(sim.answered().contains(&id("c30")));
        assert!(sim.player.is_playing());
        assert_eq!(sim.phase(), Phase::Watching);
        assert_eq!(
            sim.tunnel.resolutions(),
            [(
                id("c30"),
                Resolution::Answered {
                    selected_index: 0,
                    is_correct: true
                }
            )]
        );

        // The countdown and enforcement loops die with the quiz
        let before = sim.player.inner.borrow().pause_calls;
        sim.advance(90_000);
        assert_eq!(sim.player.inner.borrow().pause_calls, before);
        assert!(sim.tunnel.opened().len() == 1);
    }

    #[test]
    fn test_incorrect_submission_counts_as_answered() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);

        let request = sim.engine.submit_answer(2).unwrap();
        let outcome = sim.respond(
            &request,
            Ok(SubmissionResponse {
                is_correct: false,
                updated_presence_score: None,
            }),
        );
        assert_eq!(outcome, SubmissionOutcome::Resolved);
        assert_eq!(sim.presence().quizzes_answered, 1);
        assert_eq!(sim.presence().quizzes_correct, 0);
        assert_eq!(sim.presence().presence_score, 0.);
    }

    #[test]
    fn test_timeout_resolves_and_resumes() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);

        sim.advance(59_000);
        assert_eq!(sim.phase(), Phase::QuizActive);
        assert_eq!(sim.engine.active_quiz().unwrap().remaining_seconds(), 1);

        sim.advance(1_000);
        assert_eq!(sim.phase(), Phase::Watching);
        let presence = sim.presence();
        assert_eq!(presence.quizzes_unanswered, 1);
        assert_eq!(presence.quizzes_answered, 0);
        assert_eq!(presence.quizzes_correct, 0);
        assert!(sim.answered().contains(&id("c30")));
        assert!(sim.player.is_playing());
        assert_eq!(sim.tunnel.resolutions(), [(id("c30"), Resolution::TimedOut)]);

        let ticks = sim.tunnel.count(|m| {
            matches!(
                m,
                crate::UpdateMessage::Quiz(quiz::UpdateMessage::CountdownTick { .. })
            )
        });
        assert_eq!(ticks, 59);
    }

    #[test]
    fn test_autonomous_resume_is_paused_again_within_one_interval() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);
        let quiz_id = sim.engine.active_quiz().unwrap().id();

        sim.advance(2_000);
        sim.player.resume_externally();
        assert!(sim.player.is_playing());

        sim.advance(500);
        assert!(!sim.player.is_playing());
        assert_eq!(sim.engine.active_quiz().unwrap().id(), quiz_id);
        assert_eq!(sim.engine.active_quiz().unwrap().resolution(), Resolution::Pending);
    }

    #[test]
    fn test_playing_event_during_quiz_pauses_immediately() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);

        sim.player.resume_externally();
        sim.event(PlayerEvent::Playing);
        assert!(!sim.player.is_playing());
        assert_eq!(sim.phase(), Phase::QuizActive);
    }

    #[test]
    fn test_late_submission_after_timeout_does_not_resume_again() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);

        sim.advance(59_800);
        let request = sim.engine.submit_answer(1).unwrap();
        sim.advance(200);
        assert_eq!(sim.phase(), Phase::Watching);
        let play_calls = sim.player.play_calls();

        assert_eq!(sim.respond(&request, correct(Some(0.5))), SubmissionOutcome::Late);
        assert_eq!(sim.player.play_calls(), play_calls);
        assert_eq!(sim.phase(), Phase::Watching);

        let presence = sim.presence();
        assert_eq!(presence.quizzes_unanswered, 1);
        assert_eq!(presence.quizzes_answered, 0);
        assert_eq!(presence.reported_score, Some(0.5));
        assert_eq!(sim.tunnel.resolutions(), [(id("c30"), Resolution::TimedOut)]);
    }

    #[test]
    fn test_failed_submission_keeps_quiz_open_and_allows_retry() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);

        let first = sim.engine.submit_answer(1).unwrap();
        assert_eq!(
            sim.engine.submit_answer(1),
            Err(SubmitError::SubmissionInFlight)
        );
        let outcome = sim.respond(
            &first,
            Err(submission::Error::Network("connection reset".to_owned())),
        );
        assert_eq!(outcome, SubmissionOutcome::Retry);
        assert_eq!(sim.phase(), Phase::QuizActive);
        assert_eq!(
            sim.tunnel.count(|m| matches!(
                m,
                crate::UpdateMessage::Quiz(quiz::UpdateMessage::SubmissionFailed { .. })
            )),
            1
        );

        sim.advance(3_000);
        assert_eq!(sim.engine.active_quiz().unwrap().remaining_seconds(), 57);

        let second = sim.engine.submit_answer(1).unwrap();
        assert_eq!(second.ticket.attempt, 2);
        assert_eq!(sim.respond(&first, correct(None)), SubmissionOutcome::Stale);
        assert_eq!(sim.respond(&second, correct(None)), SubmissionOutcome::Resolved);
        assert_eq!(sim.presence().quizzes_answered, 1);
    }

    #[test]
    fn test_submit_rejected_at_the_boundary() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(1_000);
        assert_eq!(sim.engine.submit_answer(0), Err(SubmitError::NoActiveQuiz));

        sim.advance(26_000);
        assert_eq!(
            sim.engine.submit_answer(7),
            Err(SubmitError::OptionOutOfRange {
                selected: 7,
                count: 3
            })
        );
        assert_eq!(sim.phase(), Phase::QuizActive);
    }

    #[test]
    fn test_answered_checkpoint_never_fires_again_across_seeks() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);
        let request = sim.engine.submit_answer(0).unwrap();
        sim.respond(&request, correct(None));

        for landing in [10., 31., 5., 38., 29.5] {
            sim.player.seek(landing);
            sim.advance(3_000);
        }
        sim.advance(20_000);

        assert_eq!(sim.tunnel.opened(), [id("c30")]);
        assert_eq!(sim.presence().total_resolved(), 1);
    }

    #[test]
    fn test_player_error_skips_tick_and_keeps_last_reading() {
        let mut sim = Sim::new(vec![checkpoint("c50", 50.)]);
        sim.start_playing();
        sim.advance(5_000);

        sim.player.set_failing(true);
        sim.player.seek(41.);
        sim.advance(1_000);
        let session = sim.engine.session().unwrap();
        assert!((session.last_observed_seconds() - 5.).abs() < 1e-9);
        assert_eq!(sim.phase(), Phase::Watching);

        // The first good reading is compared against the last good one
        sim.player.set_failing(false);
        sim.advance(500);
        assert_eq!(sim.phase(), Phase::Watching);
        sim.advance(1_000);
        assert_eq!(sim.tunnel.opened(), [id("c50")]);
    }

    #[test]
    fn test_invalid_time_is_skipped() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(2_000);
        sim.player.pause();
        sim.player.seek(f64::NAN);
        sim.advance(2_000);
        assert!((sim.engine.session().unwrap().last_observed_seconds() - 2.).abs() < 1e-9);
        assert!(sim.tunnel.opened().is_empty());
    }

    #[test]
    fn test_no_checkpoints_idles_without_polling() {
        let mut sim = Sim::new(Vec::new());
        sim.start_playing();
        assert!(sim.alarms.is_empty());
        assert_eq!(sim.phase(), Phase::Idle);
        assert_eq!(
            sim.tunnel.count(|m| matches!(
                m,
                crate::UpdateMessage::Sync(UpdateMessage::Idle { .. })
            )),
            1
        );
    }

    #[test]
    fn test_no_polling_before_ready() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.player.play();
        sim.advance(40_000);
        assert!(sim.alarms.is_empty());
        assert_eq!(sim.phase(), Phase::Idle);
        assert!(!sim.engine.is_ready());
    }

    #[test]
    fn test_duplicate_ready_starts_polling_once() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.ready();
        sim.ready();
        assert_eq!(sim.alarms.len(), 1);
        assert!(sim.engine.is_ready());
    }

    #[test]
    fn test_teardown_stops_every_loop() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);
        let request = sim.engine.submit_answer(0).unwrap();

        sim.engine.teardown();
        assert!(sim.engine.session().is_none());
        let messages = sim.tunnel.messages.borrow().len();

        sim.advance(120_000);
        assert!(sim.alarms.is_empty());
        assert_eq!(sim.tunnel.messages.borrow().len(), messages);
        assert_eq!(sim.respond(&request, correct(None)), SubmissionOutcome::Stale);
        assert_eq!(sim.engine.submit_answer(0), Err(SubmitError::NoActiveQuiz));
    }

    #[test]
    fn test_load_video_makes_previous_session_stale() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        sim.start_playing();
        sim.advance(27_000);
        let old_session = sim.engine.session().unwrap().id();
        let request = sim.engine.submit_answer(0).unwrap();

        let mut pending = Vec::new();
        sim.engine.load_video(
            "lecture-8".into(),
            CheckpointStore::new(vec![checkpoint("next", 200.)]).unwrap(),
            |alarm, delay| pending.push((alarm, delay)),
            &sim.tunnel,
        );
        sim.queue(pending);

        let session = sim.engine.session().unwrap();
        assert_ne!(session.id(), old_session);
        assert_eq!(session.video_id(), &VideoId::from("lecture-8"));
        assert_eq!(sim.phase(), Phase::Watching);

        sim.player.play();
        sim.advance(70_000);
        assert!(sim.tunnel.resolutions().is_empty());
        assert_eq!(sim.respond(&request, correct(None)), SubmissionOutcome::Stale);
        assert_eq!(sim.presence(), PresenceSummary::default());
    }

    #[test]
    fn test_state_message_follows_phase() {
        let mut sim = Sim::new(vec![checkpoint("c30", 30.)]);
        assert!(matches!(
            sim.engine.state_message(),
            Some(SyncMessage::Idle { .. })
        ));

        sim.start_playing();
        assert!(matches!(
            sim.engine.state_message(),
            Some(SyncMessage::Watching {
                resolved: 0,
                checkpoint_count: 1,
                ..
            })
        ));

        sim.advance(30_000);
        sim.engine.sync(&sim.tunnel);
        let states = sim.tunnel.states.borrow();
        assert!(matches!(
            states.last(),
            Some(SyncMessage::QuizActive {
                remaining_seconds: 57,
                budget_seconds: 60,
                ..
            })
        ));
    }

    #[test]
    fn test_out_of_bounds_config_is_rejected() {
        let store = || CheckpointStore::new(vec![checkpoint("c30", 30.)]).unwrap();

        let busy_poll = SyncConfig {
            poll_interval: Duration::ZERO,
            ..SyncConfig::default()
        };
        assert!(matches!(
            SyncEngine::new(busy_poll, "lecture-7".into(), store()),
            Err(config::Error::Invalid(_))
        ));

        let short_budget = SyncConfig {
            quiz_budget: Duration::from_millis(500),
            ..SyncConfig::default()
        };
        assert!(matches!(
            SyncEngine::new(short_budget, "lecture-7".into(), store()),
            Err(config::Error::Invalid(_))
        ));

        let inverted_windows = SyncConfig {
            normal_tolerance_seconds: 10.,
            wide_tolerance_seconds: 1.,
            ..SyncConfig::default()
        };
        assert!(matches!(
            SyncEngine::new(inverted_windows, "lecture-7".into(), store()),
            Err(config::Error::ToleranceOrder { .. })
        ));

        assert!(SyncEngine::new(SyncConfig::default(), "lecture-7".into(), store()).is_ok());
    }

    #[test]
    fn test_custom_budget_and_tolerances() {
        let config = SyncConfig {
            normal_tolerance_seconds: 0.5,
            wide_tolerance_seconds: 2.,
            quiz_budget: Duration::from_secs(10),
            ..SyncConfig::default()
        };
        let mut sim = Sim::with_config(config, vec![checkpoint("c30", 30.)]);
        sim.start_playing();

        sim.advance(29_000);
        assert_eq!(sim.phase(), Phase::Watching);
        sim.advance(500);
        assert_eq!(sim.phase(), Phase::QuizActive);
        assert_eq!(sim.engine.active_quiz().unwrap().budget_seconds(), 10);

        sim.advance(10_000);
        assert_eq!(sim.phase(), Phase::Watching);
        assert_eq!(sim.presence().quizzes_unanswered, 1);
    }
}
