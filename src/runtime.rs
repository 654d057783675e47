//! Tokio driver
//!
//! The [`SyncEngine`] only describes what should happen and when. The
//! [`Driver`] makes it happen on a tokio runtime: it turns scheduled alarms
//! into sleeping tasks, runs submissions against the [`SubmissionService`]
//! in the background, loads checkpoints from the [`CheckpointSource`] in the
//! background too, and feeds every outcome back into the engine one at a
//! time.
//!
//! The player and tunnel stay on the driver's task, so they need not be
//! `Send`; run the driver on a current-thread runtime or a `LocalSet`.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    AlarmMessage,
    checkpoint::{CheckpointSource, CheckpointStore},
    config::{self, SyncConfig},
    engine::SyncEngine,
    player::{PlayerAdapter, PlayerEvent},
    presence::PresenceSummary,
    quiz::SubmitError,
    session::Tunnel,
    session_id::VideoId,
    submission::{self, SubmissionRequest, SubmissionResponse, SubmissionService, SubmissionTicket},
};

/// Commands accepted by a running [`Driver`]
#[derive(Debug)]
pub enum DriverCommand {
    /// A lifecycle event relayed from the player
    Player(PlayerEvent),
    /// The viewer selected an option of the open quiz
    Submit {
        /// Index of the selected option
        selected_index: usize,
        /// Receives whether the submission was sent
        reply: oneshot::Sender<Result<(), SubmitError>>,
    },
    /// Switch to another video
    LoadVideo(VideoId),
    /// Send a full snapshot through the tunnel
    Sync,
    /// Tear down the session and stop the driver
    Shutdown,
}

type SubmissionResult = (SubmissionTicket, Result<SubmissionResponse, submission::Error>);
type LoadedStore = (VideoId, CheckpointStore);

/// Loads and validates the checkpoints of `video_id`
///
/// A failing source or an invalid list yields an empty store: the video then
/// plays without interruption.
pub async fn load_store(source: &dyn CheckpointSource, video_id: &VideoId) -> CheckpointStore {
    match source
        .load_checkpoints(video_id)
        .await
        .and_then(CheckpointStore::new)
    {
        Ok(store) => store,
        Err(error) => {
            warn!(video = %video_id, %error, "checkpoints unavailable, playing uninterrupted");
            CheckpointStore::default()
        }
    }
}

/// Returns a scheduling function that delivers each alarm after its delay
fn scheduler(
    sender: &mpsc::UnboundedSender<AlarmMessage>,
) -> impl FnMut(AlarmMessage, Duration) + '_ {
    move |message, delay| {
        let sender = sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The driver may have stopped; the alarm is then moot
            let _ = sender.send(message);
        });
    }
}

/// Runs a [`SyncEngine`] against a player, a tunnel and the two services
pub struct Driver<P, T> {
    engine: SyncEngine,
    player: P,
    tunnel: T,
    checkpoints: Arc<dyn CheckpointSource>,
    submissions: Arc<dyn SubmissionService>,
    cmd_rx: mpsc::UnboundedReceiver<DriverCommand>,
    alarm_tx: mpsc::UnboundedSender<AlarmMessage>,
    alarm_rx: mpsc::UnboundedReceiver<AlarmMessage>,
    result_tx: mpsc::UnboundedSender<SubmissionResult>,
    result_rx: mpsc::UnboundedReceiver<SubmissionResult>,
    store_tx: mpsc::UnboundedSender<LoadedStore>,
    store_rx: mpsc::UnboundedReceiver<LoadedStore>,
    pending_video: Option<VideoId>,
}

impl<P: PlayerAdapter, T: Tunnel> Driver<P, T> {
    /// Loads the checkpoints of `video_id` and prepares a driver for it
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is out of bounds; nothing is loaded then.
    ///
    /// # Returns
    ///
    /// The driver, and the sender through which the host relays player
    /// events and viewer actions.
    pub async fn new(
        config: SyncConfig,
        video_id: VideoId,
        player: P,
        tunnel: T,
        checkpoints: Arc<dyn CheckpointSource>,
        submissions: Arc<dyn SubmissionService>,
    ) -> Result<(Self, mpsc::UnboundedSender<DriverCommand>), config::Error> {
        config.check()?;
        let store = load_store(checkpoints.as_ref(), &video_id).await;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (alarm_tx, alarm_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (store_tx, store_rx) = mpsc::unbounded_channel();

        let driver = Self {
            engine: SyncEngine::new(config, video_id, store)?,
            player,
            tunnel,
            checkpoints,
            submissions,
            cmd_rx,
            alarm_tx,
            alarm_rx,
            result_tx,
            result_rx,
            store_tx,
            store_rx,
            pending_video: None,
        };
        Ok((driver, cmd_tx))
    }

    /// The engine being driven
    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    fn dispatch(&self, request: SubmissionRequest) {
        let service = Arc::clone(&self.submissions);
        let results = self.result_tx.clone();
        tokio::spawn(async move {
            let ticket = request.ticket.clone();
            let result = service.submit(request).await;
            let _ = results.send((ticket, result));
        });
    }

    /// Tears down the current session and fetches the checkpoints of
    /// `video_id` in the background
    ///
    /// Only the latest requested video is applied once its store arrives.
    fn switch_video(&mut self, video_id: VideoId) {
        self.engine.teardown();
        self.pending_video = Some(video_id.clone());

        let source = Arc::clone(&self.checkpoints);
        let stores = self.store_tx.clone();
        tokio::spawn(async move {
            let store = load_store(source.as_ref(), &video_id).await;
            let _ = stores.send((video_id, store));
        });
    }

    /// Processes commands, alarms, submission results and loaded checkpoints
    /// until shutdown
    ///
    /// # Returns
    ///
    /// The presence counters of the last session, or `None` if it had
    /// already been torn down.
    pub async fn run(mut self) -> Option<PresenceSummary> {
        info!("sync driver starting");

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    let Some(command) = command else {
                        debug!("command channel closed");
                        break;
                    };
                    match command {
                        DriverCommand::Player(event) => {
                            self.engine.player_event(
                                event,
                                &self.player,
                                scheduler(&self.alarm_tx),
                                &self.tunnel,
                            );
                        }
                        DriverCommand::Submit { selected_index, reply } => {
                            let sent = self.engine.submit_answer(selected_index).map(|request| {
                                self.dispatch(request);
                            });
                            if let Err(error) = &sent {
                                debug!(%error, "submission refused");
                            }
                            let _ = reply.send(sent);
                        }
                        DriverCommand::LoadVideo(video_id) => self.switch_video(video_id),
                        DriverCommand::Sync => self.engine.sync(&self.tunnel),
                        DriverCommand::Shutdown => {
                            info!("shutdown requested");
                            break;
                        }
                    }
                }

                Some(alarm) = self.alarm_rx.recv() => {
                    self.engine.receive_alarm(
                        alarm,
                        &self.player,
                        scheduler(&self.alarm_tx),
                        &self.tunnel,
                    );
                }

                Some((ticket, result)) = self.result_rx.recv() => {
                    let outcome = self.engine.receive_submission(
                        &ticket,
                        result,
                        &self.player,
                        &self.tunnel,
                    );
                    debug!(checkpoint = %ticket.checkpoint_id, ?outcome, "submission applied");
                }

                Some((video_id, store)) = self.store_rx.recv() => {
                    if self.pending_video.as_ref() != Some(&video_id) {
                        debug!(video = %video_id, "superseded checkpoint load ignored");
                        continue;
                    }
                    self.pending_video = None;
                    self.engine.load_video(
                        video_id,
                        store,
                        scheduler(&self.alarm_tx),
                        &self.tunnel,
                    );
                }
            }
        }

        let presence = self.engine.presence();
        self.engine.teardown();
        info!("sync driver stopped");
        presence
    }
}
