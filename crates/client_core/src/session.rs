//! Drives a [`ReorderController`] against a [`StageOrderApi`].
//!
//! Saves and indicator timers run as spawned tasks; their results come back as
//! [`SessionEvent`]s on an internal channel and are applied in order by
//! [`ReorderSession::handle`].

use std::sync::Arc;

use shared::{
    domain::{StageId, WellId},
    protocol::StageSummary,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    controller::{ReorderCommand, ReorderController, RowBounds},
    ReorderClientError, StageOrderApi,
};

#[derive(Debug)]
pub enum SessionEvent {
    SaveFinished(Result<(), ReorderClientError>),
    IndicatorExpired { generation: u64 },
    Reloaded(Result<Vec<StageSummary>, ReorderClientError>),
}

pub struct ReorderSession {
    controller: ReorderController,
    api: Arc<dyn StageOrderApi>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    reload_in_flight: bool,
    /// Listing that arrived mid-drag; applied when the drag ends without a save.
    deferred_listing: Option<Vec<StageId>>,
}

impl ReorderSession {
    /// Fetches the well's stages and starts a session over them.
    pub async fn load(
        api: Arc<dyn StageOrderApi>,
        well_id: WellId,
    ) -> Result<Self, ReorderClientError> {
        let stages = api.list_stages(well_id).await?;
        let controller = ReorderController::new(well_id, stage_ids(&stages));
        Ok(Self::new(api, controller))
    }

    pub fn new(api: Arc<dyn StageOrderApi>, controller: ReorderController) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            api,
            events_tx,
            events_rx,
            reload_in_flight: false,
            deferred_listing: None,
        }
    }

    pub fn controller(&self) -> &ReorderController {
        &self.controller
    }

    pub fn drag_start(&mut self, stage_id: StageId) -> bool {
        self.controller.drag_start(stage_id)
    }

    pub fn drag_over(&mut self, pointer_y: f64, siblings: &[(StageId, RowBounds)]) -> bool {
        self.controller.drag_over(pointer_y, siblings)
    }

    /// A save sent from a stale listing is rejected by the server and
    /// triggers another reload, so a deferred listing is only applied when the
    /// drag produced no save.
    pub fn drag_end(&mut self) {
        match self.controller.drag_end() {
            Some(command) => {
                self.deferred_listing = None;
                self.dispatch(command);
            }
            None => {
                if let Some(stages) = self.deferred_listing.take() {
                    if !self.controller.reload(stages) {
                        debug!("deferred stage listing dropped; a save is outstanding");
                    }
                }
            }
        }
    }

    /// Waits for the next completed save, reload or timer.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SaveFinished(Ok(())) => {
                for command in self.controller.save_succeeded() {
                    self.dispatch(command);
                }
            }
            SessionEvent::SaveFinished(Err(err)) => {
                warn!(
                    well_id = self.controller.well_id().0,
                    error = %err,
                    "stage order save failed; restoring previous order"
                );
                let conflict = err.is_conflict();
                self.controller.save_failed(err.user_message());
                if conflict {
                    self.spawn_reload();
                }
            }
            SessionEvent::IndicatorExpired { generation } => {
                self.controller.indicator_expired(generation);
            }
            SessionEvent::Reloaded(result) => {
                self.reload_in_flight = false;
                match result {
                    Ok(stages) => {
                        let stages = stage_ids(&stages);
                        if self.controller.is_saving() {
                            debug!("stage listing arrived during a save; keeping local rows");
                        } else if !self.controller.reload(stages.clone()) {
                            debug!("stage listing arrived mid-drag; applying after drop");
                            self.deferred_listing = Some(stages);
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to reload stages"),
                }
            }
        }
    }

    /// Applies events until no save or reload is outstanding. Pending
    /// indicator timers are left on the channel.
    pub async fn settle(&mut self) {
        while self.controller.is_saving() || self.reload_in_flight {
            match self.events_rx.recv().await {
                Some(event) => self.handle(event),
                None => break,
            }
        }
    }

    fn dispatch(&self, command: ReorderCommand) {
        let events = self.events_tx.clone();
        match command {
            ReorderCommand::Save { well_id, order } => {
                let api = Arc::clone(&self.api);
                tokio::spawn(async move {
                    let result = api.save_order(well_id, &order).await;
                    let _ = events.send(SessionEvent::SaveFinished(result));
                });
            }
            ReorderCommand::ClearIndicatorAfter { delay, generation } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(SessionEvent::IndicatorExpired { generation });
                });
            }
        }
    }

    fn spawn_reload(&mut self) {
        self.reload_in_flight = true;
        let api = Arc::clone(&self.api);
        let events = self.events_tx.clone();
        let well_id = self.controller.well_id();
        tokio::spawn(async move {
            let result = api.list_stages(well_id).await;
            let _ = events.send(SessionEvent::Reloaded(result));
        });
    }
}

fn stage_ids(stages: &[StageSummary]) -> Vec<StageId> {
    stages.iter().map(|stage| stage.stage_id).collect()
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
