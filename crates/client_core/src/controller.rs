//! Drag-and-drop reorder state machine for one well's stage list.
//!
//! The controller never performs I/O. Input events (drag start/over/end, save
//! results, timer expiry) mutate the local row order and return
//! [`ReorderCommand`]s that the caller executes. At most one save is in flight.

use std::time::Duration;

use shared::{
    domain::{StageId, WellId},
    order::StageOrder,
};

/// How long the "saved" confirmation stays visible.
pub const SAVED_INDICATOR_TTL: Duration = Duration::from_secs(1);

/// Vertical extent of a rendered row, in the same coordinate space as the pointer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowBounds {
    pub top: f64,
    pub height: f64,
}

impl RowBounds {
    pub fn new(top: f64, height: f64) -> Self {
        Self { top, height }
    }

    fn midpoint(&self) -> f64 {
        self.top + self.height / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveIndicator {
    Hidden,
    Saving,
    Saved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderPhase {
    /// Showing the order loaded from the server; nothing saved yet.
    Idle,
    Dragging { stage_id: StageId },
    Saving,
    /// Idle after the server confirmed the last save.
    Confirmed,
    /// Idle after a failed save put the previous order back.
    Reverted { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReorderCommand {
    Save { well_id: WellId, order: StageOrder },
    ClearIndicatorAfter { delay: Duration, generation: u64 },
}

#[derive(Debug, Clone)]
struct DragState {
    stage_id: StageId,
    snapshot: Vec<StageId>,
}

#[derive(Debug, Clone)]
struct InFlightSave {
    submitted: Vec<StageId>,
    revert_to: Vec<StageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Settled {
    Loaded,
    Confirmed,
    Reverted(String),
}

#[derive(Debug, Clone)]
pub struct ReorderController {
    well_id: WellId,
    rows: Vec<StageId>,
    confirmed: Vec<StageId>,
    drag: Option<DragState>,
    in_flight: Option<InFlightSave>,
    /// A drag ended while a save was outstanding; its order still needs flushing.
    pending_flush: bool,
    settled: Settled,
    indicator: SaveIndicator,
    indicator_generation: u64,
}

impl ReorderController {
    pub fn new(well_id: WellId, stages: Vec<StageId>) -> Self {
        Self {
            well_id,
            rows: stages.clone(),
            confirmed: stages,
            drag: None,
            in_flight: None,
            pending_flush: false,
            settled: Settled::Loaded,
            indicator: SaveIndicator::Hidden,
            indicator_generation: 0,
        }
    }

    pub fn well_id(&self) -> WellId {
        self.well_id
    }

    /// Current visual order.
    pub fn rows(&self) -> &[StageId] {
        &self.rows
    }

    /// Last order the server acknowledged (or loaded).
    pub fn confirmed(&self) -> &[StageId] {
        &self.confirmed
    }

    pub fn indicator(&self) -> SaveIndicator {
        self.indicator
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn phase(&self) -> ReorderPhase {
        if let Some(drag) = &self.drag {
            return ReorderPhase::Dragging {
                stage_id: drag.stage_id,
            };
        }
        if self.in_flight.is_some() {
            return ReorderPhase::Saving;
        }
        match &self.settled {
            Settled::Loaded => ReorderPhase::Idle,
            Settled::Confirmed => ReorderPhase::Confirmed,
            Settled::Reverted(message) => ReorderPhase::Reverted {
                message: message.clone(),
            },
        }
    }

    /// Replaces the list with a fresh server listing. Refused while a save is
    /// outstanding or a row is being dragged.
    pub fn reload(&mut self, stages: Vec<StageId>) -> bool {
        if self.in_flight.is_some() || self.drag.is_some() {
            return false;
        }
        self.rows = stages.clone();
        self.confirmed = stages;
        self.pending_flush = false;
        true
    }

    pub fn drag_start(&mut self, stage_id: StageId) -> bool {
        if self.drag.is_some() || !self.rows.contains(&stage_id) {
            return false;
        }
        self.drag = Some(DragState {
            stage_id,
            snapshot: self.rows.clone(),
        });
        true
    }

    /// Moves the dragged row in front of the nearest sibling whose vertical
    /// midpoint is below `pointer_y`, or to the end if there is none.
    /// `siblings` are the rendered rows; the dragged row itself is ignored.
    /// Returns whether the visual order changed.
    pub fn drag_over(&mut self, pointer_y: f64, siblings: &[(StageId, RowBounds)]) -> bool {
        let Some(drag) = &self.drag else {
            return false;
        };
        let dragged = drag.stage_id;

        let before = siblings
            .iter()
            .filter(|(id, _)| *id != dragged)
            .map(|(id, bounds)| (*id, pointer_y - bounds.midpoint()))
            .filter(|(_, offset)| *offset < 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id);

        let mut next = self.rows.clone();
        next.retain(|id| *id != dragged);
        match before.and_then(|target| next.iter().position(|id| *id == target)) {
            Some(index) => next.insert(index, dragged),
            None => next.push(dragged),
        }

        if next == self.rows {
            return false;
        }
        self.rows = next;
        true
    }

    /// Ends the drag. Emits a save only if the order changed and no other save
    /// is outstanding; otherwise the new order is kept locally and flushed when
    /// the outstanding save succeeds.
    pub fn drag_end(&mut self) -> Option<ReorderCommand> {
        let drag = self.drag.take()?;
        let changed = self.rows != drag.snapshot;
        if !changed && !self.pending_flush {
            return None;
        }
        if self.in_flight.is_some() {
            self.pending_flush = true;
            return None;
        }

        let revert_to = if self.pending_flush {
            self.confirmed.clone()
        } else {
            drag.snapshot
        };
        self.pending_flush = false;
        if self.rows == self.confirmed {
            return None;
        }
        self.begin_save(revert_to)
    }

    /// Server acknowledged the outstanding save.
    pub fn save_succeeded(&mut self) -> Vec<ReorderCommand> {
        let Some(save) = self.in_flight.take() else {
            return Vec::new();
        };
        self.confirmed = save.submitted;
        self.settled = Settled::Confirmed;

        if self.pending_flush && self.drag.is_none() {
            self.pending_flush = false;
            if self.rows != self.confirmed {
                let revert_to = self.confirmed.clone();
                return self.begin_save(revert_to).into_iter().collect();
            }
        }

        self.indicator = SaveIndicator::Saved;
        self.indicator_generation += 1;
        vec![ReorderCommand::ClearIndicatorAfter {
            delay: SAVED_INDICATOR_TTL,
            generation: self.indicator_generation,
        }]
    }

    /// The outstanding save failed: restore the order shown before it and drop
    /// anything queued behind it. An active drag is cancelled.
    pub fn save_failed(&mut self, message: impl Into<String>) {
        let Some(save) = self.in_flight.take() else {
            return;
        };
        self.rows = save.revert_to;
        self.drag = None;
        self.pending_flush = false;
        self.indicator = SaveIndicator::Hidden;
        self.indicator_generation += 1;
        self.settled = Settled::Reverted(message.into());
    }

    /// Timer for the "saved" confirmation fired. Stale timers are ignored.
    pub fn indicator_expired(&mut self, generation: u64) {
        if generation == self.indicator_generation && self.indicator == SaveIndicator::Saved {
            self.indicator = SaveIndicator::Hidden;
        }
    }

    fn begin_save(&mut self, revert_to: Vec<StageId>) -> Option<ReorderCommand> {
        let order = StageOrder::new(self.rows.clone()).ok()?;
        self.in_flight = Some(InFlightSave {
            submitted: self.rows.clone(),
            revert_to,
        });
        self.indicator = SaveIndicator::Saving;
        self.indicator_generation += 1;
        Some(ReorderCommand::Save {
            well_id: self.well_id,
            order,
        })
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
