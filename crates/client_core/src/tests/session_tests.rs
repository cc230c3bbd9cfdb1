use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{error::ErrorCode, order::StageOrder};

use super::*;
use crate::{ReorderPhase, SaveIndicator};

struct FakeApi {
    stages: Mutex<Vec<i64>>,
    saves: Mutex<Vec<Vec<StageId>>>,
    results: Mutex<VecDeque<Result<(), ReorderClientError>>>,
}

impl FakeApi {
    fn new(stages: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            stages: Mutex::new(stages.to_vec()),
            saves: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
        })
    }

    fn fail_next(&self, err: ReorderClientError) {
        self.results.lock().expect("lock").push_back(Err(err));
    }

    fn set_stages(&self, stages: &[i64]) {
        *self.stages.lock().expect("lock") = stages.to_vec();
    }

    fn saves(&self) -> Vec<Vec<StageId>> {
        self.saves.lock().expect("lock").clone()
    }
}

#[async_trait]
impl StageOrderApi for FakeApi {
    async fn list_stages(&self, well_id: WellId) -> Result<Vec<StageSummary>, ReorderClientError> {
        let stages = self.stages.lock().expect("lock").clone();
        Ok(stages
            .into_iter()
            .enumerate()
            .map(|(index, id)| StageSummary {
                stage_id: StageId(id),
                well_id,
                stage_name: Some(format!("stage {id}")),
                pipe: None,
                drill_time: None,
                stage_change: None,
                progress: "In progress".into(),
                position: index as i64 + 1,
                updated_at: Utc::now(),
            })
            .collect())
    }

    async fn save_order(
        &self,
        _well_id: WellId,
        order: &StageOrder,
    ) -> Result<(), ReorderClientError> {
        self.saves.lock().expect("lock").push(order.ids().to_vec());
        self.results
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

fn ids(raw: &[i64]) -> Vec<StageId> {
    raw.iter().copied().map(StageId).collect()
}

fn layout(session: &ReorderSession) -> Vec<(StageId, RowBounds)> {
    session
        .controller()
        .rows()
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, RowBounds::new(index as f64 * 40.0, 40.0)))
        .collect()
}

/// Drags `stage_id` above every other row.
fn drag_to_top(session: &mut ReorderSession, stage_id: i64) {
    assert!(session.drag_start(StageId(stage_id)));
    let rows = layout(session);
    session.drag_over(-100.0, &rows);
    session.drag_end();
}

#[tokio::test(start_paused = true)]
async fn saved_order_is_confirmed_and_indicator_clears() {
    let api = FakeApi::new(&[1, 2, 3]);
    let mut session = ReorderSession::load(api.clone(), WellId(4))
        .await
        .expect("load");
    assert_eq!(session.controller().rows(), ids(&[1, 2, 3]).as_slice());

    drag_to_top(&mut session, 3);
    assert_eq!(session.controller().indicator(), SaveIndicator::Saving);
    session.settle().await;

    assert_eq!(api.saves(), vec![ids(&[3, 1, 2])]);
    assert_eq!(session.controller().phase(), ReorderPhase::Confirmed);
    assert_eq!(session.controller().indicator(), SaveIndicator::Saved);

    let event = session.next_event().await.expect("timer event");
    assert!(matches!(event, SessionEvent::IndicatorExpired { .. }));
    session.handle(event);
    assert_eq!(session.controller().indicator(), SaveIndicator::Hidden);
}

#[tokio::test]
async fn conflict_reverts_then_reloads_server_order() {
    let api = FakeApi::new(&[1, 2, 3]);
    let mut session = ReorderSession::load(api.clone(), WellId(4))
        .await
        .expect("load");

    // Stage 2 is deleted elsewhere before the save lands.
    api.set_stages(&[1, 3]);
    api.fail_next(ReorderClientError::Rejected {
        status: 409,
        code: ErrorCode::Conflict,
        message: "stage order is out of date".into(),
    });

    drag_to_top(&mut session, 3);
    let event = session.next_event().await.expect("save result");
    session.handle(event);
    assert_eq!(session.controller().rows(), ids(&[1, 2, 3]).as_slice());
    assert_eq!(
        session.controller().phase(),
        ReorderPhase::Reverted {
            message: "stage order is out of date".into()
        }
    );

    session.settle().await;
    assert_eq!(session.controller().rows(), ids(&[1, 3]).as_slice());
    assert_eq!(session.controller().confirmed(), ids(&[1, 3]).as_slice());
}

#[tokio::test]
async fn server_failure_reverts_with_its_message() {
    let api = FakeApi::new(&[1, 2]);
    let mut session = ReorderSession::load(api.clone(), WellId(4))
        .await
        .expect("load");
    api.fail_next(ReorderClientError::Rejected {
        status: 500,
        code: ErrorCode::Internal,
        message: "could not save stage order; please retry".into(),
    });

    drag_to_top(&mut session, 2);
    session.settle().await;

    assert_eq!(session.controller().rows(), ids(&[1, 2]).as_slice());
    assert_eq!(
        session.controller().phase(),
        ReorderPhase::Reverted {
            message: "could not save stage order; please retry".into()
        }
    );
    assert_eq!(session.controller().indicator(), SaveIndicator::Hidden);
}

#[tokio::test]
async fn drag_while_saving_sends_one_follow_up() {
    let api = FakeApi::new(&[1, 2, 3]);
    let mut session = ReorderSession::load(api.clone(), WellId(4))
        .await
        .expect("load");

    drag_to_top(&mut session, 3);
    // The first save's result has not been handled yet.
    drag_to_top(&mut session, 2);
    assert!(session.controller().is_saving());

    session.settle().await;
    assert_eq!(api.saves(), vec![ids(&[3, 1, 2]), ids(&[2, 3, 1])]);
    assert_eq!(session.controller().confirmed(), ids(&[2, 3, 1]).as_slice());
    assert_eq!(session.controller().phase(), ReorderPhase::Confirmed);
}

#[tokio::test]
async fn listing_that_lands_mid_drag_waits_for_the_drop() {
    let api = FakeApi::new(&[1, 2, 3]);
    let mut session = ReorderSession::load(api.clone(), WellId(4))
        .await
        .expect("load");
    api.set_stages(&[1, 3]);
    api.fail_next(ReorderClientError::Rejected {
        status: 409,
        code: ErrorCode::Conflict,
        message: "stage order is out of date".into(),
    });

    drag_to_top(&mut session, 3);
    let event = session.next_event().await.expect("save result");
    session.handle(event);

    // The user picks up a row before the re-fetch lands.
    assert!(session.drag_start(StageId(1)));
    let event = session.next_event().await.expect("reload result");
    assert!(matches!(event, SessionEvent::Reloaded(_)));
    session.handle(event);
    assert_eq!(
        session.controller().phase(),
        ReorderPhase::Dragging { stage_id: StageId(1) }
    );
    assert_eq!(session.controller().rows(), ids(&[1, 2, 3]).as_slice());

    session.drag_end();
    assert_eq!(session.controller().rows(), ids(&[1, 3]).as_slice());
    assert_eq!(api.saves().len(), 1);
}
