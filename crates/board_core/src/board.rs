use std::sync::Arc;

use shared::{
    domain::{OrderId, OrderStatus},
    protocol::{ListQuery, OrderSortKey, SortOrder},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::client::OrderDataClient;
use crate::stages::{partition_stages, BoardStage, StageColumn};

/// Upper bound on how many orders one board view pulls per load.
pub const BOARD_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("order {order_id:?} is not in the {stage:?} column")]
    OrderNotInStage { order_id: OrderId, stage: BoardStage },
    #[error("a completed order re-enters the board through the new column")]
    UnsupportedTransition,
    #[error("{0}")]
    Load(String),
    #[error("{0}")]
    Sync(String),
}

#[derive(Debug, Clone)]
pub enum BoardEvent {
    Updated(BoardSnapshot),
    Error(String),
    OrderOpened(OrderId),
}

#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub columns: Vec<StageColumn>,
    pub loading: bool,
    pub refreshing: bool,
    pub last_error: Option<String>,
}

struct BoardState {
    columns: Vec<StageColumn>,
    loading: bool,
    refreshing: bool,
    last_error: Option<String>,
}

impl BoardState {
    fn slot(stage: BoardStage) -> usize {
        BoardStage::ALL
            .iter()
            .position(|s| *s == stage)
            .unwrap_or_default()
    }

    fn column(&self, stage: BoardStage) -> &StageColumn {
        &self.columns[Self::slot(stage)]
    }

    fn column_mut(&mut self, stage: BoardStage) -> &mut StageColumn {
        &mut self.columns[Self::slot(stage)]
    }
}

enum ServerAction {
    Complete,
    UpdateStatus(OrderStatus),
}

/// The single server call a cross-stage move maps to, or an error for the
/// one transition that has none.
fn server_action(from: BoardStage, to: BoardStage) -> Result<ServerAction, BoardError> {
    match (from, to) {
        (_, BoardStage::Completed) => Ok(ServerAction::Complete),
        (BoardStage::New, BoardStage::InProgress) => {
            Ok(ServerAction::UpdateStatus(OrderStatus::InProgress))
        }
        (_, BoardStage::New) => Ok(ServerAction::UpdateStatus(OrderStatus::New)),
        _ => Err(BoardError::UnsupportedTransition),
    }
}

/// Kanban view over the remote order collection. Holds the three stage
/// columns, applies drag moves optimistically, and reconciles with the
/// server by reloading. One reconciliation is assumed in flight at a time;
/// overlapping moves are not serialized, so the later reload wins.
pub struct BoardViewModel {
    orders: Arc<dyn OrderDataClient>,
    inner: Mutex<BoardState>,
    events: broadcast::Sender<BoardEvent>,
}

impl BoardViewModel {
    pub fn new(orders: Arc<dyn OrderDataClient>) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            orders,
            inner: Mutex::new(BoardState {
                columns: partition_stages(Vec::new()),
                loading: false,
                refreshing: false,
                last_error: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        let state = self.inner.lock().await;
        BoardSnapshot {
            columns: state.columns.clone(),
            loading: state.loading,
            refreshing: state.refreshing,
            last_error: state.last_error.clone(),
        }
    }

    /// Replaces all stage state from the server, all or nothing: a failed
    /// fetch leaves the previous good columns in place and surfaces a
    /// retryable error.
    pub async fn load(&self) -> Result<(), BoardError> {
        self.reload(false).await
    }

    pub async fn refresh(&self) -> Result<(), BoardError> {
        self.reload(true).await
    }

    /// Navigation hook for a host UI; the board itself does no routing.
    pub fn open_order(&self, order_id: OrderId) {
        let _ = self.events.send(BoardEvent::OrderOpened(order_id));
    }

    /// Applies a drag move. The reorder happens locally first so the UI
    /// reflects the drop immediately; cross-stage moves then issue exactly
    /// one server update and reconcile by reloading. A failed update is
    /// rolled back by the same reload rather than a targeted undo.
    pub async fn move_order(
        &self,
        order_id: OrderId,
        from: BoardStage,
        to: BoardStage,
        target_index: usize,
    ) -> Result<(), BoardError> {
        let action = if from == to {
            None
        } else {
            match server_action(from, to) {
                Ok(action) => Some(action),
                Err(err) => {
                    let _ = self.events.send(BoardEvent::Error(err.to_string()));
                    return Err(err);
                }
            }
        };

        {
            let mut state = self.inner.lock().await;
            let Some(source_index) = state
                .column(from)
                .orders
                .iter()
                .position(|o| o.order_id == order_id)
            else {
                let err = BoardError::OrderNotInStage { order_id, stage: from };
                let _ = self.events.send(BoardEvent::Error(err.to_string()));
                return Err(err);
            };

            if from == to {
                let last = state.column(from).orders.len() - 1;
                let target = target_index.min(last);
                if target == source_index {
                    return Ok(());
                }
                let order = state.column_mut(from).orders.remove(source_index);
                state.column_mut(from).orders.insert(target, order);
            } else {
                let mut order = state.column_mut(from).orders.remove(source_index);
                order.status = to.status();
                let target = target_index.min(state.column(to).orders.len());
                state.column_mut(to).orders.insert(target, order);
            }
        }
        self.emit_snapshot().await;

        let Some(action) = action else {
            // same-stage reorder is purely local and lost on the next load
            return Ok(());
        };

        let result = match action {
            ServerAction::Complete => self.orders.complete(order_id).await,
            ServerAction::UpdateStatus(status) => {
                self.orders.update_status(order_id, status).await
            }
        };

        match result {
            Ok(confirmed) => {
                info!(
                    order_id = order_id.0,
                    status = confirmed.status.as_str(),
                    "move confirmed, reconciling with server state"
                );
                // ground truth replaces the optimistic state, along with any
                // local edits made while the request was in flight
                self.reload(true).await
            }
            Err(err) => {
                let message = format!("failed to move order: {err}");
                warn!(order_id = order_id.0, %err, "move rejected, rolling back via reload");
                let _ = self.events.send(BoardEvent::Error(message.clone()));
                let _ = self.reload(true).await;
                Err(BoardError::Sync(message))
            }
        }
    }

    async fn reload(&self, refreshing: bool) -> Result<(), BoardError> {
        {
            let mut state = self.inner.lock().await;
            if refreshing {
                state.refreshing = true;
            } else {
                state.loading = true;
            }
        }
        self.emit_snapshot().await;

        let query = ListQuery {
            limit: Some(BOARD_PAGE_LIMIT),
            sort_by: Some(OrderSortKey::CreatedAt),
            sort_order: Some(SortOrder::Asc),
            ..Default::default()
        };
        let fetched = self.orders.list(&query).await;

        match fetched {
            Ok(response) => {
                {
                    let mut state = self.inner.lock().await;
                    state.loading = false;
                    state.refreshing = false;
                    state.columns = partition_stages(response.data);
                    state.last_error = None;
                }
                self.emit_snapshot().await;
                Ok(())
            }
            Err(err) => {
                let message = format!("failed to load orders: {err}");
                warn!(%err, "board load failed, keeping previous state");
                {
                    let mut state = self.inner.lock().await;
                    state.loading = false;
                    state.refreshing = false;
                    state.last_error = Some(message.clone());
                }
                let _ = self.events.send(BoardEvent::Error(message.clone()));
                self.emit_snapshot().await;
                Err(BoardError::Load(message))
            }
        }
    }

    async fn emit_snapshot(&self) {
        let snapshot = self.snapshot().await;
        let _ = self.events.send(BoardEvent::Updated(snapshot));
    }
}
