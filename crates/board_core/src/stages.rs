use shared::{domain::OrderStatus, protocol::OrderPayload};

/// The three board columns. Paused and cancelled orders exist in the order
/// collection but are never rendered on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardStage {
    New,
    InProgress,
    Completed,
}

impl BoardStage {
    pub const ALL: [BoardStage; 3] = [
        BoardStage::New,
        BoardStage::InProgress,
        BoardStage::Completed,
    ];

    pub fn status(self) -> OrderStatus {
        match self {
            BoardStage::New => OrderStatus::New,
            BoardStage::InProgress => OrderStatus::InProgress,
            BoardStage::Completed => OrderStatus::Completed,
        }
    }

    pub fn from_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::New => Some(BoardStage::New),
            OrderStatus::InProgress => Some(BoardStage::InProgress),
            OrderStatus::Completed => Some(BoardStage::Completed),
            OrderStatus::Paused | OrderStatus::Cancelled => None,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            BoardStage::New => "New",
            BoardStage::InProgress => "In progress",
            BoardStage::Completed => "Completed",
        }
    }

    pub fn color_hex(self) -> &'static str {
        match self {
            BoardStage::New => "#3b82f6",
            BoardStage::InProgress => "#f59e0b",
            BoardStage::Completed => "#22c55e",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageColumn {
    pub stage: BoardStage,
    pub orders: Vec<OrderPayload>,
}

impl StageColumn {
    fn empty(stage: BoardStage) -> Self {
        Self {
            stage,
            orders: Vec::new(),
        }
    }
}

/// Groups a flat order collection into the three board columns, preserving
/// the server-given relative order within each status. Orders outside the
/// tracked statuses are dropped.
pub fn partition_stages(orders: Vec<OrderPayload>) -> Vec<StageColumn> {
    let mut columns: Vec<StageColumn> = BoardStage::ALL
        .into_iter()
        .map(StageColumn::empty)
        .collect();

    for order in orders {
        if let Some(stage) = BoardStage::from_status(order.status) {
            let slot = BoardStage::ALL
                .iter()
                .position(|s| *s == stage)
                .unwrap_or_default();
            columns[slot].orders.push(order);
        }
    }

    columns
}
