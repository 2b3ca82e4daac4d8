pub mod auth;
pub mod board;
pub mod client;
pub mod stages;

pub use auth::{AuthContext, AuthSession};
pub use board::{BoardError, BoardEvent, BoardSnapshot, BoardViewModel};
pub use client::{
    login, CustomerDataClient, HttpCustomerClient, HttpOrderClient, MissingCustomerClient,
    MissingOrderClient, OrderDataClient,
};
pub use stages::{partition_stages, BoardStage, StageColumn};

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
