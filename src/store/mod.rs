//! Domain state store.
//!
//! Copy-on-write maps behind `RwLock<Arc<..>>`: readers clone an `Arc` and
//! iterate without blocking writers, writers build the next map through a
//! pure reducer and swap the `Arc` in. Selectors return point-in-time
//! snapshots; derived values are never stored here.

pub mod reducers;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use crate::domain::{
    AccountSummary, ExecutionReport, MarketDataSnapshot, MarketDataUpdate, Order, Position,
    PositionKey,
};

pub use reducers::EXECUTION_BUFFER_CAP;

type Shared<T> = RwLock<Arc<T>>;

#[derive(Default)]
pub struct DomainStore {
    market_data: Shared<HashMap<String, MarketDataSnapshot>>,
    orders: Shared<HashMap<u64, Order>>,
    positions: Shared<HashMap<PositionKey, Position>>,
    account: Shared<Option<AccountSummary>>,
    executions: Shared<VecDeque<ExecutionReport>>,
}

// A poisoned lock only means a panic elsewhere mid-swap; the Arc inside is
// still a complete snapshot, so recover it instead of propagating.
fn read<T>(lock: &Shared<T>) -> Arc<T> {
    lock.read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

fn swap<T>(lock: &Shared<T>, next: T) {
    let mut guard = lock.write().unwrap_or_else(|e| e.into_inner());
    *guard = Arc::new(next);
}

impl DomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- mutations, one reducer application per push ---

    pub fn handle_market_data(&self, update: &MarketDataUpdate) {
        let prev = read(&self.market_data);
        swap(&self.market_data, reducers::merge_market_data(&prev, update));
    }

    pub fn handle_order_update(&self, order: Order) {
        let prev = read(&self.orders);
        swap(&self.orders, reducers::apply_order_update(&prev, order));
    }

    pub fn handle_position_update(&self, position: Position) {
        let prev = read(&self.positions);
        swap(
            &self.positions,
            reducers::apply_position_update(&prev, position),
        );
    }

    pub fn handle_account_update(&self, account: AccountSummary) {
        let prev = read(&self.account);
        swap(&self.account, reducers::apply_account_update(&prev, account));
    }

    pub fn handle_execution(&self, report: ExecutionReport) {
        let prev = read(&self.executions);
        swap(&self.executions, reducers::push_execution(&prev, report));
    }

    /// Drop all live data, e.g. on logout. Session metadata lives
    /// elsewhere and is not affected.
    pub fn reset(&self) {
        swap(&self.market_data, HashMap::new());
        swap(&self.orders, HashMap::new());
        swap(&self.positions, HashMap::new());
        swap(&self.account, None);
        swap(&self.executions, VecDeque::new());
    }

    // --- selectors, point-in-time snapshots ---

    pub fn market_data(&self, symbol: &str) -> Option<MarketDataSnapshot> {
        read(&self.market_data).get(symbol).cloned()
    }

    pub fn market_data_map(&self) -> Arc<HashMap<String, MarketDataSnapshot>> {
        read(&self.market_data)
    }

    pub fn order(&self, order_id: u64) -> Option<Order> {
        read(&self.orders).get(&order_id).cloned()
    }

    pub fn orders_map(&self) -> Arc<HashMap<u64, Order>> {
        read(&self.orders)
    }

    /// Orders not yet in a terminal status; iteration order unspecified
    pub fn active_orders(&self) -> Vec<Order> {
        read(&self.orders)
            .values()
            .filter(|o| o.status.is_active())
            .cloned()
            .collect()
    }

    pub fn position(&self, key: &PositionKey) -> Option<Position> {
        read(&self.positions).get(key).cloned()
    }

    pub fn positions_map(&self) -> Arc<HashMap<PositionKey, Position>> {
        read(&self.positions)
    }

    pub fn account_summary(&self) -> Option<AccountSummary> {
        (*read(&self.account)).clone()
    }

    /// Executions newest first, at most [`EXECUTION_BUFFER_CAP`]
    pub fn executions(&self) -> Vec<ExecutionReport> {
        read(&self.executions).iter().cloned().collect()
    }
}
