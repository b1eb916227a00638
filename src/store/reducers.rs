//! Pure reducers over the domain maps.
//!
//! Each reducer takes the previous map by reference and returns a new map
//! with exactly the touched key replaced. No reducer performs IO, reads
//! the clock beyond the update's own timestamp, or computes derived
//! values; aggregation happens at read time in the portfolio module.

use std::collections::{HashMap, VecDeque};

use crate::domain::{
    AccountSummary, ExecutionReport, MarketDataSnapshot, MarketDataUpdate, Order, Position,
    PositionKey,
};

/// Newest-first execution history cap
pub const EXECUTION_BUFFER_CAP: usize = 100;

/// Merge one field update into the symbol's snapshot, creating the
/// snapshot on first sight. Untouched fields carry over unchanged.
pub fn merge_market_data(
    prev: &HashMap<String, MarketDataSnapshot>,
    update: &MarketDataUpdate,
) -> HashMap<String, MarketDataSnapshot> {
    let mut next = prev.clone();
    let snapshot = next
        .entry(update.symbol.clone())
        .or_insert_with(|| MarketDataSnapshot::new(update.symbol.clone()));
    snapshot.apply(update.field, update.value, update.timestamp);
    next
}

/// Upsert an order by id. Later updates replace earlier ones wholesale;
/// terminal orders stay in the map until explicitly pruned.
pub fn apply_order_update(prev: &HashMap<u64, Order>, order: Order) -> HashMap<u64, Order> {
    let mut next = prev.clone();
    next.insert(order.order_id, order);
    next
}

/// Upsert a position keyed by account and symbol. A zero-quantity update
/// still replaces the entry so a flattened position reads as flat.
pub fn apply_position_update(
    prev: &HashMap<PositionKey, Position>,
    position: Position,
) -> HashMap<PositionKey, Position> {
    let mut next = prev.clone();
    next.insert(position.key(), position);
    next
}

/// Replace the account summary wholesale
pub fn apply_account_update(
    _prev: &Option<AccountSummary>,
    account: AccountSummary,
) -> Option<AccountSummary> {
    Some(account)
}

/// Prepend an execution report, truncating the buffer to its cap
pub fn push_execution(
    prev: &VecDeque<ExecutionReport>,
    report: ExecutionReport,
) -> VecDeque<ExecutionReport> {
    let mut next = prev.clone();
    next.push_front(report);
    next.truncate(EXECUTION_BUFFER_CAP);
    next
}
