//! Open order state container.

use super::OpenOrder;
use crate::shared::OrderId;
use std::collections::HashMap;

/// Open orders of one market keyed by order id.
#[derive(Debug, Clone, Default)]
pub struct OpenOrders {
    orders: HashMap<OrderId, OpenOrder>,
}

impl OpenOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &OrderId) -> Option<&OpenOrder> {
        self.orders.get(id)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.orders.contains_key(id)
    }

    /// Insert or update an order. Returns `true` if the id was new.
    pub fn upsert(&mut self, order: OpenOrder) -> bool {
        self.orders.insert(order.order_id.clone(), order).is_none()
    }

    /// Remove by id. `None` when no such order is tracked.
    pub fn remove(&mut self, id: &OrderId) -> Option<OpenOrder> {
        self.orders.remove(id)
    }

    /// Reconcile against a full snapshot. Returns the ids that were dropped
    /// because the snapshot no longer lists them, and the ids that are new.
    pub fn reconcile(&mut self, snapshot: Vec<OpenOrder>) -> (Vec<OrderId>, Vec<OrderId>) {
        let incoming: HashMap<OrderId, OpenOrder> = snapshot
            .into_iter()
            .map(|o| (o.order_id.clone(), o))
            .collect();

        let mut removed: Vec<OrderId> = self
            .orders
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        removed.sort();

        let mut added: Vec<OrderId> = incoming
            .keys()
            .filter(|id| !self.orders.contains_key(*id))
            .cloned()
            .collect();
        added.sort();

        self.orders = incoming;
        (removed, added)
    }

    /// Orders sorted by id, for stable presentation.
    pub fn to_vec(&self) -> Vec<OpenOrder> {
        let mut out: Vec<OpenOrder> = self.orders.values().cloned().collect();
        out.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        out
    }

    pub fn clear(&mut self) {
        self.orders.clear();
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
