//! Resource consumption while a joint is driven.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ElectricCharge,
}

/// Supplies resources requested by running sessions.
pub trait ResourceProvider: Send {
    /// Consume up to `amount` and return what was actually delivered.
    fn consume(&mut self, kind: ResourceKind, amount: f64) -> f64;
}

/// Provider that never runs dry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl ResourceProvider for Unlimited {
    fn consume(&mut self, _kind: ResourceKind, amount: f64) -> f64 {
        amount
    }
}

/// Finite stock per resource kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePool {
    amounts: HashMap<ResourceKind, f64>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ResourceKind, amount: f64) -> Self {
        self.amounts.insert(kind, amount);
        self
    }

    pub fn amount(&self, kind: ResourceKind) -> f64 {
        self.amounts.get(&kind).copied().unwrap_or(0.0)
    }

    pub fn refill(&mut self, kind: ResourceKind, amount: f64) {
        *self.amounts.entry(kind).or_insert(0.0) += amount;
    }
}

impl ResourceProvider for ResourcePool {
    fn consume(&mut self, kind: ResourceKind, amount: f64) -> f64 {
        let stock = self.amounts.entry(kind).or_insert(0.0);
        let delivered = amount.min(*stock).max(0.0);
        *stock -= delivered;
        delivered
    }
}
