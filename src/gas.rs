//! Block gas budget.

use crate::error::GasPoolError;

/// Tracks the gas still available to transactions in the block being sealed.
///
/// Seeded once from the header gas limit. The counter can only shrink by the gas a
/// transaction actually used: the full limit is reserved up front and the unused part is
/// handed back after execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GasPool {
    gas: u64,
}

impl GasPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `amount` gas available for execution.
    pub fn add_gas(&mut self, amount: u64) -> &mut Self {
        self.gas = self.gas.saturating_add(amount);
        self
    }

    /// Reserves `amount` gas, failing without change when not enough is left.
    pub fn sub_gas(&mut self, amount: u64) -> Result<(), GasPoolError> {
        if self.gas < amount {
            return Err(GasPoolError::GasLimitReached { requested: amount, available: self.gas });
        }
        self.gas -= amount;
        Ok(())
    }

    /// Remaining gas.
    pub fn gas(&self) -> u64 {
        self.gas
    }

    /// Whether a transaction costing `minimum` could still fit.
    pub fn covers(&self, minimum: u64) -> bool {
        self.gas >= minimum
    }
}
