//! Bounded counters for review/fix cycles.

use serde::Serialize;

/// Remaining review→fix cycles for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryBudget {
    remaining: u32,
    spent: u32,
}

impl RetryBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            remaining: limit,
            spent: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn spent(&self) -> u32 {
        self.spent
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Consume one unit. Returns `false` when nothing was left.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.spent += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_until_exhausted() {
        let mut budget = RetryBudget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert!(budget.is_exhausted());
        assert_eq!(budget.spent(), 2);
    }

    #[test]
    fn zero_budget_starts_exhausted() {
        let mut budget = RetryBudget::new(0);
        assert!(budget.is_exhausted());
        assert!(!budget.try_consume());
        assert_eq!(budget.spent(), 0);
    }
}
