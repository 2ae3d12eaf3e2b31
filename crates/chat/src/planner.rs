//! Token budget planning.
//!
//! Decides which ordered candidates fit a prompt. Candidates arrive most
//! relevant first and the plan is always a prefix of them: a candidate that
//! does not fit ends the scan, even if a later, smaller one would fit.

/// Greedy, order-preserving budget planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudgetPlanner {
    ceiling: usize,
}

/// The outcome of planning one list of candidates.
#[derive(Debug, PartialEq, Eq)]
pub struct PromptPlan<'a, T> {
    /// The included candidates: a prefix of the input, in order.
    pub included: &'a [T],
    /// Budget left after the included candidates.
    pub remaining: usize,
    /// Whether scanning stopped before the candidates were exhausted.
    pub truncated: bool,
}

impl<T> PromptPlan<'_, T> {
    /// Budget consumed by the included candidates.
    pub fn used(&self, available: usize) -> usize {
        available.saturating_sub(self.remaining)
    }

    /// Candidates existed but none could be included.
    pub fn is_degraded(&self) -> bool {
        self.included.is_empty() && self.truncated
    }
}

impl TokenBudgetPlanner {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Budget available once `reserved` tokens are set aside. Never underflows.
    pub fn available(&self, reserved: usize) -> usize {
        self.ceiling.saturating_sub(reserved)
    }

    /// Select the longest prefix of `candidates` whose marginal costs fit in
    /// `ceiling - reserved`.
    ///
    /// `cost` returns the exact marginal cost of inserting one candidate,
    /// separator overhead included. It is called at most once per candidate,
    /// in order.
    pub fn plan<'a, T>(
        &self,
        candidates: &'a [T],
        reserved: usize,
        mut cost: impl FnMut(&T) -> usize,
    ) -> PromptPlan<'a, T> {
        let mut remaining = self.available(reserved);
        let mut taken = 0;

        for candidate in candidates {
            if remaining == 0 {
                break;
            }
            let marginal = cost(candidate);
            if marginal > remaining {
                break;
            }
            remaining -= marginal;
            taken += 1;
        }

        PromptPlan {
            included: &candidates[..taken],
            remaining,
            truncated: taken < candidates.len(),
        }
    }
}
