//! Finite-state transitions of the generate/execute/evaluate loop.
//!
//! The transition function is pure: the loop driver performs each state's
//! side effects and asks [`next_state`] where to go.

/// Why the loop reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The last execution produced no stderr.
    Succeeded,
    /// Every allowed iteration failed.
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Generate,
    Execute,
    Evaluate,
    Finalize(Verdict),
}

/// Facts the transition function is allowed to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    pub has_error: bool,
    /// Number of completed `Generate` entries.
    pub iteration: u32,
    pub max_iterations: u32,
}

/// Compute the state following `state`.
///
/// `Evaluate` moves back to `Generate` only while `iteration < max_iterations`,
/// which bounds the loop to `max_iterations` generate/execute cycles.
pub fn next_state(state: LoopState, signals: Signals) -> LoopState {
    match state {
        LoopState::Generate => LoopState::Execute,
        LoopState::Execute => LoopState::Evaluate,
        LoopState::Evaluate => evaluate(signals),
        LoopState::Finalize(verdict) => LoopState::Finalize(verdict),
    }
}

fn evaluate(signals: Signals) -> LoopState {
    if !signals.has_error {
        LoopState::Finalize(Verdict::Succeeded)
    } else if signals.iteration >= signals.max_iterations {
        LoopState::Finalize(Verdict::BudgetExhausted)
    } else {
        LoopState::Generate
    }
}
