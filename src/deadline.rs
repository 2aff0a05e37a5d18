use std::time::Duration;

use tokio::time::Instant;

/// Request-scoped time budget.
///
/// Created once per facade request; every suspension point derives its own
/// timeout from the remainder, so one slow collaborator cannot spend the
/// budget of those after it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn within(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    /// The budget this deadline started with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Bounds a per-step timeout by the remaining budget.
    pub fn clamp(&self, step: Duration) -> Duration {
        step.min(self.remaining())
    }
}
