//! Wall-clock timing for user-initiated operations.

use std::time::{Duration, Instant};

pub const SLOW_OPERATION: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct OperationTimer {
    operation: &'static str,
    started: Instant,
}

impl OperationTimer {
    #[must_use]
    pub fn start(operation: &'static str) -> Self {
        Self { operation, started: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log completion, warning when the operation ran longer than [`SLOW_OPERATION`].
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::info!(
            operation = self.operation,
            elapsed_ms = millis(elapsed),
            "operation completed"
        );
        if elapsed > SLOW_OPERATION {
            tracing::warn!(
                operation = self.operation,
                elapsed_ms = millis(elapsed),
                "slow operation"
            );
        }
        elapsed
    }

    pub fn fail(self, error: &dyn std::fmt::Display) -> Duration {
        let elapsed = self.elapsed();
        tracing::error!(
            operation = self.operation,
            elapsed_ms = millis(elapsed),
            "operation failed: {error}"
        );
        elapsed
    }

    /// Finish or fail depending on `result`, passing it through.
    pub fn record<T, E: std::fmt::Display>(self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => {
                self.finish();
            }
            Err(err) => {
                self.fail(err);
            }
        }
        result
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
