//! Batch execution options.

use serde::{Deserialize, Serialize};

/// How a batch of calls is executed.
///
/// `ignore_failures: false` stops the batch at the first failed call and
/// cancels the rest; `true` lets every call run to its own resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExecutionOption {
    /// One call at a time, each fully resolved before the next starts.
    Sequential { ignore_failures: bool },
    /// All calls dispatched concurrently.
    Parallel { ignore_failures: bool },
}

impl ExecutionOption {
    pub fn ignores_failures(self) -> bool {
        match self {
            ExecutionOption::Sequential { ignore_failures }
            | ExecutionOption::Parallel { ignore_failures } => ignore_failures,
        }
    }

    pub fn is_parallel(self) -> bool {
        matches!(self, ExecutionOption::Parallel { .. })
    }
}

impl Default for ExecutionOption {
    fn default() -> Self {
        ExecutionOption::Parallel {
            ignore_failures: false,
        }
    }
}
