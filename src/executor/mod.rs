pub mod process;
pub mod types;

use crate::job::JobDescriptor;
use std::path::Path;

pub use types::{CancelToken, ExecutedJob, ExecutorError};

/// Runs one job to completion. Implementations must not return before the
/// report artifact (if any) is fully written.
pub trait Executor {
    fn execute(
        &self,
        job: &JobDescriptor,
        report_path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExecutedJob, ExecutorError>;
}

/// Splits `<module>::<entity>` on the last `::`. Identifiers without a
/// separator are treated as a bare module.
pub fn split_identifier(id: &str) -> (&str, &str) {
    match id.rsplit_once("::") {
        Some((module, entity)) => (module, entity),
        None => (id, ""),
    }
}
