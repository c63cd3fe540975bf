//! Per-run outcome counters.

use std::collections::BTreeSet;

use citydb_core::DeprecatedEncoding;
use serde::Serialize;

use crate::error::OperationError;

/// First fault recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fault {
    pub object_id: Option<String>,
    pub batch: Option<usize>,
    pub message: String,
}

impl From<&OperationError> for Fault {
    fn from(err: &OperationError) -> Self {
        Self {
            object_id: err.object_id().map(str::to_string),
            batch: err.batch(),
            message: err.to_string(),
        }
    }
}

/// Summary of an import, export or delete run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    /// Objects written, exported or deleted.
    pub succeeded: usize,
    /// Objects that failed with a model or storage fault.
    pub failed: usize,
    /// Objects skipped because they already existed.
    pub skipped: usize,
    /// Batches flushed to the database.
    pub batches: usize,
    pub first_fault: Option<Fault>,
    #[serde(skip)]
    pub deprecated: BTreeSet<DeprecatedEncoding>,
}

impl OperationReport {
    pub(crate) fn record_failure(&mut self, err: &OperationError) {
        self.failed += 1;
        if self.first_fault.is_none() {
            self.first_fault = Some(Fault::from(err));
        }
    }

    /// Whether every processed object succeeded or was skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citydb_core::ModelError;

    #[test]
    fn keeps_only_the_first_fault() {
        let mut report = OperationReport::default();
        report.record_failure(&OperationError::model(
            "b-1",
            ModelError::UnknownFeatureType("x:Y".into()),
        ));
        report.record_failure(&OperationError::Cancelled);

        assert_eq!(report.failed, 2);
        assert!(!report.is_clean());
        let fault = report.first_fault.unwrap();
        assert_eq!(fault.object_id.as_deref(), Some("b-1"));
        assert_eq!(fault.batch, None);
    }
}
