//! Per-job outcome of a pool batch

use crate::error::{PrwatchError, Result};

/// Result of one job, tagged with its position in the submitted batch
#[derive(Debug)]
pub struct BatchResult<T> {
    /// Index of the input this result belongs to
    pub index: usize,
    pub result: Result<T>,
}

impl<T> BatchResult<T> {
    pub fn new(index: usize, result: Result<T>) -> Self {
        Self { index, result }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&PrwatchError> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T> {
        self.result
    }
}
