//! Pipeline stage timings.
//!
//! Filled in by [`compose_document_verbose`] and returned with its details.
//! [`compose_document`] runs the same timed pipeline and drops them.
//!
//! [`compose_document_verbose`]: crate::compose_document_verbose
//! [`compose_document`]: crate::compose_document

use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StageMetrics {
    /// Total elapsed time for the request.
    pub total: Duration,
    /// Graph construction, cycle detection and ordering.
    pub resolve: Duration,
    /// Structural validation of the template's closure plus the post-merge
    /// budget pass.
    pub validate: Duration,
    pub merge: Duration,
    pub render: Duration,
    /// Documents in the template's closure, template included.
    pub documents: usize,
}

impl StageMetrics {
    /// Sum of the measured stages. Never larger than `total`.
    pub fn stages(&self) -> Duration {
        self.resolve + self.validate + self.merge + self.render
    }
}
