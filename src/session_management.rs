//! Session management core module.
//!
//! This module provides the capture session lifecycle: the session state
//! machine, cancellation shared with the capture workers, and the
//! orchestrator that runs both pipelines.

use crate::data_capture::types::PipelineStatus;

/// Submodule for the capture session orchestrator.
pub mod capture_session;

/// Lifecycle state of a capture session.
///
/// Variants:
/// - `Idle`: created, nothing started yet.
/// - `Running`: pipelines are capturing.
/// - `Completed`: every pipeline ended normally.
/// - `Cancelled`: at least one pipeline stopped on cancellation.
/// - `Faulted`: at least one pipeline hit a source error or stalled.
/// - `Closed`: records handed to the sink, resources released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Faulted,
    Closed,
}

impl SessionState {
    /// Terminal state for a set of pipeline results. A fault outranks a
    /// cancellation, which outranks normal completion.
    pub fn from_statuses<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a PipelineStatus>,
    {
        statuses
            .into_iter()
            .fold(SessionState::Completed, |acc, status| match (acc, status) {
                (SessionState::Faulted, _) | (_, PipelineStatus::Faulted(_)) => {
                    SessionState::Faulted
                }
                (_, PipelineStatus::Cancelled) => SessionState::Cancelled,
                (acc, PipelineStatus::Completed) => acc,
            })
    }
}
