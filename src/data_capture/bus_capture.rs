//! Vehicle bus capture pipeline.
//!
//! Receives frames from a [`FrameSource`], keeps only identifiers the
//! [`DecodeTable`] knows about, decodes them into named signal values and
//! timestamps them against the session epoch.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error_handling::types::{DecodeError, SourceError};

use super::types::{BusFrame, BusRecord, CaptureEpoch, PipelineReport, PipelineStatus};

/// How long the bus may stay silent before capture ends.
pub const DEFAULT_BUS_WAIT: Duration = Duration::from_secs(200);
/// Upper bound on a single receive, so cancellation is observed promptly.
pub const DEFAULT_BUS_POLL: Duration = Duration::from_millis(100);

/// Blocking frame reader.
///
/// `Ok(None)` means no frame arrived within `wait`.
pub trait FrameSource: Send {
    fn recv(&mut self, wait: Duration) -> Result<Option<BusFrame>, SourceError>;
}

impl<F: FrameSource + ?Sized> FrameSource for Box<F> {
    fn recv(&mut self, wait: Duration) -> Result<Option<BusFrame>, SourceError> {
        (**self).recv(wait)
    }
}

/// Lookup from frame identifier + payload to named signal values.
pub trait DecodeTable: Send + Sync {
    /// Identifiers this table can decode.
    fn known_ids(&self) -> HashSet<u32>;

    fn decode(&self, frame_id: u32, data: &[u8]) -> Result<BTreeMap<String, f64>, DecodeError>;
}

pub struct BusCapture<F: FrameSource> {
    session_id: Uuid,
    source: F,
    table: Arc<dyn DecodeTable>,
    known_ids: HashSet<u32>,
    epoch: CaptureEpoch,
    poll: Duration,
    max_idle: Duration,
}

impl<F: FrameSource> BusCapture<F> {
    pub fn new(
        session_id: Uuid,
        source: F,
        table: Arc<dyn DecodeTable>,
        epoch: CaptureEpoch,
    ) -> Self {
        let known_ids = table.known_ids();
        debug!("[{}] bus capture knows {} identifier(s)", session_id, known_ids.len());
        Self {
            session_id,
            source,
            table,
            known_ids,
            epoch,
            poll: DEFAULT_BUS_POLL,
            max_idle: DEFAULT_BUS_WAIT,
        }
    }

    /// Overrides the silence limit and the per-receive poll interval.
    pub fn with_wait(mut self, max_idle: Duration, poll: Duration) -> Self {
        self.max_idle = max_idle;
        self.poll = poll.min(max_idle).max(Duration::from_millis(1));
        self
    }

    pub fn run(
        mut self,
        cancel: &CancellationToken,
        deadline: Option<DateTime<Utc>>,
    ) -> PipelineReport<BusRecord> {
        info!("[{}] Reading CAN bus...", self.session_id);
        let mut records = Vec::new();
        let mut last_frame = Instant::now();

        let status = loop {
            if cancel.is_cancelled() {
                debug!("[{}] bus capture cancelled", self.session_id);
                break PipelineStatus::Cancelled;
            }

            match self.source.recv(self.poll) {
                Ok(Some(frame)) => {
                    last_frame = Instant::now();
                    if let Some(record) = self.process(frame) {
                        records.push(record);
                    }
                }
                Ok(None) => {
                    if last_frame.elapsed() >= self.max_idle {
                        info!(
                            "[{}] Expired waiting time for CAN bus messages ({:?})",
                            self.session_id, self.max_idle
                        );
                        break PipelineStatus::Completed;
                    }
                }
                Err(SourceError::Closed) => {
                    info!("[{}] bus source exhausted", self.session_id);
                    break PipelineStatus::Completed;
                }
                Err(e) => {
                    error!("[{}] An error occurred in reading CAN bus: {}", self.session_id, e);
                    break PipelineStatus::Faulted(e.to_string());
                }
            }

            if deadline.is_some_and(|d| Utc::now() > d) {
                info!("[{}] bus capture reached its deadline", self.session_id);
                break PipelineStatus::Completed;
            }
        };

        info!(
            "[{}] bus capture finished: {} record(s), status={:?}",
            self.session_id,
            records.len(),
            status
        );
        PipelineReport { records, status }
    }

    fn process(&self, frame: BusFrame) -> Option<BusRecord> {
        if !self.known_ids.contains(&frame.arbitration_id) {
            trace!(
                "[{}] skipping unknown frame {:#x}",
                self.session_id,
                frame.arbitration_id
            );
            return None;
        }
        let signals = match self.table.decode(frame.arbitration_id, &frame.data) {
            Ok(signals) => signals,
            Err(e) => {
                warn!("[{}] dropping frame: {}", self.session_id, e);
                return None;
            }
        };
        let received = frame.device_timestamp.unwrap_or_else(Utc::now);
        Some(BusRecord {
            timestamp: self.epoch.offset_micros(received),
            arbitration_id: frame.arbitration_id,
            signals,
        })
    }
}
