//! Serial (receiver) capture pipeline.
//!
//! Pulls bytes from a [`ByteSource`], feeds them to a [`StreamFramer`] and
//! collects the framed messages until the source ends, stalls, errors, the
//! deadline passes or the session is cancelled. Whatever the reason, pending
//! framer state is flushed before the report is returned.

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error_handling::types::SourceError;

use super::byte_source::ByteSource;
use super::framer::StreamFramer;
use super::types::{
    CaptureEpoch, Clock, Message, MessageFamily, PipelineReport, PipelineStatus, SystemClock,
};

/// Empty reads tolerated before a receiver is considered stalled.
pub const DEFAULT_STALL_THRESHOLD: u64 = 500_000;

/// Counts consecutive empty reads to detect a silent source.
#[derive(Debug, Clone)]
pub struct StallDetector {
    threshold: u64,
    empty_reads: u64,
}

impl StallDetector {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            empty_reads: 0,
        }
    }

    /// Records an empty read; returns `true` once the count exceeds the
    /// threshold.
    pub fn record_empty(&mut self) -> bool {
        self.empty_reads = self.empty_reads.saturating_add(1);
        self.empty_reads > self.threshold
    }

    pub fn record_byte(&mut self) {
        self.empty_reads = 0;
    }

    pub fn empty_reads(&self) -> u64 {
        self.empty_reads
    }
}

pub struct SerialCapture<S: ByteSource, C: Clock = SystemClock> {
    session_id: Uuid,
    source: S,
    framer: StreamFramer<C>,
    stall: StallDetector,
}

impl<S: ByteSource> SerialCapture<S, SystemClock> {
    pub fn new(session_id: Uuid, source: S, epoch: CaptureEpoch, stall_threshold: u64) -> Self {
        Self::with_framer(session_id, source, StreamFramer::new(epoch), stall_threshold)
    }
}

impl<S: ByteSource, C: Clock> SerialCapture<S, C> {
    pub fn with_framer(
        session_id: Uuid,
        source: S,
        framer: StreamFramer<C>,
        stall_threshold: u64,
    ) -> Self {
        Self {
            session_id,
            source,
            framer,
            stall: StallDetector::new(stall_threshold),
        }
    }

    /// Runs the capture loop to completion on the calling thread.
    pub fn run(
        mut self,
        cancel: &CancellationToken,
        deadline: Option<DateTime<Utc>>,
    ) -> PipelineReport<Message> {
        info!("[{}] Recording GNSS...", self.session_id);
        let mut messages = Vec::new();

        let status = loop {
            if cancel.is_cancelled() {
                debug!("[{}] serial capture cancelled", self.session_id);
                break PipelineStatus::Cancelled;
            }

            match self.source.read_byte() {
                Ok(Some(byte)) => {
                    self.stall.record_byte();
                    if let Some(msg) = self.framer.feed(byte) {
                        self.trace_message(&msg);
                        messages.push(msg);
                    }
                }
                Ok(None) => {
                    if self.stall.record_empty() {
                        error!(
                            "[{}] Serial stopped sending data after {} empty reads",
                            self.session_id,
                            self.stall.empty_reads()
                        );
                        break PipelineStatus::Faulted(format!(
                            "receiver stalled ({} consecutive empty reads)",
                            self.stall.empty_reads()
                        ));
                    }
                }
                Err(SourceError::Closed) => {
                    info!("[{}] serial source exhausted", self.session_id);
                    break PipelineStatus::Completed;
                }
                Err(e) => {
                    error!("[{}] serial source failed: {}", self.session_id, e);
                    break PipelineStatus::Faulted(e.to_string());
                }
            }

            if deadline.is_some_and(|d| Utc::now() > d) {
                info!("[{}] serial capture reached its deadline", self.session_id);
                break PipelineStatus::Completed;
            }
        };

        if let Some(tail) = self.framer.finish() {
            self.trace_message(&tail);
            messages.push(tail);
        }

        info!(
            "[{}] serial capture finished: {} message(s), status={:?}",
            self.session_id,
            messages.len(),
            status
        );
        PipelineReport {
            records: messages,
            status,
        }
    }

    fn trace_message(&self, msg: &Message) {
        let preview = &msg.payload()[..std::cmp::min(msg.payload().len(), 64)];
        match msg.family() {
            MessageFamily::Text => trace!(
                "[{}] {} {}",
                self.session_id,
                msg.family(),
                String::from_utf8_lossy(preview).trim_end()
            ),
            _ => trace!(
                "[{}] {} {} byte(s): {}{}",
                self.session_id,
                msg.family(),
                msg.payload().len(),
                hex::encode(preview),
                if msg.payload().len() > 64 { " ..." } else { "" }
            ),
        }
    }
}
