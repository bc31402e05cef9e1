//! Capture session orchestration.
//!
//! A [`CaptureSession`] runs the receiver pipeline and the bus pipeline side
//! by side for one recording, then hands each pipeline's records to a
//! [`RecordSink`].
//!
//! ```text
//!  Idle ──start──▶ Running ──▶ Completed ─┐
//!                          ├─▶ Cancelled ─┼─persist──▶ Closed
//!                          └─▶ Faulted  ──┘
//! ```
//!
//! Each pipeline runs on tokio's blocking pool and owns all of its working
//! state. The only things shared with the session are the
//! [`CancellationToken`] and the read-only deadline; records move back to the
//! session through the join handle when a pipeline returns.
//!
//! Minimal usage
//! ```no_run
//! use std::io::Cursor;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use fieldrec::session_management::capture_session::{CaptureSession, SerialPipeline};
//! use fieldrec::storage::JsonFileSink;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = CaptureSession::new(Arc::new(JsonFileSink::new()));
//! let serial = SerialPipeline {
//!     source: Box::new(Cursor::new(b"$GPGGA,1\r\n".to_vec())),
//!     stall_threshold: 500_000,
//!     target: PathBuf::from("outlog.json"),
//! };
//! session.start(Some(serial), None, None)?;
//! let summary = session.finish().await?;
//! println!("{:?}", summary.outcome);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::runtime::Runtime;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::data_capture::bus_capture::{BusCapture, DecodeTable, FrameSource};
use crate::data_capture::byte_source::ByteSource;
use crate::data_capture::serial_capture::SerialCapture;
use crate::data_capture::types::{BusRecord, CaptureEpoch, Message, PipelineReport, PipelineStatus};
use crate::error_handling::types::SessionError;
use crate::session_management::SessionState;
use crate::storage::storage_trait::RecordSink;

/// How long the session waits for a worker once it was asked to stop.
pub const DEFAULT_JOIN_GRACE: Duration = Duration::from_secs(5);

/// Everything the receiver pipeline needs.
pub struct SerialPipeline {
    pub source: Box<dyn ByteSource>,
    pub stall_threshold: u64,
    pub target: PathBuf,
}

/// Everything the bus pipeline needs.
pub struct BusPipeline {
    pub source: Box<dyn FrameSource>,
    pub table: Arc<dyn DecodeTable>,
    /// Silence after which the bus is considered finished.
    pub max_idle: Duration,
    /// Upper bound on one receive call.
    pub poll: Duration,
    pub target: PathBuf,
}

/// Per-pipeline result of a closed session.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub status: PipelineStatus,
    pub records: usize,
    pub target: PathBuf,
    /// Why persisting failed, if it did.
    pub persist_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    /// Terminal state reached before the session was closed.
    pub outcome: SessionState,
    pub serial: Option<PipelineSummary>,
    pub bus: Option<PipelineSummary>,
}

impl SessionSummary {
    pub fn all_persisted(&self) -> bool {
        [&self.serial, &self.bus]
            .iter()
            .filter_map(|p| p.as_ref())
            .all(|p| p.persist_error.is_none())
    }
}

pub struct CaptureSession {
    id: Uuid,
    state: SessionState,
    cancel: CancellationToken,
    sink: Arc<dyn RecordSink>,
    join_grace: Duration,
    epoch: Option<CaptureEpoch>,
    deadline: Option<DateTime<Utc>>,
    serial: Option<(PathBuf, JoinHandle<PipelineReport<Message>>)>,
    bus: Option<(PathBuf, JoinHandle<PipelineReport<BusRecord>>)>,
}

impl CaptureSession {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        let id = Uuid::new_v4();
        debug!("[{}] CaptureSession created", id);
        Self {
            id,
            state: SessionState::Idle,
            cancel: CancellationToken::new(),
            sink,
            join_grace: DEFAULT_JOIN_GRACE,
            epoch: None,
            deadline: None,
            serial: None,
            bus: None,
        }
    }

    pub fn with_join_grace(mut self, grace: Duration) -> Self {
        self.join_grace = grace;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle that stops the session when cancelled (e.g. from a signal
    /// handler).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn epoch(&self) -> Option<CaptureEpoch> {
        self.epoch
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Captures the epoch and launches the given pipelines.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// Errors
    /// - [`SessionError::AlreadyStarted`] unless the session is `Idle`.
    /// - [`SessionError::NoPipelines`] when both pipelines are `None`.
    pub fn start(
        &mut self,
        serial: Option<SerialPipeline>,
        bus: Option<BusPipeline>,
        duration: Option<Duration>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyStarted);
        }
        if serial.is_none() && bus.is_none() {
            return Err(SessionError::NoPipelines);
        }

        let epoch = CaptureEpoch::now();
        // a duration too large to represent means no deadline at all
        let deadline = duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| epoch.origin().checked_add_signed(d));
        self.epoch = Some(epoch);
        self.deadline = deadline;

        if let Some(p) = serial {
            let capture = SerialCapture::new(self.id, p.source, epoch, p.stall_threshold);
            let cancel = self.cancel.clone();
            let handle = tokio::task::spawn_blocking(move || capture.run(&cancel, deadline));
            self.serial = Some((p.target, handle));
        }
        if let Some(p) = bus {
            let capture =
                BusCapture::new(self.id, p.source, p.table, epoch).with_wait(p.max_idle, p.poll);
            let cancel = self.cancel.clone();
            let handle = tokio::task::spawn_blocking(move || capture.run(&cancel, deadline));
            self.bus = Some((p.target, handle));
        }

        self.state = SessionState::Running;
        info!(
            "[{}] Capture session started (serial={}, bus={}, deadline={:?})",
            self.id,
            self.serial.is_some(),
            self.bus.is_some(),
            deadline
        );
        Ok(())
    }

    /// Waits for both pipelines, persists their records and closes the
    /// session.
    ///
    /// Pipelines stop on their own (source exhausted, stall, deadline). Once
    /// cancellation is requested or the deadline passes, each remaining worker
    /// gets `join_grace` to return; a worker that misses it is reported as
    /// faulted and its records are lost.
    pub async fn finish(&mut self) -> Result<SessionSummary, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::NotRunning);
        }

        let serial = self.serial.take();
        let bus = self.bus.take();
        let this = &*self;
        let (serial, bus) = tokio::join!(
            async move {
                match serial {
                    Some((target, handle)) => {
                        Some((target, this.join_worker("serial", handle).await))
                    }
                    None => None,
                }
            },
            async move {
                match bus {
                    Some((target, handle)) => Some((target, this.join_worker("bus", handle).await)),
                    None => None,
                }
            }
        );

        let statuses = serial
            .iter()
            .map(|(_, r)| &r.status)
            .chain(bus.iter().map(|(_, r)| &r.status));
        self.state = SessionState::from_statuses(statuses);
        let outcome = self.state;
        info!("[{}] Capture session ended: {:?}", self.id, outcome);

        let serial = serial.map(|(target, report)| {
            let persisted = self.sink.persist_messages(&target, &report.records);
            self.summarize(target, report.status, report.records.len(), persisted)
        });
        let bus = bus.map(|(target, report)| {
            let persisted = self.sink.persist_bus_records(&target, &report.records);
            self.summarize(target, report.status, report.records.len(), persisted)
        });

        self.state = SessionState::Closed;
        info!("[{}] Capture session closed", self.id);
        Ok(SessionSummary {
            session_id: self.id,
            outcome,
            serial,
            bus,
        })
    }

    /// Drives [`finish`](Self::finish) on `runtime`, then shuts the runtime
    /// down.
    ///
    /// Abandoned workers keep a blocking-pool thread busy until their source
    /// returns, and dropping a runtime waits for them. The shutdown here waits
    /// at most `join_grace` instead, so the caller is never held hostage by a
    /// read that does not return.
    pub fn finish_on(mut self, runtime: Runtime) -> Result<SessionSummary, SessionError> {
        let summary = runtime.block_on(self.finish());
        debug!("[{}] shutting down runtime (grace {:?})", self.id, self.join_grace);
        runtime.shutdown_timeout(self.join_grace);
        summary
    }

    async fn join_worker<R>(
        &self,
        name: &str,
        mut handle: JoinHandle<PipelineReport<R>>,
    ) -> PipelineReport<R> {
        tokio::select! {
            res = &mut handle => return self.joined(name, res),
            _ = self.stop_requested() => {
                debug!(
                    "[{}] stop requested, waiting up to {:?} for {} worker",
                    self.id, self.join_grace, name
                );
            }
        }
        match tokio::time::timeout(self.join_grace, &mut handle).await {
            Ok(res) => self.joined(name, res),
            Err(_) => {
                error!(
                    "[{}] {} worker did not stop within {:?}, its records are lost",
                    self.id, name, self.join_grace
                );
                PipelineReport {
                    records: Vec::new(),
                    status: PipelineStatus::Faulted(format!(
                        "{} worker did not stop within {:?}",
                        name, self.join_grace
                    )),
                }
            }
        }
    }

    fn joined<R>(
        &self,
        name: &str,
        res: Result<PipelineReport<R>, JoinError>,
    ) -> PipelineReport<R> {
        res.unwrap_or_else(|e| {
            error!("[{}] {} worker failed: {}", self.id, name, e);
            PipelineReport {
                records: Vec::new(),
                status: PipelineStatus::Faulted(format!("{} worker failed: {}", name, e)),
            }
        })
    }

    /// Resolves on cancellation or when the deadline passes.
    async fn stop_requested(&self) {
        match self.deadline {
            Some(deadline) => {
                let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    fn summarize(
        &self,
        target: PathBuf,
        status: PipelineStatus,
        records: usize,
        persisted: Result<(), crate::error_handling::types::StorageError>,
    ) -> PipelineSummary {
        let persist_error = persisted.err().map(|e| {
            warn!("[{}] unable to persist {}: {}", self.id, target.display(), e);
            e.to_string()
        });
        PipelineSummary {
            status,
            records,
            target,
            persist_error,
        }
    }
}
