use std::{
    io,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, error};

use crate::{
    batch::MetricBatch,
    encoder::encode,
    forwarder::{ClientState, ForwardError, ForwarderConfiguration},
};

/// Errors returned by [`CarbonExporter`] operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The operation was attempted outside the `started` state.
    ///
    /// This is a programming error on the caller's side, not a transient fault:
    /// resubmitting the same batch will fail the same way. Start the exporter before
    /// submitting batches, and stop submitting after shutting it down.
    #[error("exporter is in the '{state}' state, expected 'started'")]
    InvalidState {
        /// The state the exporter was actually in.
        state: &'static str,
    },

    /// Dialing the remote endpoint failed.
    ///
    /// Nothing was delivered. Retryable: the next submission dials fresh.
    #[error("failed to connect to Carbon server: {source}")]
    Connect {
        /// The underlying dial failure.
        #[source]
        source: io::Error,
    },

    /// Writing the encoded batch to the connection failed.
    ///
    /// An unknown prefix of the batch may have reached the remote. The connection has
    /// been discarded, so the next submission dials fresh. Retryable: resending the
    /// whole batch is safe because Carbon accepts duplicate lines.
    #[error("failed to write metrics payload: {source}")]
    Write {
        /// The underlying write failure.
        #[source]
        source: io::Error,
    },

    /// The connect or write deadline expired before the operation completed.
    ///
    /// Surfaced separately from [`Connect`](ExportError::Connect) and
    /// [`Write`](ExportError::Write) so callers can tell a slow or unreachable remote
    /// apart from one that actively refused. Retryable.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// The operation that was cut short, either `"connect"` or `"write"`.
        operation: &'static str,
        /// The configured deadline that expired.
        timeout: Duration,
    },
}

impl ExportError {
    /// Returns `true` if resubmitting the same batch could succeed.
    ///
    /// Everything except [`InvalidState`](ExportError::InvalidState) is retryable; the
    /// exporter itself never retries, so callers that want delivery guarantees should
    /// resend the identical batch when this returns `true`.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExportError::InvalidState { .. })
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Lifecycle {
    Created,
    Started,
    Shutdown,
}

impl Lifecycle {
    const fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Started => "started",
            Lifecycle::Shutdown => "shutdown",
        }
    }
}

/// Everything that must stay consistent across concurrent callers: the lifecycle state
/// and the one connection. Holding both behind a single lock makes "check started,
/// ensure connected, write batch" atomic with respect to other batches and to shutdown.
struct Inner {
    lifecycle: Lifecycle,
    client: ClientState,
}

/// An exporter that delivers metric batches to a Carbon server over TCP.
///
/// The exporter owns at most one connection, established lazily on the first batch and
/// re-established on the next batch after any failure. It is safe to share across
/// threads: concurrent [`consume_metrics`](CarbonExporter::consume_metrics) calls are
/// serialized so that batches never interleave on the wire, which matters because the
/// plaintext protocol has no framing beyond newlines.
///
/// Built via [`CarbonExporterBuilder`](crate::CarbonExporterBuilder).
pub struct CarbonExporter {
    timeout: Duration,
    merge_resource_attrs: bool,
    inner: Mutex<Inner>,
}

impl CarbonExporter {
    pub(crate) fn new(config: ForwarderConfiguration, merge_resource_attrs: bool) -> Self {
        let timeout = config.timeout;
        Self {
            timeout,
            merge_resource_attrs,
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Created,
                client: ClientState::new(config),
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means another caller panicked while holding it. The connection
        // state machine is left consistent on every exit path, so the state is still
        // safe to reuse.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the exporter, allowing batches to be submitted.
    ///
    /// Does not connect to the remote server: connection establishment is deferred to
    /// the first batch, so startup cannot fail just because the remote is momentarily
    /// unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidState`] if the exporter was already started or
    /// shut down.
    pub fn start(&self) -> Result<(), ExportError> {
        let mut inner = self.lock_inner();
        match inner.lifecycle {
            Lifecycle::Created => {
                inner.lifecycle = Lifecycle::Started;
                debug!("Exporter started.");
                Ok(())
            }
            state => Err(ExportError::InvalidState { state: state.as_str() }),
        }
    }

    /// Encodes a batch and delivers it to the remote server.
    ///
    /// The batch succeeds or fails as a whole: the first connect or write failure aborts
    /// it and is returned as the single error for the call, with no per-line progress
    /// reporting. Data points with no plaintext representation are dropped silently
    /// (logged at debug level) and never fail the batch. A batch that encodes to zero
    /// lines succeeds without touching the connection.
    ///
    /// Concurrent calls on the same exporter are serialized; each blocks at most for the
    /// configured timeout per connect and per write.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidState`] if the exporter is not started, and
    /// otherwise one of the retryable delivery errors; see [`ExportError`].
    pub fn consume_metrics(&self, batch: &MetricBatch) -> Result<(), ExportError> {
        // Encoding is pure, so it happens outside the critical section.
        let encoded = encode(batch, self.merge_resource_attrs);
        if encoded.dropped() > 0 {
            debug!(
                dropped = encoded.dropped(),
                "Dropped data points with no plaintext representation."
            );
        }

        let mut inner = self.lock_inner();
        if inner.lifecycle != Lifecycle::Started {
            return Err(ExportError::InvalidState { state: inner.lifecycle.as_str() });
        }

        if encoded.is_empty() {
            return Ok(());
        }

        inner.client.try_send(encoded.as_bytes()).map_err(|e| {
            let e = self.map_forward_error(e);
            error!(error = %e, lines = encoded.line_count(), "Failed to deliver batch.");
            e
        })
    }

    /// Shuts the exporter down, closing any live connection.
    ///
    /// Idempotent: calling it repeatedly, or without ever starting, does nothing the
    /// second time. Takes the same lock as batch delivery, so it cannot race an
    /// in-flight write.
    pub fn shutdown(&self) {
        let mut inner = self.lock_inner();
        inner.lifecycle = Lifecycle::Shutdown;
        inner.client.close();
        debug!("Exporter shut down.");
    }

    fn map_forward_error(&self, err: ForwardError) -> ExportError {
        if err.is_timeout() {
            let operation = match err {
                ForwardError::Connect(_) => "connect",
                ForwardError::Write(_) => "write",
            };
            return ExportError::Timeout { operation, timeout: self.timeout };
        }

        match err {
            ForwardError::Connect(source) => ExportError::Connect { source },
            ForwardError::Write(source) => ExportError::Write { source },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CarbonExporter, ExportError};
    use crate::{
        batch::{DataPoint, Metric, MetricBatch, PointValue, ResourceGroup},
        forwarder::ForwarderConfiguration,
    };

    fn unstarted_exporter() -> CarbonExporter {
        let config = ForwarderConfiguration {
            remote_addrs: vec!["127.0.0.1:2003".parse().unwrap()],
            timeout: Duration::from_millis(100),
        };
        CarbonExporter::new(config, false)
    }

    fn histogram_only_batch() -> MetricBatch {
        let mut metric = Metric::new("latency", crate::batch::MetricKind::Histogram);
        metric.points.push(DataPoint::new(0, PointValue::Empty));

        let mut group = ResourceGroup::default();
        group.metrics.push(metric);
        MetricBatch { resource_groups: vec![group] }
    }

    #[test]
    fn consume_before_start_is_a_precondition_failure() {
        let exporter = unstarted_exporter();
        let err = exporter.consume_metrics(&MetricBatch::default()).unwrap_err();
        assert!(matches!(err, ExportError::InvalidState { state: "created" }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn consume_after_shutdown_is_a_precondition_failure() {
        let exporter = unstarted_exporter();
        exporter.start().unwrap();
        exporter.shutdown();

        let err = exporter.consume_metrics(&MetricBatch::default()).unwrap_err();
        assert!(matches!(err, ExportError::InvalidState { state: "shutdown" }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn start_twice_is_a_precondition_failure() {
        let exporter = unstarted_exporter();
        exporter.start().unwrap();
        assert!(matches!(
            exporter.start(),
            Err(ExportError::InvalidState { state: "started" })
        ));
    }

    #[test]
    fn shutdown_is_idempotent_from_any_state() {
        let exporter = unstarted_exporter();
        exporter.shutdown();
        exporter.shutdown();

        let exporter = unstarted_exporter();
        exporter.start().unwrap();
        exporter.shutdown();
        exporter.shutdown();
    }

    #[test]
    fn empty_batches_succeed_without_a_server() {
        // No listener exists at the configured endpoint; an all-dropped batch must still
        // succeed because there is nothing to put on the wire.
        let exporter = unstarted_exporter();
        exporter.start().unwrap();
        exporter.consume_metrics(&MetricBatch::default()).unwrap();
        exporter.consume_metrics(&histogram_only_batch()).unwrap();
        exporter.shutdown();
    }
}
