use std::{net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::{
    exporter::CarbonExporter,
    forwarder::{resolve_endpoint, ForwarderConfiguration},
};

// 2003 is the Carbon daemon's default plaintext ingestion port.
const DEFAULT_REMOTE_PORT: u16 = 2003;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that could occur while building a Carbon exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse or resolve the remote endpoint.
    #[error("invalid endpoint: {reason}")]
    InvalidEndpoint {
        /// Details about the parsing/resolution failure.
        reason: String,
    },

    /// The configured timeout was zero.
    ///
    /// A zero duration is not a valid socket deadline, so it would otherwise surface as
    /// an opaque I/O error on the first batch.
    #[error("timeout must be non-zero")]
    InvalidTimeout,
}

/// Builder for a Carbon exporter.
pub struct CarbonExporterBuilder {
    remote_addrs: Vec<SocketAddr>,
    timeout: Duration,
    resource_to_telemetry: bool,
}

impl CarbonExporterBuilder {
    /// Set the remote endpoint to deliver metrics to.
    ///
    /// The endpoint must be in `<host>:<port>` form; hostnames are resolved eagerly so
    /// that a bad endpoint is reported here rather than on the first batch.
    ///
    /// Defaults to `127.0.0.1:2003`, the Carbon daemon's default plaintext port.
    ///
    /// # Errors
    ///
    /// If the given endpoint cannot be parsed or resolved, an error is returned
    /// indicating the reason.
    pub fn with_endpoint<A>(mut self, endpoint: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addrs = resolve_endpoint(endpoint.as_ref())
            .map_err(|reason| BuildError::InvalidEndpoint { reason })?;
        Ok(self)
    }

    /// Set the timeout applied to each connect and to each whole-batch write.
    ///
    /// When the deadline expires, the in-flight batch fails with a timeout error and the
    /// connection is discarded; the exporter never blocks a caller longer than this per
    /// network operation. Must be non-zero: [`build`](CarbonExporterBuilder::build)
    /// rejects a zero timeout.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set whether resource attributes are merged into each data point's tag set.
    ///
    /// When enabled, every line carries the resource-level attributes of its group in
    /// addition to the point's own, with the point's value winning on key collision.
    /// This is how resource metadata (such as the originating service) survives the
    /// flattening into Carbon's tag format.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_resource_to_telemetry(mut self, enabled: bool) -> Self {
        self.resource_to_telemetry = enabled;
        self
    }

    /// Builds the exporter.
    ///
    /// The exporter starts in the created state and accepts no batches until
    /// [`start`](CarbonExporter::start) is called. No connection is made here.
    ///
    /// # Errors
    ///
    /// If the configured timeout is zero, an error is returned.
    pub fn build(self) -> Result<CarbonExporter, BuildError> {
        if self.timeout.is_zero() {
            return Err(BuildError::InvalidTimeout);
        }

        let config = ForwarderConfiguration {
            remote_addrs: self.remote_addrs,
            timeout: self.timeout,
        };

        Ok(CarbonExporter::new(config, self.resource_to_telemetry))
    }
}

impl Default for CarbonExporterBuilder {
    fn default() -> Self {
        Self {
            remote_addrs: vec![SocketAddr::from(([127, 0, 0, 1], DEFAULT_REMOTE_PORT))],
            timeout: DEFAULT_TIMEOUT,
            resource_to_telemetry: false,
        }
    }
}
