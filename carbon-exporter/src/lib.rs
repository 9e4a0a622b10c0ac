//! An exporter for delivering batches of metrics to a [Carbon]-compatible server.
//!
//! [Carbon]: https://graphite.readthedocs.io/en/latest/carbon-daemons.html
//!
//! # Usage
//!
//! Using the exporter is straightforward:
//!
//! ```no_run
//! # use carbon_exporter::{CarbonExporterBuilder, MetricBatch};
//! // First, create a builder.
//! //
//! // The builder configures the remote endpoint, the connect/write timeout, and whether
//! // resource-level attributes are merged into each data point's tag set.
//! let exporter = CarbonExporterBuilder::default()
//!     .with_endpoint("127.0.0.1:2003")
//!     .expect("valid endpoint")
//!     .build()
//!     .expect("failed to build exporter");
//!
//! // The exporter must be started before it will accept batches. Starting does not
//! // connect to the remote server: the connection is established lazily on the first
//! // batch, and re-established on the next batch after any failure.
//! exporter.start().expect("failed to start exporter");
//!
//! let batch = MetricBatch::default();
//! exporter.consume_metrics(&batch).expect("failed to deliver batch");
//!
//! exporter.shutdown();
//! ```
//!
//! # Wire format
//!
//! Each data point is rendered as a single line of Carbon's tagged plaintext protocol:
//!
//! ```text
//! <name>;<tag1>=<value1>;<tag2>=<value2> <value> <unix-seconds>\n
//! ```
//!
//! Tags are sorted by key so that encoding is deterministic. Only gauge and sum metrics
//! have a single-scalar representation in the plaintext protocol; data points of other
//! kinds are counted as dropped and do not abort the rest of the batch.
//!
//! # Delivery semantics
//!
//! Carbon's protocol has no application-level acknowledgment, so a batch either succeeds
//! as a whole or fails as a whole: on any connect or write failure, the connection is
//! discarded and a single error is returned for the batch. Callers that need reliability
//! should resend the identical batch, which is safe because Carbon accepts duplicate
//! lines without error. The exporter performs no internal retries and never buffers
//! unsent data across calls.
//!
//! Concurrent callers may share one exporter: batches are serialized over the single
//! connection so that lines from different batches are never interleaved on the wire.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod batch;
pub use self::batch::{
    Attributes, DataPoint, Metric, MetricBatch, MetricKind, PointValue, ResourceGroup,
};

mod builder;
pub use self::builder::{BuildError, CarbonExporterBuilder};

mod encoder;
pub use self::encoder::{encode, EncodeResult};

mod exporter;
pub use self::exporter::{CarbonExporter, ExportError};

mod forwarder;
