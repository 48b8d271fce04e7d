//! Queue Transaction Client
//!
//! Opens transactions with the queue manager, allocates cluster and process
//! ids, streams attribute assignments and commits or discards the result.

pub mod channel;
pub mod client;
pub mod dry_run;
pub mod error;
pub mod routing;
pub mod transport;

pub use channel::QmgmtChannel;
pub use client::{CommitOutcome, JobQueue, QueueClient, QueueClientConfig, TxPhase};
pub use dry_run::DryRunQueue;
pub use error::{Ceiling, QueueError, TransportError};
pub use routing::{route_job_ad, route_of, Route, RoutedAd};
pub use transport::{MockTransport, TcpConfig, TcpTransport, Transport};
