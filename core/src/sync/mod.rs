//! Everything replication needs on this side of the transport: the change log, its compaction,
//! and the ingestion of remote events.

mod change_log;
mod compaction;
mod ingest;

pub use change_log::{ChangeLog, ChangeLogError, Outbox, EVENTS_FILE_NAME, PEERS_FILE_NAME};
pub use compaction::CompactionReport;
pub use ingest::{IngestReport, Ingester, PendingBatch};
