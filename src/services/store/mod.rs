//! SQLite-backed stores for the monitoring core.
//!
//! The collection pipeline owns snapshots and samples; the analysis pipeline
//! owns baselines and events; the audit trail is single-writer append-only.
//! Fingerprints are shared and mutated only through `FingerprintRepo`.

pub mod audit_repo;
pub mod baseline_repo;
pub mod event_repo;
pub mod fingerprint_repo;
pub mod sample_store;
pub mod snapshot_store;

pub use audit_repo::AuditRepo;
pub use baseline_repo::BaselineRepo;
pub use event_repo::EventRepo;
pub use fingerprint_repo::FingerprintRepo;
pub use sample_store::SampleStore;
pub use snapshot_store::SnapshotStore;
