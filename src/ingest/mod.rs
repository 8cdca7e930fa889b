// =============================================================================
// Ingestor
// =============================================================================
//
// Converts a raw HTTP body into exactly one persisted signal or one
// persisted rejection. See `webhook` for the full algorithm.
// =============================================================================

pub mod webhook;

pub use webhook::{ingest, IngestOutcome};
