pub mod matcher;
pub mod parallel;
pub mod signature;

// Re-export main types for easier access
pub use matcher::{Match, ScanOutcome, is_binary, scan};
pub use parallel::{CancelFlag, PoolConfig, ScanOptions, ScanPool, ScanReport, SkipReason, SkippedBlob};
pub use signature::{PatternKind, Signature, SignatureSet};
