//! Snapshot acquisition and compaction.
//!
//! The in-page extension produces the raw semantic snapshot; this crate
//! waits for its injection, fetches through the backend's `call` port,
//! caches with a staleness budget, and renders the compact pipe-delimited
//! form that goes into LLM prompts.

pub mod bridge;
pub mod cache;
pub mod compact;
pub mod errors;
pub mod options;

pub use bridge::{ExtensionBridge, ExtensionProbe};
pub use cache::CachedSnapshot;
pub use compact::{compact_lines, dominant_rank_map, is_interactive_role, CompactConfig};
pub use errors::SnapshotError;
pub use options::{ScreenshotRequest, SnapshotFilter, SnapshotOptions};
