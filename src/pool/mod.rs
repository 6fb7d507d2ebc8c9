//! Workspace pool
//!
//! ```text
//! acquire(level) ──→ idle[clip(level)..] ──hit──→ WorkspaceGuard
//!                         │ miss
//!                         ↓
//!                  Workspace::alloc ──fail──→ wait for a top-bucket release
//!
//! drop(guard) ──→ idle[bucket] (+ LRU when borrowed at home) ──→ reclaim timer
//! ```

mod manager;
mod size_table;
mod workspace;

pub use manager::{PoolStats, WorkspaceGuard, WorkspaceManager};
pub use size_table::SizeTable;
pub use workspace::Workspace;
