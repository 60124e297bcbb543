//! Memory types and lifecycle
//!
//! Records and prompt projections, the manager that drives retrieval,
//! ingestion and compaction, and the background queue it schedules on.

pub mod background;
pub mod compaction;
pub mod manager;
pub mod types;

pub use background::{BackgroundTasks, TaskEvent, TaskHandle, TaskOutcome};
pub use compaction::{CompactionConfig, CompactionOutcome, UserGuard, UserLocks};
pub use manager::{ManagerConfig, MemoryManager, MemoryStats};
pub use types::{MemoryKind, MemoryPrompt, MemoryRecord, UserProfile, format_memory_prompt};
