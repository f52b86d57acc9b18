//! Version history reconstruction: undo, rebuild, and the partition check.

pub mod partition;
pub mod rebuild;
pub mod undo;

pub use partition::{PartitionViolation, check_partition};
pub use rebuild::{Rebuilt, rebuild_history};
pub use undo::{Undone, undo_change};
