//! 基础设施层
//!
//! 时钟与会话存储，上层只通过 trait 使用它们

pub mod clock;
pub mod file_store;
pub mod session_store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file_store::FileSessionStore;
pub use session_store::{MemorySessionStore, SessionStore, SessionStoreExt};
