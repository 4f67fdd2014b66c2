pub mod cache;
pub mod record;
pub mod store;

pub use cache::{CacheEntry, CacheEvent, CasOutcome, InsertOutcome, MemoryCache, SharedCache};
pub use record::{
    SessionRecord, SessionState, TerminalReason, ToolCallRecord, TransportKind, TurnRecord,
};
pub use store::{CreateOutcome, SessionStore};
