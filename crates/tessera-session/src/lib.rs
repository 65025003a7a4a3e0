pub mod memory;
pub mod merge;
pub mod types;

pub use memory::MemorySessionStore;
pub use merge::deep_merge;
pub use types::{
    SessionEvent, SessionEventKind, SessionEventStream, SessionRecord, SessionStore,
};
