//! Change stream: block protocol parsing and the reconnecting listener.

pub mod event;
pub mod listener;
pub mod parser;

pub use event::{ChangeEvent, EventKind, ScopePath};
pub use listener::{StreamListener, DEFAULT_IDLE_TIMEOUT};
pub use parser::{BlockParser, LineBuffer, RawBlock};
