//! Live replay stream.
//!
//! Every subscriber gets its own session: the stored readings are replayed
//! oldest first, one per tick, and once they run out the session keeps
//! ticking with synthetic readings until the subscriber goes away.

pub mod manager;
pub mod session;
pub mod source;
pub mod state;
pub mod subscriber;
pub mod synthetic;

pub use manager::{StreamManager, StreamTicket, SubscriberId};
pub use session::{SessionConfig, SessionOutcome, SessionReport};
pub use source::ReadingSource;
pub use state::{Emission, SessionState, StreamPhase};
pub use subscriber::{ChannelSubscriber, CloseReason, Subscriber};
