pub mod error;
pub mod messages;
pub mod presence;
pub mod snapshot;

pub use error::*;
pub use messages::{decode, encode, MessageClass, ReceivedMessage, SendMessage};
pub use presence::*;
pub use snapshot::*;
