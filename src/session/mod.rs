mod driver;
pub mod handle;
pub mod machine;
pub mod options;
pub mod outbound;
pub mod shared_state;

pub use handle::CollabSession;
pub use machine::{ReconnectPolicy, CLOSE_AUTH_EXPIRED, CLOSE_INTENTIONAL};
pub use options::SessionOptions;
