pub mod connector;
pub mod endpoint;

pub use connector::{Connector, Frame, SocketEvent, SocketEvents, SocketHandle, WsConnector};
pub use endpoint::Endpoint;
