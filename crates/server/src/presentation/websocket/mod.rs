mod handler;
mod message;
mod session;

pub use handler::{WsState, ws_handler};
pub use message::{DecodeError, ErrorBody, Tokens, VisRequest, VisResponse, decode};
pub use session::ProtocolSession;
