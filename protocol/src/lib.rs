//! Data model and wire format shared by the remsh client and server.
//!
//! Everything that crosses a transport lives here: the structured command
//! produced by the shell tokenizer, the result envelope returned by command
//! handlers, the asynchronous messages pushed by a streaming server, and the
//! newline-delimited JSON frames that carry all of them.

mod command;
mod error;
mod message;
mod result;
mod wire;

pub use command::ParsedCommand;
pub use error::ProtocolError;
pub use message::Message;
pub use result::CommandResult;
pub use wire::Request;
pub use wire::decode_push;
pub use wire::decode_request;
pub use wire::decode_result;
pub use wire::encode_push;
pub use wire::encode_result;
