//! RPC transport to the torrent daemon.
//!
//! rTorrent speaks XML-RPC. The `xmlrpc` crate supplies the value model,
//! request serialization and response parsing; this module adds the
//! `system.multicall` batching convention and an async HTTP transport.
//! Retry policy lives with callers, never here.

mod codec;
mod http;
mod types;
mod value;

pub use codec::{build_request, decode_response, encode_call};
pub use http::HttpTransport;
pub use types::*;
pub use value::{Value, ValueExt};
