//! Torrent directory abstraction.
//!
//! This module provides a `TorrentDirectory` trait for enumerating, fetching
//! and erasing downloads in the remote client's session, and its rTorrent
//! implementation on top of the RPC transport.

mod backoff;
mod fields;
mod rtorrent;
mod types;

pub use backoff::{ConfirmBackoff, ConfirmPolicy};
pub use fields::{decode_record, record_calls, RecordField, FIELDS_PER_RECORD};
pub use rtorrent::{RtorrentClient, DEFAULT_BATCH_SIZE};
pub use types::*;
