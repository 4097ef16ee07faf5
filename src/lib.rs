//! msgrelay: a TCP message relay.
//!
//! A broadcast server accepts any number of peers and forwards every frame a
//! peer completes, verbatim, to all other peers. A bridge client connects
//! line-oriented stdin/stdout to the same framed wire protocol.
//!
//! Wire format: each frame is a 2-byte big-endian length prefix (0..=1000)
//! followed by that many payload bytes, with frames concatenated back to back
//! on the stream.

pub mod client;
pub mod config;
pub mod conn;
pub mod frame;
pub mod server;
pub mod shutdown;
