//! Sans-IO session driver for one direction of a codec pipe.
//!
//! Sits between [`xcodec_proto`] (structural wire framing) and
//! [`xcodec_core`] (the content-defined dedup codec): it owns the `HELLO`
//! handshake, the `ASK`/`LEARN` interlock that resolves a decoder's unknown
//! `REF`s, `ADVANCE` bookkeeping, and the `EOS`/`EOS_ACK` half-close
//! handshake. Nothing in this crate touches a socket; see `wanproxy-net` for
//! the async wrapper that drives a [`PipeSession`] over a real connection.

mod error;
mod session;

pub use error::{PipeError, Result};
pub use session::{CacheProvider, PipeAction, PipeSession};
