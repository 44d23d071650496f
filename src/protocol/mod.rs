//! RESP2 protocol implementation
//!
//! Client-side codec used to talk to store nodes. Independent from the rest
//! of the crate.

mod types;
mod resp;

pub use types::{RespValue, RespError};
pub use resp::{RespParser, RespEncoder};
