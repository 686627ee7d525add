//! Wire protocol and client for the slotid server.
//!
//! Every request is one command byte followed by a fixed-length argument;
//! every response is a fixed-length frame. The protocol is strictly
//! request/response: a peer sends one request and reads its full response
//! before sending the next.

mod client;
mod common;

pub use client::*;
pub use common::*;
