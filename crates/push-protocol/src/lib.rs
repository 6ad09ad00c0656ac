//! Wire protocol for the Switchboard push channel.
//!
//! This crate implements the length-prefixed packet framing observed on the
//! messaging site's push socket, and the classification of packet payloads
//! into typed deltas.

#![warn(clippy::pedantic)]

pub mod frame;
pub mod codec;
pub mod delta;
