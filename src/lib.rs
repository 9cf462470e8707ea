#![deny(missing_docs)]

//! This crate drives a point-to-point serial link to a field device.
//!
//! A [`client::LinkClient`] owns the transport.
//! Once started, a reader hands every chunk from the wire to a callback,
//! a writer puts queued frames on the wire (retrying transient failures),
//! and optionally a poller offers a list of commands at a fixed interval.
//!
//! The [`codec`] converts register bytes to typed values and back,
//! and reads or writes bit fields inside register words.

/// Link options and timing derived from the serial framing.
pub mod options;

/// The link itself: transport ownership, reading, writing and polling.
pub mod client;

/// Transports a link can run on.
pub mod transport;

/// Conversion between register bytes and typed values.
pub mod codec;

/// Keeps track of opened links by address.
pub mod registry;

/// Relates to config files.
pub mod config;

/// The command line interface.
pub mod cli;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;

pub use client::{Frame, LinkClient};
pub use error::Error;
