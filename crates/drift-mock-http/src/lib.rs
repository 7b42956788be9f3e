// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-mock-http
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The synthetic client request and its driver.
pub mod request;
/// The synthetic response (incoming message) surface.
pub mod response;
/// The fake socket surface.
pub mod socket;

pub use request::{
    MockClientRequest, MockRequestContext, MockRequestOptions, PlaybackOutcome, Protocol,
    RequestEvent, WriteError,
};
pub use response::MockResponse;
pub use socket::{MockSocket, SocketEvent};
