//! Protocol engine for the cmake server: framing codec, transport and
//! process supervision, cookie correlation, and the typed request surface.

pub mod codec;
pub mod transport;

pub(crate) mod correlation;

mod client;

pub use client::{ProtocolClient, StartParams};
pub use correlation::RequestObservers;
pub use transport::ExitInfo;
