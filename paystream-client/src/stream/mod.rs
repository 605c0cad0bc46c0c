//! Paid stream session lifecycle
//!
//! 1. `PaymentNegotiator` pays for the stream schema and yields a socket URL + token
//! 2. `SessionConnection` opens the socket, sends the configuration burst, and streams
//! 3. Each frame is classified into an `InboundEvent`; data events go to the
//!    `EventDispatcher`, lifecycle events drive token renewal
//! 4. Renewal runs through the configured `RenewalStrategy` ("http" or "inband")

mod dispatcher;
mod events;
mod negotiator;
mod renewal;
mod session;

pub use dispatcher::{EventSink, LogSink};
pub use negotiator::PaymentNegotiator;
pub use renewal::strategy_for;
pub use session::SessionConnection;

#[cfg(test)]
pub use dispatcher::Output;
