//! C11 — the transport contract.
//!
//! The websocket framing and the socket itself live outside this crate
//! (§1, out of scope); this trait is the seam the fan-out core pushes
//! through. A real binary wires it up to whatever websocket library owns
//! the accept loop; tests and the demo binary use [`tests::FakeTransport`].

use crate::errors::TransportError;
use crate::wire::OutboundMessage;

/// One outbound leg of a registered connection. Implementations must be
/// cheap to clone (typically an `Arc`-wrapped channel sender) since the
/// registry hands out `Arc<dyn Transport>` freely.
pub trait Transport: Send + Sync {
    /// Pushes one message down the socket. Implementations should not block
    /// the caller on backpressure indefinitely; a slow/dead client should
    /// eventually surface as `TransportError::Send` rather than stalling
    /// the push pipeline.
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Best-effort close. Implementations should make this idempotent.
    fn close(&self);
}
