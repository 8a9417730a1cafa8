//! Transport-agnostic networking pieces shared by the server and the client

pub mod clock;
pub mod outbound;

pub use clock::ClockSync;
pub use outbound::{Frame, FrameKind, OutboundQueue};
