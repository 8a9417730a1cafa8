//! Predicting client: prediction, reconciliation and remote interpolation
//! driven by a single frame loop.

pub mod config;
pub mod game;
pub mod interpolation;
pub mod prediction;
pub mod reconciliation;
pub mod transport;

pub use config::{ClientConfig, InterpolationConfig};
pub use game::{CombatEvent, Connectivity, GameClient, LocalRenderState};
pub use interpolation::RemoteRenderState;
pub use transport::{ClientTransport, TransportError, TransportEvent};
