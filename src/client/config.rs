//! Client tunables

use std::env;
use std::time::Duration;

/// Remote entity smoothing parameters
#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    /// Samples kept per remote entity
    pub buffer_capacity: usize,
    /// Extrapolate from the last sample only while it is this fresh
    pub extrapolation_window: Duration,
    /// Upper bound on the time extrapolated forward
    pub max_extrapolation: Duration,
    /// Cap on both the extrapolated offset and the per-frame render step (px)
    pub max_extrapolation_distance: f32,
    /// Entities with no sample for this long are evicted
    pub stale_timeout: Duration,
    /// Lerp factor when the render error exceeds `far_error`
    pub far_lerp: f32,
    /// Lerp factor when the render error exceeds `near_error`
    pub near_lerp: f32,
    pub settle_lerp: f32,
    pub far_error: f32,
    pub near_error: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 8,
            extrapolation_window: Duration::from_millis(200),
            max_extrapolation: Duration::from_millis(200),
            max_extrapolation_distance: 64.0,
            stale_timeout: Duration::from_secs(10),
            far_lerp: 0.3,
            near_lerp: 0.15,
            settle_lerp: 0.08,
            far_error: 100.0,
            near_error: 20.0,
        }
    }
}

/// Client configuration. Physics constants are compiled in and shared with
/// the server; everything here only shapes presentation and pacing.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint
    pub server_url: String,
    /// Room to join, server default when unset
    pub room: Option<String>,
    /// Fixed steps allowed per rendered frame before leftover time is dropped
    pub max_steps_per_frame: u32,
    /// Unacknowledged inputs kept for replay
    pub max_pending_inputs: usize,
    /// Per-frame decay of the visual correction offset
    pub correction_decay: f32,
    /// Corrections larger than this snap instead of blending (px)
    pub snap_distance: f32,
    pub ping_interval: Duration,
    /// EWMA factor for RTT and clock offset
    pub clock_smoothing: f64,
    /// No snapshot for this long reports the connection as stale
    pub connection_stale_after: Duration,
    /// Inbound/outbound transport channel depth
    pub transport_capacity: usize,
    pub interpolation: InterpolationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8080/ws".to_string(),
            room: None,
            max_steps_per_frame: 5,
            max_pending_inputs: 256,
            correction_decay: 0.8,
            snap_distance: 150.0,
            ping_interval: Duration::from_secs(1),
            clock_smoothing: 0.125,
            connection_stale_after: Duration::from_secs(2),
            transport_capacity: 256,
            interpolation: InterpolationConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults, with `SERVER_URL` and `ROOM` taken from the environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_url: env::var("SERVER_URL").unwrap_or(defaults.server_url.clone()),
            room: env::var("ROOM").ok().filter(|r| !r.trim().is_empty()),
            ..defaults
        }
    }
}
