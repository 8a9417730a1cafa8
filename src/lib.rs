//! Skirmish netcode - authoritative server and predicting client for a
//! 2D side-scrolling platform shooter.
//!
//! The server runs one fixed-rate tick loop per room and broadcasts full
//! snapshots. The client predicts its own player with the same integration
//! function, reconciles against acknowledged snapshots and interpolates
//! everyone else.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod net;
pub mod sim;
pub mod util;
pub mod ws;
