//! # vlcstream - real-time streaming for headset tracking cameras
//!
//! Streams a visible-light tracking camera to one client per pipeline:
//! - Per-session format negotiation (decimation, profile, encoder options)
//! - Exposure-aware capture timestamp correction
//! - Optional per-unit pose tagging, realigned for header-splitting encoders
//! - Compact length-prefixed framing over a persistent socket
//! - One-shot calibration dump
//!
//! The capture device, encoder and spatial locator are platform services
//! plugged in through the traits in [`device`] and [`encoder`].
//!
//! ## Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use vlcstream::{SensorBackend, SensorId, Server, ServerConfig};
//!
//! fn serve(backend: Arc<dyn SensorBackend>) -> vlcstream::Result<()> {
//!     let config = ServerConfig::from_env();
//!     let handles = SensorId::ALL
//!         .iter()
//!         .map(|&sensor| Server::bind(config.clone(), sensor, backend.clone())?.spawn())
//!         .collect::<vlcstream::Result<Vec<_>>>()?;
//!     for handle in handles {
//!         handle.stop()?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod config;
pub mod device;
pub mod timestamp;
pub mod negotiate;
pub mod latch;
pub mod transmit;
pub mod encoder;
pub mod session;
pub mod calibration;
pub mod server;

pub use error::StreamError;
pub use types::*;
pub use config::ServerConfig;
pub use device::{CalibrationSource, CaptureDevice, CoordinateFrame, SpatialLocator};
pub use encoder::{
    EncoderBridge, EncoderConfig, EncoderFactory, QueuedBridge, UnitSink, VideoEncoder,
};
pub use negotiate::{FormatNegotiator, Negotiated};
pub use timestamp::TimestampCorrector;
pub use latch::PoseLatch;
pub use transmit::Transmitter;
pub use session::{ExitReason, Session, SessionReport, SessionState};
pub use calibration::CalibrationDumper;
pub use server::{SensorBackend, Server, ServerHandle};

/// Result type alias for vlcstream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
