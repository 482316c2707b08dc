//! # twv_daq
//!
//! Continuous camera acquisition with on-demand recording into TWV containers.
//!
//! A camera runs a capture loop that never stops pulling frames while it is alive.
//! A controller toggles recording sessions on and off by message, and each session
//! becomes one `.twv` file: a fixed-size header that is backpatched when the session
//! stops, followed by one record per frame.
//!
//! ## Crate Structure
//!
//! - **`capture`**: The Idle/Recording state machine, the control channel and the
//!   status snapshots it publishes.
//! - **`config`**: Figment-based configuration (`config/twv_daq.toml` + `TWV_DAQ_*`
//!   environment variables).
//! - **`data`**: Frame types, pixel conversion and the TWV container format with its
//!   writer and reader.
//! - **`error`**: The crate-wide `DaqError` enum.
//! - **`hardware`**: Driver seams (`DriverContext`, `FrameSource`), the camera
//!   configuration value object and the simulated driver.
//! - **`supervisor`**: Owns a camera on a dedicated thread, or in a child process.
//! - **`tracing_setup`**: Subscriber initialization for structured logging.

pub mod capture;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod supervisor;
pub mod tracing_setup;
