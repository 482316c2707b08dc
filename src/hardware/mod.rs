//! Camera hardware abstraction.
//!
//! Drivers implement [`DriverContext`] and [`FrameSource`]; the capture pipeline only
//! ever sees those traits. [`mock`] provides the simulated driver.

pub mod capabilities;
pub mod mock;
pub mod settings;

pub use capabilities::{DriverContext, FrameSource};
pub use mock::{SimulatedCamera, SimulatedDriver, SimulationConfig};
pub use settings::{CameraSettings, Roi, SensorLimits, TriggerMode};
