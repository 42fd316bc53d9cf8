//! # bo-live
//!
//! Connects the bocorr optimization loop to a device: process-variable
//! access, a simulated device for sandbox runs, and the async tick driver
//! used by the `bo-runner` binary.

pub mod config;
pub mod driver;
pub mod mock;
pub mod pv;

pub use config::{RunnerConfig, CONFIG_ENV_VAR};
pub use driver::{DriverConfig, DriverExit};
pub use mock::{SimulatedPvClient, SyntheticObjective, DEFAULT_NOISE_STD};
pub use pv::{
    LiveBounds, ProcessVariableClient, PvError, PvEvaluator, PvResult, READ_RETRY_INTERVAL,
};
