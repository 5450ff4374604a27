//! In-process BLE simulation
//!
//! Implements the `gattbridge-core` backend contracts without a radio, so
//! central, peripheral and GATT server code can be exercised end to end in
//! tests. Timing is driven by `tokio::time`; paused test runtimes make every
//! simulated delay deterministic.
//!
//! ## Architecture
//!
//! - [`central_manager`] - Scanning, connecting and connection events
//! - [`peripheral`] - A remote peripheral with its own GATT database
//! - [`peripheral_manager`] - The local GATT server, driven by simulated centrals
//! - [`advertiser`] - Periodic advertisement generators
//! - [`handler`] - Pluggable answers to reads, writes and authorization prompts
//! - [`config`] - Delays, timeouts and limits
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gattbridge_core::{CentralManager, ManagerState, ScanOptions};
//! use gattbridge_sim::{SimulatedCentralManager, SimulatedPeripheral};
//!
//! # async fn example() -> gattbridge_core::Result<()> {
//! let simulation = SimulatedCentralManager::new();
//! simulation.set_state(ManagerState::PoweredOn);
//!
//! let peripheral = SimulatedPeripheral::new(Some("sensor"));
//! simulation.add_peripheral(&peripheral, false);
//!
//! let manager = CentralManager::new(simulation.clone());
//! let connected = manager.connect(&peripheral.facade(), Default::default()).await?;
//! assert_eq!(connected.id(), peripheral.id());
//! # Ok(())
//! # }
//! ```

pub mod advertiser;
pub mod central;
pub mod central_manager;
pub mod config;
pub mod handler;
pub mod peripheral;
pub mod peripheral_manager;

pub use advertiser::{basic_advertiser, Advertiser, RssiGenerator};
pub use central::{SimulatedCentral, DEFAULT_MAXIMUM_UPDATE_VALUE_LENGTH};
pub use central_manager::SimulatedCentralManager;
pub use config::SimulationConfig;
pub use handler::{
    AllowAll, CentralAuthorizer, PeripheralHandler, SilentHandler, ThrowingHandler,
    UpdateValueHandler,
};
pub use peripheral::{IncludedServices, SimulatedPeripheral};
pub use peripheral_manager::{SimulatedPeripheralManager, WriteResponses};
