//! Request/response BLE operations over callback-driven hardware
//!
//! Platform Bluetooth stacks report the outcome of every command through a
//! delegate callback. This crate publishes those callbacks onto a per-manager
//! event bus and correlates them back to the commands that caused them, so
//! callers get futures and streams instead of delegates.
//!
//! ## Architecture
//!
//! - [`bus`] - Multicast event bus carrying hardware callbacks
//! - [`correlator`] - One-shot requests, long-lived and shared streams
//! - [`discovery`] - Completion rule for hierarchical GATT discovery
//! - [`retry`] - Bounded retries for refused value updates
//! - [`backend`] - Command contract a hardware provider implements
//! - [`central_manager`], [`peripheral`], [`peripheral_manager`] - Consumer facades
//! - [`model`] - GATT handles, options, states and ATT types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gattbridge_core::{CentralManager, ScanOptions};
//! use futures::StreamExt;
//!
//! # async fn example(manager: CentralManager) -> gattbridge_core::Result<()> {
//! let scan = manager.scan_for_peripherals(None, ScanOptions::new());
//! let mut discoveries = scan.subscribe();
//!
//! if let Some(discovery) = discoveries.next().await {
//!     let peripheral = manager
//!         .connect(&discovery.peripheral, Default::default())
//!         .await?;
//!     let services = peripheral.discover_services(None).await?;
//!     println!("{} services", services.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! The simulated backends live in the `gattbridge-sim` crate. With the
//! `btleplug` feature enabled, [`live`] provides the central role on top of
//! the platform Bluetooth stack.

pub mod backend;
pub mod bus;
pub mod central_manager;
pub mod correlator;
pub mod discovery;
pub mod error;
pub mod events;
#[cfg(feature = "btleplug")]
pub mod live;
pub mod model;
pub mod peripheral;
pub mod peripheral_manager;
pub mod retry;
pub mod sync;

// Public API exports
pub use backend::{CentralManagerBackend, PeripheralBackend, PeripheralManagerBackend};
pub use bus::{ActionBus, EventReceiver};
pub use central_manager::CentralManager;
pub use correlator::{EventStream, Request, SharedStream, SharedSubscription, Step};
pub use discovery::{merge_discovered, DiscoveryRequest};
pub use error::{unimplemented_endpoint, BleError, Result};
pub use events::{CentralManagerEvent, PeripheralDiscovery, PeripheralEvent, PeripheralManagerEvent};
pub use model::*;
pub use peripheral::Peripheral;
pub use peripheral_manager::PeripheralManager;
pub use retry::{SendOutcome, UPDATE_VALUE_RETRIES};
