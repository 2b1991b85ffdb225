//! # avrio-core
//!
//! Event-driven peripheral I/O core for AVR microcontroller simulation.
//!
//! Models the part of an AVR MCU that sits between the CPU and the board:
//! pins with internal/external drives, a signal bus connecting peripherals,
//! virtualized I/O registers, interrupt requests, GPIO ports for the classic
//! and megaAVR 0-series families, the voltage reference controller and the
//! 0-series analog comparator. The CPU core is not part of this crate: a host
//! drives the [`Device`] through register accesses, pin stimuli and interrupt
//! acknowledgements.
//!
//! ## Architecture
//!
//! - [`Device`]: owns the bus and the peripherals, runs every operation to completion
//! - [`Bus`]: signal bus, pins, register file and interrupt controller shared by peripherals
//! - [`Peripheral`]: hook interface implemented by every peripheral model
//! - [`pin`]: pin drives and state resolution
//! - [`signal`]: signals, hooks and queued notifications
//! - [`ioreg`]: I/O register file with ownership, use and read-only masks
//! - [`interrupt`]: interrupt controller and the flag/enable helper
//! - [`peripherals`]: ports, VREF, analog comparator, console
//! - [`devices`]: ATmega4809 and ATmega328P assemblies
//! - [`firmware`] / [`memory`]: firmware container and NVM models
//! - [`snapshot`]: in-memory device snapshots and their compressed images
//!
//! ## Propagation
//!
//! Peripherals never call each other directly. A state change raises a
//! signal, which queues one notification per subscriber; the device delivers
//! them in order until nothing is left, so a device operation returns only
//! once the system has settled. A bound on delivered notifications turns a
//! non-settling configuration into a device crash.
//!
//! ## Logging
//!
//! Events are emitted through `tracing` with a `device` field. The crate
//! does not install a subscriber.

pub mod types;
pub mod error;
pub mod signal;
pub mod pin;
pub mod ioreg;
pub mod interrupt;
pub mod bus;
pub mod peripheral;
pub mod memory;
pub mod firmware;
pub mod device;
pub mod peripherals;
pub mod devices;
pub mod snapshot;

pub use bus::{Bus, CoreRequest};
pub use device::{Device, DeviceConfig, DeviceOptions, DeviceState};
pub use error::{SimError, SimResult};
pub use firmware::{Firmware, MemBlock, MemoryArea};
pub use peripheral::{Ctx, CtlData, Peripheral, PeripheralId, SleepMode};
pub use pin::{PinId, PinState};
pub use snapshot::DeviceSnapshot;
pub use types::{CtlId, IntVect, RegAddr, VarData};
