//! Error type for device assembly and firmware loading.
//!
//! Hardware-like conditions (undefined register offsets, absent pins on a
//! port) are not errors: they are modelled as no-ops. Only configuration
//! mistakes and invalid lifecycle transitions surface as [`SimError`].

use thiserror::Error;

use crate::device::DeviceState;
use crate::firmware::MemoryArea;
use crate::peripheral::PeripheralId;
use crate::types::{CtlId, IntVect, RegAddr};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("I/O register 0x{addr:04X} already claimed by peripheral {owner}")]
    RegisterCollision { addr: RegAddr, owner: PeripheralId },

    #[error("I/O register 0x{0:04X} is outside the I/O space")]
    RegisterOutOfRange(RegAddr),

    #[error("pin '{0}' not found")]
    PinNotFound(String),

    #[error("the reset vector cannot be registered")]
    ResetVector,

    #[error("interrupt vector {0} out of range")]
    VectorOutOfRange(IntVect),

    #[error("interrupt vector {0} already registered")]
    VectorAlreadyRegistered(IntVect),

    #[error("peripheral '{0}' not found")]
    PeripheralNotFound(CtlId),

    #[error("operation not allowed in device state {0:?}")]
    InvalidState(DeviceState),

    #[error("firmware has no program to load")]
    NoProgram,

    #[error("firmware {0:?} blocks do not fit in the device memory")]
    ProgramFailed(MemoryArea),

    #[error("firmware MCU frequency not defined")]
    NoFrequency,

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

pub type SimResult<T> = Result<T, SimError>;
