//! Device state snapshots.
//!
//! A [`DeviceSnapshot`] captures everything needed to put a device back to a
//! previous point: register file, pin drives, interrupt vector states,
//! EEPROM and the private state of each peripheral. Snapshots are kept in
//! memory, either as values or as compressed byte images from [`encode`].
//!
//! ## Image format
//!
//! ```text
//! +------------------+
//! | Magic "AVIO"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};

use crate::device::DeviceState;
use crate::error::{SimError, SimResult};
use crate::interrupt::VectorState;
use crate::memory::NonVolatileMemory;
use crate::peripheral::SleepMode;
use crate::pin::PinState;

/// Magic bytes identifying a snapshot image.
const MAGIC: &[u8; 4] = b"AVIO";

/// Current image format version.
const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinSnapshot {
    pub name: String,
    pub internal: PinState,
    pub external: PinState,
    pub external_voltage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Name of the device the snapshot was taken from.
    pub device: String,
    pub state: DeviceState,
    pub sleep_mode: SleepMode,
    pub reset_flags: u8,
    pub registers: Vec<u8>,
    pub pins: Vec<PinSnapshot>,
    pub interrupts: Vec<VectorState>,
    pub eeprom: NonVolatileMemory,
    /// Private state per peripheral slot, `None` for an empty slot.
    pub peripherals: Vec<Option<Vec<u8>>>,
}

/// Serialize and compress a snapshot.
pub fn encode(snap: &DeviceSnapshot) -> SimResult<Vec<u8>> {
    let payload = bincode::serialize(snap).map_err(|e| SimError::Snapshot(format!("serialize error: {}", e)))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode an image produced by [`encode`].
pub fn decode(data: &[u8]) -> SimResult<DeviceSnapshot> {
    if data.len() < HEADER_LEN {
        return Err(SimError::Snapshot("image too small".into()));
    }
    if &data[0..4] != MAGIC {
        return Err(SimError::Snapshot("bad magic".into()));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SimError::Snapshot(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let payload = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| SimError::Snapshot(format!("decompress error: {:?}", e)))?;
    bincode::deserialize(&payload).map_err(|e| SimError::Snapshot(format!("deserialize error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snap(flags: u8) -> DeviceSnapshot {
        DeviceSnapshot {
            device: "test".into(),
            state: DeviceState::Running,
            sleep_mode: SleepMode::Active,
            reset_flags: flags,
            registers: vec![0; 256],
            pins: vec![PinSnapshot {
                name: "PA0".into(),
                internal: PinState::High,
                external: PinState::Floating,
                external_voltage: 0.0,
            }],
            interrupts: vec![VectorState::Unused, VectorState::Idle],
            eeprom: NonVolatileMemory::new(16),
            peripherals: vec![None, Some(vec![1, 2, 3])],
        }
    }

    #[test]
    fn test_encode_decode() {
        let snap = make_snap(1);
        let image = encode(&snap).unwrap();
        assert_eq!(&image[0..4], MAGIC);
        // zero-filled register file compresses well
        assert!(image.len() < 256);
        assert_eq!(decode(&image).unwrap(), snap);
    }

    #[test]
    fn test_decode_rejects_bad_images() {
        let mut image = encode(&make_snap(1)).unwrap();
        assert!(decode(&image[..4]).is_err());
        image[4] = 9;
        assert!(matches!(decode(&image), Err(SimError::Snapshot(m)) if m.contains("version")));
        image[0] = b'X';
        assert!(matches!(decode(&image), Err(SimError::Snapshot(m)) if m.contains("magic")));
    }
}
