//! Ready-made device assemblies.
//!
//! Each builder returns a device in the `Limbo` state with its peripherals
//! attached. More peripherals can be attached before calling `init`.

use crate::device::{Device, DeviceConfig};
use crate::error::SimResult;
use crate::peripherals::{
    AcpChannel, AcpConfig, AnalogComparator, ClassicPort, ClassicPortConfig, Mega0Port, Mega0PortConfig, Vref,
    VrefConfig,
};
use crate::peripherals::vref::User;
use crate::types::{IntVect, RegAddr};

// ─── ATmega4809 ─────────────────────────────────────────────────────────────

/// Port letter, pin count and PORT vector.
const M4809_PORTS: [(char, u8, IntVect); 6] = [
    ('A', 8, 6),
    ('B', 6, 34),
    ('C', 8, 24),
    ('D', 8, 20),
    ('E', 4, 35),
    ('F', 7, 29),
];

pub const M4809_VREF_BASE: RegAddr = 0x00A0;
pub const M4809_AC0_BASE: RegAddr = 0x0680;
pub const M4809_IV_AC0: IntVect = 21;

fn port_pins(ports: &[(char, u8)]) -> Vec<String> {
    ports
        .iter()
        .flat_map(|&(letter, count)| (0..count).map(move |i| format!("P{}{}", letter, i)))
        .collect()
}

/// megaAVR 0-series flagship: ports A to F with their VPORT mirrors, VREF, AC0.
pub fn atmega4809() -> SimResult<Device> {
    let pins: Vec<(char, u8)> = M4809_PORTS.iter().map(|&(l, n, _)| (l, n)).collect();
    let mut dev = Device::new(DeviceConfig {
        name: "atmega4809".into(),
        pins: port_pins(&pins),
        io_end: 0x0FFF,
        vector_count: 40,
        flash_size: 48 * 1024,
        fuse_size: 10,
        eeprom_size: 256,
    });

    for (i, &(letter, _, iv)) in M4809_PORTS.iter().enumerate() {
        let config = Mega0PortConfig {
            reg_base_port: 0x0400 + 0x20 * i as RegAddr,
            reg_base_vport: 4 * i as RegAddr,
            iv_port: iv,
        };
        dev.attach_peripheral(Box::new(Mega0Port::new(letter, config)))?;
    }

    // VREF first: the comparator subscribes to its signal at init
    dev.attach_peripheral(Box::new(Vref::new(VrefConfig { reg_base: M4809_VREF_BASE })))?;
    dev.attach_peripheral(Box::new(AnalogComparator::new(
        0,
        AcpConfig {
            pos_channels: vec![
                AcpChannel::pin(0, "PD2"),
                AcpChannel::pin(1, "PD4"),
                AcpChannel::pin(2, "PD6"),
                AcpChannel::pin(3, "PD1"),
            ],
            neg_channels: vec![
                AcpChannel::pin(0, "PD3"),
                AcpChannel::pin(1, "PD5"),
                AcpChannel::pin(2, "PD7"),
                AcpChannel::dac(3),
            ],
            vref_channel: User::Acp as u32,
            reg_base: M4809_AC0_BASE,
            iv_cmp: M4809_IV_AC0,
        },
    )))?;
    Ok(dev)
}

// ─── ATmega328P ─────────────────────────────────────────────────────────────

/// Port letter, pin count and PINx address.
const M328P_PORTS: [(char, u8, RegAddr); 3] = [('B', 8, 0x23), ('C', 7, 0x26), ('D', 8, 0x29)];

/// Classic core: ports B, C and D.
pub fn atmega328p() -> SimResult<Device> {
    let pins: Vec<(char, u8)> = M328P_PORTS.iter().map(|&(l, n, _)| (l, n)).collect();
    let mut dev = Device::new(DeviceConfig {
        name: "atmega328p".into(),
        pins: port_pins(&pins),
        io_end: 0x00FF,
        vector_count: 26,
        flash_size: 32 * 1024,
        fuse_size: 3,
        eeprom_size: 1024,
    });
    for &(letter, _, reg_pin) in M328P_PORTS.iter() {
        dev.attach_peripheral(Box::new(ClassicPort::new(letter, ClassicPortConfig { reg_pin })))?;
    }
    Ok(dev)
}
