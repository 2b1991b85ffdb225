//! Device pins.
//!
//! A pin is driven from two sides: the MCU side (`internal`, set by the port
//! peripherals) and the board side (`external`, set by the test bench or by
//! a wire from another pin). The published state is the resolution of both.
//!
//! | internal \ external | Floating | PullUp | PullDown | High | Low | Analog |
//! |---------------------|----------|--------|----------|------|-----|--------|
//! | Floating            | Floating | PullUp | PullDown | High | Low | Analog |
//! | PullUp              | PullUp   | PullUp | Floating | High | Low | Analog |
//! | High                | High     | High   | High     | High | Shorted | High |
//! | Low                 | Low      | Low    | Low      | Shorted | Low | Low |
//!
//! Every pin owns a signal raised with:
//! - [`SIG_DIGITAL_STATE`] when the resolved state changes,
//! - [`SIG_VOLTAGE`] when the resolved voltage (ratio of VCC) changes,
//! - [`SIG_DRIVE`] when the internal drive changes (used by wires).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signal::SignalId;
use crate::types::str_to_id;

pub const SIG_DIGITAL_STATE: u16 = 0;
pub const SIG_VOLTAGE: u16 = 1;
pub const SIG_DRIVE: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PinState {
    #[default]
    Floating,
    PullDown,
    PullUp,
    Analog,
    High,
    Low,
    Shorted,
}

impl PinState {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> PinState {
        match code {
            1 => PinState::PullDown,
            2 => PinState::PullUp,
            3 => PinState::Analog,
            4 => PinState::High,
            5 => PinState::Low,
            6 => PinState::Shorted,
            _ => PinState::Floating,
        }
    }

    /// Logic level used for input sensing: only a driven High reads as 1.
    pub fn level(self) -> bool {
        self == PinState::High
    }

    pub fn is_driven(self) -> bool {
        matches!(self, PinState::High | PinState::Low)
    }

    pub fn name(self) -> &'static str {
        match self {
            PinState::Floating => "Floating",
            PinState::PullDown => "PullDown",
            PinState::PullUp => "PullUp",
            PinState::Analog => "Analog",
            PinState::High => "High",
            PinState::Low => "Low",
            PinState::Shorted => "Shorted",
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve the internal and external drives into the published state.
pub fn resolve(internal: PinState, external: PinState) -> PinState {
    use PinState::*;
    // An internal analog drive is not modelled and behaves as released
    let internal = if internal == Analog { Floating } else { internal };
    match (internal, external) {
        (Shorted, _) | (_, Shorted) => Shorted,
        (High, Low) | (Low, High) => Shorted,
        (High, _) | (Low, _) => internal,
        (_, High) | (_, Low) | (_, Analog) => external,
        (PullUp, PullDown) | (PullDown, PullUp) => Floating,
        (Floating, ext) => ext,
        (int, _) => int,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinId(pub u32);

impl PinId {
    pub fn from_name(name: &str) -> Self {
        PinId(str_to_id(name))
    }
}

/// What changed after a drive update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinChange {
    pub state: bool,
    pub voltage: bool,
}

#[derive(Debug, Clone)]
pub struct Pin {
    id: PinId,
    name: String,
    internal: PinState,
    external: PinState,
    external_voltage: f64,
    state: PinState,
    voltage: f64,
    signal: SignalId,
}

impl Pin {
    pub fn new(name: &str, signal: SignalId) -> Self {
        Pin {
            id: PinId::from_name(name),
            name: name.to_string(),
            internal: PinState::Floating,
            external: PinState::Floating,
            external_voltage: 0.0,
            state: PinState::Floating,
            voltage: 0.5,
            signal,
        }
    }

    pub fn id(&self) -> PinId { self.id }
    pub fn name(&self) -> &str { &self.name }
    pub fn signal(&self) -> SignalId { self.signal }
    pub fn state(&self) -> PinState { self.state }
    pub fn internal_state(&self) -> PinState { self.internal }
    pub fn external_state(&self) -> PinState { self.external }
    /// Voltage as a ratio of VCC.
    pub fn voltage(&self) -> f64 { self.voltage }
    pub fn external_voltage(&self) -> f64 { self.external_voltage }

    /// Returns false if the drive was already `state`.
    pub fn set_internal(&mut self, state: PinState) -> bool {
        if self.internal == state {
            return false;
        }
        self.internal = state;
        true
    }

    pub fn set_external(&mut self, state: PinState, voltage: f64) {
        self.external = state;
        self.external_voltage = voltage.clamp(0.0, 1.0);
    }

    /// Recompute the published state and voltage from both drives.
    pub fn update(&mut self) -> PinChange {
        let state = resolve(self.internal, self.external);
        let voltage = match state {
            PinState::High | PinState::PullUp => 1.0,
            PinState::Low | PinState::PullDown => 0.0,
            PinState::Floating | PinState::Shorted => 0.5,
            PinState::Analog => self.external_voltage,
        };
        let change = PinChange { state: state != self.state, voltage: voltage != self.voltage };
        self.state = state;
        self.voltage = voltage;
        change
    }
}

/// Device-owned pin storage, addressed by [`PinId`].
#[derive(Debug, Clone, Default)]
pub struct PinRegistry {
    pins: Vec<Pin>,
    index: HashMap<PinId, usize>,
}

impl PinRegistry {
    pub fn new() -> Self {
        PinRegistry::default()
    }

    pub fn add(&mut self, pin: Pin) -> PinId {
        let id = pin.id();
        if let Some(&i) = self.index.get(&id) {
            self.pins[i] = pin;
        } else {
            self.index.insert(id, self.pins.len());
            self.pins.push(pin);
        }
        id
    }

    pub fn find(&self, name: &str) -> Option<PinId> {
        let id = PinId::from_name(name);
        self.index.contains_key(&id).then_some(id)
    }

    pub fn get(&self, id: PinId) -> Option<&Pin> {
        self.index.get(&id).map(|&i| &self.pins[i])
    }

    pub fn get_mut(&mut self, id: PinId) -> Option<&mut Pin> {
        match self.index.get(&id) {
            Some(&i) => self.pins.get_mut(i),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pin> {
        self.pins.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PinState::*;

    #[test]
    fn test_resolve_table() {
        assert_eq!(resolve(Floating, Floating), Floating);
        assert_eq!(resolve(PullUp, Floating), PullUp);
        assert_eq!(resolve(PullUp, PullDown), Floating);
        assert_eq!(resolve(PullUp, Low), Low);
        assert_eq!(resolve(High, PullDown), High);
        assert_eq!(resolve(High, Low), Shorted);
        assert_eq!(resolve(Low, High), Shorted);
        assert_eq!(resolve(High, High), High);
        assert_eq!(resolve(Floating, Analog), Analog);
        assert_eq!(resolve(Low, Analog), Low);
        assert_eq!(resolve(Analog, PullUp), PullUp);
    }

    #[test]
    fn test_state_codes() {
        for s in [Floating, PullDown, PullUp, Analog, High, Low, Shorted] {
            assert_eq!(PinState::from_code(s.code()), s);
        }
        assert!(High.level());
        assert!(!PullUp.level());
    }

    #[test]
    fn test_pin_update_reports_changes() {
        let mut pin = Pin::new("PA0", SignalId(0));
        assert!(pin.set_internal(High));
        assert!(!pin.set_internal(High));
        let c = pin.update();
        assert!(c.state && c.voltage);
        assert_eq!(pin.state(), High);
        assert_eq!(pin.voltage(), 1.0);
        assert_eq!(pin.update(), PinChange::default());

        pin.set_internal(Floating);
        pin.set_external(Analog, 0.3);
        pin.update();
        assert_eq!(pin.state(), Analog);
        assert!((pin.voltage() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_registry_lookup() {
        let mut reg = PinRegistry::new();
        let id = reg.add(Pin::new("PB3", SignalId(4)));
        assert_eq!(reg.find("PB3"), Some(id));
        assert_eq!(reg.find("PB4"), None);
        assert_eq!(reg.get(id).unwrap().name(), "PB3");
    }
}
