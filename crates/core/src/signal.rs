//! Signal/hook publish-subscribe bus.
//!
//! A [`Signal`] keeps an ordered list of subscribed hooks, each with a tag
//! chosen by the subscriber (a port uses the pin bit number). Raising a
//! signal stores the payload and appends one [`Notification`] per hook to
//! the delivery list. The list only lives for the duration of the raising
//! call: [`Ctx`](crate::peripheral::Ctx) and the device hand every entry to
//! its hook before that call returns.
//!
//! A peripheral cannot be re-entered while one of its handlers runs. A
//! notification for such a busy hook is parked with [`SignalBus::defer`]
//! and delivered as soon as the handler returns.
//!
//! Hooks are plain identifiers ([`HookId`]), never references.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::peripheral::PeripheralId;
use crate::types::VarData;

/// Index of a signal owned by the [`SignalBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u32);

/// Subscriber of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookId {
    /// A peripheral attached to the device.
    Peripheral(PeripheralId),
    /// A recording probe (see [`SignalProbe`]).
    Probe(usize),
    /// A pin-to-pin wire.
    Wire(usize),
}

/// Payload of one raise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalData {
    pub sigid: u16,
    pub index: u32,
    pub data: VarData,
}

/// One delivery to one hook.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Notification {
    pub signal: SignalId,
    pub hook: HookId,
    pub tag: u32,
    pub data: SignalData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HookSlot {
    hook: HookId,
    tag: u32,
}

#[derive(Debug, Default)]
pub struct Signal {
    hooks: Vec<HookSlot>,
    last: Option<SignalData>,
    last_by_sigid: BTreeMap<u16, SignalData>,
}

impl Signal {
    fn hook_index(&self, hook: HookId) -> Option<usize> {
        self.hooks.iter().position(|s| s.hook == hook)
    }
}

pub struct SignalBus {
    signals: Vec<Signal>,
    pending: VecDeque<Notification>,
    deferred: VecDeque<Notification>,
}

impl SignalBus {
    pub fn new() -> Self {
        SignalBus { signals: Vec::new(), pending: VecDeque::new(), deferred: VecDeque::new() }
    }

    pub fn new_signal(&mut self) -> SignalId {
        self.signals.push(Signal::default());
        SignalId((self.signals.len() - 1) as u32)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Subscribe `hook` with `tag`. A hook already subscribed is left as is.
    pub fn connect(&mut self, sig: SignalId, hook: HookId, tag: u32) {
        if let Some(s) = self.signals.get_mut(sig.0 as usize) {
            if s.hook_index(hook).is_none() {
                s.hooks.push(HookSlot { hook, tag });
            }
        }
    }

    /// Unsubscribe `hook`. Deliveries from `sig` not yet made to it are dropped.
    pub fn disconnect(&mut self, sig: SignalId, hook: HookId) {
        if let Some(s) = self.signals.get_mut(sig.0 as usize) {
            if let Some(i) = s.hook_index(hook) {
                s.hooks.remove(i);
            }
        }
        let keep = |n: &Notification| n.signal != sig || n.hook != hook;
        self.pending.retain(keep);
        self.deferred.retain(keep);
    }

    /// Remove `hook` from every signal and drop its outstanding deliveries.
    pub fn disconnect_all(&mut self, hook: HookId) {
        for s in self.signals.iter_mut() {
            s.hooks.retain(|slot| slot.hook != hook);
        }
        self.pending.retain(|n| n.hook != hook);
        self.deferred.retain(|n| n.hook != hook);
    }

    pub fn is_connected(&self, sig: SignalId, hook: HookId) -> bool {
        self.signals
            .get(sig.0 as usize)
            .map_or(false, |s| s.hook_index(hook).is_some())
    }

    pub fn hook_count(&self, sig: SignalId) -> usize {
        self.signals.get(sig.0 as usize).map_or(0, |s| s.hooks.len())
    }

    pub fn raise(&mut self, sig: SignalId, data: SignalData) {
        let Some(s) = self.signals.get_mut(sig.0 as usize) else { return };
        s.last = Some(data);
        s.last_by_sigid.insert(data.sigid, data);
        for slot in &s.hooks {
            self.pending.push_back(Notification { signal: sig, hook: slot.hook, tag: slot.tag, data });
        }
    }

    pub fn raise_u(&mut self, sig: SignalId, sigid: u16, index: u32, u: u32) {
        self.raise(sig, SignalData { sigid, index, data: VarData::Uint(u) });
    }

    pub fn raise_d(&mut self, sig: SignalId, sigid: u16, index: u32, d: f64) {
        self.raise(sig, SignalData { sigid, index, data: VarData::Double(d) });
    }

    /// Last payload raised on `sig`, whatever its sigid.
    pub fn data(&self, sig: SignalId) -> Option<SignalData> {
        self.signals.get(sig.0 as usize).and_then(|s| s.last)
    }

    /// Last payload raised on `sig` with the given sigid.
    pub fn data_of(&self, sig: SignalId, sigid: u16) -> Option<SignalData> {
        self.signals
            .get(sig.0 as usize)
            .and_then(|s| s.last_by_sigid.get(&sigid).copied())
    }

    pub fn next_notification(&mut self) -> Option<Notification> {
        self.pending.pop_front()
    }

    /// Length of the delivery list, used as a mark before a raising call.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Take the deliveries appended since `mark`, in raise order.
    pub fn take_since(&mut self, mark: usize) -> VecDeque<Notification> {
        if mark >= self.pending.len() {
            return VecDeque::new();
        }
        self.pending.split_off(mark)
    }

    /// Park a delivery for a hook whose handler is running.
    pub fn defer(&mut self, n: Notification) {
        self.deferred.push_back(n);
    }

    /// Oldest parked delivery for `hook`.
    pub fn take_deferred(&mut self, hook: HookId) -> Option<Notification> {
        let i = self.deferred.iter().position(|n| n.hook == hook)?;
        self.deferred.remove(i)
    }

    pub fn deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Drop every outstanding delivery, parked ones included.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
        self.deferred.clear();
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Records the raises of the signal it is connected to.
///
/// Diagnostic and test helper. The history is unbounded unless a limit is
/// set, in which case the oldest entries are dropped first.
#[derive(Debug, Clone, Default)]
pub struct SignalProbe {
    pub signal: Option<SignalId>,
    history: Vec<SignalData>,
    limit: Option<usize>,
}

impl SignalProbe {
    pub fn new(signal: SignalId) -> Self {
        SignalProbe { signal: Some(signal), history: Vec::new(), limit: None }
    }

    /// Keep at most `limit` entries.
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
        self.trim();
    }

    pub fn record(&mut self, data: SignalData) {
        self.history.push(data);
        self.trim();
    }

    fn trim(&mut self) {
        if let Some(limit) = self.limit {
            if self.history.len() > limit {
                let excess = self.history.len() - limit;
                self.history.drain(..excess);
            }
        }
    }

    pub fn history(&self) -> &[SignalData] {
        &self.history
    }

    /// Recorded payloads with the given sigid.
    pub fn values(&self, sigid: u16) -> impl Iterator<Item = &VarData> + '_ {
        self.history.iter().filter(move |d| d.sigid == sigid).map(|d| &d.data)
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
