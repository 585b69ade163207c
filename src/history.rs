//! Bounded per-device time series.
//!
//! A [`HistoryStore`] owns one [`HistoryWindow`] per device slot. Slots are
//! allocated once, from the devices found at initialisation, and never
//! shrink. Each slot remembers the UUID of the device it was allocated for so
//! a re-enumerated device keeps writing into its own series.

use std::collections::VecDeque;

use crate::data::DeviceSnapshot;

/// Oldest-first sequence of snapshots capped at a fixed capacity.
#[derive(Clone, Debug)]
pub struct HistoryWindow {
    entries: VecDeque<DeviceSnapshot>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `snapshot`, evicting and returning the oldest entry when the
    /// window was already full.
    pub fn push(&mut self, snapshot: DeviceSnapshot) -> Option<DeviceSnapshot> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(snapshot);
        evicted
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn iter(&self) -> impl Iterator<Item = &DeviceSnapshot> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<DeviceSnapshot> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Clone, Debug)]
struct Slot {
    uuid: Option<String>,
    window: HistoryWindow,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryStore {
    slots: Vec<Slot>,
}

impl HistoryStore {
    /// One slot per entry of `bindings`, each bound to the UUID seen for that
    /// device at startup (`None` if it could not be read).
    pub fn new(bindings: Vec<Option<String>>, capacity: usize) -> Self {
        let slots = bindings
            .into_iter()
            .map(|uuid| Slot {
                uuid,
                window: HistoryWindow::new(capacity),
            })
            .collect();
        Self { slots }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Maps an enumerated device to its slot.
    ///
    /// A known UUID wins over enumeration order. Otherwise the ordinal is
    /// used, but only for a slot that was never bound to a UUID: a device
    /// whose UUID is unreadable this cycle is dropped rather than risk
    /// writing into another device's series.
    pub fn resolve(&self, uuid: Option<&str>, ordinal: u32) -> Option<u32> {
        if let Some(uuid) = uuid {
            if let Some(pos) = self
                .slots
                .iter()
                .position(|s| s.uuid.as_deref() == Some(uuid))
            {
                return Some(pos as u32);
            }
        }
        match self.slots.get(ordinal as usize) {
            Some(slot) if slot.uuid.is_none() => Some(ordinal),
            _ => None,
        }
    }

    /// Appends to the slot's window. Unknown slots are ignored.
    pub fn append(&mut self, slot: u32, snapshot: DeviceSnapshot) {
        if let Some(slot) = self.slots.get_mut(slot as usize) {
            slot.window.push(snapshot);
        }
    }

    #[cfg(test)]
    fn window(&self, slot: u32) -> Option<&HistoryWindow> {
        self.slots.get(slot as usize).map(|s| &s.window)
    }

    /// Copies every window, oldest-first, indexed by slot.
    pub fn to_vecs(&self) -> Vec<Vec<DeviceSnapshot>> {
        self.slots.iter().map(|s| s.window.to_vec()).collect()
    }
}
