// Licensed under the Apache-2.0 license

//! FIFO ownership queue for a shared bus.
//!
//! The head of the queue is the active device; everyone behind it is waiting.
//! This module only keeps the queue. Programming the target address and
//! calling the ready notification is done by [`crate::i2c::bus::I2cBus`]
//! inside its critical section.
//!
//! The queue is a plain array of `Copy` entries. Having no drop glue lets a
//! bus be borrowed for the same `'a` as the notifications it stores.

use crate::i2c::bus::BusEvent;
use crate::i2c::device::{BusDevice, DeviceId};

/// Result of asking for the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestOutcome {
    /// The caller owns the bus now.
    Active,
    /// The caller is queued; its ready notification fires on promotion.
    Deferred,
    /// The request was refused (queue full or unusable device).
    Invalid,
}

/// Result of giving the bus back.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReleaseOutcome {
    /// The device left the queue.
    Removed,
    /// The device is active and a transfer is still in flight. Nothing changed.
    Pending,
    /// The device was not queued.
    NotOwner,
}

#[derive(Copy, Clone)]
pub(crate) struct QueueEntry<'a> {
    pub device: BusDevice,
    pub ready: Option<&'a dyn BusEvent>,
}

/// How a request was admitted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Inserted into an empty queue.
    Activated,
    /// Already at the head.
    AlreadyActive,
    /// Inserted behind another device.
    Queued,
    /// Already waiting.
    Waiting,
    Rejected,
}

impl Admission {
    pub(crate) const fn outcome(self) -> RequestOutcome {
        match self {
            Self::Activated | Self::AlreadyActive => RequestOutcome::Active,
            Self::Queued | Self::Waiting => RequestOutcome::Deferred,
            Self::Rejected => RequestOutcome::Invalid,
        }
    }
}

/// How a release left the queue.
pub(crate) enum Departure<'a> {
    NotQueued,
    /// Active with a transfer in flight.
    Busy,
    /// A waiting device withdrew; the head is unchanged.
    Withdrawn,
    /// The head left. Carries the promoted device and its ready notification,
    /// which is handed out exactly once.
    Retired(Option<(BusDevice, Option<&'a dyn BusEvent>)>),
}

pub(crate) struct Arbiter<'a, const N: usize> {
    /// Entries `0..len` are occupied, the rest are `None`.
    slots: [Option<QueueEntry<'a>>; N],
    len: usize,
}

impl<'a, const N: usize> Arbiter<'a, N> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [None; N],
            len: 0,
        }
    }

    fn entries(&self) -> impl Iterator<Item = &QueueEntry<'a>> {
        self.slots.iter().flatten()
    }

    fn head_mut(&mut self) -> Option<&mut QueueEntry<'a>> {
        self.slots.first_mut().and_then(Option::as_mut)
    }

    fn push(&mut self, entry: QueueEntry<'a>) -> bool {
        match self.slots.get_mut(self.len) {
            Some(slot) => {
                *slot = Some(entry);
                self.len += 1;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, index: usize) {
        if let Some(tail) = self.slots.get_mut(index..self.len) {
            tail.rotate_left(1);
            if let Some(last) = tail.last_mut() {
                *last = None;
                self.len -= 1;
            }
        }
    }

    pub(crate) fn request(
        &mut self,
        device: BusDevice,
        ready: Option<&'a dyn BusEvent>,
    ) -> Admission {
        match self.position(device.id()) {
            Some(0) => Admission::AlreadyActive,
            Some(_) => Admission::Waiting,
            None => {
                let was_empty = self.len == 0;
                if !self.push(QueueEntry { device, ready }) {
                    Admission::Rejected
                } else if was_empty {
                    Admission::Activated
                } else {
                    Admission::Queued
                }
            }
        }
    }

    /// `busy` reports whether the head still has a transfer on the wire.
    pub(crate) fn release(&mut self, id: DeviceId, busy: bool) -> Departure<'a> {
        match self.position(id) {
            None => Departure::NotQueued,
            Some(0) if busy => Departure::Busy,
            Some(0) => {
                self.remove(0);
                let next = self
                    .head_mut()
                    .map(|head| (head.device, head.ready.take()));
                Departure::Retired(next)
            }
            Some(index) => {
                self.remove(index);
                Departure::Withdrawn
            }
        }
    }

    pub(crate) fn position(&self, id: DeviceId) -> Option<usize> {
        self.entries().position(|entry| entry.device.id() == id)
    }

    pub(crate) fn active(&self) -> Option<BusDevice> {
        self.entries().next().map(|entry| entry.device)
    }

    pub(crate) fn is_active(&self, id: DeviceId) -> bool {
        self.active().is_some_and(|device| device.id() == id)
    }

    /// Record a new address for the head entry.
    pub(crate) fn update_active_address(&mut self, device: BusDevice) -> bool {
        match self.head_mut() {
            Some(head) if head.device.id() == device.id() => {
                head.device = device;
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> std::vec::Vec<DeviceId> {
        self.entries().map(|entry| entry.device.id()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn dev(id: u8) -> BusDevice {
        BusDevice::new(DeviceId::new(id), 0x60 + u16::from(id))
    }

    #[test]
    fn test_first_request_activates() {
        let mut arbiter: Arbiter<'_, 4> = Arbiter::new();
        assert_eq!(arbiter.request(dev(0), None), Admission::Activated);
        assert_eq!(arbiter.request(dev(0), None), Admission::AlreadyActive);
        assert_eq!(arbiter.request(dev(1), None), Admission::Queued);
        assert_eq!(arbiter.request(dev(1), None), Admission::Waiting);
        assert_eq!(arbiter.ids(), [DeviceId::new(0), DeviceId::new(1)]);
        assert!(arbiter.is_active(DeviceId::new(0)));
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut arbiter: Arbiter<'_, 2> = Arbiter::new();
        arbiter.request(dev(0), None);
        arbiter.request(dev(1), None);
        assert_eq!(arbiter.request(dev(2), None), Admission::Rejected);
        assert_eq!(Admission::Rejected.outcome(), RequestOutcome::Invalid);
    }

    #[test]
    fn test_busy_head_is_not_removed() {
        let mut arbiter: Arbiter<'_, 4> = Arbiter::new();
        arbiter.request(dev(0), None);
        arbiter.request(dev(1), None);
        assert!(matches!(
            arbiter.release(DeviceId::new(0), true),
            Departure::Busy
        ));
        assert_eq!(arbiter.ids(), [DeviceId::new(0), DeviceId::new(1)]);
    }

    #[test]
    fn test_waiting_device_withdraws() {
        let mut arbiter: Arbiter<'_, 4> = Arbiter::new();
        arbiter.request(dev(0), None);
        arbiter.request(dev(1), None);
        arbiter.request(dev(2), None);
        assert!(matches!(
            arbiter.release(DeviceId::new(1), true),
            Departure::Withdrawn
        ));
        assert_eq!(arbiter.ids(), [DeviceId::new(0), DeviceId::new(2)]);
        assert!(matches!(
            arbiter.release(DeviceId::new(7), false),
            Departure::NotQueued
        ));
    }

    #[test]
    fn test_retire_promotes_next() {
        let mut arbiter: Arbiter<'_, 4> = Arbiter::new();
        arbiter.request(dev(0), None);
        arbiter.request(dev(1), None);
        match arbiter.release(DeviceId::new(0), false) {
            Departure::Retired(Some((next, _))) => assert_eq!(next, dev(1)),
            _ => panic!("head should retire"),
        }
        assert!(arbiter.is_active(DeviceId::new(1)));
        assert!(matches!(
            arbiter.release(DeviceId::new(1), false),
            Departure::Retired(None)
        ));
        assert_eq!(arbiter.active(), None);
    }

    #[test]
    fn test_address_update_only_for_head() {
        let mut arbiter: Arbiter<'_, 4> = Arbiter::new();
        arbiter.request(dev(0), None);
        arbiter.request(dev(1), None);
        assert!(!arbiter.update_active_address(dev(1).with_address(0x67)));
        assert!(arbiter.update_active_address(dev(0).with_address(0x65)));
        assert_eq!(arbiter.active().map(|d| d.address()), Some(0x65));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Request(u8),
        Release(u8, bool),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Request),
            (0u8..6, any::<bool>()).prop_map(|(id, busy)| Op::Release(id, busy)),
        ]
    }

    proptest! {
        /// The queue behaves like a FIFO of unique devices whose head is the
        /// only active device.
        #[test]
        fn queue_matches_fifo_model(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut arbiter: Arbiter<'_, 4> = Arbiter::new();
            let mut model: VecDeque<u8> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Request(id) => {
                        let admission = arbiter.request(dev(id), None);
                        if !model.contains(&id) {
                            if model.len() < 4 {
                                model.push_back(id);
                            } else {
                                prop_assert_eq!(admission, Admission::Rejected);
                            }
                        }
                        let front = model.front() == Some(&id);
                        if model.contains(&id) {
                            prop_assert_eq!(admission.outcome() == RequestOutcome::Active, front);
                        }
                    }
                    Op::Release(id, busy) => {
                        let departure = arbiter.release(DeviceId::new(id), busy);
                        match model.iter().position(|&m| m == id) {
                            None => prop_assert!(matches!(departure, Departure::NotQueued)),
                            Some(0) if busy => prop_assert!(matches!(departure, Departure::Busy)),
                            Some(index) => {
                                model.remove(index);
                                prop_assert!(!matches!(departure, Departure::NotQueued | Departure::Busy));
                            }
                        }
                    }
                }

                let ids: std::vec::Vec<u8> = model.iter().copied().collect();
                let expected: std::vec::Vec<DeviceId> = ids.iter().map(|&id| DeviceId::new(id)).collect();
                prop_assert_eq!(arbiter.ids(), expected);
                let active_count = (0u8..6).filter(|&id| arbiter.is_active(DeviceId::new(id))).count();
                prop_assert_eq!(active_count, usize::from(!model.is_empty()));
            }
        }
    }
}
