use std::sync::Arc;
use std::time::Duration;

use media_bus::VideoFrame;
use parking_lot::{Condvar, Mutex};

use crate::{
    error::{ConfigurationError, ExchangeError},
    running::RunningFlag,
};

/// Upper bound on how long a blocked `fetch` goes without looking at the
/// running flag.
pub const FETCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a consumer gets out of a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue<T> {
    Frame(T),
    /// No more data. The consumer checks the running flag and exits.
    Stop,
}

impl<T> SlotValue<T> {
    pub fn is_stop(&self) -> bool {
        matches!(self, SlotValue::Stop)
    }

    pub fn into_frame(self) -> Option<T> {
        match self {
            SlotValue::Frame(v) => Some(v),
            SlotValue::Stop => None,
        }
    }
}

struct Slot<T> {
    value: Mutex<Option<SlotValue<T>>>,
    ready: Condvar,
}

/// Single-slot, newest-wins handoff cells between the capture thread and the
/// pipeline threads, one per device.
///
/// A `put` replaces any value not yet fetched. A `fetch` takes the value out,
/// so each put is observed at most once.
pub struct FrameExchange<T = Arc<VideoFrame>> {
    slots: Vec<Slot<T>>,
    running: RunningFlag,
}

impl<T> FrameExchange<T> {
    pub fn new(slot_count: usize, running: RunningFlag) -> Result<Self, ConfigurationError> {
        if slot_count == 0 {
            return Err(ConfigurationError::new("frame exchange needs at least one slot"));
        }
        let slots = (0..slot_count)
            .map(|_| Slot {
                value: Mutex::new(None),
                ready: Condvar::new(),
            })
            .collect();
        Ok(Self { slots, running })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&Slot<T>, ExchangeError> {
        self.slots.get(index).ok_or(ExchangeError::SlotOutOfRange {
            slot: index,
            len: self.slots.len(),
        })
    }

    pub fn put(&self, index: usize, value: T) -> Result<(), ExchangeError> {
        let slot = self.slot(index)?;
        *slot.value.lock() = Some(SlotValue::Frame(value));
        slot.ready.notify_one();
        Ok(())
    }

    /// Blocks until a value has been put since the last fetch. Returns
    /// [`SlotValue::Stop`] once the running flag is false, within
    /// [`FETCH_POLL_INTERVAL`] even if nobody calls [`FrameExchange::shutdown`].
    pub fn fetch(&self, index: usize) -> Result<SlotValue<T>, ExchangeError> {
        let slot = self.slot(index)?;
        let mut value = slot.value.lock();
        loop {
            if !self.running.is_running() {
                return Ok(SlotValue::Stop);
            }
            if let Some(v) = value.take() {
                return Ok(v);
            }
            slot.ready.wait_for(&mut value, FETCH_POLL_INTERVAL);
        }
    }

    /// Puts the stop sentinel into every slot and wakes every waiter.
    pub fn shutdown(&self) {
        for slot in &self.slots {
            *slot.value.lock() = Some(SlotValue::Stop);
            slot.ready.notify_all();
        }
    }
}

#[cfg(test)]
#[path = "exchange_test.rs"]
mod exchange_test;
