use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::diagnostics::stats::{DeliveryStats, DeliverySnapshot};

/// Largest sample the slot will allocate for: 512 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

/// Why the delivery callback refused a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("sample pointer was null")]
    NullPointer,

    #[error("could not allocate {0} bytes for the sample")]
    OutOfMemory(usize),
}

/// Reusable pixel storage for captured samples.
///
/// Storage only grows: a larger sample releases the old allocation and
/// allocates exactly the new size, a smaller one is copied into the existing
/// allocation. `len() <= capacity()` always.
pub struct FrameBuffer {
    data: Vec<u8>,
    length: usize,
    timestamp: f64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            length: 0,
            timestamp: 0.0,
        }
    }

    /// Bytes of storage currently allocated.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes of the last stored sample.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Sample time of the last stored sample, in seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.length]
    }

    /// Copy `sample` in, growing storage if needed.
    ///
    /// Allocation is fallible; samples above `max_bytes` are treated as an
    /// allocation failure. On failure `len()` is zero.
    pub fn store(
        &mut self,
        timestamp: f64,
        sample: &[u8],
        max_bytes: usize,
    ) -> Result<(), DeliveryError> {
        let needed = sample.len();
        if self.data.len() < needed {
            self.data = Vec::new();
        }

        self.timestamp = timestamp;

        if self.data.is_empty() {
            let mut data = Vec::new();
            if needed > max_bytes || data.try_reserve_exact(needed).is_err() {
                self.length = 0;
                return Err(DeliveryError::OutOfMemory(needed));
            }
            data.extend_from_slice(sample);
            self.data = data;
        } else {
            self.data[..needed].copy_from_slice(sample);
        }

        self.length = needed;
        Ok(())
    }

    /// Forget the last sample, keeping the allocation.
    fn clear(&mut self) {
        self.length = 0;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// How a wait on the slot ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// A sample was delivered (or its copy failed).
    Delivered,
    /// The stream completed without a delivery.
    Completed,
    TimedOut,
}

/// Slot state guarded by the slot mutex.
pub struct SlotState {
    buffer: FrameBuffer,
    deliveries: u32,
    completed: bool,
    last_error: Option<DeliveryError>,
    stats: DeliveryStats,
    max_frame_bytes: usize,
}

impl SlotState {
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }

    /// Deliveries since the slot was last armed, failed copies included.
    pub fn deliveries(&self) -> u32 {
        self.deliveries
    }

    pub fn last_error(&self) -> Option<DeliveryError> {
        self.last_error
    }

    pub fn stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }
}

/// Hand-off point between the runtime's delivery thread and the caller.
///
/// The delivery callback writes under the slot mutex and signals the
/// condition variable; the caller only reads after the graph has stopped.
/// One slot belongs to one capture session and is reused across captures.
pub struct FrameSlot {
    state: Mutex<SlotState>,
    signal: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                buffer: FrameBuffer::new(),
                deliveries: 0,
                completed: false,
                last_error: None,
                stats: DeliveryStats::new(),
                max_frame_bytes,
            }),
            signal: Condvar::new(),
        }
    }

    /// Prepare for a new capture: drop the previous sample (keeping its
    /// allocation) and reset per-capture bookkeeping.
    pub fn arm(&self) {
        let mut state = self.state.lock();
        state.buffer.clear();
        state.deliveries = 0;
        state.completed = false;
        state.last_error = None;
        state.stats.reset();
    }

    /// Delivery callback body. Runs on the runtime's streaming thread, so it
    /// never logs or blocks beyond the slot mutex.
    ///
    /// `None` stands for a null sample pointer and leaves the buffer alone.
    pub fn deliver(&self, timestamp: f64, sample: Option<&[u8]>) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();

        let Some(sample) = sample else {
            state.stats.record_rejected();
            return Err(DeliveryError::NullPointer);
        };

        let max_bytes = state.max_frame_bytes;
        let result = state.buffer.store(timestamp, sample, max_bytes);
        match result {
            Ok(()) => state.stats.record_delivery(sample.len(), timestamp),
            Err(e) => {
                state.stats.record_failure();
                state.last_error = Some(e);
            }
        }
        state.deliveries += 1;
        drop(state);

        self.signal.notify_all();
        result
    }

    /// Mark the stream as finished; wakes waiters even if nothing arrived.
    pub fn complete(&self) {
        self.state.lock().completed = true;
        self.signal.notify_all();
    }

    /// Block until a delivery, stream completion, or `timeout` (unbounded
    /// when `None`).
    pub fn wait(&self, timeout: Option<Duration>) -> WaitResult {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.deliveries > 0 {
                return WaitResult::Delivered;
            }
            if state.completed {
                return WaitResult::Completed;
            }
            match deadline {
                None => self.signal.wait(&mut state),
                Some(deadline) => {
                    if self.signal.wait_until(&mut state, deadline).timed_out() {
                        return if state.deliveries > 0 {
                            WaitResult::Delivered
                        } else {
                            WaitResult::TimedOut
                        };
                    }
                }
            }
        }
    }

    /// Lock the slot for reading the captured sample.
    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn frame_buffer_starts_empty() {
        let buf = FrameBuffer::new();
        assert_eq!(buf.capacity(), 0);
        assert!(buf.is_empty());
        assert!(buf.as_slice().is_empty());
    }

    #[test]
    fn frame_buffer_allocates_exactly_the_sample_size() {
        let mut buf = FrameBuffer::new();
        buf.store(1.0, &[7u8; 64], usize::MAX).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.len(), 64);
        assert_eq!(buf.timestamp(), 1.0);
    }

    #[test]
    fn frame_buffer_capacity_only_grows() {
        let mut buf = FrameBuffer::new();
        buf.store(1.0, &[1u8; 64], usize::MAX).unwrap();
        buf.store(1.0, &[2u8; 32], usize::MAX).unwrap();

        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.len(), 32);
        assert_eq!(buf.as_slice(), &[2u8; 32]);
    }

    #[test]
    fn frame_buffer_reallocates_for_a_larger_sample() {
        let mut buf = FrameBuffer::new();
        buf.store(0.0, &[1u8; 16], usize::MAX).unwrap();
        buf.store(0.5, &[3u8; 48], usize::MAX).unwrap();
        assert_eq!(buf.capacity(), 48);
        assert_eq!(buf.as_slice(), &[3u8; 48]);
    }

    #[test]
    fn frame_buffer_allocation_failure_leaves_zero_length() {
        let mut buf = FrameBuffer::new();
        buf.store(0.0, &[1u8; 16], usize::MAX).unwrap();

        let err = buf.store(0.0, &[1u8; 32], 24).unwrap_err();
        assert_eq!(err, DeliveryError::OutOfMemory(32));
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn deliver_rejects_null_without_touching_the_buffer() {
        let slot = FrameSlot::new();
        slot.deliver(1.0, Some(&[5u8; 8])).unwrap();

        let err = slot.deliver(2.0, None).unwrap_err();
        assert_eq!(err, DeliveryError::NullPointer);

        let state = slot.lock();
        assert_eq!(state.buffer().as_slice(), &[5u8; 8]);
        assert_eq!(state.buffer().timestamp(), 1.0);
        assert_eq!(state.deliveries(), 1);
        assert_eq!(state.stats().rejected_count, 1);
    }

    #[test]
    fn deliver_twice_keeps_capacity_and_takes_the_new_length() {
        let slot = FrameSlot::new();
        slot.deliver(1.0, Some(&[1u8; 64])).unwrap();
        slot.deliver(1.0, Some(&[2u8; 32])).unwrap();

        let state = slot.lock();
        assert_eq!(state.buffer().capacity(), 64);
        assert_eq!(state.buffer().len(), 32);
        assert_eq!(state.deliveries(), 2);
    }

    #[test]
    fn deliver_records_out_of_memory() {
        let slot = FrameSlot::with_max_frame_bytes(16);
        let err = slot.deliver(0.0, Some(&[0u8; 17])).unwrap_err();
        assert_eq!(err, DeliveryError::OutOfMemory(17));

        let state = slot.lock();
        assert!(state.buffer().is_empty());
        assert_eq!(state.last_error(), Some(DeliveryError::OutOfMemory(17)));
        assert_eq!(state.stats().failed_count, 1);
    }

    #[test]
    fn arm_keeps_allocation_but_clears_sample() {
        let slot = FrameSlot::new();
        slot.deliver(1.0, Some(&[9u8; 40])).unwrap();
        slot.arm();

        let state = slot.lock();
        assert!(state.buffer().is_empty());
        assert_eq!(state.buffer().capacity(), 40);
        assert_eq!(state.deliveries(), 0);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn wait_returns_when_another_thread_delivers() {
        let slot = Arc::new(FrameSlot::new());
        let producer = Arc::clone(&slot);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.deliver(0.1, Some(&[1, 2, 3])).unwrap();
        });

        assert_eq!(slot.wait(None), WaitResult::Delivered);
        handle.join().unwrap();
        assert_eq!(slot.lock().buffer().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn wait_returns_on_completion_without_sample() {
        let slot = Arc::new(FrameSlot::new());
        let producer = Arc::clone(&slot);
        let handle = std::thread::spawn(move || producer.complete());

        assert_eq!(slot.wait(Some(Duration::from_secs(5))), WaitResult::Completed);
        handle.join().unwrap();
    }

    #[test]
    fn bounded_wait_times_out() {
        let slot = FrameSlot::new();
        assert_eq!(
            slot.wait(Some(Duration::from_millis(20))),
            WaitResult::TimedOut
        );
    }

    #[test]
    fn frame_slot_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameSlot>();
    }
}
