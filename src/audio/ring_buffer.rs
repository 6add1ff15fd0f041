//! Lock-free SPSC ring buffer for captured samples.
//!
//! The cpal input callback must never block or allocate unpredictably, so
//! it only pushes raw samples here; the capture thread pops fixed-size
//! frames on the other side for metering, encoding, and transport.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Default capacity: ~10 seconds of 16 kHz mono audio.
const DEFAULT_CAPACITY: usize = 160_000;

/// Producer half — lives in the cpal audio callback.
pub struct SampleProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half — lives in the capture thread.
pub struct SampleConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair backed by a lock-free ring buffer.
pub fn sample_ring_buffer(capacity: Option<usize>) -> (SampleProducer, SampleConsumer) {
    let cap = capacity.unwrap_or(DEFAULT_CAPACITY);
    let rb = HeapRb::<f32>::new(cap);
    let (prod, cons) = rb.split();
    (SampleProducer { inner: prod }, SampleConsumer { inner: cons })
}

impl SampleProducer {
    /// Push a slice of samples. Returns the number actually written (less
    /// than `samples.len()` when the buffer is full — the oldest unread
    /// audio wins and the overflow is dropped).
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

impl SampleConsumer {
    /// Number of samples currently available for reading.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Pop exactly `frame_len` samples, or `None` if a full frame is not
    /// available yet.
    pub fn pop_frame(&mut self, frame_len: usize) -> Option<Vec<f32>> {
        if self.available() < frame_len {
            return None;
        }
        let mut frame = vec![0.0f32; frame_len];
        let read = self.inner.pop_slice(&mut frame);
        debug_assert_eq!(read, frame_len);
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_pop_in_capture_order() {
        let (mut prod, mut cons) = sample_ring_buffer(Some(1024));
        let signal: Vec<f32> = (0..512).map(|i| i as f32).collect();
        assert_eq!(prod.push_slice(&signal), 512);

        assert!(cons.pop_frame(1024).is_none());
        let a = cons.pop_frame(256).unwrap();
        let b = cons.pop_frame(256).unwrap();
        assert_eq!(a[0], 0.0);
        assert_eq!(b[0], 256.0);
        assert!(cons.pop_frame(1).is_none());
    }

    #[test]
    fn overflow_drops_excess() {
        let (mut prod, _cons) = sample_ring_buffer(Some(100));
        let written = prod.push_slice(&vec![0.0f32; 150]);
        assert_eq!(written, 100);
    }
}
