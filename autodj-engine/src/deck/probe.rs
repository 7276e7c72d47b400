//! Beat-amplitude probe
//!
//! The audio path pushes post-gain samples into a [`ProbeTap`]; the control
//! side drains the matching [`AmplitudeProbe`] and reports the window peak as
//! a 0..1 level. Backed by a lock-free SPSC ring buffer so the audio side
//! never blocks. When the ring is full, new samples are dropped until the
//! probe is drained.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Peak magnitude that maps to a full-scale level
const FULL_SCALE_PEAK: f32 = 0.5;

/// Write end, owned by the audio path
pub struct ProbeTap {
    producer: HeapProd<f32>,
}

impl ProbeTap {
    /// Push samples; returns how many fit
    pub fn write(&mut self, samples: &[f32]) -> usize {
        self.producer.push_slice(samples)
    }
}

/// Read end, owned by the deck
pub struct AmplitudeProbe {
    consumer: HeapCons<f32>,
    scratch: Vec<f32>,
}

impl AmplitudeProbe {
    /// Create a probe holding up to `window` samples
    pub fn new(window: usize) -> (ProbeTap, AmplitudeProbe) {
        let window = window.max(1);
        let rb = HeapRb::<f32>::new(window);
        let (producer, consumer) = rb.split();

        (
            ProbeTap { producer },
            AmplitudeProbe {
                consumer,
                scratch: vec![0.0; window],
            },
        )
    }

    /// Samples waiting to be read
    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Drain everything buffered and return its peak as a 0..1 level
    ///
    /// Zero when nothing was written since the last call.
    pub fn level(&mut self) -> f32 {
        let mut peak = 0.0f32;
        loop {
            let read = self.consumer.pop_slice(&mut self.scratch);
            if read == 0 {
                break;
            }
            peak = self.scratch[..read]
                .iter()
                .fold(peak, |acc, s| acc.max(s.abs()));
        }
        (peak / FULL_SCALE_PEAK).min(1.0)
    }
}
