//! PCM ring between the capture callback and the listen loop.
//! Fixed pre-allocated capacity; when the reader falls behind, oldest samples are overwritten.

/// Fixed-size ring buffer for mono PCM i16 samples. Never grows.
pub struct PcmRing {
    buffer: Box<[i16]>,
    write_pos: usize,
    len: usize,
    /// Samples overwritten before they were read.
    overrun: u64,
}

impl PcmRing {
    /// Ring sized for `duration_secs` at `sample_rate` Hz, at least one sample.
    pub fn new(sample_rate: u32, duration_secs: f32) -> Self {
        let capacity = ((sample_rate as f32 * duration_secs) as usize).max(1);
        Self::with_capacity(capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0i16; capacity].into_boxed_slice(),
            write_pos: 0,
            len: 0,
            overrun: 0,
        }
    }

    /// Append samples, overwriting the oldest unread data when full.
    /// Called from the audio callback: no allocation.
    #[inline]
    pub fn write(&mut self, samples: &[i16]) {
        let capacity = self.capacity();
        for &s in samples {
            self.buffer[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % capacity;
            if self.len == capacity {
                self.overrun += 1;
            } else {
                self.len += 1;
            }
        }
    }

    /// Read up to `output.len()` oldest samples. Returns the count read.
    #[inline]
    pub fn read(&mut self, output: &mut [i16]) -> usize {
        let capacity = self.capacity();
        let to_read = output.len().min(self.len);
        let start = (self.write_pos + capacity - self.len) % capacity;
        for (i, slot) in output.iter_mut().take(to_read).enumerate() {
            *slot = self.buffer[(start + i) % capacity];
        }
        self.len -= to_read;
        to_read
    }

    /// Take exactly `n` samples if available.
    pub fn read_chunk(&mut self, n: usize) -> Option<Vec<i16>> {
        if n == 0 || self.len < n {
            return None;
        }
        let mut out = vec![0i16; n];
        self.read(&mut out);
        Some(out)
    }

    /// Number of unread samples.
    #[inline]
    pub fn available(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Total samples lost to overwrite since creation.
    pub fn overrun(&self) -> u64 {
        self.overrun
    }

    /// Discard unread data.
    pub fn reset_read(&mut self) {
        self.len = 0;
    }
}
