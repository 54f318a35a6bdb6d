//! Linear-interpolation resampler with an adjustable input rate.
//!
//! Converts one stream's frames to the output device rate. The input
//! rate is deliberately not fixed: the drift compensator nudges it a few
//! hertz at a time to speed up or slow down consumption of the jitter
//! queue, which is what keeps the queue at its target fill.

/// Streaming sample-rate converter over interleaved f32 frames.
///
/// Carries the previous input frame across chunk boundaries so the
/// interpolation is continuous regardless of how input is batched.
pub struct Resampler {
    // ---
    input_rate: f64,
    output_rate: f64,
    channels: usize,

    /// Fractional read position ahead of `last`, in input frames.
    phase: f64,

    /// Most recently consumed input frame.
    last: Vec<f32>,
}

impl Resampler {
    // ---
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Self {
        // ---
        Self {
            input_rate: f64::from(input_rate),
            output_rate: f64::from(output_rate),
            channels,
            phase: 0.0,
            last: vec![0.0; channels],
        }
    }

    /// Current input rate in Hz.
    pub fn input_rate(&self) -> u32 {
        // ---
        self.input_rate as u32
    }

    /// Retunes the rate the input side is assumed to run at.
    pub fn set_input_rate(&mut self, rate: u32) {
        // ---
        self.input_rate = f64::from(rate);
    }

    /// Input frames required to produce at least `out_frames` outputs.
    pub fn needed_input(&self, out_frames: usize) -> usize {
        // ---
        let ratio = self.input_rate / self.output_rate;
        (self.phase + out_frames as f64 * ratio).ceil() as usize + 1
    }

    /// Consumes all of `input` (interleaved, `channels` wide) and appends
    /// the resampled frames to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        // ---
        let ratio = self.input_rate / self.output_rate;
        let mut frames = input.chunks_exact(self.channels);
        let mut next = frames.next();

        loop {
            while self.phase >= 1.0 {
                match next {
                    Some(frame) => {
                        self.last.copy_from_slice(frame);
                        next = frames.next();
                        self.phase -= 1.0;
                    }
                    None => return,
                }
            }

            let Some(frame) = next else { return };
            for c in 0..self.channels {
                let a = self.last[c];
                out.push(a + (frame[c] - a) * self.phase as f32);
            }
            self.phase += ratio;
        }
    }
}
