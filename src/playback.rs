//! Playback adapter and the host sink contract.
//!
//! `Playback` is the capability record a session hands to the host sink:
//! the host pulls audio with `pop`, rolls playback back with
//! `process_rewind` after an underrun, and can ask for the session to be
//! torn down with `kill`. The `Sink`/`SinkInput` traits are the half of
//! the host mixing engine this module consumes; the real engine lives
//! behind them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::error::Result;
use crate::queue::JitterQueue;
use crate::sample::SampleSpec;

/// Requests routed from host callbacks back to the main context.
#[derive(Debug)]
pub enum Control {
    /// The host sink is going away; destroy the session.
    Kill { origin: String },
}

/// The host mixing engine, as consumed by this module.
pub trait Sink: Send + Sync + 'static {
    // ---
    /// Connects a new stream to the sink.
    ///
    /// The returned input is idle until `SinkInput::start` is called.
    ///
    /// # Errors
    ///
    /// Returns `Error::Sink` when the sink cannot take the stream.
    fn connect(&self, spec: &SampleSpec, name: &str) -> Result<Arc<dyn SinkInput>>;
}

/// One connected stream inside the host sink.
pub trait SinkInput: Send + Sync + 'static {
    // ---
    /// Requests a latency; returns the latency the sink actually runs at.
    fn set_requested_latency(&self, usec: u64) -> u64;

    /// Current sink-side latency in microseconds.
    fn latency(&self) -> u64;

    /// Microseconds of audio sitting between `pop` and the sink proper.
    fn render_delay(&self) -> u64;

    /// Underruns since the stream was started.
    fn underruns(&self) -> u64;

    /// Asks the host to rewind its render queue and re-pull.
    fn request_rewind(&self, nbytes: usize, request_render: bool);

    /// Retunes the resampler's input rate for this stream.
    fn set_input_rate(&self, rate: u32);

    /// Starts pulling from `source`.
    fn start(&self, source: Arc<Playback>);

    /// Unlinks the stream; the host stops calling into the source.
    fn disconnect(&self);
}

/// Bridge between one session's jitter queue and the host sink.
pub struct Playback {
    // ---
    origin: String,
    spec: SampleSpec,
    queue: Arc<Mutex<JitterQueue>>,
    control: mpsc::UnboundedSender<Control>,
}

impl Playback {
    // ---
    pub fn new(
        origin: String,
        spec: SampleSpec,
        queue: Arc<Mutex<JitterQueue>>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        // ---
        Self {
            origin,
            spec,
            queue,
            control,
        }
    }

    /// Origin key of the session behind this adapter.
    pub fn origin(&self) -> &str {
        // ---
        &self.origin
    }

    /// Sample spec of the queued bytes.
    pub fn sample_spec(&self) -> &SampleSpec {
        // ---
        &self.spec
    }

    /// Pops up to `nbytes` for rendering.
    ///
    /// `None` means the queue is empty; the mixer inserts silence and
    /// counts an underrun.
    pub fn pop(&self, nbytes: usize) -> Option<Vec<u8>> {
        // ---
        self.lock().pop(nbytes)
    }

    /// Moves the read position back `nbytes` so the mixer re-renders.
    pub fn process_rewind(&self, nbytes: usize) {
        // ---
        self.lock().rewind(nbytes);
    }

    /// Forwards the host's rewind-history requirement to the queue.
    pub fn update_max_rewind(&self, nbytes: usize) {
        // ---
        self.lock().set_max_rewind(nbytes);
    }

    /// Queue fill in microseconds. The host adds its own resampler delay
    /// on top of this.
    pub fn latency(&self) -> u64 {
        // ---
        let len = self.lock().len();
        self.spec.bytes_to_usec(len as i64)
    }

    /// Routes a sink-initiated teardown to the main context.
    pub fn kill(&self) {
        // ---
        let _ = self.control.send(Control::Kill {
            origin: self.origin.clone(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, JitterQueue> {
        // ---
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::sample::SampleFormat;

    fn playback() -> (Playback, mpsc::UnboundedReceiver<Control>) {
        // ---
        let spec = SampleSpec {
            format: SampleFormat::S16Be,
            rate: 44_100,
            channels: 2,
        };
        let queue = Arc::new(Mutex::new(JitterQueue::new(1024, spec.frame_size(), 0, 0)));
        let (tx, rx) = mpsc::unbounded_channel();
        (Playback::new("alice 1 1 IN IP4 10.0.0.1".into(), spec, queue, tx), rx)
    }

    #[test]
    fn test_pop_empty_reports_underrun() {
        // ---
        let (pb, _rx) = playback();
        assert!(pb.pop(64).is_none());
    }

    #[test]
    fn test_pop_and_rewind() {
        // ---
        let (pb, _rx) = playback();
        pb.update_max_rewind(8);
        pb.queue.lock().expect("lock").push(&[1, 2, 3, 4, 5, 6, 7, 8]).expect("push");

        assert_eq!(pb.pop(8).expect("pop"), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        pb.process_rewind(8);
        assert_eq!(pb.pop(8).expect("pop"), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_latency_reflects_queue_fill() {
        // ---
        let (pb, _rx) = playback();
        // 176400 bytes/s for CD stereo; 1764 bytes = 10 ms.
        pb.queue
            .lock()
            .expect("lock")
            .push(&vec![0u8; 176])
            .expect("push");
        assert_eq!(pb.latency(), pb.sample_spec().bytes_to_usec(176));
    }

    #[test]
    fn test_kill_routes_to_main_context() {
        // ---
        let (pb, mut rx) = playback();
        pb.kill();

        let msg = rx.try_recv().expect("control message");
        let Control::Kill { origin } = msg;
        assert_eq!(origin, pb.origin());
    }
}
