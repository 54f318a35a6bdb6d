//! Host sink backed by a real output device.
//!
//! `CpalSink` implements the host contract on top of cpal so the binary
//! plays announced streams standalone: every connected stream gets its
//! own adjustable-rate resampler and the device callback mixes them.
//! A dedicated thread owns the cpal stream, which is not `Send`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::playback::{Playback, Sink, SinkInput};
use crate::resampler::Resampler;
use crate::sample::SampleSpec;

/// Rough one-way latency of the device buffer. cpal's default buffer
/// size is opaque, so requests cannot actually move it.
const DEVICE_LATENCY_USEC: u64 = 25_000;

/// Host sink playing on a cpal output device.
pub struct CpalSink {
    // ---
    mixer: Arc<Mixer>,
}

struct Mixer {
    // ---
    rate: u32,
    channels: usize,
    inputs: Mutex<Vec<Arc<CpalInput>>>,
}

impl CpalSink {
    // ---
    /// Opens the named output device (`default` for the system default)
    /// and starts the render stream.
    ///
    /// # Errors
    ///
    /// Returns `Error::Sink` when the device does not exist or the
    /// stream cannot be built.
    pub fn new(device_name: &str) -> Result<Self> {
        // ---
        let device_name = device_name.to_string();
        let (tx, rx) = mpsc::channel::<std::result::Result<Arc<Mixer>, String>>();

        // The cpal stream is not Send; a dedicated thread owns it for
        // the life of the process.
        std::thread::spawn(move || {
            // ---
            match build_stream(&device_name) {
                Ok((stream, mixer)) => {
                    let _ = tx.send(Ok(mixer));
                    // Keep the stream alive.
                    let _stream = stream;
                    loop {
                        std::thread::park();
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            }
        });

        let mixer = rx
            .recv()
            .map_err(|_| Error::Sink("audio thread died during setup".into()))?
            .map_err(Error::Sink)?;

        info!(
            "audio device ready: {} Hz, {} channels",
            mixer.rate, mixer.channels
        );
        Ok(Self { mixer })
    }
}

impl Sink for CpalSink {
    // ---
    fn connect(&self, spec: &SampleSpec, name: &str) -> Result<Arc<dyn SinkInput>> {
        // ---
        spec.validate().map_err(|e| Error::Sink(e.to_string()))?;

        let input = Arc::new(CpalInput::new(*spec, self.mixer.rate, self.mixer.channels));
        lock(&self.mixer.inputs).push(Arc::clone(&input));

        info!("connected '{name}' to audio device");
        Ok(input)
    }
}

fn build_stream(device_name: &str) -> std::result::Result<(cpal::Stream, Arc<Mixer>), String> {
    // ---
    let host = cpal::default_host();
    let device = if device_name == "default" {
        host.default_output_device()
            .ok_or("no default output device")?
    } else {
        host.output_devices()
            .map_err(|e| e.to_string())?
            .find(|d| d.name().map(|n| n == device_name).unwrap_or(false))
            .ok_or_else(|| format!("no output device named '{device_name}'"))?
    };

    let config = device.default_output_config().map_err(|e| e.to_string())?;
    let stream_config = cpal::StreamConfig {
        channels: config.channels(),
        sample_rate: config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let mixer = Arc::new(Mixer {
        rate: stream_config.sample_rate.0,
        channels: stream_config.channels as usize,
        inputs: Mutex::new(Vec::new()),
    });

    debug!("stream config: {stream_config:?}");

    let render_mixer = Arc::clone(&mixer);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render(&render_mixer, data);
            },
            |err| warn!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok((stream, mixer))
}

/// Device callback: sum every live input into the output buffer.
fn render(mixer: &Mixer, data: &mut [f32]) {
    // ---
    data.fill(0.0);

    let mut inputs = lock(&mixer.inputs);
    inputs.retain(|i| i.active.load(Ordering::Relaxed));
    for input in inputs.iter() {
        input.mix_into(data);
    }
}

/// One stream connected to the mixer.
struct CpalInput {
    // ---
    spec: SampleSpec,
    out_channels: usize,
    source: Mutex<Option<Arc<Playback>>>,
    resampler: Mutex<Resampler>,

    /// Resampled frames waiting to be rendered.
    pending: Mutex<Vec<f32>>,

    /// Consecutive underruns since data last flowed.
    underrun_for: AtomicU64,

    active: AtomicBool,
    out_rate: u32,
}

impl CpalInput {
    // ---
    fn new(spec: SampleSpec, out_rate: u32, out_channels: usize) -> Self {
        // ---
        Self {
            spec,
            out_channels,
            source: Mutex::new(None),
            resampler: Mutex::new(Resampler::new(spec.rate, out_rate, out_channels)),
            pending: Mutex::new(Vec::new()),
            underrun_for: AtomicU64::new(0),
            active: AtomicBool::new(true),
            out_rate,
        }
    }

    fn mix_into(&self, data: &mut [f32]) {
        // ---
        let Some(source) = lock(&self.source).clone() else {
            return;
        };

        let needed = data.len();
        let mut pending = lock(&self.pending);
        let mut resampler = lock(&self.resampler);

        while pending.len() < needed {
            let missing_frames = (needed - pending.len()) / self.out_channels + 1;
            let nbytes = resampler.needed_input(missing_frames) * self.spec.frame_size();

            match source.pop(nbytes) {
                Some(bytes) => {
                    self.underrun_for.store(0, Ordering::Relaxed);

                    let mut raw = Vec::with_capacity(bytes.len() / self.spec.format.sample_size());
                    self.spec.decode_f32(&bytes, &mut raw);
                    let mapped =
                        map_channels(&raw, self.spec.channels as usize, self.out_channels);
                    resampler.process(&mapped, &mut pending);

                    if bytes.len() < nbytes {
                        break;
                    }
                }
                None => {
                    self.underrun_for.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }

        let take = pending.len().min(needed);
        for (slot, sample) in data.iter_mut().zip(pending.drain(..take)) {
            *slot = (*slot + sample).clamp(-1.0, 1.0);
        }
    }
}

impl SinkInput for CpalInput {
    // ---
    fn set_requested_latency(&self, _usec: u64) -> u64 {
        // ---
        DEVICE_LATENCY_USEC
    }

    fn latency(&self) -> u64 {
        // ---
        DEVICE_LATENCY_USEC
    }

    fn render_delay(&self) -> u64 {
        // ---
        let frames = lock(&self.pending).len() / self.out_channels;
        frames as u64 * 1_000_000 / u64::from(self.out_rate)
    }

    fn underruns(&self) -> u64 {
        // ---
        self.underrun_for.load(Ordering::Relaxed)
    }

    fn request_rewind(&self, nbytes: usize, _request_render: bool) {
        // ---
        // The pull model re-renders naturally on the next callback; the
        // request only rolls the source back and clears underrun state.
        if nbytes > 0 {
            if let Some(source) = lock(&self.source).clone() {
                source.process_rewind(nbytes);
            }
        }
        self.underrun_for.store(0, Ordering::Relaxed);
    }

    fn set_input_rate(&self, rate: u32) {
        // ---
        lock(&self.resampler).set_input_rate(rate);
    }

    fn start(&self, source: Arc<Playback>) {
        // ---
        *lock(&self.source) = Some(source);
    }

    fn disconnect(&self) {
        // ---
        self.active.store(false, Ordering::Relaxed);
        lock(&self.source).take();
    }
}

/// Maps interleaved frames between channel layouts: identical layouts
/// copy, downmix to mono averages, anything else repeats channels.
fn map_channels(src: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    // ---
    if in_ch == out_ch {
        return src.to_vec();
    }

    let frames = src.len() / in_ch;
    let mut out = Vec::with_capacity(frames * out_ch);
    for frame in src.chunks_exact(in_ch) {
        if out_ch == 1 {
            out.push(frame.iter().sum::<f32>() / in_ch as f32);
        } else {
            for c in 0..out_ch {
                out.push(frame[c % in_ch]);
            }
        }
    }
    out
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
