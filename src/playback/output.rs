//! Real audio output using CPAL (Cross-Platform Audio Library).

use crate::error::PlaybackError;
use crate::playback::mixer::Mixer;
use crate::playback::voice::{Voice, VoicePlayer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probes ALSA/JACK/PipeWire backends when opening a device and they
/// print harmless but confusing noise.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// List output device names.
pub fn list_output_devices() -> Result<Vec<String>, PlaybackError> {
    let devices = with_suppressed_stderr(|| cpal::default_host().output_devices()).map_err(|e| {
        PlaybackError::DeviceUnavailable {
            message: format!("Failed to enumerate output devices: {}", e),
        }
    })?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_device(device_name: Option<&str>) -> Result<cpal::Device, PlaybackError> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match device_name {
            Some(name) => {
                let devices =
                    host.output_devices()
                        .map_err(|e| PlaybackError::DeviceUnavailable {
                            message: format!("Failed to enumerate devices: {}", e),
                        })?;
                for device in devices {
                    if let Ok(dev_name) = device.name()
                        && dev_name == name
                    {
                        return Ok(device);
                    }
                }
                Err(PlaybackError::DeviceUnavailable {
                    message: format!("output device not found: {}", name),
                })
            }
            None => host
                .default_output_device()
                .ok_or_else(|| PlaybackError::DeviceUnavailable {
                    message: "no default output device".to_string(),
                }),
        }
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created once, only paused/dropped by its owner and
/// never touched from the audio callback.
struct SendableStream(#[allow(dead_code)] cpal::Stream);

unsafe impl Send for SendableStream {}
unsafe impl Sync for SendableStream {}

/// Plays voices through a shared [`Mixer`] on a CPAL output stream.
pub struct MixerPlayer {
    mixer: Arc<Mutex<Mixer>>,
    failed: Arc<AtomicBool>,
    _stream: SendableStream,
}

impl MixerPlayer {
    /// Open `device_name` (or the default output device) and start streaming.
    ///
    /// Tries f32 stereo at `sample_rate` first, then the device's default config.
    pub fn open(device_name: Option<&str>, sample_rate: u32) -> Result<Self, PlaybackError> {
        let device = find_device(device_name)?;
        let failed = Arc::new(AtomicBool::new(false));

        let preferred = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        if let Ok(stream) = Self::build_f32(&device, &preferred, &mixer, &failed) {
            return Self::finish(stream, mixer, failed);
        }

        // Fall back to whatever the device prefers
        let default_config =
            device
                .default_output_config()
                .map_err(|e| PlaybackError::DeviceUnavailable {
                    message: format!("Failed to query default output config: {}", e),
                })?;
        let config: cpal::StreamConfig = default_config.clone().into();
        let mixer = Arc::new(Mutex::new(Mixer::new(config.sample_rate.0)));

        tracing::debug!(
            channels = config.channels,
            rate = config.sample_rate.0,
            format = ?default_config.sample_format(),
            "using native output format"
        );

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_f32(&device, &config, &mixer, &failed)?,
            cpal::SampleFormat::I16 => Self::build_i16(&device, &config, &mixer, &failed)?,
            fmt => {
                return Err(PlaybackError::DeviceUnavailable {
                    message: format!("Unsupported output sample format: {:?}", fmt),
                });
            }
        };
        Self::finish(stream, mixer, failed)
    }

    fn finish(
        stream: cpal::Stream,
        mixer: Arc<Mutex<Mixer>>,
        failed: Arc<AtomicBool>,
    ) -> Result<Self, PlaybackError> {
        stream.play().map_err(|e| PlaybackError::DeviceUnavailable {
            message: format!("Failed to start output stream: {}", e),
        })?;
        Ok(Self {
            mixer,
            failed,
            _stream: SendableStream(stream),
        })
    }

    fn error_callback(failed: &Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let failed = Arc::clone(failed);
        move |err| {
            tracing::error!("Audio output stream error: {}", err);
            failed.store(true, Ordering::SeqCst);
        }
    }

    fn build_f32(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mixer: &Arc<Mutex<Mixer>>,
        failed: &Arc<AtomicBool>,
    ) -> Result<cpal::Stream, PlaybackError> {
        let mixer = Arc::clone(mixer);
        let channels = config.channels as usize;
        device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match mixer.lock() {
                    Ok(mut mixer) => mixer.render(data, channels),
                    Err(_) => data.fill(0.0),
                },
                Self::error_callback(failed),
                None,
            )
            .map_err(|e| PlaybackError::DeviceUnavailable {
                message: format!("Failed to build f32 output stream: {}", e),
            })
    }

    fn build_i16(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mixer: &Arc<Mutex<Mixer>>,
        failed: &Arc<AtomicBool>,
    ) -> Result<cpal::Stream, PlaybackError> {
        let mixer = Arc::clone(mixer);
        let channels = config.channels as usize;
        let mut scratch: Vec<f32> = Vec::new();
        device
            .build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    match mixer.lock() {
                        Ok(mut mixer) => mixer.render(&mut scratch, channels),
                        Err(_) => scratch.fill(0.0),
                    }
                    for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                        *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                Self::error_callback(failed),
                None,
            )
            .map_err(|e| PlaybackError::DeviceUnavailable {
                message: format!("Failed to build i16 output stream: {}", e),
            })
    }
}

impl VoicePlayer for MixerPlayer {
    fn play(&self, voice: Voice) -> Result<(), PlaybackError> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(PlaybackError::DeviceUnavailable {
                message: "output stream stopped after an error".to_string(),
            });
        }
        if voice.buffer.frames() == 0 || voice.buffer.sample_rate == 0 {
            return Err(PlaybackError::InvalidBuffer {
                asset: voice.asset,
                message: "buffer has no frames".to_string(),
            });
        }

        let mut mixer = self.mixer.lock().map_err(|e| PlaybackError::Failed {
            message: format!("Failed to lock mixer: {}", e),
        })?;
        let delay = voice.start_at().saturating_duration_since(Instant::now());
        let delay_frames = (delay.as_secs_f64() * mixer.sample_rate() as f64).round() as u64;
        mixer.add(voice.buffer, voice.pan, delay_frames);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cpal"
    }
}
