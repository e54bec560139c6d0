//! Stereo voice mixer.
//!
//! Sums independent voices into an interleaved output buffer. Each voice has
//! its own onset frame, pan gains and resampling step; there is no ducking or
//! voice stealing.

use crate::assets::decode::AudioBuffer;
use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;

/// Constant-power gains for a pan position in [-1.0, 1.0].
///
/// Returns `(left, right)`; center is `(0.707, 0.707)`.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Balance gains for already-stereo material: center leaves both channels untouched.
fn balance_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    ((1.0 - pan).min(1.0), (1.0 + pan).min(1.0))
}

struct ActiveVoice {
    buffer: Arc<AudioBuffer>,
    start_frame: u64,
    /// Source frames advanced per output frame.
    step: f64,
    position: f64,
    gains: (f32, f32),
}

impl ActiveVoice {
    fn is_finished(&self) -> bool {
        self.position >= self.buffer.frames() as f64
    }

    /// Linearly interpolated (left, right) source sample at the current position.
    fn sample(&self) -> (f32, f32) {
        let frames = self.buffer.frames();
        let channels = self.buffer.channels as usize;
        let index = self.position.floor() as usize;
        let frac = (self.position - index as f64) as f32;
        let next = (index + 1).min(frames.saturating_sub(1));

        let read = |frame: usize, channel: usize| -> f32 {
            self.buffer.samples[frame * channels + channel.min(channels - 1)]
        };
        let lerp = |channel: usize| -> f32 {
            let a = read(index, channel);
            let b = read(next, channel);
            a + (b - a) * frac
        };

        if channels == 1 {
            let s = lerp(0);
            (s, s)
        } else {
            (lerp(0), lerp(1))
        }
    }
}

/// Mixes queued voices into output frames.
pub struct Mixer {
    sample_rate: u32,
    clock: u64,
    voices: Vec<ActiveVoice>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock: 0,
            voices: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output frames rendered so far.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Queue a voice to start `delay_frames` after the current clock.
    pub fn add(&mut self, buffer: Arc<AudioBuffer>, pan: f32, delay_frames: u64) {
        if buffer.frames() == 0 || buffer.sample_rate == 0 {
            return;
        }
        let gains = if buffer.channels == 1 {
            pan_gains(pan)
        } else {
            balance_gains(pan)
        };
        let step = buffer.sample_rate as f64 / self.sample_rate as f64;
        self.voices.push(ActiveVoice {
            buffer,
            start_frame: self.clock + delay_frames,
            step,
            position: 0.0,
            gains,
        });
    }

    /// Render interleaved frames into `out`.
    ///
    /// Voices go to the first two channels; extra channels are silent and a
    /// mono device receives the average of left and right.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let now = self.clock + offset as u64;
            let (mut left, mut right) = (0.0f32, 0.0f32);

            for voice in self.voices.iter_mut() {
                if now < voice.start_frame || voice.is_finished() {
                    continue;
                }
                let (l, r) = voice.sample();
                left += l * voice.gains.0;
                right += r * voice.gains.1;
                voice.position += voice.step;
            }

            let (left, right) = (left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0));
            if channels == 1 {
                frame[0] = (left + right) * 0.5;
            } else {
                frame[0] = left;
                frame[1] = right;
                for extra in frame.iter_mut().skip(2) {
                    *extra = 0.0;
                }
            }
        }

        self.clock += (out.len() / channels) as u64;
        self.voices.retain(|v| !v.is_finished());
    }
}
