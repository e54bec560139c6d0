//! Voice playback: the player trait, the stereo mixer and the CPAL output.

pub mod mixer;
#[cfg(feature = "cpal-audio")]
pub mod output;
pub mod voice;

pub use mixer::{Mixer, pan_gains};
#[cfg(feature = "cpal-audio")]
pub use output::{MixerPlayer, list_output_devices};
pub use voice::{RecordingPlayer, Voice, VoicePlayer};
