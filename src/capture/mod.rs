//! Capture device lifecycle: camera selection and the external decoder.

pub mod controller;
pub mod device;
pub mod engine;

pub use controller::{CaptureController, CaptureState, CaptureStatus};
pub use device::{
    CaptureDevice, DeviceConstraint, DeviceEnumerator, Facing, StaticEnumerator, V4l2Enumerator,
    select_device,
};
pub use engine::{DecodeSink, DecoderEngine, MockEngine, ProcessEngine, ScanConfig};
