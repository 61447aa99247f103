//! Local media capture and control

mod controller;
mod source;

pub use controller::MediaController;
pub use source::{CameraConstraints, CaptureTrack, MediaSource};

#[cfg(test)]
pub(crate) use source::test_support;
