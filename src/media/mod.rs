//! Local media: capture contract, tracks, rendering surfaces and the
//! per-call device manager

pub mod capture;
pub mod manager;
pub mod surface;
pub mod track;
pub mod virtual_device;

pub use capture::MediaCapture;
pub use manager::{CameraSwitch, MediaDeviceManager};
pub use surface::RenderSurface;
pub use track::{
    FacingMode, MediaConstraints, MediaStream, MediaTrack, TrackKind, TrackSettings,
    VideoConstraints,
};
pub use virtual_device::VirtualCamera;
