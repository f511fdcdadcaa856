//! Device capture
//!
//! Platform adapters, device selection and capability probing.

pub mod catalog;
pub mod fake;
pub mod probe;
pub mod traits;

#[cfg(feature = "hardware")]
pub mod hardware;

pub use catalog::{DeviceCatalog, DevicePair};
pub use fake::{FakeCamera, FakePlatform};
pub use probe::{CapabilityProber, CapabilitySet};
pub use traits::{
    CapturePlatform, ChunkEncoder, DeviceInfo, DeviceKind, Frame, MediaStream, PlatformError,
    PlatformErrorKind, Resolution, StreamConstraints,
};

#[cfg(feature = "hardware")]
pub use hardware::HardwarePlatform;
