//! XR session and frame lifecycle on top of a pluggable OpenXR-style runtime.
//!
//! A [`System`] negotiates extensions and finds the headset, a [`Session`]
//! owns the per-device resources and drives the runtime state machine, and a
//! [`Frame`] brackets one compositor frame.

pub mod config;
pub mod error;
pub mod extensions;
pub mod frame;
pub(crate) mod handle;
pub mod runtime;
pub mod session;
pub mod system;

pub use config::XrConfig;
pub use error::{XrError, XrResult};
pub use extensions::ExtensionSet;
pub use frame::{Frame, Ray, View};
pub use runtime::{SimulatedDevice, SimulatedRuntime, XrRuntime};
pub use session::actions::{Handedness, InputSource};
pub use session::{NextFrame, Session};
pub use system::{SessionType, System};

#[cfg(feature = "vr-openxr")]
pub use runtime::openxr::{OpenXrRuntime, VulkanDevice};
