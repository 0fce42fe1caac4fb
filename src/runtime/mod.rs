//! The seam between the session core and an XR runtime.
//!
//! Every runtime object is referenced through an opaque, copyable handle. The
//! component that created a handle owns it; see [`crate::handle::Owned`] for
//! the drop guard used by sessions.

mod simulated;

#[cfg(feature = "vr-openxr")]
pub mod openxr;

pub use simulated::{
    RuntimeCall, SimulatedDevice, SimulatedRuntime, SubmittedFrame, SubmittedLayer,
    SystemAvailability,
};

use crate::error::XrResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

macro_rules! opaque_handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const NULL: Self = Self(0);

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn into_raw(self) -> u64 {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

opaque_handle!(InstanceHandle);
opaque_handle!(SystemId);
opaque_handle!(SessionHandle);
opaque_handle!(SpaceHandle);
opaque_handle!(SwapchainHandle);
opaque_handle!(ActionSetHandle);
opaque_handle!(ActionHandle);
opaque_handle!(XrPath);
opaque_handle!(TextureHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct XrTime(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vector3,
    pub orientation: Quaternion,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vector3 {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        },
        orientation: Quaternion::IDENTITY,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba8,
    Rgba8Srgb,
    Bgra8Srgb,
    D24S8,
    D32Float,
}

impl TextureFormat {
    pub const fn vulkan_code(self) -> i64 {
        match self {
            TextureFormat::Rgba8 => 37,
            TextureFormat::Rgba8Srgb => 43,
            TextureFormat::Bgra8Srgb => 50,
            TextureFormat::D32Float => 126,
            TextureFormat::D24S8 => 129,
        }
    }

    pub fn from_vulkan_code(code: i64) -> Option<Self> {
        [
            TextureFormat::Rgba8,
            TextureFormat::Rgba8Srgb,
            TextureFormat::Bgra8Srgb,
            TextureFormat::D32Float,
            TextureFormat::D24S8,
        ]
        .into_iter()
        .find(|format| format.vulkan_code() == code)
    }

    pub const fn is_depth(self) -> bool {
        matches!(self, TextureFormat::D24S8 | TextureFormat::D32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormFactor {
    HeadMountedDisplay,
    HandheldDisplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewConfigurationType {
    PrimaryStereo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentBlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSpaceType {
    View,
    Local,
    Stage,
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpaceLocationFlags(u64);

impl SpaceLocationFlags {
    pub const EMPTY: Self = Self(0);
    pub const ORIENTATION_VALID: Self = Self(0x1);
    pub const POSITION_VALID: Self = Self(0x2);
    pub const ORIENTATION_TRACKED: Self = Self(0x4);
    pub const POSITION_TRACKED: Self = Self(0x8);
    pub const ALL_TRACKED: Self = Self(0xF);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpaceLocation {
    pub flags: SpaceLocationFlags,
    pub pose: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocatedView {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfigurationView {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemProperties {
    pub system_name: String,
    pub vendor_id: u32,
    pub max_swapchain_width: u32,
    pub max_swapchain_height: u32,
    pub max_layer_count: u32,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCreateInfo {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub enabled_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainUsage {
    Color,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainCreateInfo {
    pub format: i64,
    pub usage: SwapchainUsage,
    pub width: u32,
    pub height: u32,
    pub array_size: u32,
    pub sample_count: u32,
    pub face_count: u32,
    pub mip_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestedBinding {
    pub action: ActionHandle,
    pub binding: XrPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameState {
    pub should_render: bool,
    pub predicted_display_time: XrTime,
    pub predicted_display_period: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    SessionStateChanged {
        session: SessionHandle,
        state: SessionState,
        time: XrTime,
    },
    InstanceLossPending {
        loss_time: XrTime,
    },
    ReferenceSpaceChangePending {
        session: SessionHandle,
        space_type: ReferenceSpaceType,
    },
    InteractionProfileChanged {
        session: SessionHandle,
    },
    EventsLost {
        count: u32,
    },
    Unrecognized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompositionLayerFlags(u64);

impl CompositionLayerFlags {
    pub const EMPTY: Self = Self(0);
    pub const BLEND_TEXTURE_SOURCE_ALPHA: Self = Self(0x2);

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapchainSubImage {
    pub swapchain: SwapchainHandle,
    pub image_rect: Rect2D,
    pub image_array_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthInfo {
    pub sub_image: SwapchainSubImage,
    pub min_depth: f32,
    pub max_depth: f32,
    pub near_z: f32,
    pub far_z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub sub_image: SwapchainSubImage,
    pub depth: Option<DepthInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionLayer<'a> {
    pub flags: CompositionLayerFlags,
    pub space: SpaceHandle,
    pub views: &'a [ProjectionView],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEndInfo<'a> {
    pub display_time: XrTime,
    pub environment_blend_mode: EnvironmentBlendMode,
    pub layers: &'a [ProjectionLayer<'a>],
}

/// An XR runtime as seen by the session core.
///
/// Methods take `&self`: handles are the unit of ownership, and callers drive
/// a runtime from one rendering thread.
pub trait XrRuntime {
    type GraphicsDevice;

    fn label(&self) -> &'static str;

    fn required_extensions(&self) -> &[&'static str] {
        &[]
    }

    fn enumerate_instance_extensions(&self) -> XrResult<Vec<String>>;
    fn create_instance(&self, info: &InstanceCreateInfo) -> XrResult<InstanceHandle>;
    fn destroy_instance(&self, instance: InstanceHandle) -> XrResult<()>;

    /// Fails with [`crate::error::XrError::FormFactorUnavailable`] while no
    /// device of that form factor is connected.
    fn get_system(&self, instance: InstanceHandle, form_factor: FormFactor) -> XrResult<SystemId>;
    fn system_properties(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<SystemProperties>;
    fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> XrResult<Vec<EnvironmentBlendMode>>;
    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        view_configuration: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>>;

    fn create_session(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        device: &Self::GraphicsDevice,
    ) -> XrResult<SessionHandle>;
    fn destroy_session(&self, session: SessionHandle) -> XrResult<()>;
    fn begin_session(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
    ) -> XrResult<()>;
    fn end_session(&self, session: SessionHandle) -> XrResult<()>;
    fn request_exit_session(&self, session: SessionHandle) -> XrResult<()>;
    fn poll_event(&self, instance: InstanceHandle) -> XrResult<Option<Event>>;

    fn create_reference_space(
        &self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        pose: Pose,
    ) -> XrResult<SpaceHandle>;
    fn destroy_space(&self, space: SpaceHandle) -> XrResult<()>;
    fn locate_space(&self, space: SpaceHandle, base: SpaceHandle, time: XrTime)
    -> XrResult<SpaceLocation>;

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> XrResult<Vec<i64>>;
    fn native_format(&self, format: TextureFormat) -> i64;
    fn texture_format(&self, native: i64) -> Option<TextureFormat>;
    fn create_swapchain(
        &self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle>;
    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> XrResult<()>;
    fn enumerate_swapchain_images(&self, swapchain: SwapchainHandle)
    -> XrResult<Vec<TextureHandle>>;
    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<u32>;
    fn wait_swapchain_image(
        &self,
        swapchain: SwapchainHandle,
        timeout: Option<Duration>,
    ) -> XrResult<()>;
    fn release_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<()>;

    fn string_to_path(&self, instance: InstanceHandle, path: &str) -> XrResult<XrPath>;
    fn create_action_set(
        &self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> XrResult<ActionSetHandle>;
    fn destroy_action_set(&self, action_set: ActionSetHandle) -> XrResult<()>;
    fn create_pose_action(
        &self,
        action_set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        subaction_paths: &[XrPath],
    ) -> XrResult<ActionHandle>;
    fn create_action_space(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
        pose: Pose,
    ) -> XrResult<SpaceHandle>;
    fn suggest_interaction_profile_bindings(
        &self,
        instance: InstanceHandle,
        interaction_profile: XrPath,
        bindings: &[SuggestedBinding],
    ) -> XrResult<()>;
    fn attach_session_action_sets(
        &self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> XrResult<()>;
    fn sync_actions(&self, session: SessionHandle, action_sets: &[ActionSetHandle])
    -> XrResult<()>;

    fn wait_frame(&self, session: SessionHandle) -> XrResult<FrameState>;
    fn begin_frame(&self, session: SessionHandle) -> XrResult<()>;
    fn locate_views(
        &self,
        session: SessionHandle,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> XrResult<Vec<LocatedView>>;
    fn end_frame(&self, session: SessionHandle, info: &FrameEndInfo<'_>) -> XrResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_flags_require_every_bit() {
        let partial = SpaceLocationFlags::ALL_TRACKED.without(SpaceLocationFlags::POSITION_TRACKED);
        assert!(SpaceLocationFlags::ALL_TRACKED.contains(SpaceLocationFlags::ALL_TRACKED));
        assert!(!partial.contains(SpaceLocationFlags::ALL_TRACKED));
        assert!(partial.contains(SpaceLocationFlags::POSITION_VALID));
    }

    #[test]
    fn vulkan_codes_map_back_to_formats() {
        for format in [
            TextureFormat::Rgba8,
            TextureFormat::Rgba8Srgb,
            TextureFormat::Bgra8Srgb,
            TextureFormat::D24S8,
            TextureFormat::D32Float,
        ] {
            assert_eq!(TextureFormat::from_vulkan_code(format.vulkan_code()), Some(format));
        }
        assert_eq!(TextureFormat::from_vulkan_code(9999), None);
        assert!(TextureFormat::D24S8.is_depth());
        assert!(!TextureFormat::Rgba8Srgb.is_depth());
    }
}
