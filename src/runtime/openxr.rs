//! OpenXR backend over a Vulkan graphics binding.
//!
//! Runtime objects live in the `openxr` crate's owning wrappers, keyed by
//! their raw handle values. Destroying a handle drops its wrapper.

use super::{
    ActionHandle, ActionSetHandle, EnvironmentBlendMode, Event, FormFactor, FrameEndInfo,
    FrameState, Fov, InstanceCreateInfo, InstanceHandle, LocatedView, Pose, Quaternion, Rect2D,
    ReferenceSpaceType, SessionHandle, SessionState, SpaceHandle, SpaceLocation,
    SpaceLocationFlags, SuggestedBinding, SwapchainCreateInfo, SwapchainHandle, SwapchainUsage,
    SystemId, SystemProperties, TextureFormat, TextureHandle, Vector3, ViewConfigurationType,
    ViewConfigurationView, XrPath, XrRuntime, XrTime,
};
use crate::error::{XrError, XrResult, code};
use crate::extensions::{MSFT_SPATIAL_ANCHOR, MSFT_UNBOUNDED_REFERENCE_SPACE};
use ::openxr as xr;
use std::collections::HashMap;
use std::ffi::c_void;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const KHR_VULKAN_ENABLE2: &str = "XR_KHR_vulkan_enable2";

/// Raw Vulkan objects the session renders with. The host keeps them alive
/// for as long as the session exists.
#[derive(Debug, Clone, Copy)]
pub struct VulkanDevice {
    pub instance: *const c_void,
    pub physical_device: *const c_void,
    pub device: *const c_void,
    pub queue_family_index: u32,
    pub queue_index: u32,
}

struct SessionEntry {
    session: xr::Session<xr::Vulkan>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<xr::Vulkan>,
}

#[derive(Default)]
struct Objects {
    instance: Option<xr::Instance>,
    sessions: HashMap<SessionHandle, SessionEntry>,
    spaces: HashMap<SpaceHandle, xr::Space>,
    swapchains: HashMap<SwapchainHandle, xr::Swapchain<xr::Vulkan>>,
    action_sets: HashMap<ActionSetHandle, xr::ActionSet>,
    actions: HashMap<ActionHandle, (ActionSetHandle, xr::Action<xr::Posef>)>,
}

pub struct OpenXrRuntime {
    entry: xr::Entry,
    objects: Mutex<Objects>,
}

impl OpenXrRuntime {
    pub fn load() -> XrResult<Self> {
        // Loading runs the system loader's initialisation code.
        let entry = unsafe { xr::Entry::load() }
            .map_err(|err| XrError::Loader(format!("failed to load OpenXR loader: {err}")))?;
        Ok(Self {
            entry,
            objects: Mutex::new(Objects::default()),
        })
    }

    fn objects(&self) -> MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn instance(&self, call: &'static str) -> XrResult<xr::Instance> {
        self.objects()
            .instance
            .clone()
            .ok_or_else(|| invalid_handle(call))
    }
}

fn invalid_handle(call: &'static str) -> XrError {
    XrError::runtime(call, code::HANDLE_INVALID)
}

fn failed(call: &'static str) -> impl FnOnce(xr::sys::Result) -> XrError {
    move |result| XrError::runtime(call, result.into_raw())
}

fn lookup<'a, K: Eq + Hash, V>(
    map: &'a HashMap<K, V>,
    key: K,
    call: &'static str,
) -> XrResult<&'a V> {
    map.get(&key).ok_or_else(|| invalid_handle(call))
}

fn lookup_mut<'a, K: Eq + Hash, V>(
    map: &'a mut HashMap<K, V>,
    key: K,
    call: &'static str,
) -> XrResult<&'a mut V> {
    map.get_mut(&key).ok_or_else(|| invalid_handle(call))
}

fn forget<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, call: &'static str) -> XrResult<()> {
    map.remove(&key).map(drop).ok_or_else(|| invalid_handle(call))
}

/// Extension names as the core negotiates them.
///
/// Depth composition is withheld: depth info chains onto projection views by
/// pointer, which the safe layer builders do not expose.
fn advertised_extensions(available: &xr::ExtensionSet) -> Vec<String> {
    let mut names = Vec::new();
    for (enabled, name) in [
        (available.khr_vulkan_enable2, KHR_VULKAN_ENABLE2),
        (
            available.msft_unbounded_reference_space,
            MSFT_UNBOUNDED_REFERENCE_SPACE,
        ),
        (available.msft_spatial_anchor, MSFT_SPATIAL_ANCHOR),
    ] {
        if enabled {
            names.push(name.to_string());
        }
    }
    names.extend(available.other.iter().cloned());
    names
}

fn to_xr_pose(pose: Pose) -> xr::Posef {
    xr::Posef {
        orientation: xr::Quaternionf {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: xr::Vector3f {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
    }
}

fn from_xr_pose(pose: xr::Posef) -> Pose {
    Pose {
        position: Vector3 {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
        orientation: Quaternion {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
    }
}

fn to_xr_fov(fov: Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn from_xr_fov(fov: xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn to_xr_rect(rect: Rect2D) -> xr::Rect2Di {
    xr::Rect2Di {
        offset: xr::Offset2Di {
            x: rect.x,
            y: rect.y,
        },
        extent: xr::Extent2Di {
            width: rect.width as i32,
            height: rect.height as i32,
        },
    }
}

fn view_configuration(view_configuration: ViewConfigurationType) -> xr::ViewConfigurationType {
    match view_configuration {
        ViewConfigurationType::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
    }
}

fn blend_mode_from_xr(mode: xr::EnvironmentBlendMode) -> Option<EnvironmentBlendMode> {
    match mode {
        xr::EnvironmentBlendMode::OPAQUE => Some(EnvironmentBlendMode::Opaque),
        xr::EnvironmentBlendMode::ADDITIVE => Some(EnvironmentBlendMode::Additive),
        xr::EnvironmentBlendMode::ALPHA_BLEND => Some(EnvironmentBlendMode::AlphaBlend),
        _ => None,
    }
}

fn blend_mode_to_xr(mode: EnvironmentBlendMode) -> xr::EnvironmentBlendMode {
    match mode {
        EnvironmentBlendMode::Opaque => xr::EnvironmentBlendMode::OPAQUE,
        EnvironmentBlendMode::Additive => xr::EnvironmentBlendMode::ADDITIVE,
        EnvironmentBlendMode::AlphaBlend => xr::EnvironmentBlendMode::ALPHA_BLEND,
    }
}

fn session_state_from_xr(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn reference_space_to_xr(space_type: ReferenceSpaceType) -> xr::ReferenceSpaceType {
    match space_type {
        ReferenceSpaceType::View => xr::ReferenceSpaceType::VIEW,
        ReferenceSpaceType::Local => xr::ReferenceSpaceType::LOCAL,
        ReferenceSpaceType::Stage => xr::ReferenceSpaceType::STAGE,
        ReferenceSpaceType::Unbounded => xr::ReferenceSpaceType::UNBOUNDED_MSFT,
    }
}

fn reference_space_from_xr(space_type: xr::ReferenceSpaceType) -> ReferenceSpaceType {
    match space_type {
        xr::ReferenceSpaceType::VIEW => ReferenceSpaceType::View,
        xr::ReferenceSpaceType::STAGE => ReferenceSpaceType::Stage,
        xr::ReferenceSpaceType::UNBOUNDED_MSFT => ReferenceSpaceType::Unbounded,
        _ => ReferenceSpaceType::Local,
    }
}

fn usage_flags(usage: SwapchainUsage) -> xr::SwapchainUsageFlags {
    match usage {
        SwapchainUsage::Color => {
            xr::SwapchainUsageFlags::SAMPLED | xr::SwapchainUsageFlags::COLOR_ATTACHMENT
        }
        SwapchainUsage::DepthStencil => {
            xr::SwapchainUsageFlags::SAMPLED | xr::SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT
        }
    }
}

fn wait_timeout(timeout: Option<Duration>) -> xr::Duration {
    match timeout {
        Some(timeout) => {
            xr::Duration::from_nanos(i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX))
        }
        None => xr::Duration::INFINITE,
    }
}

fn session_handle(session: xr::sys::Session) -> SessionHandle {
    SessionHandle::from_raw(session.into_raw())
}

fn xr_path(path: XrPath) -> xr::Path {
    xr::Path::from_raw(path.into_raw())
}

impl XrRuntime for OpenXrRuntime {
    type GraphicsDevice = VulkanDevice;

    fn label(&self) -> &'static str {
        "OpenXR"
    }

    fn required_extensions(&self) -> &[&'static str] {
        &[KHR_VULKAN_ENABLE2]
    }

    fn enumerate_instance_extensions(&self) -> XrResult<Vec<String>> {
        let available = self
            .entry
            .enumerate_extensions()
            .map_err(failed("enumerate_instance_extensions"))?;
        Ok(advertised_extensions(&available))
    }

    fn create_instance(&self, info: &InstanceCreateInfo) -> XrResult<InstanceHandle> {
        let mut extensions = xr::ExtensionSet::default();
        for name in &info.enabled_extensions {
            match name.as_str() {
                KHR_VULKAN_ENABLE2 => extensions.khr_vulkan_enable2 = true,
                MSFT_UNBOUNDED_REFERENCE_SPACE => extensions.msft_unbounded_reference_space = true,
                MSFT_SPATIAL_ANCHOR => extensions.msft_spatial_anchor = true,
                other => extensions.other.push(other.to_string()),
            }
        }

        let app_info = xr::ApplicationInfo {
            application_name: &info.application_name,
            application_version: info.application_version,
            engine_name: &info.engine_name,
            engine_version: info.engine_version,
        };
        let instance = self
            .entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(failed("create_instance"))?;

        if let Ok(properties) = instance.properties() {
            log::info!(
                "[xr::openxr] runtime {} {}",
                properties.runtime_name,
                properties.runtime_version
            );
        }

        let handle = InstanceHandle::from_raw(instance.as_raw().into_raw());
        self.objects().instance = Some(instance);
        Ok(handle)
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> XrResult<()> {
        let mut objects = self.objects();
        match objects.instance.as_ref() {
            Some(current) if current.as_raw().into_raw() == instance.into_raw() => {
                objects.instance = None;
                Ok(())
            }
            _ => Err(invalid_handle("destroy_instance")),
        }
    }

    fn get_system(&self, _instance: InstanceHandle, form_factor: FormFactor) -> XrResult<SystemId> {
        let instance = self.instance("get_system")?;
        let form_factor = match form_factor {
            FormFactor::HeadMountedDisplay => xr::FormFactor::HEAD_MOUNTED_DISPLAY,
            FormFactor::HandheldDisplay => xr::FormFactor::HANDHELD_DISPLAY,
        };
        match instance.system(form_factor) {
            Ok(system) => Ok(SystemId::from_raw(system.into_raw())),
            Err(xr::sys::Result::ERROR_FORM_FACTOR_UNAVAILABLE) => {
                Err(XrError::FormFactorUnavailable)
            }
            Err(result) => Err(XrError::runtime("get_system", result.into_raw())),
        }
    }

    fn system_properties(
        &self,
        _instance: InstanceHandle,
        system: SystemId,
    ) -> XrResult<SystemProperties> {
        let instance = self.instance("system_properties")?;
        let properties = instance
            .system_properties(xr::SystemId::from_raw(system.into_raw()))
            .map_err(failed("system_properties"))?;
        Ok(SystemProperties {
            system_name: properties.system_name,
            vendor_id: properties.vendor_id,
            max_swapchain_width: properties.graphics_properties.max_swapchain_image_width,
            max_swapchain_height: properties.graphics_properties.max_swapchain_image_height,
            max_layer_count: properties.graphics_properties.max_layer_count,
            orientation_tracking: properties.tracking_properties.orientation_tracking.into(),
            position_tracking: properties.tracking_properties.position_tracking.into(),
        })
    }

    fn enumerate_environment_blend_modes(
        &self,
        _instance: InstanceHandle,
        system: SystemId,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<Vec<EnvironmentBlendMode>> {
        let instance = self.instance("enumerate_environment_blend_modes")?;
        let modes = instance
            .enumerate_environment_blend_modes(
                xr::SystemId::from_raw(system.into_raw()),
                view_configuration(view_configuration_type),
            )
            .map_err(failed("enumerate_environment_blend_modes"))?;
        Ok(modes.into_iter().filter_map(blend_mode_from_xr).collect())
    }

    fn enumerate_view_configuration_views(
        &self,
        _instance: InstanceHandle,
        system: SystemId,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>> {
        let instance = self.instance("enumerate_view_configuration_views")?;
        let views = instance
            .enumerate_view_configuration_views(
                xr::SystemId::from_raw(system.into_raw()),
                view_configuration(view_configuration_type),
            )
            .map_err(failed("enumerate_view_configuration_views"))?;
        Ok(views
            .into_iter()
            .map(|view| ViewConfigurationView {
                recommended_width: view.recommended_image_rect_width,
                recommended_height: view.recommended_image_rect_height,
                max_width: view.max_image_rect_width,
                max_height: view.max_image_rect_height,
                recommended_sample_count: view.recommended_swapchain_sample_count,
                max_sample_count: view.max_swapchain_sample_count,
            })
            .collect())
    }

    fn create_session(
        &self,
        _instance: InstanceHandle,
        system: SystemId,
        device: &VulkanDevice,
    ) -> XrResult<SessionHandle> {
        let instance = self.instance("create_session")?;
        let system = xr::SystemId::from_raw(system.into_raw());

        // The runtime rejects sessions whose requirements were never queried.
        let requirements = instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(failed("create_session"))?;
        log::debug!(
            "[xr::openxr] vulkan {}..{} supported",
            requirements.min_api_version_supported,
            requirements.max_api_version_supported
        );

        let info = xr::vulkan::SessionCreateInfo {
            instance: device.instance as _,
            physical_device: device.physical_device as _,
            device: device.device as _,
            queue_family_index: device.queue_family_index,
            queue_index: device.queue_index,
        };
        // The host guarantees the Vulkan objects are valid and outlive the session.
        let (session, waiter, stream) =
            unsafe { instance.create_session::<xr::Vulkan>(system, &info) }
                .map_err(failed("create_session"))?;

        let handle = session_handle(session.as_raw());
        self.objects().sessions.insert(
            handle,
            SessionEntry {
                session,
                waiter,
                stream,
            },
        );
        Ok(handle)
    }

    fn destroy_session(&self, session: SessionHandle) -> XrResult<()> {
        forget(&mut self.objects().sessions, session, "destroy_session")
    }

    fn begin_session(
        &self,
        session: SessionHandle,
        view_configuration_type: ViewConfigurationType,
    ) -> XrResult<()> {
        let objects = self.objects();
        let entry = lookup(&objects.sessions, session, "begin_session")?;
        entry
            .session
            .begin(view_configuration(view_configuration_type))
            .map(drop)
            .map_err(failed("begin_session"))
    }

    fn end_session(&self, session: SessionHandle) -> XrResult<()> {
        let objects = self.objects();
        let entry = lookup(&objects.sessions, session, "end_session")?;
        entry
            .session
            .end()
            .map(drop)
            .map_err(failed("end_session"))
    }

    fn request_exit_session(&self, session: SessionHandle) -> XrResult<()> {
        let objects = self.objects();
        let entry = lookup(&objects.sessions, session, "request_exit_session")?;
        entry
            .session
            .request_exit()
            .map_err(failed("request_exit_session"))
    }

    fn poll_event(&self, _instance: InstanceHandle) -> XrResult<Option<Event>> {
        let instance = self.instance("poll_event")?;
        let mut buffer = xr::EventDataBuffer::new();
        let Some(event) = instance
            .poll_event(&mut buffer)
            .map_err(failed("poll_event"))?
        else {
            return Ok(None);
        };

        let event = match event {
            xr::Event::SessionStateChanged(changed) => Event::SessionStateChanged {
                session: session_handle(changed.session()),
                state: session_state_from_xr(changed.state()),
                time: XrTime(changed.time().as_nanos()),
            },
            xr::Event::InstanceLossPending(loss) => Event::InstanceLossPending {
                loss_time: XrTime(loss.loss_time().as_nanos()),
            },
            xr::Event::ReferenceSpaceChangePending(change) => Event::ReferenceSpaceChangePending {
                session: session_handle(change.session()),
                space_type: reference_space_from_xr(change.reference_space_type()),
            },
            xr::Event::InteractionProfileChanged(changed) => Event::InteractionProfileChanged {
                session: session_handle(changed.session()),
            },
            xr::Event::EventsLost(lost) => Event::EventsLost {
                count: lost.lost_event_count(),
            },
            _ => Event::Unrecognized,
        };
        Ok(Some(event))
    }

    fn create_reference_space(
        &self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        pose: Pose,
    ) -> XrResult<SpaceHandle> {
        let mut objects = self.objects();
        let entry = lookup(&objects.sessions, session, "create_reference_space")?;
        let space = entry
            .session
            .create_reference_space(reference_space_to_xr(space_type), to_xr_pose(pose))
            .map_err(failed("create_reference_space"))?;
        let handle = SpaceHandle::from_raw(space.as_raw().into_raw());
        objects.spaces.insert(handle, space);
        Ok(handle)
    }

    fn destroy_space(&self, space: SpaceHandle) -> XrResult<()> {
        forget(&mut self.objects().spaces, space, "destroy_space")
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: XrTime,
    ) -> XrResult<SpaceLocation> {
        let objects = self.objects();
        let space = lookup(&objects.spaces, space, "locate_space")?;
        let base = lookup(&objects.spaces, base, "locate_space")?;
        let location = space
            .locate(base, xr::Time::from_nanos(time.0))
            .map_err(failed("locate_space"))?;
        Ok(SpaceLocation {
            flags: SpaceLocationFlags::from_bits(location.location_flags.into_raw()),
            pose: from_xr_pose(location.pose),
        })
    }

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> XrResult<Vec<i64>> {
        let objects = self.objects();
        let entry = lookup(&objects.sessions, session, "enumerate_swapchain_formats")?;
        let formats = entry
            .session
            .enumerate_swapchain_formats()
            .map_err(failed("enumerate_swapchain_formats"))?;
        Ok(formats.into_iter().map(i64::from).collect())
    }

    fn native_format(&self, format: TextureFormat) -> i64 {
        format.vulkan_code()
    }

    fn texture_format(&self, native: i64) -> Option<TextureFormat> {
        TextureFormat::from_vulkan_code(native)
    }

    fn create_swapchain(
        &self,
        session: SessionHandle,
        info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle> {
        let format = u32::try_from(info.format)
            .map_err(|_| XrError::runtime("create_swapchain", code::VALIDATION_FAILURE))?;

        let mut objects = self.objects();
        let entry = lookup(&objects.sessions, session, "create_swapchain")?;
        let swapchain = entry
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: usage_flags(info.usage),
                format,
                sample_count: info.sample_count,
                width: info.width,
                height: info.height,
                face_count: info.face_count,
                array_size: info.array_size,
                mip_count: info.mip_count,
            })
            .map_err(failed("create_swapchain"))?;
        let handle = SwapchainHandle::from_raw(swapchain.as_raw().into_raw());
        objects.swapchains.insert(handle, swapchain);
        Ok(handle)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        forget(&mut self.objects().swapchains, swapchain, "destroy_swapchain")
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> XrResult<Vec<TextureHandle>> {
        let objects = self.objects();
        let swapchain = lookup(&objects.swapchains, swapchain, "enumerate_swapchain_images")?;
        let images = swapchain
            .enumerate_images()
            .map_err(failed("enumerate_swapchain_images"))?;
        Ok(images.into_iter().map(TextureHandle::from_raw).collect())
    }

    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<u32> {
        let mut objects = self.objects();
        lookup_mut(&mut objects.swapchains, swapchain, "acquire_swapchain_image")?
            .acquire_image()
            .map_err(failed("acquire_swapchain_image"))
    }

    fn wait_swapchain_image(
        &self,
        swapchain: SwapchainHandle,
        timeout: Option<Duration>,
    ) -> XrResult<()> {
        let mut objects = self.objects();
        lookup_mut(&mut objects.swapchains, swapchain, "wait_swapchain_image")?
            .wait_image(wait_timeout(timeout))
            .map(drop)
            .map_err(failed("wait_swapchain_image"))
    }

    fn release_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        let mut objects = self.objects();
        lookup_mut(&mut objects.swapchains, swapchain, "release_swapchain_image")?
            .release_image()
            .map_err(failed("release_swapchain_image"))
    }

    fn string_to_path(&self, _instance: InstanceHandle, path: &str) -> XrResult<XrPath> {
        let instance = self.instance("string_to_path")?;
        let path = instance
            .string_to_path(path)
            .map_err(failed("string_to_path"))?;
        Ok(XrPath::from_raw(path.into_raw()))
    }

    fn create_action_set(
        &self,
        _instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> XrResult<ActionSetHandle> {
        let instance = self.instance("create_action_set")?;
        let action_set = instance
            .create_action_set(name, localized_name, priority)
            .map_err(failed("create_action_set"))?;
        let handle = ActionSetHandle::from_raw(action_set.as_raw().into_raw());
        self.objects().action_sets.insert(handle, action_set);
        Ok(handle)
    }

    fn destroy_action_set(&self, action_set: ActionSetHandle) -> XrResult<()> {
        let mut objects = self.objects();
        forget(&mut objects.action_sets, action_set, "destroy_action_set")?;
        // Actions die with their set.
        objects.actions.retain(|_, (set, _)| *set != action_set);
        Ok(())
    }

    fn create_pose_action(
        &self,
        action_set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        subaction_paths: &[XrPath],
    ) -> XrResult<ActionHandle> {
        let paths: Vec<xr::Path> = subaction_paths.iter().copied().map(xr_path).collect();
        let mut objects = self.objects();
        let action = lookup(&objects.action_sets, action_set, "create_pose_action")?
            .create_action::<xr::Posef>(name, localized_name, &paths)
            .map_err(failed("create_pose_action"))?;
        let handle = ActionHandle::from_raw(action.as_raw().into_raw());
        objects.actions.insert(handle, (action_set, action));
        Ok(handle)
    }

    fn create_action_space(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
        pose: Pose,
    ) -> XrResult<SpaceHandle> {
        let mut objects = self.objects();
        let entry = lookup(&objects.sessions, session, "create_action_space")?;
        let (_, action) = lookup(&objects.actions, action, "create_action_space")?;
        let space = action
            .create_space(entry.session.clone(), xr_path(subaction_path), to_xr_pose(pose))
            .map_err(failed("create_action_space"))?;
        let handle = SpaceHandle::from_raw(space.as_raw().into_raw());
        objects.spaces.insert(handle, space);
        Ok(handle)
    }

    fn suggest_interaction_profile_bindings(
        &self,
        _instance: InstanceHandle,
        interaction_profile: XrPath,
        bindings: &[SuggestedBinding],
    ) -> XrResult<()> {
        const CALL: &str = "suggest_interaction_profile_bindings";
        let objects = self.objects();
        let instance = objects.instance.as_ref().ok_or_else(|| invalid_handle(CALL))?;
        let bindings = bindings
            .iter()
            .map(|binding| {
                let (_, action) = lookup(&objects.actions, binding.action, CALL)?;
                Ok(xr::Binding::new(action, xr_path(binding.binding)))
            })
            .collect::<XrResult<Vec<_>>>()?;
        instance
            .suggest_interaction_profile_bindings(xr_path(interaction_profile), &bindings)
            .map_err(failed(CALL))
    }

    fn attach_session_action_sets(
        &self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> XrResult<()> {
        const CALL: &str = "attach_session_action_sets";
        let objects = self.objects();
        let entry = lookup(&objects.sessions, session, CALL)?;
        let sets = action_sets
            .iter()
            .map(|set| lookup(&objects.action_sets, *set, CALL))
            .collect::<XrResult<Vec<_>>>()?;
        entry.session.attach_action_sets(&sets).map_err(failed(CALL))
    }

    fn sync_actions(&self, session: SessionHandle, action_sets: &[ActionSetHandle]) -> XrResult<()> {
        const CALL: &str = "sync_actions";
        let objects = self.objects();
        let entry = lookup(&objects.sessions, session, CALL)?;
        let active = action_sets
            .iter()
            .map(|set| lookup(&objects.action_sets, *set, CALL).map(xr::ActiveActionSet::new))
            .collect::<XrResult<Vec<_>>>()?;
        entry.session.sync_actions(&active).map_err(failed(CALL))
    }

    fn wait_frame(&self, session: SessionHandle) -> XrResult<FrameState> {
        let mut objects = self.objects();
        let state = lookup_mut(&mut objects.sessions, session, "wait_frame")?
            .waiter
            .wait()
            .map_err(failed("wait_frame"))?;
        Ok(FrameState {
            should_render: state.should_render,
            predicted_display_time: XrTime(state.predicted_display_time.as_nanos()),
            predicted_display_period: state.predicted_display_period.as_nanos(),
        })
    }

    fn begin_frame(&self, session: SessionHandle) -> XrResult<()> {
        let mut objects = self.objects();
        lookup_mut(&mut objects.sessions, session, "begin_frame")?
            .stream
            .begin()
            .map(drop)
            .map_err(failed("begin_frame"))
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        view_configuration_type: ViewConfigurationType,
        display_time: XrTime,
        space: SpaceHandle,
    ) -> XrResult<Vec<LocatedView>> {
        let objects = self.objects();
        let entry = lookup(&objects.sessions, session, "locate_views")?;
        let space = lookup(&objects.spaces, space, "locate_views")?;
        let (_, views) = entry
            .session
            .locate_views(
                view_configuration(view_configuration_type),
                xr::Time::from_nanos(display_time.0),
                space,
            )
            .map_err(failed("locate_views"))?;
        Ok(views
            .into_iter()
            .map(|view| LocatedView {
                pose: from_xr_pose(view.pose),
                fov: from_xr_fov(view.fov),
            })
            .collect())
    }

    fn end_frame(&self, session: SessionHandle, info: &FrameEndInfo<'_>) -> XrResult<()> {
        const CALL: &str = "end_frame";
        let mut objects = self.objects();
        let Objects {
            sessions,
            spaces,
            swapchains,
            ..
        } = &mut *objects;
        let (spaces, swapchains) = (&*spaces, &*swapchains);

        let view_sets = info
            .layers
            .iter()
            .map(|layer| {
                layer
                    .views
                    .iter()
                    .map(|view| {
                        let swapchain = lookup(swapchains, view.sub_image.swapchain, CALL)?;
                        Ok(xr::CompositionLayerProjectionView::new()
                            .pose(to_xr_pose(view.pose))
                            .fov(to_xr_fov(view.fov))
                            .sub_image(
                                xr::SwapchainSubImage::new()
                                    .swapchain(swapchain)
                                    .image_rect(to_xr_rect(view.sub_image.image_rect))
                                    .image_array_index(view.sub_image.image_array_index),
                            ))
                    })
                    .collect::<XrResult<Vec<_>>>()
            })
            .collect::<XrResult<Vec<_>>>()?;

        let layers = info
            .layers
            .iter()
            .zip(&view_sets)
            .map(|(layer, views)| {
                let space = lookup(spaces, layer.space, CALL)?;
                Ok(xr::CompositionLayerProjection::new()
                    .layer_flags(xr::CompositionLayerFlags::from_raw(layer.flags.bits()))
                    .space(space)
                    .views(views))
            })
            .collect::<XrResult<Vec<_>>>()?;
        let layers: Vec<&xr::CompositionLayerBase<'_, xr::Vulkan>> =
            layers.iter().map(|layer| &**layer).collect();

        lookup_mut(sessions, session, CALL)?
            .stream
            .end(
                xr::Time::from_nanos(info.display_time.0),
                blend_mode_to_xr(info.environment_blend_mode),
                &layers,
            )
            .map_err(failed(CALL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_composition_is_not_advertised() {
        let mut available = xr::ExtensionSet::default();
        available.khr_vulkan_enable2 = true;
        available.khr_composition_layer_depth = true;
        available.msft_unbounded_reference_space = true;
        available.other.push("XR_EXT_hand_tracking".to_string());

        let names = advertised_extensions(&available);
        assert_eq!(
            names,
            [
                KHR_VULKAN_ENABLE2,
                MSFT_UNBOUNDED_REFERENCE_SPACE,
                "XR_EXT_hand_tracking"
            ]
        );
    }

    #[test]
    fn pose_survives_conversion() {
        let pose = Pose {
            position: Vector3 {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
            orientation: Quaternion::IDENTITY,
        };
        assert_eq!(from_xr_pose(to_xr_pose(pose)), pose);
    }

    #[test]
    fn blend_modes_map_both_ways() {
        for mode in [
            EnvironmentBlendMode::Opaque,
            EnvironmentBlendMode::Additive,
            EnvironmentBlendMode::AlphaBlend,
        ] {
            assert_eq!(blend_mode_from_xr(blend_mode_to_xr(mode)), Some(mode));
        }
    }

    #[test]
    fn lifecycle_states_are_recognized() {
        assert_eq!(
            session_state_from_xr(xr::SessionState::STOPPING),
            SessionState::Stopping
        );
        assert_eq!(
            session_state_from_xr(xr::SessionState::LOSS_PENDING),
            SessionState::LossPending
        );
        assert_eq!(
            session_state_from_xr(xr::SessionState::UNKNOWN),
            SessionState::Unknown
        );
    }

    #[test]
    fn depth_swapchains_are_depth_attachments() {
        let flags = usage_flags(SwapchainUsage::DepthStencil);
        assert!(flags.contains(xr::SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!flags.contains(xr::SwapchainUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn missing_timeout_waits_forever() {
        assert_eq!(wait_timeout(None), xr::Duration::INFINITE);
        assert_eq!(
            wait_timeout(Some(Duration::from_millis(5))).as_nanos(),
            5_000_000
        );
    }
}
