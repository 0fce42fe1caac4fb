use super::{
    ActionHandle, ActionSetHandle, CompositionLayerFlags, EnvironmentBlendMode, Event, FormFactor,
    FrameEndInfo, FrameState, Fov, InstanceCreateInfo, InstanceHandle, LocatedView, Pose,
    ProjectionView, Quaternion, ReferenceSpaceType, SessionHandle, SessionState, Size,
    SpaceHandle, SpaceLocation, SpaceLocationFlags, SuggestedBinding, SwapchainCreateInfo,
    SwapchainHandle, SystemId, SystemProperties, TextureFormat, TextureHandle, Vector3,
    ViewConfigurationType, ViewConfigurationView, XrPath, XrRuntime, XrTime,
};
use crate::error::{XrError, XrResult, code};
use crate::extensions::{
    KHR_COMPOSITION_LAYER_DEPTH, MSFT_SPATIAL_ANCHOR, MSFT_UNBOUNDED_REFERENCE_SPACE,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DISPLAY_PERIOD_NS: i64 = 11_111_111;
const HALF_IPD: f32 = 0.032;
const HALF_FOV: f32 = 0.785;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeCall {
    EnumerateInstanceExtensions,
    CreateInstance,
    DestroyInstance,
    GetSystem,
    SystemProperties,
    EnumerateEnvironmentBlendModes,
    EnumerateViewConfigurationViews,
    CreateSession,
    DestroySession,
    BeginSession,
    EndSession,
    RequestExitSession,
    PollEvent,
    CreateReferenceSpace,
    DestroySpace,
    LocateSpace,
    EnumerateSwapchainFormats,
    CreateSwapchain,
    DestroySwapchain,
    EnumerateSwapchainImages,
    AcquireSwapchainImage,
    WaitSwapchainImage,
    ReleaseSwapchainImage,
    StringToPath,
    CreateActionSet,
    DestroyActionSet,
    CreatePoseAction,
    CreateActionSpace,
    SuggestInteractionProfileBindings,
    AttachSessionActionSets,
    SyncActions,
    WaitFrame,
    BeginFrame,
    LocateViews,
    EndFrame,
}

impl RuntimeCall {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeCall::EnumerateInstanceExtensions => "enumerate_instance_extensions",
            RuntimeCall::CreateInstance => "create_instance",
            RuntimeCall::DestroyInstance => "destroy_instance",
            RuntimeCall::GetSystem => "get_system",
            RuntimeCall::SystemProperties => "system_properties",
            RuntimeCall::EnumerateEnvironmentBlendModes => "enumerate_environment_blend_modes",
            RuntimeCall::EnumerateViewConfigurationViews => "enumerate_view_configuration_views",
            RuntimeCall::CreateSession => "create_session",
            RuntimeCall::DestroySession => "destroy_session",
            RuntimeCall::BeginSession => "begin_session",
            RuntimeCall::EndSession => "end_session",
            RuntimeCall::RequestExitSession => "request_exit_session",
            RuntimeCall::PollEvent => "poll_event",
            RuntimeCall::CreateReferenceSpace => "create_reference_space",
            RuntimeCall::DestroySpace => "destroy_space",
            RuntimeCall::LocateSpace => "locate_space",
            RuntimeCall::EnumerateSwapchainFormats => "enumerate_swapchain_formats",
            RuntimeCall::CreateSwapchain => "create_swapchain",
            RuntimeCall::DestroySwapchain => "destroy_swapchain",
            RuntimeCall::EnumerateSwapchainImages => "enumerate_swapchain_images",
            RuntimeCall::AcquireSwapchainImage => "acquire_swapchain_image",
            RuntimeCall::WaitSwapchainImage => "wait_swapchain_image",
            RuntimeCall::ReleaseSwapchainImage => "release_swapchain_image",
            RuntimeCall::StringToPath => "string_to_path",
            RuntimeCall::CreateActionSet => "create_action_set",
            RuntimeCall::DestroyActionSet => "destroy_action_set",
            RuntimeCall::CreatePoseAction => "create_pose_action",
            RuntimeCall::CreateActionSpace => "create_action_space",
            RuntimeCall::SuggestInteractionProfileBindings => {
                "suggest_interaction_profile_bindings"
            }
            RuntimeCall::AttachSessionActionSets => "attach_session_action_sets",
            RuntimeCall::SyncActions => "sync_actions",
            RuntimeCall::WaitFrame => "wait_frame",
            RuntimeCall::BeginFrame => "begin_frame",
            RuntimeCall::LocateViews => "locate_views",
            RuntimeCall::EndFrame => "end_frame",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAvailability {
    Available,
    FormFactorUnavailable,
    Fault(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedLayer {
    pub flags: CompositionLayerFlags,
    pub space: SpaceHandle,
    pub views: Vec<ProjectionView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedFrame {
    pub display_time: XrTime,
    pub environment_blend_mode: EnvironmentBlendMode,
    pub layers: Vec<SubmittedLayer>,
}

impl SubmittedFrame {
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulatedDevice(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Waited(XrTime),
    Begun(XrTime),
}

struct SimSession {
    device: SimulatedDevice,
    running: bool,
    exit_requested: bool,
    phase: FramePhase,
    attached: Vec<ActionSetHandle>,
}

enum SpaceKind {
    Reference,
    Action { subaction_path: String },
}

struct SimSpace {
    kind: SpaceKind,
}

struct SimSwapchain {
    images: Vec<TextureHandle>,
    next_image: u32,
    acquired: Option<u32>,
    waited: bool,
}

struct Settings {
    extensions: Vec<String>,
    swapchain_formats: Vec<i64>,
    view_sizes: Vec<Size>,
    located_view_count: Option<usize>,
    blend_modes: Vec<EnvironmentBlendMode>,
    image_count: usize,
    system_properties: SystemProperties,
    default_should_render: bool,
    auto_transitions: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            extensions: vec![
                KHR_COMPOSITION_LAYER_DEPTH.to_string(),
                MSFT_UNBOUNDED_REFERENCE_SPACE.to_string(),
                MSFT_SPATIAL_ANCHOR.to_string(),
            ],
            swapchain_formats: vec![
                TextureFormat::Bgra8Srgb.vulkan_code(),
                TextureFormat::Rgba8Srgb.vulkan_code(),
                TextureFormat::Rgba8.vulkan_code(),
                TextureFormat::D32Float.vulkan_code(),
                TextureFormat::D24S8.vulkan_code(),
            ],
            view_sizes: vec![
                Size {
                    width: 1440,
                    height: 1600,
                };
                2
            ],
            located_view_count: None,
            blend_modes: vec![EnvironmentBlendMode::Opaque],
            image_count: 3,
            system_properties: SystemProperties {
                system_name: "Simulated HMD".to_string(),
                vendor_id: 0,
                max_swapchain_width: 4096,
                max_swapchain_height: 4096,
                max_layer_count: 16,
                orientation_tracking: true,
                position_tracking: true,
            },
            default_should_render: true,
            auto_transitions: true,
        }
    }
}

#[derive(Default)]
struct SimulatedState {
    settings: Settings,
    next_handle: u64,
    calls: Vec<RuntimeCall>,
    counts: HashMap<RuntimeCall, usize>,
    faults: HashMap<RuntimeCall, Vec<(usize, i32)>>,
    system_script: VecDeque<SystemAvailability>,
    should_render_script: VecDeque<bool>,
    events: VecDeque<Event>,
    instances: HashSet<InstanceHandle>,
    system_id: Option<SystemId>,
    latest_session: Option<SessionHandle>,
    sessions: HashMap<SessionHandle, SimSession>,
    spaces: HashMap<SpaceHandle, SimSpace>,
    swapchains: HashMap<SwapchainHandle, SimSwapchain>,
    created_swapchains: Vec<SwapchainCreateInfo>,
    action_sets: HashMap<ActionSetHandle, bool>,
    actions: HashMap<ActionHandle, ActionSetHandle>,
    paths: Vec<String>,
    hand_locations: HashMap<String, SpaceLocation>,
    suggested_bindings: Vec<(XrPath, Vec<SuggestedBinding>)>,
    submitted: Vec<SubmittedFrame>,
    frame_time: i64,
    released_images: usize,
}

impl SimulatedState {
    fn record(&mut self, call: RuntimeCall) -> XrResult<()> {
        self.calls.push(call);
        let count = self.counts.entry(call).or_insert(0);
        *count += 1;
        let occurrence = *count;

        if let Some(faults) = self.faults.get_mut(&call) {
            if let Some(position) = faults.iter().position(|(nth, _)| *nth == occurrence) {
                let (_, result) = faults.remove(position);
                return Err(XrError::runtime(call.name(), result));
            }
        }
        Ok(())
    }

    fn allocate(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check_instance(&self, call: RuntimeCall, instance: InstanceHandle) -> XrResult<()> {
        if self.instances.contains(&instance) {
            Ok(())
        } else {
            Err(XrError::runtime(call.name(), code::HANDLE_INVALID))
        }
    }

    fn session_mut(
        &mut self,
        call: RuntimeCall,
        session: SessionHandle,
    ) -> XrResult<&mut SimSession> {
        self.sessions
            .get_mut(&session)
            .ok_or_else(|| XrError::runtime(call.name(), code::HANDLE_INVALID))
    }

    fn swapchain_mut(
        &mut self,
        call: RuntimeCall,
        swapchain: SwapchainHandle,
    ) -> XrResult<&mut SimSwapchain> {
        self.swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| XrError::runtime(call.name(), code::HANDLE_INVALID))
    }

    fn path_string(&self, path: XrPath) -> Option<&str> {
        let index = usize::try_from(path.into_raw()).ok()?.checked_sub(1)?;
        self.paths.get(index).map(String::as_str)
    }

    fn queue_state(&mut self, session: SessionHandle, state: SessionState) {
        let time = XrTime(self.frame_time);
        self.events.push_back(Event::SessionStateChanged {
            session,
            state,
            time,
        });
    }
}

/// Deterministic in-process runtime for tests and headless hosts.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// [`crate::System`] owns another. Sessions start `Idle` then `Ready`; after
/// `begin_session` the runtime walks through `Synchronized`, `Visible` and
/// `Focused`. Disable that with [`SimulatedRuntime::with_auto_transitions`] to
/// script every state change by hand.
#[derive(Clone, Default)]
pub struct SimulatedRuntime {
    inner: Arc<Mutex<SimulatedState>>,
    required: Vec<&'static str>,
}

impl SimulatedRuntime {
    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_extensions(self, names: &[&str]) -> Self {
        self.state().settings.extensions = names.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_required_extensions(mut self, names: &[&'static str]) -> Self {
        self.required = names.to_vec();
        self
    }

    pub fn with_swapchain_formats(self, formats: &[TextureFormat]) -> Self {
        self.state().settings.swapchain_formats =
            formats.iter().map(|format| format.vulkan_code()).collect();
        self
    }

    pub fn with_view_sizes(self, sizes: Vec<Size>) -> Self {
        self.state().settings.view_sizes = sizes;
        self
    }

    pub fn with_located_view_count(self, count: usize) -> Self {
        self.state().settings.located_view_count = Some(count);
        self
    }

    pub fn with_blend_modes(self, modes: Vec<EnvironmentBlendMode>) -> Self {
        self.state().settings.blend_modes = modes;
        self
    }

    pub fn with_image_count(self, count: usize) -> Self {
        self.state().settings.image_count = count.max(1);
        self
    }

    pub fn with_system_properties(self, properties: SystemProperties) -> Self {
        self.state().settings.system_properties = properties;
        self
    }

    pub fn with_auto_transitions(self, enabled: bool) -> Self {
        self.state().settings.auto_transitions = enabled;
        self
    }

    pub fn set_should_render(&self, should_render: bool) {
        self.state().settings.default_should_render = should_render;
    }

    pub fn script_system_availability(
        &self,
        outcomes: impl IntoIterator<Item = SystemAvailability>,
    ) {
        self.state().system_script.extend(outcomes);
    }

    pub fn script_should_render(&self, values: impl IntoIterator<Item = bool>) {
        self.state().should_render_script.extend(values);
    }

    /// Fails the `occurrence`-th call (1-based, counted over the runtime's
    /// lifetime) of `call` with `result`.
    pub fn fail_on(&self, call: RuntimeCall, occurrence: usize, result: i32) {
        self.state()
            .faults
            .entry(call)
            .or_default()
            .push((occurrence, result));
    }

    pub fn push_event(&self, event: Event) {
        self.state().events.push_back(event);
    }

    pub fn push_session_state(&self, state: SessionState) {
        let mut inner = self.state();
        let session = inner.latest_session.unwrap_or(SessionHandle::NULL);
        inner.queue_state(session, state);
    }

    pub fn push_instance_loss(&self) {
        let mut inner = self.state();
        let loss_time = XrTime(inner.frame_time);
        inner.events.push_back(Event::InstanceLossPending { loss_time });
    }

    pub fn set_hand_location(&self, subaction_path: &str, location: SpaceLocation) {
        self.state()
            .hand_locations
            .insert(subaction_path.to_string(), location);
    }

    pub fn call_count(&self, call: RuntimeCall) -> usize {
        self.state().counts.get(&call).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    pub fn submitted_frames(&self) -> Vec<SubmittedFrame> {
        self.state().submitted.clone()
    }

    pub fn last_submitted_frame(&self) -> Option<SubmittedFrame> {
        self.state().submitted.last().cloned()
    }

    pub fn created_swapchains(&self) -> Vec<SwapchainCreateInfo> {
        self.state().created_swapchains.clone()
    }

    pub fn outstanding_image_count(&self) -> usize {
        self.state()
            .swapchains
            .values()
            .filter(|swapchain| swapchain.acquired.is_some())
            .count()
    }

    pub fn released_image_count(&self) -> usize {
        self.state().released_images
    }

    pub fn live_handle_count(&self) -> usize {
        let inner = self.state();
        inner.instances.len()
            + inner.sessions.len()
            + inner.spaces.len()
            + inner.swapchains.len()
            + inner.action_sets.len()
    }

    pub fn session_running(&self) -> bool {
        let inner = self.state();
        inner
            .latest_session
            .and_then(|session| inner.sessions.get(&session))
            .is_some_and(|session| session.running)
    }

    pub fn session_device(&self) -> Option<SimulatedDevice> {
        let inner = self.state();
        inner
            .latest_session
            .and_then(|session| inner.sessions.get(&session))
            .map(|session| session.device)
    }

    pub fn suggested_bindings(&self) -> Vec<(String, Vec<String>)> {
        let inner = self.state();
        inner
            .suggested_bindings
            .iter()
            .map(|(profile, bindings)| {
                let profile = inner.path_string(*profile).unwrap_or_default().to_string();
                let paths = bindings
                    .iter()
                    .map(|binding| {
                        inner
                            .path_string(binding.binding)
                            .unwrap_or_default()
                            .to_string()
                    })
                    .collect();
                (profile, paths)
            })
            .collect()
    }
}

impl XrRuntime for SimulatedRuntime {
    type GraphicsDevice = SimulatedDevice;

    fn label(&self) -> &'static str {
        "Simulated XR Runtime"
    }

    fn required_extensions(&self) -> &[&'static str] {
        &self.required
    }

    fn enumerate_instance_extensions(&self) -> XrResult<Vec<String>> {
        let mut inner = self.state();
        inner.record(RuntimeCall::EnumerateInstanceExtensions)?;
        Ok(inner.settings.extensions.clone())
    }

    fn create_instance(&self, info: &InstanceCreateInfo) -> XrResult<InstanceHandle> {
        let mut inner = self.state();
        inner.record(RuntimeCall::CreateInstance)?;
        if let Some(missing) = info
            .enabled_extensions
            .iter()
            .find(|name| !inner.settings.extensions.contains(name))
        {
            log::warn!("[xr::sim] instance requested unknown extension {missing}");
            return Err(XrError::runtime(
                RuntimeCall::CreateInstance.name(),
                code::VALIDATION_FAILURE,
            ));
        }
        let instance = InstanceHandle::from_raw(inner.allocate());
        inner.instances.insert(instance);
        Ok(instance)
    }

    fn destroy_instance(&self, instance: InstanceHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::DestroyInstance)?;
        inner.check_instance(RuntimeCall::DestroyInstance, instance)?;
        inner.instances.remove(&instance);
        Ok(())
    }

    fn get_system(&self, instance: InstanceHandle, form_factor: FormFactor) -> XrResult<SystemId> {
        let mut inner = self.state();
        inner.record(RuntimeCall::GetSystem)?;
        inner.check_instance(RuntimeCall::GetSystem, instance)?;
        if form_factor != FormFactor::HeadMountedDisplay {
            return Err(XrError::FormFactorUnavailable);
        }
        match inner
            .system_script
            .pop_front()
            .unwrap_or(SystemAvailability::Available)
        {
            SystemAvailability::Available => {
                let system_id = match inner.system_id {
                    Some(system_id) => system_id,
                    None => {
                        let system_id = SystemId::from_raw(inner.allocate());
                        inner.system_id = Some(system_id);
                        system_id
                    }
                };
                Ok(system_id)
            }
            SystemAvailability::FormFactorUnavailable => Err(XrError::FormFactorUnavailable),
            SystemAvailability::Fault(result) => {
                Err(XrError::runtime(RuntimeCall::GetSystem.name(), result))
            }
        }
    }

    fn system_properties(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
    ) -> XrResult<SystemProperties> {
        let mut inner = self.state();
        inner.record(RuntimeCall::SystemProperties)?;
        inner.check_instance(RuntimeCall::SystemProperties, instance)?;
        Ok(inner.settings.system_properties.clone())
    }

    fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
        _view_configuration: ViewConfigurationType,
    ) -> XrResult<Vec<EnvironmentBlendMode>> {
        let mut inner = self.state();
        inner.record(RuntimeCall::EnumerateEnvironmentBlendModes)?;
        inner.check_instance(RuntimeCall::EnumerateEnvironmentBlendModes, instance)?;
        Ok(inner.settings.blend_modes.clone())
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        _system: SystemId,
        _view_configuration: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>> {
        let mut inner = self.state();
        inner.record(RuntimeCall::EnumerateViewConfigurationViews)?;
        inner.check_instance(RuntimeCall::EnumerateViewConfigurationViews, instance)?;
        Ok(inner
            .settings
            .view_sizes
            .iter()
            .map(|size| ViewConfigurationView {
                recommended_width: size.width,
                recommended_height: size.height,
                max_width: size.width * 2,
                max_height: size.height * 2,
                recommended_sample_count: 4,
                max_sample_count: 8,
            })
            .collect())
    }

    fn create_session(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        device: &SimulatedDevice,
    ) -> XrResult<SessionHandle> {
        let mut inner = self.state();
        inner.record(RuntimeCall::CreateSession)?;
        inner.check_instance(RuntimeCall::CreateSession, instance)?;
        if inner.system_id != Some(system) {
            return Err(XrError::runtime(
                RuntimeCall::CreateSession.name(),
                code::VALIDATION_FAILURE,
            ));
        }
        let session = SessionHandle::from_raw(inner.allocate());
        inner.sessions.insert(
            session,
            SimSession {
                device: *device,
                running: false,
                exit_requested: false,
                phase: FramePhase::Idle,
                attached: Vec::new(),
            },
        );
        inner.latest_session = Some(session);
        if inner.settings.auto_transitions {
            inner.queue_state(session, SessionState::Idle);
            inner.queue_state(session, SessionState::Ready);
        }
        Ok(session)
    }

    fn destroy_session(&self, session: SessionHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::DestroySession)?;
        inner
            .sessions
            .remove(&session)
            .map(|_| ())
            .ok_or_else(|| XrError::runtime(RuntimeCall::DestroySession.name(), code::HANDLE_INVALID))
    }

    fn begin_session(
        &self,
        session: SessionHandle,
        _view_configuration: ViewConfigurationType,
    ) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::BeginSession)?;
        let sim = inner.session_mut(RuntimeCall::BeginSession, session)?;
        if sim.running {
            return Err(XrError::runtime(
                RuntimeCall::BeginSession.name(),
                code::SESSION_RUNNING,
            ));
        }
        sim.running = true;
        if inner.settings.auto_transitions {
            inner.queue_state(session, SessionState::Synchronized);
            inner.queue_state(session, SessionState::Visible);
            inner.queue_state(session, SessionState::Focused);
        }
        Ok(())
    }

    fn end_session(&self, session: SessionHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::EndSession)?;
        let sim = inner.session_mut(RuntimeCall::EndSession, session)?;
        if !sim.running {
            return Err(XrError::runtime(
                RuntimeCall::EndSession.name(),
                code::SESSION_NOT_RUNNING,
            ));
        }
        sim.running = false;
        sim.phase = FramePhase::Idle;
        let exit_requested = sim.exit_requested;
        if inner.settings.auto_transitions {
            inner.queue_state(session, SessionState::Idle);
            if exit_requested {
                inner.queue_state(session, SessionState::Exiting);
            }
        }
        Ok(())
    }

    fn request_exit_session(&self, session: SessionHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::RequestExitSession)?;
        let sim = inner.session_mut(RuntimeCall::RequestExitSession, session)?;
        if !sim.running {
            return Err(XrError::runtime(
                RuntimeCall::RequestExitSession.name(),
                code::SESSION_NOT_RUNNING,
            ));
        }
        sim.exit_requested = true;
        if inner.settings.auto_transitions {
            inner.queue_state(session, SessionState::Stopping);
        }
        Ok(())
    }

    fn poll_event(&self, instance: InstanceHandle) -> XrResult<Option<Event>> {
        let mut inner = self.state();
        inner.record(RuntimeCall::PollEvent)?;
        inner.check_instance(RuntimeCall::PollEvent, instance)?;
        Ok(inner.events.pop_front())
    }

    fn create_reference_space(
        &self,
        session: SessionHandle,
        space_type: ReferenceSpaceType,
        _pose: Pose,
    ) -> XrResult<SpaceHandle> {
        let mut inner = self.state();
        inner.record(RuntimeCall::CreateReferenceSpace)?;
        inner.session_mut(RuntimeCall::CreateReferenceSpace, session)?;
        let unbounded_enabled = inner
            .settings
            .extensions
            .iter()
            .any(|name| name == MSFT_UNBOUNDED_REFERENCE_SPACE);
        if space_type == ReferenceSpaceType::Unbounded && !unbounded_enabled {
            return Err(XrError::runtime(
                RuntimeCall::CreateReferenceSpace.name(),
                code::VALIDATION_FAILURE,
            ));
        }
        let space = SpaceHandle::from_raw(inner.allocate());
        inner.spaces.insert(
            space,
            SimSpace {
                kind: SpaceKind::Reference,
            },
        );
        Ok(space)
    }

    fn destroy_space(&self, space: SpaceHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::DestroySpace)?;
        inner
            .spaces
            .remove(&space)
            .map(|_| ())
            .ok_or_else(|| XrError::runtime(RuntimeCall::DestroySpace.name(), code::HANDLE_INVALID))
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        _time: XrTime,
    ) -> XrResult<SpaceLocation> {
        let mut inner = self.state();
        inner.record(RuntimeCall::LocateSpace)?;
        if !inner.spaces.contains_key(&base) {
            return Err(XrError::runtime(
                RuntimeCall::LocateSpace.name(),
                code::HANDLE_INVALID,
            ));
        }
        let sim = inner
            .spaces
            .get(&space)
            .ok_or_else(|| XrError::runtime(RuntimeCall::LocateSpace.name(), code::HANDLE_INVALID))?;
        let location = match &sim.kind {
            SpaceKind::Reference => SpaceLocation {
                flags: SpaceLocationFlags::ALL_TRACKED,
                pose: Pose::IDENTITY,
            },
            SpaceKind::Action { subaction_path } => inner
                .hand_locations
                .get(subaction_path)
                .copied()
                .unwrap_or_else(|| default_hand_location(subaction_path)),
        };
        Ok(location)
    }

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> XrResult<Vec<i64>> {
        let mut inner = self.state();
        inner.record(RuntimeCall::EnumerateSwapchainFormats)?;
        inner.session_mut(RuntimeCall::EnumerateSwapchainFormats, session)?;
        Ok(inner.settings.swapchain_formats.clone())
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
        let mut inner = self.state();
        inner.record(RuntimeCall::CreateSwapchain)?;
        inner.session_mut(RuntimeCall::CreateSwapchain, session)?;
        if !inner.settings.swapchain_formats.contains(&info.format) {
            return Err(XrError::runtime(
                RuntimeCall::CreateSwapchain.name(),
                code::VALIDATION_FAILURE,
            ));
        }
        let swapchain = SwapchainHandle::from_raw(inner.allocate());
        let images = (0..inner.settings.image_count)
            .map(|_| TextureHandle::from_raw(inner.allocate()))
            .collect();
        inner.swapchains.insert(
            swapchain,
            SimSwapchain {
                images,
                next_image: 0,
                acquired: None,
                waited: false,
            },
        );
        inner.created_swapchains.push(*info);
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::DestroySwapchain)?;
        inner.swapchains.remove(&swapchain).map(|_| ()).ok_or_else(|| {
            XrError::runtime(RuntimeCall::DestroySwapchain.name(), code::HANDLE_INVALID)
        })
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> XrResult<Vec<TextureHandle>> {
        let mut inner = self.state();
        inner.record(RuntimeCall::EnumerateSwapchainImages)?;
        let sim = inner.swapchain_mut(RuntimeCall::EnumerateSwapchainImages, swapchain)?;
        Ok(sim.images.clone())
    }

    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<u32> {
        let mut inner = self.state();
        inner.record(RuntimeCall::AcquireSwapchainImage)?;
        let sim = inner.swapchain_mut(RuntimeCall::AcquireSwapchainImage, swapchain)?;
        if sim.acquired.is_some() {
            return Err(XrError::runtime(
                RuntimeCall::AcquireSwapchainImage.name(),
                code::CALL_ORDER_INVALID,
            ));
        }
        let index = sim.next_image;
        sim.next_image = (index + 1) % sim.images.len() as u32;
        sim.acquired = Some(index);
        sim.waited = false;
        Ok(index)
    }

    fn wait_swapchain_image(
        &self,
        swapchain: SwapchainHandle,
        _timeout: Option<Duration>,
    ) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::WaitSwapchainImage)?;
        let sim = inner.swapchain_mut(RuntimeCall::WaitSwapchainImage, swapchain)?;
        if sim.acquired.is_none() {
            return Err(XrError::runtime(
                RuntimeCall::WaitSwapchainImage.name(),
                code::CALL_ORDER_INVALID,
            ));
        }
        sim.waited = true;
        Ok(())
    }

    fn release_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::ReleaseSwapchainImage)?;
        let sim = inner.swapchain_mut(RuntimeCall::ReleaseSwapchainImage, swapchain)?;
        if sim.acquired.is_none() || !sim.waited {
            return Err(XrError::runtime(
                RuntimeCall::ReleaseSwapchainImage.name(),
                code::CALL_ORDER_INVALID,
            ));
        }
        sim.acquired = None;
        sim.waited = false;
        inner.released_images += 1;
        Ok(())
    }

    fn string_to_path(&self, instance: InstanceHandle, path: &str) -> XrResult<XrPath> {
        let mut inner = self.state();
        inner.record(RuntimeCall::StringToPath)?;
        inner.check_instance(RuntimeCall::StringToPath, instance)?;
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(XrError::runtime(
                RuntimeCall::StringToPath.name(),
                code::VALIDATION_FAILURE,
            ));
        }
        let index = match inner.paths.iter().position(|known| known == path) {
            Some(index) => index,
            None => {
                inner.paths.push(path.to_string());
                inner.paths.len() - 1
            }
        };
        Ok(XrPath::from_raw(index as u64 + 1))
    }

    fn create_action_set(
        &self,
        instance: InstanceHandle,
        _name: &str,
        _localized_name: &str,
        _priority: u32,
    ) -> XrResult<ActionSetHandle> {
        let mut inner = self.state();
        inner.record(RuntimeCall::CreateActionSet)?;
        inner.check_instance(RuntimeCall::CreateActionSet, instance)?;
        let action_set = ActionSetHandle::from_raw(inner.allocate());
        inner.action_sets.insert(action_set, false);
        Ok(action_set)
    }

    fn destroy_action_set(&self, action_set: ActionSetHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::DestroyActionSet)?;
        inner
            .action_sets
            .remove(&action_set)
            .ok_or_else(|| {
                XrError::runtime(RuntimeCall::DestroyActionSet.name(), code::HANDLE_INVALID)
            })?;
        inner.actions.retain(|_, owner| *owner != action_set);
        Ok(())
    }

    fn create_pose_action(
        &self,
        action_set: ActionSetHandle,
        _name: &str,
        _localized_name: &str,
        subaction_paths: &[XrPath],
    ) -> XrResult<ActionHandle> {
        let mut inner = self.state();
        inner.record(RuntimeCall::CreatePoseAction)?;
        let attached = *inner.action_sets.get(&action_set).ok_or_else(|| {
            XrError::runtime(RuntimeCall::CreatePoseAction.name(), code::HANDLE_INVALID)
        })?;
        if attached {
            return Err(XrError::runtime(
                RuntimeCall::CreatePoseAction.name(),
                code::ACTIONSETS_ALREADY_ATTACHED,
            ));
        }
        if subaction_paths
            .iter()
            .any(|path| inner.path_string(*path).is_none())
        {
            return Err(XrError::runtime(
                RuntimeCall::CreatePoseAction.name(),
                code::VALIDATION_FAILURE,
            ));
        }
        let action = ActionHandle::from_raw(inner.allocate());
        inner.actions.insert(action, action_set);
        Ok(action)
    }

    fn create_action_space(
        &self,
        session: SessionHandle,
        action: ActionHandle,
        subaction_path: XrPath,
        _pose: Pose,
    ) -> XrResult<SpaceHandle> {
        let mut inner = self.state();
        inner.record(RuntimeCall::CreateActionSpace)?;
        inner.session_mut(RuntimeCall::CreateActionSpace, session)?;
        if !inner.actions.contains_key(&action) {
            return Err(XrError::runtime(
                RuntimeCall::CreateActionSpace.name(),
                code::HANDLE_INVALID,
            ));
        }
        let subaction_path = inner
            .path_string(subaction_path)
            .ok_or_else(|| {
                XrError::runtime(RuntimeCall::CreateActionSpace.name(), code::VALIDATION_FAILURE)
            })?
            .to_string();
        let space = SpaceHandle::from_raw(inner.allocate());
        inner.spaces.insert(
            space,
            SimSpace {
                kind: SpaceKind::Action { subaction_path },
            },
        );
        Ok(space)
    }

    fn suggest_interaction_profile_bindings(
        &self,
        instance: InstanceHandle,
        interaction_profile: XrPath,
        bindings: &[SuggestedBinding],
    ) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::SuggestInteractionProfileBindings)?;
        inner.check_instance(RuntimeCall::SuggestInteractionProfileBindings, instance)?;
        let unknown_action = bindings
            .iter()
            .any(|binding| !inner.actions.contains_key(&binding.action));
        if unknown_action || inner.path_string(interaction_profile).is_none() {
            return Err(XrError::runtime(
                RuntimeCall::SuggestInteractionProfileBindings.name(),
                code::VALIDATION_FAILURE,
            ));
        }
        inner
            .suggested_bindings
            .push((interaction_profile, bindings.to_vec()));
        Ok(())
    }

    fn attach_session_action_sets(
        &self,
        session: SessionHandle,
        action_sets: &[ActionSetHandle],
    ) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::AttachSessionActionSets)?;
        let sim = inner.session_mut(RuntimeCall::AttachSessionActionSets, session)?;
        if !sim.attached.is_empty() {
            return Err(XrError::runtime(
                RuntimeCall::AttachSessionActionSets.name(),
                code::ACTIONSETS_ALREADY_ATTACHED,
            ));
        }
        sim.attached = action_sets.to_vec();
        for action_set in action_sets {
            match inner.action_sets.get_mut(action_set) {
                Some(attached) => *attached = true,
                None => {
                    return Err(XrError::runtime(
                        RuntimeCall::AttachSessionActionSets.name(),
                        code::HANDLE_INVALID,
                    ));
                }
            }
        }
        Ok(())
    }

    fn sync_actions(&self, session: SessionHandle, action_sets: &[ActionSetHandle]) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::SyncActions)?;
        let sim = inner.session_mut(RuntimeCall::SyncActions, session)?;
        if action_sets.iter().any(|set| !sim.attached.contains(set)) {
            return Err(XrError::runtime(
                RuntimeCall::SyncActions.name(),
                code::CALL_ORDER_INVALID,
            ));
        }
        Ok(())
    }

    fn wait_frame(&self, session: SessionHandle) -> XrResult<FrameState> {
        let mut inner = self.state();
        inner.record(RuntimeCall::WaitFrame)?;
        let should_render = inner
            .should_render_script
            .pop_front()
            .unwrap_or(inner.settings.default_should_render);
        let display_time = XrTime(inner.frame_time + DISPLAY_PERIOD_NS);
        let sim = inner.session_mut(RuntimeCall::WaitFrame, session)?;
        if !sim.running {
            return Err(XrError::runtime(
                RuntimeCall::WaitFrame.name(),
                code::SESSION_NOT_RUNNING,
            ));
        }
        if matches!(sim.phase, FramePhase::Waited(_)) {
            return Err(XrError::runtime(
                RuntimeCall::WaitFrame.name(),
                code::CALL_ORDER_INVALID,
            ));
        }
        sim.phase = FramePhase::Waited(display_time);
        inner.frame_time = display_time.0;
        Ok(FrameState {
            should_render,
            predicted_display_time: display_time,
            predicted_display_period: DISPLAY_PERIOD_NS,
        })
    }

    fn begin_frame(&self, session: SessionHandle) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::BeginFrame)?;
        let sim = inner.session_mut(RuntimeCall::BeginFrame, session)?;
        match sim.phase {
            FramePhase::Waited(time) => {
                sim.phase = FramePhase::Begun(time);
                Ok(())
            }
            _ => Err(XrError::runtime(
                RuntimeCall::BeginFrame.name(),
                code::CALL_ORDER_INVALID,
            )),
        }
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        _view_configuration: ViewConfigurationType,
        _display_time: XrTime,
        space: SpaceHandle,
    ) -> XrResult<Vec<LocatedView>> {
        let mut inner = self.state();
        inner.record(RuntimeCall::LocateViews)?;
        inner.session_mut(RuntimeCall::LocateViews, session)?;
        if !inner.spaces.contains_key(&space) {
            return Err(XrError::runtime(
                RuntimeCall::LocateViews.name(),
                code::HANDLE_INVALID,
            ));
        }
        let count = inner
            .settings
            .located_view_count
            .unwrap_or(inner.settings.view_sizes.len());
        Ok((0..count)
            .map(|index| {
                let side = if index % 2 == 0 { -1.0 } else { 1.0 };
                LocatedView {
                    pose: Pose {
                        position: Vector3 {
                            x: side * HALF_IPD,
                            y: 1.6,
                            z: 0.0,
                        },
                        orientation: Quaternion::IDENTITY,
                    },
                    fov: Fov {
                        angle_left: -HALF_FOV,
                        angle_right: HALF_FOV,
                        angle_up: HALF_FOV,
                        angle_down: -HALF_FOV,
                    },
                }
            })
            .collect())
    }

    fn end_frame(&self, session: SessionHandle, info: &FrameEndInfo<'_>) -> XrResult<()> {
        let mut inner = self.state();
        inner.record(RuntimeCall::EndFrame)?;

        let referenced_pending = info.layers.iter().flat_map(|layer| layer.views).any(|view| {
            let depth = view.depth.map(|depth| depth.sub_image.swapchain);
            [Some(view.sub_image.swapchain), depth]
                .into_iter()
                .flatten()
                .any(|swapchain| {
                    inner
                        .swapchains
                        .get(&swapchain)
                        .is_none_or(|sim| sim.acquired.is_some())
                })
        });

        let sim = inner.session_mut(RuntimeCall::EndFrame, session)?;
        let FramePhase::Begun(time) = sim.phase else {
            return Err(XrError::runtime(
                RuntimeCall::EndFrame.name(),
                code::CALL_ORDER_INVALID,
            ));
        };
        if time != info.display_time {
            return Err(XrError::runtime(
                RuntimeCall::EndFrame.name(),
                code::TIME_INVALID,
            ));
        }
        if referenced_pending {
            return Err(XrError::runtime(
                RuntimeCall::EndFrame.name(),
                code::CALL_ORDER_INVALID,
            ));
        }
        sim.phase = FramePhase::Idle;

        inner.submitted.push(SubmittedFrame {
            display_time: info.display_time,
            environment_blend_mode: info.environment_blend_mode,
            layers: info
                .layers
                .iter()
                .map(|layer| SubmittedLayer {
                    flags: layer.flags,
                    space: layer.space,
                    views: layer.views.to_vec(),
                })
                .collect(),
        });
        Ok(())
    }
}

fn default_hand_location(subaction_path: &str) -> SpaceLocation {
    let side = if subaction_path.ends_with("left") {
        -1.0
    } else {
        1.0
    };
    SpaceLocation {
        flags: SpaceLocationFlags::ALL_TRACKED,
        pose: Pose {
            position: Vector3 {
                x: side * 0.2,
                y: 1.2,
                z: -0.3,
            },
            orientation: Quaternion::IDENTITY,
        },
    }
}
