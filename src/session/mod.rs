pub mod actions;
pub mod state;
pub mod swapchain;

use crate::error::{XrError, XrResult};
use crate::frame::{Frame, View};
use crate::handle::Owned;
use crate::runtime::{Event, Pose, ReferenceSpaceType, SessionHandle, SessionState, Size, SpaceHandle, XrRuntime};
use crate::system::{System, VIEW_CONFIGURATION_TYPE};
use actions::{ActionSystem, Handedness, InputSource};
use state::{LoopControl, SessionCommand, SessionEvent, transition};
use swapchain::SwapchainManager;

pub enum NextFrame<'s, 'sys, R: XrRuntime> {
    Frame(Frame<'s, 'sys, R>),
    /// The runtime has not started the session, or stopped it without
    /// exiting. Poll again later.
    Idle,
    /// The render loop must stop. With `restart` set the runtime was lost and
    /// the host should rebuild the system and session from scratch.
    End { restart: bool },
}

/// A running XR session bound to one graphics device. Fields drop in
/// declaration order so every child handle is destroyed before the session.
pub struct Session<'sys, R: XrRuntime> {
    pub(crate) actions: ActionSystem<'sys, R>,
    pub(crate) swapchains: SwapchainManager<'sys, R>,
    pub(crate) scene_space: Owned<'sys, R, SpaceHandle>,
    pub(crate) handle: Owned<'sys, R, SessionHandle>,
    pub(crate) system: &'sys System<R>,
    scene_space_type: ReferenceSpaceType,
    state: SessionState,
    running: bool,
    pub(crate) depth_near: f32,
    pub(crate) depth_far: f32,
    pub(crate) views: Vec<View>,
    pub(crate) input_sources: Vec<InputSource>,
}

impl<'sys, R: XrRuntime> Session<'sys, R> {
    pub fn create(system: &'sys System<R>, device: &R::GraphicsDevice) -> XrResult<Self> {
        let (Some(instance), Some(system_id)) = (system.instance(), system.system_id()) else {
            return Err(XrError::NotInitialized);
        };
        let runtime = system.runtime();
        let config = system.config();

        let handle = Owned::new(
            runtime,
            runtime.create_session(instance, system_id, device)?,
        );

        let scene_space_type = if system
            .extensions()
            .is_some_and(|extensions| extensions.unbounded_space_supported())
        {
            ReferenceSpaceType::Unbounded
        } else {
            ReferenceSpaceType::Local
        };
        let scene_space = Owned::new(
            runtime,
            runtime.create_reference_space(handle.handle(), scene_space_type, Pose::IDENTITY)?,
        );

        let swapchains =
            SwapchainManager::create(runtime, instance, system_id, handle.handle(), config)?;
        let actions = ActionSystem::create(runtime, instance, handle.handle())?;

        log::info!(
            "[xr::session] created session on {} with {:?} scene space and {} views",
            runtime.label(),
            scene_space_type,
            swapchains.view_count()
        );

        Ok(Self {
            views: Vec::with_capacity(swapchains.view_count()),
            input_sources: Handedness::ALL
                .iter()
                .map(|hand| InputSource::untracked(*hand))
                .collect(),
            actions,
            swapchains,
            scene_space,
            handle,
            system,
            scene_space_type,
            state: SessionState::Unknown,
            running: false,
            depth_near: config.depth_near,
            depth_far: config.depth_far,
        })
    }

    /// Drains pending runtime events, then starts the next frame while the
    /// runtime keeps the session running. The frame's views and input
    /// sources are rewritten by the next call.
    pub fn get_next_frame(&mut self) -> XrResult<NextFrame<'_, 'sys, R>> {
        let control = self.process_events()?;
        if control.exit_render_loop {
            log::info!(
                "[xr::session] leaving render loop in {:?} (restart: {})",
                self.state,
                control.request_restart
            );
            return Ok(NextFrame::End {
                restart: control.request_restart,
            });
        }
        if !self.running {
            log::debug!("[xr::session] session not running in {:?}", self.state);
            return Ok(NextFrame::Idle);
        }
        Frame::begin(self).map(NextFrame::Frame)
    }

    fn process_events(&mut self) -> XrResult<LoopControl> {
        let runtime = self.system.runtime();
        let instance = self.system.instance().ok_or(XrError::NotInitialized)?;
        let mut control = LoopControl::default();

        while let Some(event) = runtime.poll_event(instance)? {
            let step = transition(self.state, control, self.classify(event));
            if step.state != self.state {
                log::info!("[xr::session] state {:?} -> {:?}", self.state, step.state);
            }
            self.state = step.state;
            control = step.control;

            match step.command {
                Some(SessionCommand::Begin) => {
                    runtime.begin_session(self.handle.handle(), VIEW_CONFIGURATION_TYPE)?;
                    self.running = true;
                }
                Some(SessionCommand::End) => {
                    self.running = false;
                    runtime.end_session(self.handle.handle())?;
                }
                None => {}
            }
            if step.stop_processing {
                log::warn!("[xr::session] instance loss pending");
                break;
            }
        }
        Ok(control)
    }

    fn classify(&self, event: Event) -> SessionEvent {
        match event {
            Event::SessionStateChanged { session, state, .. } if session == self.handle.handle() => {
                SessionEvent::StateChanged(state)
            }
            Event::SessionStateChanged { session, state, .. } => {
                log::warn!("[xr::session] ignoring {state:?} for foreign session {session:?}");
                SessionEvent::Ignored
            }
            Event::InstanceLossPending { .. } => SessionEvent::InstanceLossPending,
            other => {
                log::debug!("[xr::session] ignoring event {other:?}");
                SessionEvent::Ignored
            }
        }
    }

    pub fn request_end_session(&self) -> XrResult<()> {
        log::info!("[xr::session] requesting session exit");
        self.system
            .runtime()
            .request_exit_session(self.handle.handle())
    }

    pub fn width_and_height_for_view(&self, view_index: usize) -> Option<Size> {
        self.swapchains
            .view(view_index)
            .map(|view| view.color.size())
    }

    pub fn set_depths_near_far(&mut self, near: f32, far: f32) {
        self.depth_near = near;
        self.depth_far = far;
    }

    pub fn depths_near_far(&self) -> (f32, f32) {
        (self.depth_near, self.depth_far)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn scene_space_type(&self) -> ReferenceSpaceType {
        self.scene_space_type
    }

    pub fn view_count(&self) -> usize {
        self.swapchains.view_count()
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.handle()
    }

    pub fn swapchains(&self) -> &SwapchainManager<'sys, R> {
        &self.swapchains
    }

    pub fn actions(&self) -> &ActionSystem<'sys, R> {
        &self.actions
    }

    pub fn system(&self) -> &'sys System<R> {
        self.system
    }
}
