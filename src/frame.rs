use crate::error::{XrError, XrResult};
use crate::runtime::{
    CompositionLayerFlags, DepthInfo, EnvironmentBlendMode, FrameEndInfo, Fov, Pose,
    ProjectionLayer, ProjectionView, Size, SwapchainHandle, SwapchainSubImage, TextureFormat,
    TextureHandle, Vector3, XrRuntime, XrTime,
};
use crate::session::Session;
use crate::session::actions::{self, InputSource};
use crate::session::swapchain::Swapchain;
use crate::system::{STEREO_VIEW_COUNT, System, VIEW_CONFIGURATION_TYPE};
use std::slice;
use std::time::Duration;

/// Everything the renderer needs to draw one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
    pub color_texture: TextureHandle,
    pub color_format: TextureFormat,
    pub color_size: Size,
    pub depth_texture: TextureHandle,
    pub depth_format: TextureFormat,
    pub depth_size: Size,
    pub depth_near: f32,
    pub depth_far: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Ray {
    pub origin: Vector3,
    pub direction: Vector3,
}

/// One compositor frame.
///
/// Created by [`Session::get_next_frame`] after the runtime has paced the
/// caller and the frame has begun. Ending the frame is mandatory once it has
/// begun, so it happens on drop: acquired images are released and the frame
/// is submitted at the display time it was started with. Call [`Frame::end`]
/// instead of dropping to observe failures.
pub struct Frame<'s, 'sys, R: XrRuntime> {
    session: &'s mut Session<'sys, R>,
    should_render: bool,
    display_time: XrTime,
    acquired: Vec<SwapchainHandle>,
    projection_views: Vec<ProjectionView>,
    layer_ready: bool,
    finished: bool,
}

impl<'s, 'sys, R: XrRuntime> Frame<'s, 'sys, R> {
    pub(crate) fn begin(session: &'s mut Session<'sys, R>) -> XrResult<Self> {
        let system: &'sys System<R> = session.system;
        let runtime = system.runtime();
        let handle = session.handle.handle();

        let frame_state = runtime.wait_frame(handle)?;
        runtime.begin_frame(handle)?;

        let mut frame = Self {
            session,
            should_render: frame_state.should_render,
            display_time: frame_state.predicted_display_time,
            acquired: Vec::with_capacity(STEREO_VIEW_COUNT * 2),
            projection_views: Vec::with_capacity(STEREO_VIEW_COUNT),
            layer_ready: false,
            finished: false,
        };

        if frame.should_render {
            // An early return drops `frame`, which releases and ends it.
            frame.prepare_views()?;
            frame.update_input_sources()?;
            frame.layer_ready = true;
        } else {
            log::debug!(
                "[xr::frame] skipping render at {:?}",
                frame.display_time
            );
            frame.session.views.clear();
            actions::mark_untracked(&mut frame.session.input_sources);
        }
        Ok(frame)
    }

    fn prepare_views(&mut self) -> XrResult<()> {
        let session = &mut *self.session;
        let system = session.system;
        let runtime = system.runtime();

        let located = runtime.locate_views(
            session.handle.handle(),
            VIEW_CONFIGURATION_TYPE,
            self.display_time,
            session.scene_space.handle(),
        )?;
        let configured = session.swapchains.view_count();
        if located.len() != STEREO_VIEW_COUNT || located.len() != configured {
            return Err(XrError::ViewCountMismatch {
                expected: configured,
                located: located.len(),
            });
        }

        let timeout = system.config().swapchain_wait_timeout();
        let depth_supported = system
            .extensions()
            .is_some_and(|extensions| extensions.depth_supported());

        session.views.clear();
        self.projection_views.clear();
        for (located, chains) in located.iter().zip(session.swapchains.views()) {
            let color_texture = acquire_and_wait(&chains.color, timeout, &mut self.acquired)?;
            let depth_texture = acquire_and_wait(&chains.depth, timeout, &mut self.acquired)?;
            let image_rect = chains.color.full_rect();

            session.views.push(View {
                pose: located.pose,
                fov: located.fov,
                color_texture,
                color_format: chains.color.format(),
                color_size: chains.color.size(),
                depth_texture,
                depth_format: chains.depth.format(),
                depth_size: chains.depth.size(),
                depth_near: session.depth_near,
                depth_far: session.depth_far,
            });

            let depth = depth_supported.then(|| DepthInfo {
                sub_image: SwapchainSubImage {
                    swapchain: chains.depth.handle(),
                    image_rect,
                    image_array_index: 0,
                },
                min_depth: 0.0,
                max_depth: 1.0,
                near_z: session.depth_near,
                far_z: session.depth_far,
            });
            self.projection_views.push(ProjectionView {
                pose: located.pose,
                fov: located.fov,
                sub_image: SwapchainSubImage {
                    swapchain: chains.color.handle(),
                    image_rect,
                    image_array_index: 0,
                },
                depth,
            });
        }
        Ok(())
    }

    fn update_input_sources(&mut self) -> XrResult<()> {
        let session = &mut *self.session;
        session.actions.sync(session.handle.handle())?;
        session.actions.locate(
            session.scene_space.handle(),
            self.display_time,
            &mut session.input_sources,
        )
    }

    pub fn should_render(&self) -> bool {
        self.should_render
    }

    pub fn display_time(&self) -> XrTime {
        self.display_time
    }

    /// One entry per eye; empty when the frame is not rendered.
    pub fn views(&self) -> &[View] {
        &self.session.views
    }

    pub fn input_sources(&self) -> &[InputSource] {
        &self.session.input_sources
    }

    /// Compositor hit testing is not available; always empty.
    pub fn hit_test(&self, _ray: Ray) -> Vec<Pose> {
        Vec::new()
    }

    /// Ends the frame now, reporting the first failure.
    pub fn end(mut self) -> XrResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> XrResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let session = &*self.session;
        let runtime = session.system.runtime();

        // Every ready image gets a release attempt, even after a failure.
        let mut release_error = None;
        for swapchain in self.acquired.drain(..) {
            if let Err(err) = runtime.release_swapchain_image(swapchain) {
                log::error!("[xr::frame] failed to release image of {swapchain:?}: {err}");
                release_error.get_or_insert(err);
            }
        }

        let layer = ProjectionLayer {
            flags: CompositionLayerFlags::BLEND_TEXTURE_SOURCE_ALPHA,
            space: session.scene_space.handle(),
            views: &self.projection_views,
        };
        let layers = if self.layer_ready && release_error.is_none() {
            slice::from_ref(&layer)
        } else {
            &[]
        };
        let info = FrameEndInfo {
            display_time: self.display_time,
            environment_blend_mode: session
                .system
                .environment_blend_mode()
                .unwrap_or(EnvironmentBlendMode::Opaque),
            layers,
        };
        let ended = runtime.end_frame(session.handle.handle(), &info);

        match release_error {
            Some(err) => {
                if let Err(end_err) = ended {
                    log::error!("[xr::frame] failed to end frame: {end_err}");
                }
                Err(err)
            }
            None => ended,
        }
    }
}

impl<R: XrRuntime> Drop for Frame<'_, '_, R> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::error!("[xr::frame] frame teardown failed: {err}");
        }
    }
}

fn acquire_and_wait<R: XrRuntime>(
    swapchain: &Swapchain<'_, R>,
    timeout: Option<Duration>,
    acquired: &mut Vec<SwapchainHandle>,
) -> XrResult<TextureHandle> {
    let index = swapchain.acquire()?;
    if let Err(err) = swapchain.wait(timeout) {
        log::error!(
            "[xr::frame] image {index} of {:?} never became ready and cannot be released",
            swapchain.handle()
        );
        return Err(err);
    }
    // Only waited images may be released.
    acquired.push(swapchain.handle());
    swapchain.texture(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{SimulatedDevice, SimulatedRuntime};
    use crate::session::NextFrame;

    #[test]
    fn hit_test_reports_nothing() {
        let runtime = SimulatedRuntime::default();
        let mut system = System::new(runtime.clone());
        assert!(system.try_initialize().expect("initialize"));
        let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

        let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
            panic!("session ended unexpectedly");
        };
        assert!(frame.hit_test(Ray::default()).is_empty());
        frame.end().expect("end frame");
    }

    #[test]
    fn explicit_end_reports_release_failure() {
        let runtime = SimulatedRuntime::default();
        let mut system = System::new(runtime.clone());
        assert!(system.try_initialize().expect("initialize"));
        let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
        runtime.fail_on(
            crate::runtime::RuntimeCall::ReleaseSwapchainImage,
            1,
            crate::error::code::RUNTIME_FAILURE,
        );

        let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
            panic!("session ended unexpectedly");
        };
        let err = frame.end().unwrap_err();
        assert!(matches!(
            err,
            XrError::Runtime {
                call: "release_swapchain_image",
                ..
            }
        ));
        // The remaining three releases were still attempted.
        assert_eq!(runtime.released_image_count(), 3);
        let submitted = runtime.last_submitted_frame().expect("frame ended");
        assert_eq!(submitted.layer_count(), 0);
    }
}
