use theta_xr::error::code;
use theta_xr::extensions::MSFT_UNBOUNDED_REFERENCE_SPACE;
use theta_xr::runtime::{
    Pose, RuntimeCall, SessionState, SpaceLocation, SpaceLocationFlags, SwapchainUsage,
    SystemAvailability, TextureFormat,
};
use theta_xr::{
    Handedness, NextFrame, Session, SimulatedDevice, SimulatedRuntime, System, XrError,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn initialized(runtime: &SimulatedRuntime) -> System<SimulatedRuntime> {
    init_logging();
    let mut system = System::new(runtime.clone());
    assert!(system.try_initialize().expect("system should initialize"));
    system
}

#[test]
fn initialization_polls_until_display_is_available() {
    init_logging();
    let runtime = SimulatedRuntime::default();
    runtime.script_system_availability([
        SystemAvailability::FormFactorUnavailable,
        SystemAvailability::FormFactorUnavailable,
    ]);
    let mut system = System::new(runtime.clone());

    assert!(!system.try_initialize().expect("first attempt"));
    assert!(!system.is_initialized());
    assert!(!system.try_initialize().expect("second attempt"));
    assert!(system.try_initialize().expect("third attempt"));
    assert!(system.is_initialized());
    assert!(system.try_initialize().expect("already initialized"));

    assert_eq!(runtime.call_count(RuntimeCall::CreateInstance), 1);
    assert_eq!(runtime.call_count(RuntimeCall::GetSystem), 3);
}

#[test]
fn runtime_fault_during_discovery_is_fatal() {
    init_logging();
    let runtime = SimulatedRuntime::default();
    runtime.script_system_availability([SystemAvailability::Fault(code::RUNTIME_FAILURE)]);
    let mut system = System::new(runtime.clone());

    let err = system.try_initialize().unwrap_err();
    assert!(matches!(
        err,
        XrError::Runtime {
            call: "get_system",
            code: code::RUNTIME_FAILURE
        }
    ));
    assert!(!system.is_initialized());
}

#[test]
fn session_creates_color_and_depth_swapchain_per_eye() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let created = runtime.created_swapchains();
    assert_eq!(created.len(), 4);
    let color: Vec<_> = created
        .iter()
        .filter(|info| info.usage == SwapchainUsage::Color)
        .collect();
    let depth: Vec<_> = created
        .iter()
        .filter(|info| info.usage == SwapchainUsage::DepthStencil)
        .collect();
    assert_eq!(color.len(), 2);
    assert_eq!(depth.len(), 2);
    for info in color {
        assert_eq!(info.format, TextureFormat::Rgba8.vulkan_code());
        assert_eq!((info.width, info.height), (1440, 1600));
        assert_eq!(info.sample_count, 1);
        assert_eq!(info.array_size, 1);
    }
    for info in depth {
        assert_eq!(info.format, TextureFormat::D24S8.vulkan_code());
    }
    assert_eq!(session.swapchains().views().len(), 2);
}

#[test]
fn first_frame_begins_session_and_submits_stereo_layer() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let NextFrame::Frame(frame) = session.get_next_frame().expect("first frame") else {
        panic!("render loop ended before the first frame");
    };
    assert!(frame.should_render());
    assert_eq!(frame.views().len(), 2);
    assert!(frame.views()[0].pose.position.x < frame.views()[1].pose.position.x);
    assert_eq!(frame.input_sources().len(), 2);
    assert!(frame.input_sources().iter().all(|source| source.tracked_this_frame));
    let display_time = frame.display_time();
    frame.end().expect("end frame");

    assert_eq!(session.state(), SessionState::Focused);
    assert!(runtime.session_running());
    assert_eq!(runtime.outstanding_image_count(), 0);
    assert_eq!(runtime.released_image_count(), 4);

    let submitted = runtime.last_submitted_frame().expect("frame submitted");
    assert_eq!(submitted.display_time, display_time);
    assert_eq!(submitted.layer_count(), 1);
    let layer = &submitted.layers[0];
    assert_eq!(layer.views.len(), 2);
    let depth = layer.views[0].depth.expect("depth composition enabled");
    assert_eq!((depth.min_depth, depth.max_depth), (0.0, 1.0));
    assert_eq!((depth.near_z, depth.far_z), (0.5, 1000.0));

    let calls = runtime.calls();
    let position = |call: RuntimeCall| {
        calls
            .iter()
            .position(|recorded| *recorded == call)
            .expect("call recorded")
    };
    let last_release = calls
        .iter()
        .rposition(|recorded| *recorded == RuntimeCall::ReleaseSwapchainImage)
        .expect("images released");
    assert!(position(RuntimeCall::BeginSession) < position(RuntimeCall::WaitFrame));
    assert!(position(RuntimeCall::WaitFrame) < position(RuntimeCall::BeginFrame));
    assert!(position(RuntimeCall::BeginFrame) < position(RuntimeCall::LocateViews));
    assert!(position(RuntimeCall::LocateViews) < position(RuntimeCall::AcquireSwapchainImage));
    assert!(position(RuntimeCall::SyncActions) < position(RuntimeCall::LocateSpace));
    assert!(last_release < position(RuntimeCall::EndFrame));
}

#[test]
fn frame_not_rendered_still_begins_and_ends() {
    let runtime = SimulatedRuntime::default();
    runtime.set_should_render(false);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
        panic!("render loop ended unexpectedly");
    };
    assert!(!frame.should_render());
    assert!(frame.views().is_empty());
    assert!(frame.input_sources().iter().all(|source| !source.tracked_this_frame));
    frame.end().expect("end frame");

    assert_eq!(runtime.call_count(RuntimeCall::WaitFrame), 1);
    assert_eq!(runtime.call_count(RuntimeCall::BeginFrame), 1);
    assert_eq!(runtime.call_count(RuntimeCall::EndFrame), 1);
    assert_eq!(runtime.call_count(RuntimeCall::AcquireSwapchainImage), 0);
    assert_eq!(runtime.call_count(RuntimeCall::SyncActions), 0);
    let submitted = runtime.last_submitted_frame().expect("frame submitted");
    assert_eq!(submitted.layer_count(), 0);
}

#[test]
fn dropping_frame_ends_it() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    for _ in 0..3 {
        let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
            panic!("render loop ended unexpectedly");
        };
        drop(frame);
    }

    assert_eq!(runtime.call_count(RuntimeCall::EndFrame), 3);
    assert_eq!(runtime.outstanding_image_count(), 0);
    let frames = runtime.submitted_frames();
    assert!(frames.iter().all(|frame| frame.layer_count() == 1));
    assert!(frames.windows(2).all(|pair| pair[0].display_time < pair[1].display_time));
}

#[test]
fn image_wait_failure_releases_ready_images() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    // Second wait is the depth image of the first eye.
    runtime.fail_on(RuntimeCall::WaitSwapchainImage, 2, code::RUNTIME_FAILURE);

    let result = session.get_next_frame();
    assert!(matches!(
        result,
        Err(XrError::Runtime {
            call: "wait_swapchain_image",
            ..
        })
    ));
    drop(result);

    // The waited color image is released; the depth image never became
    // ready, and releasing it would be rejected by the runtime.
    assert_eq!(runtime.call_count(RuntimeCall::ReleaseSwapchainImage), 1);
    assert_eq!(runtime.released_image_count(), 1);
    assert_eq!(runtime.outstanding_image_count(), 1);
    assert_eq!(runtime.call_count(RuntimeCall::EndFrame), 1);
    let submitted = runtime.last_submitted_frame().expect("frame ended");
    assert_eq!(submitted.layer_count(), 0);
}

#[test]
fn input_failure_after_acquire_releases_every_image() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    runtime.fail_on(RuntimeCall::LocateSpace, 1, code::RUNTIME_FAILURE);

    let result = session.get_next_frame();
    assert!(matches!(
        result,
        Err(XrError::Runtime {
            call: "locate_space",
            ..
        })
    ));
    drop(result);

    assert_eq!(runtime.released_image_count(), 4);
    assert_eq!(runtime.outstanding_image_count(), 0);
    assert_eq!(runtime.call_count(RuntimeCall::EndFrame), 1);
}

#[test]
fn located_view_count_mismatch_is_reported() {
    let runtime = SimulatedRuntime::default().with_located_view_count(3);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let result = session.get_next_frame();
    assert!(matches!(
        result,
        Err(XrError::ViewCountMismatch {
            expected: 2,
            located: 3
        })
    ));
    drop(result);
    assert_eq!(runtime.call_count(RuntimeCall::AcquireSwapchainImage), 0);
    assert_eq!(runtime.call_count(RuntimeCall::EndFrame), 1);
}

#[test]
fn hand_is_tracked_only_when_fully_located() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    runtime.set_hand_location(
        Handedness::Left.subaction_path(),
        SpaceLocation {
            flags: SpaceLocationFlags::ALL_TRACKED.without(SpaceLocationFlags::POSITION_TRACKED),
            pose: Pose::IDENTITY,
        },
    );

    let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
        panic!("render loop ended unexpectedly");
    };
    let sources = frame.input_sources();
    let left = sources[Handedness::Left.index()];
    let right = sources[Handedness::Right.index()];
    assert_eq!(left.handedness, Handedness::Left);
    assert!(!left.tracked_this_frame);
    assert_eq!(left.grip_pose, Pose::IDENTITY);
    assert!(right.tracked_this_frame);
    assert_eq!(right.grip_pose.position.x, 0.2);
    assert_ne!(left.id, right.id);
    frame.end().expect("end frame");
}

#[test]
fn bindings_target_simple_controller_profile() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let _session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let suggested = runtime.suggested_bindings();
    assert_eq!(suggested.len(), 1);
    let (profile, paths) = &suggested[0];
    assert_eq!(profile, "/interaction_profiles/khr/simple_controller");
    assert_eq!(
        paths,
        &[
            "/user/hand/left/input/grip/pose",
            "/user/hand/right/input/grip/pose",
            "/user/hand/left/input/aim/pose",
            "/user/hand/right/input/aim/pose",
        ]
    );
}

#[test]
fn depth_info_omitted_without_depth_extension() {
    let runtime = SimulatedRuntime::default().with_extensions(&[MSFT_UNBOUNDED_REFERENCE_SPACE]);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
        panic!("render loop ended unexpectedly");
    };
    frame.end().expect("end frame");

    let submitted = runtime.last_submitted_frame().expect("frame submitted");
    assert!(submitted.layers[0].views.iter().all(|view| view.depth.is_none()));
}

#[test]
fn depth_planes_apply_to_following_frames() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    session.set_depths_near_far(0.1, 100.0);

    let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
        panic!("render loop ended unexpectedly");
    };
    assert!(
        frame
            .views()
            .iter()
            .all(|view| view.depth_near == 0.1 && view.depth_far == 100.0)
    );
    frame.end().expect("end frame");

    let submitted = runtime.last_submitted_frame().expect("frame submitted");
    let depth = submitted.layers[0].views[1].depth.expect("depth info");
    assert_eq!((depth.near_z, depth.far_z), (0.1, 100.0));
}

#[test]
fn exiting_state_ends_render_loop_without_restart() {
    let runtime = SimulatedRuntime::default().with_auto_transitions(false);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    runtime.push_session_state(SessionState::Ready);
    runtime.push_session_state(SessionState::Stopping);
    runtime.push_session_state(SessionState::Exiting);

    let next = session.get_next_frame().expect("events processed");
    assert!(matches!(next, NextFrame::End { restart: false }));
    drop(next);

    assert_eq!(session.state(), SessionState::Exiting);
    assert_eq!(runtime.call_count(RuntimeCall::BeginSession), 1);
    assert_eq!(runtime.call_count(RuntimeCall::EndSession), 1);
    assert_eq!(runtime.call_count(RuntimeCall::WaitFrame), 0);
}

#[test]
fn loss_pending_requests_restart() {
    let runtime = SimulatedRuntime::default().with_auto_transitions(false);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    runtime.push_session_state(SessionState::Ready);
    runtime.push_session_state(SessionState::LossPending);

    let next = session.get_next_frame().expect("events processed");
    assert!(matches!(next, NextFrame::End { restart: true }));
}

#[test]
fn instance_loss_stops_event_processing() {
    let runtime = SimulatedRuntime::default().with_auto_transitions(false);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    runtime.push_session_state(SessionState::Ready);
    runtime.push_instance_loss();
    runtime.push_session_state(SessionState::Synchronized);

    let next = session.get_next_frame().expect("events processed");
    assert!(matches!(next, NextFrame::End { restart: false }));
    drop(next);
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn no_frame_before_session_is_ready() {
    let runtime = SimulatedRuntime::default().with_auto_transitions(false);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let next = session.get_next_frame().expect("events processed");
    assert!(matches!(next, NextFrame::Idle));
    drop(next);
    assert!(!session.is_running());
    assert_eq!(runtime.call_count(RuntimeCall::WaitFrame), 0);
}

#[test]
fn stopped_session_idles_until_ready_again() {
    let runtime = SimulatedRuntime::default().with_auto_transitions(false);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    runtime.push_session_state(SessionState::Ready);

    let NextFrame::Frame(frame) = session.get_next_frame().expect("first frame") else {
        panic!("no frame after ready");
    };
    frame.end().expect("end frame");

    runtime.push_session_state(SessionState::Stopping);
    runtime.push_session_state(SessionState::Idle);
    let next = session.get_next_frame().expect("stopping is not fatal");
    assert!(matches!(next, NextFrame::Idle));
    drop(next);
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_running());
    assert!(!runtime.session_running());
    assert_eq!(runtime.call_count(RuntimeCall::WaitFrame), 1);

    let next = session.get_next_frame().expect("still idle");
    assert!(matches!(next, NextFrame::Idle));
    drop(next);

    runtime.push_session_state(SessionState::Ready);
    let NextFrame::Frame(frame) = session.get_next_frame().expect("restarted frame") else {
        panic!("no frame after the session became ready again");
    };
    assert_eq!(frame.views().len(), 2);
    frame.end().expect("end frame");

    assert_eq!(runtime.call_count(RuntimeCall::BeginSession), 2);
    assert_eq!(runtime.call_count(RuntimeCall::EndSession), 1);
    assert_eq!(runtime.submitted_frames().len(), 2);
    assert_eq!(runtime.outstanding_image_count(), 0);
}

#[test]
fn requested_end_winds_session_down() {
    let runtime = SimulatedRuntime::default();
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");

    let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
        panic!("render loop ended unexpectedly");
    };
    frame.end().expect("end frame");

    session.request_end_session().expect("request exit");
    let next = session.get_next_frame().expect("events processed");
    assert!(matches!(next, NextFrame::End { restart: false }));
    drop(next);

    assert_eq!(session.state(), SessionState::Exiting);
    assert!(!runtime.session_running());
    assert_eq!(runtime.call_count(RuntimeCall::EndSession), 1);
}

#[test]
fn foreign_session_events_are_ignored() {
    let runtime = SimulatedRuntime::default().with_auto_transitions(false);
    let system = initialized(&runtime);
    let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
    runtime.push_event(theta_xr::runtime::Event::SessionStateChanged {
        session: theta_xr::runtime::SessionHandle::from_raw(u64::MAX),
        state: SessionState::Exiting,
        time: theta_xr::runtime::XrTime(0),
    });
    runtime.push_session_state(SessionState::Ready);

    let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
        panic!("foreign exit ended the render loop");
    };
    frame.end().expect("end frame");
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn everything_is_destroyed_in_order() {
    let runtime = SimulatedRuntime::default();
    {
        let system = initialized(&runtime);
        let mut session = Session::create(&system, &SimulatedDevice::default()).expect("session");
        let NextFrame::Frame(frame) = session.get_next_frame().expect("frame") else {
            panic!("render loop ended unexpectedly");
        };
        frame.end().expect("end frame");
    }
    assert_eq!(runtime.live_handle_count(), 0);

    let calls = runtime.calls();
    let destroy_session = calls
        .iter()
        .position(|call| *call == RuntimeCall::DestroySession)
        .expect("session destroyed");
    let destroy_instance = calls
        .iter()
        .position(|call| *call == RuntimeCall::DestroyInstance)
        .expect("instance destroyed");
    let last_child = calls
        .iter()
        .rposition(|call| {
            matches!(
                call,
                RuntimeCall::DestroySwapchain | RuntimeCall::DestroySpace | RuntimeCall::DestroyActionSet
            )
        })
        .expect("children destroyed");
    assert!(last_child < destroy_session);
    assert!(destroy_session < destroy_instance);
}
