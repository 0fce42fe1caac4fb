use theta_xr::{NextFrame, Session, SimulatedDevice, SimulatedRuntime, System};

const FRAME_LIMIT: usize = 90;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("[xr] error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = SimulatedRuntime::default();
    let mut system = System::new(runtime.clone());
    while !system.try_initialize()? {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let mut session = Session::create(&system, &SimulatedDevice::default())?;
    let mut rendered = 0usize;
    loop {
        if rendered == FRAME_LIMIT {
            session.request_end_session()?;
        }
        let frame = match session.get_next_frame()? {
            NextFrame::Frame(frame) => frame,
            NextFrame::Idle => {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }
            NextFrame::End { restart } => {
                println!("[xr] render loop finished after {rendered} frames (restart: {restart})");
                break;
            }
        };
        if frame.should_render() {
            for (eye, view) in frame.views().iter().enumerate() {
                log::trace!(
                    "[xr] eye {eye} at {:?} into {}x{}",
                    view.pose.position,
                    view.color_size.width,
                    view.color_size.height
                );
            }
            rendered += 1;
        }
        frame.end()?;
    }
    Ok(())
}
