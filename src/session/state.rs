//! Session state transitions, kept free of any runtime so the render-loop
//! decisions can be checked in isolation.

use crate::runtime::SessionState;

/// Render-loop outcome of one event pump. Reset at the start of every
/// [`crate::Session::get_next_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopControl {
    pub exit_render_loop: bool,
    pub request_restart: bool,
}

/// Runtime call the session must issue in response to a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Begin,
    End,
}

/// The events a session reacts to. Anything else arrives as `Ignored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    InstanceLossPending,
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    pub control: LoopControl,
    pub command: Option<SessionCommand>,
    /// Set when no further events may be processed during this pump.
    pub stop_processing: bool,
}

pub fn transition(state: SessionState, control: LoopControl, event: SessionEvent) -> Transition {
    let unchanged = Transition {
        state,
        control,
        command: None,
        stop_processing: false,
    };

    match event {
        SessionEvent::InstanceLossPending => Transition {
            control: LoopControl {
                exit_render_loop: true,
                request_restart: false,
            },
            stop_processing: true,
            ..unchanged
        },
        SessionEvent::Ignored => unchanged,
        SessionEvent::StateChanged(next) => {
            let mut outcome = Transition {
                state: next,
                ..unchanged
            };
            match next {
                SessionState::Ready => outcome.command = Some(SessionCommand::Begin),
                SessionState::Stopping => outcome.command = Some(SessionCommand::End),
                SessionState::Exiting => {
                    outcome.control = LoopControl {
                        exit_render_loop: true,
                        request_restart: false,
                    };
                }
                SessionState::LossPending => {
                    outcome.control = LoopControl {
                        exit_render_loop: true,
                        request_restart: true,
                    };
                }
                _ => {}
            }
            outcome
        }
    }
}

/// Result of feeding a whole event sequence through [`transition`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Replay {
    pub state: SessionState,
    pub control: LoopControl,
    pub commands: Vec<SessionCommand>,
    pub processed: usize,
}

/// Applies `events` in order starting from `initial`, stopping early where a
/// real pump would.
pub fn replay(initial: SessionState, events: impl IntoIterator<Item = SessionEvent>) -> Replay {
    let mut replay = Replay {
        state: initial,
        ..Replay::default()
    };
    for event in events {
        let step = transition(replay.state, replay.control, event);
        replay.state = step.state;
        replay.control = step.control;
        replay.commands.extend(step.command);
        replay.processed += 1;
        if step.stop_processing {
            break;
        }
    }
    replay
}
