use crate::error::XrResult;
use crate::handle::Owned;
use crate::runtime::{
    ActionHandle, ActionSetHandle, InstanceHandle, Pose, SessionHandle, SpaceHandle,
    SpaceLocationFlags, SuggestedBinding, XrPath, XrRuntime, XrTime,
};

pub const ACTION_SET_NAME: &str = "default_xr_action_set";
pub const ACTION_SET_LOCALIZED_NAME: &str = "Default XR Action Set";
pub const GRIP_POSE_ACTION_NAME: &str = "controller_get_pose_action";
pub const GRIP_POSE_LOCALIZED_NAME: &str = "Controller Pose";
pub const GRIP_POSE_PATH_SUFFIX: &str = "/input/grip/pose";
pub const AIM_POSE_ACTION_NAME: &str = "controller_get_aim_action";
pub const AIM_POSE_LOCALIZED_NAME: &str = "Controller Aim";
pub const AIM_POSE_PATH_SUFFIX: &str = "/input/aim/pose";
pub const INTERACTION_PROFILE: &str = "/interaction_profiles/khr/simple_controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Hands in subaction order. Every per-hand array is indexed this way.
    pub const ALL: [Handedness; 2] = [Handedness::Left, Handedness::Right];

    pub const fn index(self) -> usize {
        match self {
            Handedness::Left => 0,
            Handedness::Right => 1,
        }
    }

    pub const fn subaction_path(self) -> &'static str {
        match self {
            Handedness::Left => "/user/hand/left",
            Handedness::Right => "/user/hand/right",
        }
    }
}

/// A tracked controller as exposed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSource {
    /// Stable for the lifetime of the session.
    pub id: u32,
    pub handedness: Handedness,
    pub tracked_this_frame: bool,
    pub grip_pose: Pose,
    pub aim_pose: Pose,
}

impl InputSource {
    pub(crate) fn untracked(handedness: Handedness) -> Self {
        Self {
            id: handedness.index() as u32,
            handedness,
            tracked_this_frame: false,
            grip_pose: Pose::IDENTITY,
            aim_pose: Pose::IDENTITY,
        }
    }
}

/// Position and orientation must both be valid and tracked.
pub fn is_fully_tracked(flags: SpaceLocationFlags) -> bool {
    flags.contains(SpaceLocationFlags::ALL_TRACKED)
}

struct PoseAction<'r, R: XrRuntime> {
    spaces: Vec<Owned<'r, R, SpaceHandle>>,
    action: ActionHandle,
}

impl<'r, R: XrRuntime> PoseAction<'r, R> {
    #[allow(clippy::too_many_arguments)]
    fn create(
        runtime: &'r R,
        instance: InstanceHandle,
        session: SessionHandle,
        action_set: ActionSetHandle,
        subaction_paths: &[XrPath],
        names: (&str, &str),
        binding_suffix: &str,
        bindings: &mut Vec<SuggestedBinding>,
    ) -> XrResult<Self> {
        let (name, localized_name) = names;
        let action = runtime.create_pose_action(action_set, name, localized_name, subaction_paths)?;

        let mut spaces = Vec::with_capacity(subaction_paths.len());
        for (hand, subaction_path) in Handedness::ALL.iter().zip(subaction_paths) {
            let binding_path = format!("{}{binding_suffix}", hand.subaction_path());
            bindings.push(SuggestedBinding {
                action,
                binding: runtime.string_to_path(instance, &binding_path)?,
            });
            let space =
                runtime.create_action_space(session, action, *subaction_path, Pose::IDENTITY)?;
            spaces.push(Owned::new(runtime, space));
        }

        Ok(Self { spaces, action })
    }
}

/// Controller pose input: one action set with grip and aim pose actions for
/// both hands, bound to the simple controller profile.
pub struct ActionSystem<'r, R: XrRuntime> {
    grip: PoseAction<'r, R>,
    aim: PoseAction<'r, R>,
    action_set: Owned<'r, R, ActionSetHandle>,
    subaction_paths: Vec<XrPath>,
}

impl<'r, R: XrRuntime> ActionSystem<'r, R> {
    /// Ends by attaching the action set to `session`, after which no further
    /// actions can be created.
    pub(crate) fn create(
        runtime: &'r R,
        instance: InstanceHandle,
        session: SessionHandle,
    ) -> XrResult<Self> {
        let action_set = Owned::new(
            runtime,
            runtime.create_action_set(instance, ACTION_SET_NAME, ACTION_SET_LOCALIZED_NAME, 0)?,
        );

        let subaction_paths = Handedness::ALL
            .iter()
            .map(|hand| runtime.string_to_path(instance, hand.subaction_path()))
            .collect::<XrResult<Vec<_>>>()?;

        let mut bindings = Vec::with_capacity(subaction_paths.len() * 2);
        let grip = PoseAction::create(
            runtime,
            instance,
            session,
            action_set.handle(),
            &subaction_paths,
            (GRIP_POSE_ACTION_NAME, GRIP_POSE_LOCALIZED_NAME),
            GRIP_POSE_PATH_SUFFIX,
            &mut bindings,
        )?;
        let aim = PoseAction::create(
            runtime,
            instance,
            session,
            action_set.handle(),
            &subaction_paths,
            (AIM_POSE_ACTION_NAME, AIM_POSE_LOCALIZED_NAME),
            AIM_POSE_PATH_SUFFIX,
            &mut bindings,
        )?;

        let profile = runtime.string_to_path(instance, INTERACTION_PROFILE)?;
        runtime.suggest_interaction_profile_bindings(instance, profile, &bindings)?;
        runtime.attach_session_action_sets(session, &[action_set.handle()])?;
        log::debug!(
            "[xr::input] attached {ACTION_SET_NAME} with {} suggested bindings",
            bindings.len()
        );

        Ok(Self {
            grip,
            aim,
            action_set,
            subaction_paths,
        })
    }

    pub fn action_set(&self) -> ActionSetHandle {
        self.action_set.handle()
    }

    pub fn grip_action(&self) -> ActionHandle {
        self.grip.action
    }

    pub fn aim_action(&self) -> ActionHandle {
        self.aim.action
    }

    pub fn subaction_path(&self, hand: Handedness) -> Option<XrPath> {
        self.subaction_paths.get(hand.index()).copied()
    }

    pub(crate) fn sync(&self, session: SessionHandle) -> XrResult<()> {
        self.action_set
            .runtime()
            .sync_actions(session, &[self.action_set.handle()])
    }

    /// Locates grip and aim for every hand. A pose is only overwritten when its
    /// space is fully tracked; a hand counts as tracked when both are.
    pub(crate) fn locate(
        &self,
        base: SpaceHandle,
        time: XrTime,
        sources: &mut [InputSource],
    ) -> XrResult<()> {
        let runtime = self.action_set.runtime();
        for source in sources.iter_mut() {
            let index = source.handedness.index();
            let (Some(grip_space), Some(aim_space)) =
                (self.grip.spaces.get(index), self.aim.spaces.get(index))
            else {
                source.tracked_this_frame = false;
                continue;
            };

            let grip = runtime.locate_space(grip_space.handle(), base, time)?;
            let grip_tracked = is_fully_tracked(grip.flags);
            if grip_tracked {
                source.grip_pose = grip.pose;
            }

            let aim = runtime.locate_space(aim_space.handle(), base, time)?;
            let aim_tracked = is_fully_tracked(aim.flags);
            if aim_tracked {
                source.aim_pose = aim.pose;
            }

            source.tracked_this_frame = grip_tracked && aim_tracked;
        }
        Ok(())
    }
}

pub(crate) fn mark_untracked(sources: &mut [InputSource]) {
    for source in sources {
        source.tracked_this_frame = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hands_follow_subaction_order() {
        for (index, hand) in Handedness::ALL.iter().enumerate() {
            assert_eq!(hand.index(), index);
        }
        assert_eq!(Handedness::Left.subaction_path(), "/user/hand/left");
        assert_eq!(Handedness::Right.subaction_path(), "/user/hand/right");
    }

    #[test]
    fn mark_untracked_keeps_last_poses() {
        let mut sources = [InputSource {
            tracked_this_frame: true,
            grip_pose: Pose {
                position: crate::runtime::Vector3 {
                    x: 1.0,
                    y: 2.0,
                    z: 3.0,
                },
                ..Pose::IDENTITY
            },
            ..InputSource::untracked(Handedness::Left)
        }];
        mark_untracked(&mut sources);
        assert!(!sources[0].tracked_this_frame);
        assert_eq!(sources[0].grip_pose.position.y, 2.0);
    }

    proptest! {
        #[test]
        fn tracked_only_with_all_four_bits(bits in 0u64..16) {
            let flags = SpaceLocationFlags::from_bits(bits);
            prop_assert_eq!(is_fully_tracked(flags), bits == 0xF);
        }

        #[test]
        fn extra_bits_do_not_matter(extra in 0u64..u64::MAX) {
            let flags = SpaceLocationFlags::from_bits(extra);
            let with_all = flags.union(SpaceLocationFlags::ALL_TRACKED);
            prop_assert!(is_fully_tracked(with_all));
            for missing in [
                SpaceLocationFlags::ORIENTATION_VALID,
                SpaceLocationFlags::POSITION_VALID,
                SpaceLocationFlags::ORIENTATION_TRACKED,
                SpaceLocationFlags::POSITION_TRACKED,
            ] {
                prop_assert!(!is_fully_tracked(with_all.without(missing)));
            }
        }
    }
}
