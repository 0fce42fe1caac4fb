use crate::error::XrResult;
use crate::runtime::{ActionSetHandle, SessionHandle, SpaceHandle, SwapchainHandle, XrRuntime};
use std::fmt;

/// A runtime object that can be destroyed through its handle.
pub(crate) trait RuntimeResource: Copy + fmt::Debug {
    const KIND: &'static str;

    fn destroy<R: XrRuntime>(self, runtime: &R) -> XrResult<()>;
}

impl RuntimeResource for SessionHandle {
    const KIND: &'static str = "session";

    fn destroy<R: XrRuntime>(self, runtime: &R) -> XrResult<()> {
        runtime.destroy_session(self)
    }
}

impl RuntimeResource for SpaceHandle {
    const KIND: &'static str = "space";

    fn destroy<R: XrRuntime>(self, runtime: &R) -> XrResult<()> {
        runtime.destroy_space(self)
    }
}

impl RuntimeResource for SwapchainHandle {
    const KIND: &'static str = "swapchain";

    fn destroy<R: XrRuntime>(self, runtime: &R) -> XrResult<()> {
        runtime.destroy_swapchain(self)
    }
}

impl RuntimeResource for ActionSetHandle {
    const KIND: &'static str = "action set";

    fn destroy<R: XrRuntime>(self, runtime: &R) -> XrResult<()> {
        runtime.destroy_action_set(self)
    }
}

/// Exclusive owner of a runtime handle; destroys it on drop.
pub(crate) struct Owned<'r, R: XrRuntime, H: RuntimeResource> {
    runtime: &'r R,
    handle: H,
}

impl<'r, R: XrRuntime, H: RuntimeResource> Owned<'r, R, H> {
    pub(crate) fn new(runtime: &'r R, handle: H) -> Self {
        Self { runtime, handle }
    }

    pub(crate) fn handle(&self) -> H {
        self.handle
    }

    pub(crate) fn runtime(&self) -> &'r R {
        self.runtime
    }
}

impl<R: XrRuntime, H: RuntimeResource> Drop for Owned<'_, R, H> {
    fn drop(&mut self) {
        if let Err(err) = self.handle.destroy(self.runtime) {
            log::error!("[xr] failed to destroy {} {:?}: {err}", H::KIND, self.handle);
        }
    }
}

impl<R: XrRuntime, H: RuntimeResource> fmt::Debug for Owned<'_, R, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}
