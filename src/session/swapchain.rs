use crate::config::XrConfig;
use crate::error::{XrError, XrResult, code};
use crate::handle::Owned;
use crate::runtime::{
    InstanceHandle, Rect2D, SessionHandle, Size, SwapchainCreateInfo, SwapchainHandle,
    SwapchainUsage, SystemId, SystemProperties, TextureFormat, TextureHandle,
    ViewConfigurationView, XrRuntime,
};
use crate::system::{STEREO_VIEW_COUNT, VIEW_CONFIGURATION_TYPE};
use std::time::Duration;

/// One runtime swapchain and the images it exposes.
pub struct Swapchain<'r, R: XrRuntime> {
    handle: Owned<'r, R, SwapchainHandle>,
    format: TextureFormat,
    size: Size,
    array_size: u32,
    images: Vec<TextureHandle>,
}

impl<'r, R: XrRuntime> Swapchain<'r, R> {
    fn create(
        runtime: &'r R,
        session: SessionHandle,
        format: SelectedFormat,
        usage: SwapchainUsage,
        size: Size,
        sample_count: u32,
    ) -> XrResult<Self> {
        let info = SwapchainCreateInfo {
            format: format.native,
            usage,
            width: size.width,
            height: size.height,
            array_size: 1,
            sample_count,
            face_count: 1,
            mip_count: 1,
        };
        let handle = Owned::new(runtime, runtime.create_swapchain(session, &info)?);
        let images = runtime.enumerate_swapchain_images(handle.handle())?;

        Ok(Self {
            handle,
            format: format.format,
            size,
            array_size: info.array_size,
            images,
        })
    }

    pub fn handle(&self) -> SwapchainHandle {
        self.handle.handle()
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn array_size(&self) -> u32 {
        self.array_size
    }

    pub fn images(&self) -> &[TextureHandle] {
        &self.images
    }

    /// The whole image, which is what every projection view submits.
    pub fn full_rect(&self) -> Rect2D {
        Rect2D {
            x: 0,
            y: 0,
            width: self.size.width,
            height: self.size.height,
        }
    }

    pub(crate) fn acquire(&self) -> XrResult<u32> {
        self.handle
            .runtime()
            .acquire_swapchain_image(self.handle.handle())
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> XrResult<()> {
        self.handle
            .runtime()
            .wait_swapchain_image(self.handle.handle(), timeout)
    }

    pub(crate) fn texture(&self, index: u32) -> XrResult<TextureHandle> {
        self.images
            .get(index as usize)
            .copied()
            .ok_or_else(|| XrError::runtime("acquire_swapchain_image", code::RUNTIME_FAILURE))
    }
}

/// Color and depth swapchains backing one eye.
pub struct ViewSwapchains<'r, R: XrRuntime> {
    pub color: Swapchain<'r, R>,
    pub depth: Swapchain<'r, R>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SelectedFormat {
    pub format: TextureFormat,
    pub native: i64,
}

/// Picks the first entry of `preferences` the runtime also offers. The
/// runtime's own ordering of `offered` plays no part.
pub(crate) fn select_format<R: XrRuntime>(
    runtime: &R,
    offered: &[i64],
    preferences: &[TextureFormat],
    usage: &'static str,
) -> XrResult<SelectedFormat> {
    preferences
        .iter()
        .map(|format| SelectedFormat {
            format: *format,
            native: runtime.native_format(*format),
        })
        .find(|selected| offered.contains(&selected.native))
        .ok_or(XrError::UnsupportedFormat(usage))
}

fn recommended_size(view: &ViewConfigurationView, properties: &SystemProperties) -> Size {
    let clamp = |recommended: u32, max: u32| if max > 0 { recommended.min(max) } else { recommended };
    let size = Size {
        width: clamp(view.recommended_width, properties.max_swapchain_width),
        height: clamp(view.recommended_height, properties.max_swapchain_height),
    };
    if size.width != view.recommended_width || size.height != view.recommended_height {
        log::warn!(
            "[xr::swapchain] recommended {}x{} exceeds system maximum; using {}x{}",
            view.recommended_width,
            view.recommended_height,
            size.width,
            size.height
        );
    }
    size
}

/// Per-eye swapchains owned by a session, created once at session start.
pub struct SwapchainManager<'r, R: XrRuntime> {
    views: Vec<ViewSwapchains<'r, R>>,
    properties: SystemProperties,
}

impl<'r, R: XrRuntime> SwapchainManager<'r, R> {
    pub(crate) fn create(
        runtime: &'r R,
        instance: InstanceHandle,
        system_id: SystemId,
        session: SessionHandle,
        config: &XrConfig,
    ) -> XrResult<Self> {
        let properties = runtime.system_properties(instance, system_id)?;
        log::info!(
            "[xr::swapchain] system '{}' (vendor {:#x}) max swapchain {}x{}, {} layers",
            properties.system_name,
            properties.vendor_id,
            properties.max_swapchain_width,
            properties.max_swapchain_height,
            properties.max_layer_count
        );

        let offered = runtime.enumerate_swapchain_formats(session)?;
        let color_format = select_format(runtime, &offered, &config.color_formats, "color")?;
        let depth_format = select_format(runtime, &offered, &config.depth_formats, "depth")?;
        log::info!(
            "[xr::swapchain] using {:?} color and {:?} depth",
            color_format.format,
            depth_format.format
        );

        let view_configs =
            runtime.enumerate_view_configuration_views(instance, system_id, VIEW_CONFIGURATION_TYPE)?;
        if view_configs.len() != STEREO_VIEW_COUNT {
            return Err(XrError::ViewCountMismatch {
                expected: STEREO_VIEW_COUNT,
                located: view_configs.len(),
            });
        }

        let mut views = Vec::with_capacity(view_configs.len());
        for view in &view_configs {
            let size = recommended_size(view, &properties);
            let color = Swapchain::create(
                runtime,
                session,
                color_format,
                SwapchainUsage::Color,
                size,
                config.swapchain_sample_count,
            )?;
            let depth = Swapchain::create(
                runtime,
                session,
                depth_format,
                SwapchainUsage::DepthStencil,
                size,
                config.swapchain_sample_count,
            )?;
            views.push(ViewSwapchains { color, depth });
        }

        Ok(Self { views, properties })
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn views(&self) -> &[ViewSwapchains<'r, R>] {
        &self.views
    }

    pub fn view(&self, index: usize) -> Option<&ViewSwapchains<'r, R>> {
        self.views.get(index)
    }

    pub fn system_properties(&self) -> &SystemProperties {
        &self.properties
    }
}
