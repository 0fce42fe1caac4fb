use crate::config::OptionalExtensions;
use crate::error::{XrError, XrResult};

pub const KHR_COMPOSITION_LAYER_DEPTH: &str = "XR_KHR_composition_layer_depth";
pub const MSFT_UNBOUNDED_REFERENCE_SPACE: &str = "XR_MSFT_unbounded_reference_space";
pub const MSFT_SPATIAL_ANCHOR: &str = "XR_MSFT_spatial_anchor";

/// Extensions enabled on the instance, computed once from what the runtime
/// advertises.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionSet {
    names: Vec<String>,
    depth_supported: bool,
    unbounded_space_supported: bool,
    anchors_supported: bool,
}

impl ExtensionSet {
    /// Every `required` name must be advertised. Optional capabilities are
    /// enabled only when both requested and advertised.
    pub fn negotiate(
        available: &[String],
        required: &[&str],
        optional: OptionalExtensions,
    ) -> XrResult<Self> {
        let mut set = Self::default();

        for name in required {
            if !set.try_enable(name, available) {
                return Err(XrError::MissingExtension((*name).to_string()));
            }
        }

        set.depth_supported =
            optional.depth_composition && set.try_enable(KHR_COMPOSITION_LAYER_DEPTH, available);
        set.unbounded_space_supported = optional.unbounded_reference_space
            && set.try_enable(MSFT_UNBOUNDED_REFERENCE_SPACE, available);
        set.anchors_supported =
            optional.spatial_anchors && set.try_enable(MSFT_SPATIAL_ANCHOR, available);

        Ok(set)
    }

    fn try_enable(&mut self, name: &str, available: &[String]) -> bool {
        if !available.iter().any(|candidate| candidate == name) {
            return false;
        }
        if !self.is_enabled(name) {
            self.names.push(name.to_string());
        }
        true
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.names.iter().any(|enabled| enabled == name)
    }

    pub fn depth_supported(&self) -> bool {
        self.depth_supported
    }

    pub fn unbounded_space_supported(&self) -> bool {
        self.unbounded_space_supported
    }

    pub fn anchors_supported(&self) -> bool {
        self.anchors_supported
    }
}
