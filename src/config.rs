use crate::error::{XrError, XrResult};
use crate::runtime::TextureFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DEPTH_NEAR: f32 = 0.5;
pub const DEFAULT_DEPTH_FAR: f32 = 1000.0;

/// Optional runtime capabilities to request when the runtime advertises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionalExtensions {
    pub depth_composition: bool,
    pub unbounded_reference_space: bool,
    pub spatial_anchors: bool,
}

impl Default for OptionalExtensions {
    fn default() -> Self {
        Self {
            depth_composition: true,
            unbounded_reference_space: true,
            spatial_anchors: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrConfig {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub depth_near: f32,
    pub depth_far: f32,
    /// Tried in order; the first format the runtime also offers wins.
    pub color_formats: Vec<TextureFormat>,
    pub depth_formats: Vec<TextureFormat>,
    /// Sample count for every swapchain. The runtime's recommended MSAA count
    /// is not used, so composition always sees single-sampled images.
    pub swapchain_sample_count: u32,
    /// `None` waits on swapchain images without a timeout.
    pub swapchain_wait_timeout_ms: Option<u64>,
    pub optional_extensions: OptionalExtensions,
}

impl Default for XrConfig {
    fn default() -> Self {
        Self {
            application_name: "Theta XR Experience".to_string(),
            application_version: 1,
            engine_name: "Theta Engine".to_string(),
            engine_version: 1,
            depth_near: DEFAULT_DEPTH_NEAR,
            depth_far: DEFAULT_DEPTH_FAR,
            color_formats: vec![TextureFormat::Rgba8, TextureFormat::Rgba8Srgb],
            depth_formats: vec![TextureFormat::D24S8],
            swapchain_sample_count: 1,
            swapchain_wait_timeout_ms: None,
            optional_extensions: OptionalExtensions::default(),
        }
    }
}

impl XrConfig {
    pub fn from_json_str(json: &str) -> XrResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> XrResult<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    pub fn swapchain_wait_timeout(&self) -> Option<Duration> {
        self.swapchain_wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> XrResult<()> {
        if self.color_formats.is_empty() {
            return Err(XrError::Config("color_formats must not be empty".into()));
        }
        if self.depth_formats.is_empty() {
            return Err(XrError::Config("depth_formats must not be empty".into()));
        }
        if let Some(format) = self.color_formats.iter().find(|format| format.is_depth()) {
            return Err(XrError::Config(format!(
                "{format:?} is a depth format and cannot back a color swapchain"
            )));
        }
        if let Some(format) = self.depth_formats.iter().find(|format| !format.is_depth()) {
            return Err(XrError::Config(format!(
                "{format:?} is a color format and cannot back a depth swapchain"
            )));
        }
        validate_depth_range(self.depth_near, self.depth_far)?;
        if self.swapchain_sample_count == 0 {
            return Err(XrError::Config(
                "swapchain_sample_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn validate_depth_range(near: f32, far: f32) -> XrResult<()> {
    if !(near.is_finite() && far.is_finite()) || near <= 0.0 || far <= near {
        return Err(XrError::Config(format!(
            "invalid depth range near={near} far={far}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = XrConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.swapchain_sample_count, 1);
        assert_eq!(config.swapchain_wait_timeout(), None);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = XrConfig::from_json_str(
            r#"{ "application_name": "Viewer", "depth_far": 250.0,
                 "color_formats": ["bgra8_srgb"] }"#,
        )
        .expect("parse config");
        assert_eq!(config.application_name, "Viewer");
        assert_eq!(config.depth_far, 250.0);
        assert_eq!(config.depth_near, DEFAULT_DEPTH_NEAR);
        assert_eq!(config.color_formats, vec![TextureFormat::Bgra8Srgb]);
        assert_eq!(config.depth_formats, vec![TextureFormat::D24S8]);
        assert!(config.optional_extensions.depth_composition);
    }

    #[test]
    fn rejects_inverted_depth_range() {
        let err = XrConfig::from_json_str(r#"{ "depth_near": 10.0, "depth_far": 1.0 }"#)
            .unwrap_err();
        assert!(matches!(err, XrError::Config(_)));
    }

    #[test]
    fn rejects_color_format_in_depth_list() {
        let err = XrConfig::from_json_str(r#"{ "depth_formats": ["rgba8"] }"#).unwrap_err();
        assert!(err.to_string().contains("depth swapchain"));
    }

    #[test]
    fn loads_config_from_file() {
        let tmp_dir = tempfile::tempdir().expect("tmpdir");
        let path = tmp_dir.path().join("xr.json");
        let mut file = std::fs::File::create(&path).expect("create config");
        writeln!(file, r#"{{ "swapchain_wait_timeout_ms": 250 }}"#).expect("write config");

        let config = XrConfig::load(&path).expect("load config");
        assert_eq!(
            config.swapchain_wait_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp_dir = tempfile::tempdir().expect("tmpdir");
        let err = XrConfig::load(tmp_dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, XrError::Io(_)));
    }
}
