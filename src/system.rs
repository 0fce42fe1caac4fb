use crate::config::XrConfig;
use crate::error::{XrError, XrResult};
use crate::extensions::ExtensionSet;
use crate::runtime::{
    EnvironmentBlendMode, FormFactor, InstanceCreateInfo, InstanceHandle, SystemId,
    ViewConfigurationType, XrRuntime,
};

pub const FORM_FACTOR: FormFactor = FormFactor::HeadMountedDisplay;
pub const VIEW_CONFIGURATION_TYPE: ViewConfigurationType = ViewConfigurationType::PrimaryStereo;
/// The primary stereo view configuration always has two views.
pub const STEREO_VIEW_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    ImmersiveVr,
    ImmersiveAr,
    Inline,
}

/// Owns the runtime instance and the head-mounted display discovered on it.
///
/// Initialization runs in two phases. Creating the instance happens once and
/// any failure is fatal. Discovering the display may report that the headset
/// is unavailable, in which case [`System::try_initialize`] returns `false`
/// and can be polled again later.
pub struct System<R: XrRuntime> {
    runtime: R,
    config: XrConfig,
    instance: Option<InstanceHandle>,
    extensions: Option<ExtensionSet>,
    system_id: Option<SystemId>,
    blend_mode: Option<EnvironmentBlendMode>,
}

impl<R: XrRuntime> System<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            config: XrConfig::default(),
            instance: None,
            extensions: None,
            system_id: None,
            blend_mode: None,
        }
    }

    pub fn with_config(runtime: R, config: XrConfig) -> XrResult<Self> {
        config.validate()?;
        let mut system = Self::new(runtime);
        system.config = config;
        Ok(system)
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.is_some() && self.system_id.is_some()
    }

    pub fn try_initialize(&mut self) -> XrResult<bool> {
        if self.is_initialized() {
            log::debug!("[xr] system already initialized");
            return Ok(true);
        }

        if self.instance.is_none() {
            self.initialize_instance()?;
        }

        self.try_initialize_system()
    }

    fn initialize_instance(&mut self) -> XrResult<()> {
        let available = self.runtime.enumerate_instance_extensions()?;
        let extensions = ExtensionSet::negotiate(
            &available,
            self.runtime.required_extensions(),
            self.config.optional_extensions,
        )?;

        let info = InstanceCreateInfo {
            application_name: self.config.application_name.clone(),
            application_version: self.config.application_version,
            engine_name: self.config.engine_name.clone(),
            engine_version: self.config.engine_version,
            enabled_extensions: extensions.names().to_vec(),
        };
        let instance = self.runtime.create_instance(&info)?;

        log::info!(
            "[xr] created {} instance for '{}' with extensions {:?}",
            self.runtime.label(),
            info.application_name,
            extensions.names()
        );
        self.instance = Some(instance);
        self.extensions = Some(extensions);
        Ok(())
    }

    fn try_initialize_system(&mut self) -> XrResult<bool> {
        let instance = self.instance.ok_or(XrError::NotInitialized)?;

        let system_id = match self.runtime.get_system(instance, FORM_FACTOR) {
            Ok(system_id) => system_id,
            Err(XrError::FormFactorUnavailable) => {
                log::warn!("[xr] head-mounted display unavailable; will retry");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let blend_modes = self.runtime.enumerate_environment_blend_modes(
            instance,
            system_id,
            VIEW_CONFIGURATION_TYPE,
        )?;
        // The runtime lists its preferred mode first.
        let blend_mode = *blend_modes.first().ok_or(XrError::NoBlendModes)?;

        log::info!("[xr] discovered system {system_id:?} with blend mode {blend_mode:?}");
        self.blend_mode = Some(blend_mode);
        self.system_id = Some(system_id);
        Ok(true)
    }

    pub fn is_session_supported(&self, session_type: SessionType) -> bool {
        session_type == SessionType::ImmersiveVr
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &XrConfig {
        &self.config
    }

    pub fn extensions(&self) -> Option<&ExtensionSet> {
        self.extensions.as_ref()
    }

    pub fn environment_blend_mode(&self) -> Option<EnvironmentBlendMode> {
        self.blend_mode
    }

    pub fn instance(&self) -> Option<InstanceHandle> {
        self.instance
    }

    pub fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }
}

impl<R: XrRuntime> Drop for System<R> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            if let Err(err) = self.runtime.destroy_instance(instance) {
                log::error!("[xr] failed to destroy instance: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use crate::runtime::{RuntimeCall, SimulatedRuntime, SystemAvailability};

    #[test]
    fn not_initialized_until_system_discovered() {
        let runtime = SimulatedRuntime::default();
        runtime.script_system_availability([SystemAvailability::FormFactorUnavailable]);
        let mut system = System::new(runtime.clone());

        assert!(!system.is_initialized());
        assert!(!system.try_initialize().expect("first attempt"));
        assert!(!system.is_initialized());
        assert!(system.instance().is_some());
        assert!(system.extensions().is_some());

        assert!(system.try_initialize().expect("second attempt"));
        assert!(system.is_initialized());
        assert_eq!(
            system.environment_blend_mode(),
            Some(EnvironmentBlendMode::Opaque)
        );
    }

    #[test]
    fn retries_never_recreate_the_instance() {
        let runtime = SimulatedRuntime::default();
        runtime.script_system_availability([
            SystemAvailability::FormFactorUnavailable,
            SystemAvailability::FormFactorUnavailable,
            SystemAvailability::FormFactorUnavailable,
        ]);
        let mut system = System::new(runtime.clone());

        for _ in 0..3 {
            assert!(!system.try_initialize().expect("retryable"));
        }
        assert!(system.try_initialize().expect("available"));

        assert_eq!(runtime.call_count(RuntimeCall::CreateInstance), 1);
        assert_eq!(runtime.call_count(RuntimeCall::EnumerateInstanceExtensions), 1);
        assert_eq!(runtime.call_count(RuntimeCall::GetSystem), 4);
    }

    #[test]
    fn unexpected_system_error_is_fatal() {
        let runtime = SimulatedRuntime::default();
        runtime.script_system_availability([SystemAvailability::Fault(code::RUNTIME_FAILURE)]);
        let mut system = System::new(runtime);

        let err = system.try_initialize().unwrap_err();
        assert!(!err.is_recoverable());
        assert!(!system.is_initialized());
    }

    #[test]
    fn instance_creation_failure_is_fatal() {
        let runtime = SimulatedRuntime::default();
        runtime.fail_on(RuntimeCall::CreateInstance, 1, code::RUNTIME_FAILURE);
        let mut system = System::new(runtime.clone());

        let err = system.try_initialize().unwrap_err();
        assert!(matches!(err, XrError::Runtime { call: "create_instance", .. }));
        assert!(system.instance().is_none());
        assert_eq!(runtime.call_count(RuntimeCall::GetSystem), 0);
    }

    #[test]
    fn empty_blend_mode_list_is_fatal() {
        let runtime = SimulatedRuntime::default().with_blend_modes(Vec::new());
        let mut system = System::new(runtime);
        assert!(matches!(
            system.try_initialize().unwrap_err(),
            XrError::NoBlendModes
        ));
        assert!(!system.is_initialized());
    }

    #[test]
    fn first_blend_mode_is_selected() {
        let runtime = SimulatedRuntime::default().with_blend_modes(vec![
            EnvironmentBlendMode::Additive,
            EnvironmentBlendMode::Opaque,
        ]);
        let mut system = System::new(runtime);
        assert!(system.try_initialize().expect("initialize"));
        assert_eq!(
            system.environment_blend_mode(),
            Some(EnvironmentBlendMode::Additive)
        );
    }

    #[test]
    fn only_immersive_vr_sessions_are_supported() {
        let system = System::new(SimulatedRuntime::default());
        assert!(system.is_session_supported(SessionType::ImmersiveVr));
        assert!(!system.is_session_supported(SessionType::ImmersiveAr));
        assert!(!system.is_session_supported(SessionType::Inline));
    }

    #[test]
    fn dropping_system_destroys_instance() {
        let runtime = SimulatedRuntime::default();
        {
            let mut system = System::new(runtime.clone());
            system.try_initialize().expect("initialize");
            assert_eq!(runtime.live_handle_count(), 1);
        }
        assert_eq!(runtime.call_count(RuntimeCall::DestroyInstance), 1);
        assert_eq!(runtime.live_handle_count(), 0);
    }
}
