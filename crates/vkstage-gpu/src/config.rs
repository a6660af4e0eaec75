//! Backend configuration.

/// Validation layers probed in debug builds, in request order.
///
/// Layers missing from the driver are skipped.
pub const DEFAULT_VALIDATION_LAYERS: &[&str] = &[
    "VK_LAYER_KHRONOS_validation",
    "VK_LAYER_MESA_device_select",
    "VK_LAYER_ADRENO_debug",
    "VK_LAYER_IMG_powervr_perf_doc",
];

/// Configuration for a [`Backend`](crate::Backend).
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Probe validation layers and install a debug report callback.
    pub validation: bool,
    /// Candidate validation layers.
    pub validation_layers: Vec<String>,
    /// Build the shadow image, transfer queue and depth copy pass.
    pub shadow_pass: bool,
    /// Force FIFO presentation.
    pub vsync: bool,
    /// Color the render pass clears to.
    pub clear_color: [f32; 4],
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            app_name: "vkstage".to_string(),
            validation: cfg!(debug_assertions),
            validation_layers: DEFAULT_VALIDATION_LAYERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            shadow_pass: false,
            vsync: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Builder for [`BackendConfig`].
#[derive(Debug, Default)]
pub struct BackendBuilder {
    config: BackendConfig,
}

impl BackendBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.config.validation = enable;
        self
    }

    /// Replace the candidate validation layer list.
    pub fn validation_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.validation_layers = layers.into_iter().map(Into::into).collect();
        self
    }

    /// Enable the shadow pass.
    pub fn shadow_pass(mut self, enable: bool) -> Self {
        self.config.shadow_pass = enable;
        self
    }

    /// Force vsync presentation.
    pub fn vsync(mut self, enable: bool) -> Self {
        self.config.vsync = enable;
        self
    }

    /// Set the clear color.
    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.config.clear_color = color;
        self
    }

    /// Finish configuration without creating a backend.
    pub fn config(self) -> BackendConfig {
        self.config
    }

    /// Create a backend over the given driver.
    pub fn build<D: crate::driver::Driver>(self, driver: D) -> crate::Backend<D> {
        crate::Backend::new(driver, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert!(!config.shadow_pass);
        assert!(!config.vsync);
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert_eq!(config.validation_layers[0], "VK_LAYER_KHRONOS_validation");
    }

    #[test]
    fn builder_overrides() {
        let config = BackendBuilder::new()
            .app_name("demo")
            .validation(false)
            .shadow_pass(true)
            .vsync(true)
            .clear_color([0.1, 0.2, 0.3, 1.0])
            .validation_layers(["VK_LAYER_custom"])
            .config();

        assert_eq!(config.app_name, "demo");
        assert!(!config.validation);
        assert!(config.shadow_pass);
        assert!(config.vsync);
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.validation_layers, vec!["VK_LAYER_custom".to_string()]);
    }
}
