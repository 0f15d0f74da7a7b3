//! Renderer configuration: validation, window, frame pacing and material defaults.

/// Renderer configuration.
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Wait for the device to go idle before every image acquisition. Slow; for debugging.
    pub validation: bool,
    /// Initial swapchain extent (width, height).
    pub window_extent: (u32, u32),
    pub window_title: String,
    /// Timeout for the frame-in-flight fence, in nanoseconds.
    pub fence_timeout_ns: u64,
    /// Per-kind parameter sets a material can allocate, one per distinct instance buffer.
    pub per_kind_set_capacity: u32,
    /// Anisotropy clamp for material samplers (None disables anisotropic filtering).
    pub sampler_anisotropy: Option<f32>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: false,
            window_extent: (800, 600),
            window_title: "Strata".to_string(),
            fence_timeout_ns: u64::MAX,
            per_kind_set_capacity: 8,
            sampler_anisotropy: Some(16.0),
        }
    }
}

impl RendererConfig {
    /// Apply environment overrides (`STRATA_VALIDATION=1`).
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup("STRATA_VALIDATION").as_deref() == Some("1") {
            self.validation = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RendererConfig::default();
        assert!(!config.validation);
        assert_eq!(config.window_extent, (800, 600));
        assert_eq!(config.fence_timeout_ns, u64::MAX);
        assert_eq!(config.per_kind_set_capacity, 8);
    }

    #[test]
    fn validation_env_override() {
        let on = RendererConfig::default().with_overrides(|k| (k == "STRATA_VALIDATION").then(|| "1".to_string()));
        assert!(on.validation);
        let off = RendererConfig::default().with_overrides(|_| Some("0".to_string()));
        assert!(!off.validation);
    }
}
