//! Renderer configuration.
//!
//! Configuration is plain data, loadable from TOML:
//!
//! ```toml
//! flight_frames = 2
//! worker_threads = 4
//!
//! [shadow_depth_bias]
//! constant = 2.0
//! slope = 1.5
//!
//! [[hooks]]
//! pass = "draw"
//! pre = "sky"
//! ```

use serde::Deserialize;

use crate::error::GraphicsError;

/// Upper bound for [`RendererConfig::max_shadow_splits`]: six cube faces.
pub const MAX_SHADOW_SPLITS: u32 = 6;

/// Depth bias applied by shadow pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DepthBias {
    pub constant: f32,
    pub slope: f32,
}

impl Default for DepthBias {
    fn default() -> Self {
        Self {
            constant: 1.25,
            slope: 1.75,
        }
    }
}

/// Binds named user callbacks to the start or end of a pass.
///
/// Names are resolved against the [`HookRegistry`](crate::passes::HookRegistry)
/// once, when the renderer is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HookBinding {
    /// Pass name, see [`PassKind::name`](crate::passes::PassKind::name).
    pub pass: String,
    pub pre: Option<String>,
    pub post: Option<String>,
}

/// Renderer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Frames the CPU may record ahead of the GPU.
    pub flight_frames: u32,
    /// Worker threads recording passes; 0 picks one per core.
    pub worker_threads: usize,
    /// Descriptors per descriptor sub-pool.
    pub descriptor_sub_pool_capacity: u32,
    /// Minimum size of transient storage buffers, in bytes.
    pub storage_block_size: u64,
    /// Shadow map slots in a light program's shadow texture array.
    pub max_shadow_splits: u32,
    pub shadow_depth_bias: DepthBias,
    /// Enable Vulkan validation layers.
    pub validation: bool,
    pub hooks: Vec<HookBinding>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            flight_frames: 3,
            worker_threads: 0,
            descriptor_sub_pool_capacity: 256,
            storage_block_size: 64 * 1024,
            max_shadow_splits: 4,
            shadow_depth_bias: DepthBias::default(),
            validation: cfg!(debug_assertions),
            hooks: Vec::new(),
        }
    }
}

impl RendererConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, GraphicsError> {
        let config: Self = toml::from_str(source)
            .map_err(|e| GraphicsError::Config(format!("failed to parse renderer config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.flight_frames == 0 {
            return Err(GraphicsError::Config(
                "flight_frames must be at least 1".to_string(),
            ));
        }
        if self.descriptor_sub_pool_capacity == 0 {
            return Err(GraphicsError::Config(
                "descriptor_sub_pool_capacity must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_SHADOW_SPLITS).contains(&self.max_shadow_splits) {
            return Err(GraphicsError::Config(format!(
                "max_shadow_splits must be between 1 and {MAX_SHADOW_SPLITS}"
            )));
        }
        Ok(())
    }

    pub fn with_flight_frames(mut self, flight_frames: u32) -> Self {
        self.flight_frames = flight_frames;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_descriptor_sub_pool_capacity(mut self, capacity: u32) -> Self {
        self.descriptor_sub_pool_capacity = capacity;
        self
    }

    pub fn with_hook(mut self, binding: HookBinding) -> Self {
        self.hooks.push(binding);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.flight_frames, 3);
        assert_eq!(config.descriptor_sub_pool_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = RendererConfig::from_toml_str(
            r#"
            flight_frames = 2
            worker_threads = 4

            [shadow_depth_bias]
            constant = 2.0

            [[hooks]]
            pass = "draw"
            pre = "sky"
            "#,
        )
        .unwrap();

        assert_eq!(config.flight_frames, 2);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.shadow_depth_bias.constant, 2.0);
        assert_eq!(config.shadow_depth_bias.slope, 1.75);
        assert_eq!(config.max_shadow_splits, 4);
        assert_eq!(config.hooks.len(), 1);
        assert_eq!(config.hooks[0].pre.as_deref(), Some("sky"));
        assert_eq!(config.hooks[0].post, None);
    }

    #[test]
    fn test_rejects_zero_flight_frames() {
        let err = RendererConfig::from_toml_str("flight_frames = 0").unwrap_err();
        assert!(matches!(err, GraphicsError::Config(_)));
    }

    #[test]
    fn test_rejects_too_many_shadow_splits() {
        let err = RendererConfig::from_toml_str("max_shadow_splits = 7").unwrap_err();
        assert!(matches!(err, GraphicsError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(RendererConfig::from_toml_str("flight_frames = \"three\"").is_err());
    }
}
