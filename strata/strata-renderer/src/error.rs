//! Error taxonomy of the orchestration core.

use crate::drawable::DrawableKind;
use std::path::PathBuf;
use strata_rhi::ResourceId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The kind's instance buffer already holds `capacity` items; the drawable was not added.
    #[error("instance buffer for {kind:?} is full ({capacity} items)")]
    CapacityExceeded { kind: DrawableKind, capacity: u32 },

    /// The batch was not created with an instance buffer for this kind.
    #[error("batch does not accept drawables of kind {0:?}")]
    UnknownKind(DrawableKind),

    #[error("per-instance data of {kind:?} is {len} bytes, item size is {item_size}")]
    InstanceDataSize { kind: DrawableKind, len: usize, item_size: u64 },

    #[error("no pipeline for {kind:?} in pass {pass} subpass {subpass}")]
    MissingPipeline { kind: DrawableKind, pass: ResourceId, subpass: u32 },

    /// A per-instance block lies beyond the reach of a 32-bit dynamic offset.
    #[error("instance offset {offset} of {kind:?} does not fit a dynamic offset")]
    DynamicOffsetOverflow { kind: DrawableKind, offset: u64 },

    #[error("material has no per-kind inputs for {kind:?}")]
    MissingKindInputs { kind: DrawableKind },

    #[error("invalid material inputs: {0}")]
    InvalidInputs(String),

    #[error("unknown material handle")]
    UnknownMaterial,

    #[error("unknown material instance handle")]
    UnknownMaterialInstance,

    #[error("unknown batch handle")]
    UnknownBatch,

    #[error("material instance belongs to a different material")]
    MaterialMismatch,

    /// A pass may only wait on passes registered before it.
    #[error("pass {pass} cannot depend on pass {dependency}")]
    InvalidDependency { pass: usize, dependency: usize },

    #[error("pass dependencies contain a cycle")]
    DependencyCycle,

    #[error("node has no pass {0}")]
    UnknownPass(usize),

    #[error("pass {pass} has no subpass {subpass}")]
    InvalidSubpass { pass: usize, subpass: u32 },

    #[error("pass {pass} has no framebuffers")]
    MissingFramebuffer { pass: usize },

    #[error("pass {pass} has no recorded primary commands")]
    PassNotRecorded { pass: usize },

    #[error("render node was not set up")]
    NodeNotSetUp,

    #[error("failed to read shader {path:?}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader {path:?} is not SPIR-V ({len} bytes)")]
    InvalidShader { path: PathBuf, len: usize },

    /// Failure reported by the graphics backend.
    #[error("rhi: {0}")]
    Rhi(String),
}

impl RenderError {
    /// Per-insertion failures: the frame continues without the rejected drawable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::CapacityExceeded { .. } | RenderError::UnknownKind(_))
    }
}

impl From<String> for RenderError {
    fn from(message: String) -> Self {
        RenderError::Rhi(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_failures_are_recoverable() {
        let full = RenderError::CapacityExceeded {
            kind: DrawableKind::StaticMesh,
            capacity: 2,
        };
        assert!(full.is_recoverable());
        assert!(RenderError::UnknownKind(DrawableKind::Billboard).is_recoverable());
        assert!(!RenderError::DependencyCycle.is_recoverable());
        assert!(!RenderError::from("device lost".to_string()).is_recoverable());
    }

    #[test]
    fn rhi_strings_lift_into_render_errors() {
        fn backend() -> std::result::Result<(), String> {
            Err("create_buffer: ERROR_OUT_OF_DEVICE_MEMORY".to_string())
        }
        fn core() -> Result<()> {
            backend()?;
            Ok(())
        }
        let err = core().unwrap_err();
        assert_eq!(err.to_string(), "rhi: create_buffer: ERROR_OUT_OF_DEVICE_MEMORY");
    }
}
