//! Stage to glTF conversion.
//!
//! [`Converter`] is the seam the command line drives: configure options,
//! load a stage, then process it into an output file. [`GltfConverter`] is
//! the native implementation.

mod animation;
mod gltf_converter;
mod transform;

pub use animation::AnimationInterpolation;
pub use gltf_converter::GltfConverter;
pub use transform::Transform;

use std::path::Path;

use thiserror::Error;

use crate::gltf::ExportError;
use crate::mesh::MeshError;
use crate::usd::{LoadError, Stage, StageError};

/// Errors raised while loading or converting a stage.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

pub type ConvertResult<T> = Result<T, ConvertError>;

/// Conversion settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConverterOptions {
    /// Animation interpolation requested by the user (`LINEAR`, `STEP`,
    /// `CUBIC`). Kept as text; unknown values fall back to linear when the
    /// animation is written.
    pub interpolation: String,

    /// Merge the transform tracks of every prim into a single animation.
    pub flatten_xform_animation: bool,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            interpolation: "LINEAR".to_string(),
            flatten_xform_animation: false,
        }
    }
}

/// A stage converter.
pub trait Converter {
    fn options_mut(&mut self) -> &mut ConverterOptions;

    /// Load the stage at `path`.
    fn load_usd(&self, path: &Path) -> ConvertResult<Stage>;

    /// Convert `stage` and write the result to `output`.
    fn process(&self, stage: &Stage, output: &Path) -> ConvertResult<()>;
}
