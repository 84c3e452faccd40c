//! UsdShade material networks.
//!
//! - [`normalize_st_primvar_readers`] - gives every material an `st` primvar reader
//! - [`read_material`] - reads a UsdPreviewSurface network into plain types

mod preview_surface;
mod primvar_reader;

pub use preview_surface::{
    bound_material, read_material, resolve_uv_set, shader_id, Material, PreviewSurface,
    TextureOutput, TextureRef, TextureSlot, UvTexture, WrapMode,
};
pub use primvar_reader::{
    normalize_st_primvar_readers, normalize_st_primvar_readers_with, PRIMVAR_READER_FLOAT2,
    ST_PRIMVAR, ST_PRIMVAR_NAME_INPUT, ST_READER_NAME,
};
