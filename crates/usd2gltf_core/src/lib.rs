//! usd2gltf core - USD stage model, material preprocessing and glTF export.
//!
//! This crate provides:
//!
//! - **Stage model**: `Stage`, `Prim`, `Attribute`, `SdfPath` with USDA and USDZ loading
//! - **Shading**: `st` primvar-reader normalization and UsdPreviewSurface reading
//! - **Conversion**: the `Converter` trait and the native `GltfConverter`
//!
//! # Example
//!
//! ```ignore
//! use usd2gltf_core::convert::{Converter, GltfConverter};
//! use usd2gltf_core::shade::normalize_st_primvar_readers;
//!
//! let converter = GltfConverter::new();
//! let mut stage = converter.load_usd("scene.usdz".as_ref())?;
//! normalize_st_primvar_readers(&mut stage)?;
//! converter.process(&stage, "scene.glb".as_ref())?;
//! ```

pub mod convert;
pub mod gltf;
pub mod mesh;
pub mod shade;
pub mod usd;

// Re-export commonly used types
pub use convert::{ConvertError, Converter, ConverterOptions, GltfConverter};
pub use mesh::Mesh;
pub use shade::normalize_st_primvar_readers;
pub use usd::{load_stage, Stage};
