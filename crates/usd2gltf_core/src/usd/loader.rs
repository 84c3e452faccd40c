//! High-level USD stage loading.
//!
//! Dispatches on file extension and magic bytes:
//! - `.usdz` (or ZIP magic) - package, root layer plus packaged assets
//! - `.usda` / `.usd` - ASCII text layer
//! - `.usdc` (or `PXR-USDC` magic) - binary crate, rejected

use std::io::Cursor;
use std::path::Path;

use thiserror::Error;

use crate::usd::parser::{parse_usda, ParseError};
use crate::usd::stage::Stage;
use crate::usd::usdz::read_usdz;

const USDC_MAGIC: &[u8] = b"PXR-USDC";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Errors that can occur during USD loading.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("USDZ archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Unsupported USD format: {0}")]
    UnsupportedFormat(String),

    #[error("USDZ package contains no USD layer")]
    NoRootLayer,

    #[error("Layer {0} is not valid UTF-8 text")]
    InvalidText(String),
}

/// Result type for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Load a USD file into a stage.
///
/// # Example
///
/// ```ignore
/// use usd2gltf_core::usd::load_stage;
///
/// let stage = load_stage("scene.usdz")?;
/// println!("Loaded {} prims", stage.prim_count());
/// ```
pub fn load_stage<P: AsRef<Path>>(path: P) -> LoadResult<Stage> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    log::info!("Loading USD stage: {}", path.display());

    let bytes = std::fs::read(path)?;
    let mut stage = if extension == "usdz" || bytes.starts_with(ZIP_MAGIC) {
        read_usdz(Cursor::new(bytes))?
    } else {
        stage_from_layer_bytes(&bytes, &path.display().to_string())?
    };

    stage.root_layer_path = Some(path.to_path_buf());

    log::info!(
        "Loaded {} prims (upAxis {}, metersPerUnit {})",
        stage.prim_count(),
        stage.metadata.up_axis,
        stage.metadata.meters_per_unit()
    );

    Ok(stage)
}

/// Load a stage from USDA text. `name` is used in log messages only.
pub fn load_stage_from_str(content: &str, name: &str) -> LoadResult<Stage> {
    log::debug!("Parsing USDA layer {}", name);
    Ok(parse_usda(content)?)
}

/// Parse a single layer, rejecting binary crate files.
pub(crate) fn stage_from_layer_bytes(bytes: &[u8], name: &str) -> LoadResult<Stage> {
    if bytes.starts_with(USDC_MAGIC) || name.to_lowercase().ends_with(".usdc") {
        return Err(LoadError::UnsupportedFormat(format!(
            "{} is a binary (usdc) layer; only usda text layers can be read",
            name
        )));
    }
    let text = std::str::from_utf8(bytes).map_err(|_| LoadError::InvalidText(name.to_string()))?;
    load_stage_from_str(text, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_usda_file() {
        let mut file = tempfile::Builder::new().suffix(".usda").tempfile().unwrap();
        writeln!(file, "#usda 1.0\n\ndef Xform \"World\"\n{{\n    def Mesh \"Cube\"\n    {{\n    }}\n}}").unwrap();

        let stage = load_stage(file.path()).unwrap();
        assert_eq!(stage.prim_count(), 2);
        assert_eq!(stage.root_layer_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_usdc_rejected_by_magic() {
        let mut file = tempfile::Builder::new().suffix(".usd").tempfile().unwrap();
        file.write_all(b"PXR-USDC\x00\x08\x00\x00").unwrap();

        assert!(matches!(
            load_stage(file.path()),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_usdc_rejected_by_extension() {
        let file = tempfile::Builder::new().suffix(".usdc").tempfile().unwrap();
        assert!(matches!(
            load_stage(file.path()),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_stage("/nonexistent/scene.usda"),
            Err(LoadError::Io(_))
        ));
    }

    #[test]
    fn test_load_from_string() {
        let stage = load_stage_from_str("#usda 1.0\ndef Material \"M\"\n{\n}\n", "inline").unwrap();
        assert_eq!(stage.traverse().len(), 1);
    }
}
