//! USDZ package reader.
//!
//! A USDZ file is an uncompressed ZIP archive. The first USD layer in the
//! archive is the root layer; every other entry (textures, sublayers) is
//! kept as a packaged asset on the stage.

use std::io::{Read, Seek};

use zip::ZipArchive;

use super::loader::{stage_from_layer_bytes, LoadError, LoadResult};
use super::stage::Stage;

const LAYER_EXTENSIONS: &[&str] = &[".usda", ".usdc", ".usd"];

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_PRESIZE: u64 = 16 * 1024 * 1024;

/// Capacity to reserve for an entry whose header declares `declared` bytes.
fn presize(declared: u64) -> usize {
    declared.min(MAX_PRESIZE) as usize
}

fn is_layer(name: &str) -> bool {
    let lower = name.to_lowercase();
    LAYER_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Read a USDZ package into a stage.
pub fn read_usdz<R: Read + Seek>(reader: R) -> LoadResult<Stage> {
    let mut archive = ZipArchive::new(reader)?;

    let mut root: Option<(String, Vec<u8>)> = None;
    let mut assets = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(presize(entry.size()));
        entry.read_to_end(&mut bytes)?;

        if root.is_none() && is_layer(&name) {
            log::debug!("USDZ root layer: {}", name);
            root = Some((name, bytes));
        } else {
            log::debug!("USDZ asset: {} ({} bytes)", name, bytes.len());
            assets.push((name, bytes));
        }
    }

    let (name, bytes) = root.ok_or(LoadError::NoRootLayer)?;
    let mut stage = stage_from_layer_bytes(&bytes, &name)?;
    stage.assets.extend(assets);
    Ok(stage)
}
