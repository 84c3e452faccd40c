//! Writing `.gltf` + `.bin` pairs and `.glb` containers.

use std::io::Write;
use std::path::Path;

use thiserror::Error;

use super::{Buffer, Gltf, GLB_CHUNK_BIN, GLB_CHUNK_JSON, GLB_MAGIC, GLB_VERSION};

/// glTF export errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Output too large for a GLB container ({0} bytes)")]
    TooLarge(usize),
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Write the document to `output_path`, choosing the container from the
/// extension: `.glb` writes a binary container, anything else writes JSON
/// with a `<stem>.bin` side file.
pub fn write_output(gltf: Gltf, binary_data: &[u8], output_path: &Path) -> ExportResult<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let is_glb = output_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("glb"));

    if is_glb {
        write_glb(gltf, binary_data, output_path)
    } else {
        write_gltf(gltf, binary_data, output_path)
    }
}

/// Write pretty JSON plus a side `.bin` file next to it.
pub fn write_gltf(mut gltf: Gltf, binary_data: &[u8], output_path: &Path) -> ExportResult<()> {
    gltf.buffers.clear();
    if !binary_data.is_empty() {
        let bin_path = output_path.with_extension("bin");
        let bin_name = bin_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ExportError::InvalidPath(output_path.display().to_string()))?
            .to_string();

        std::fs::write(&bin_path, binary_data)?;
        gltf.buffers.push(Buffer {
            uri: Some(bin_name),
            byte_length: binary_data.len(),
        });
    }

    let json = serde_json::to_string_pretty(&gltf)?;
    std::fs::write(output_path, json)?;

    log::info!("Wrote {}", output_path.display());
    Ok(())
}

/// Write GLB (binary glTF)
pub fn write_glb(mut gltf: Gltf, binary_data: &[u8], output_path: &Path) -> ExportResult<()> {
    gltf.buffers.clear();
    if !binary_data.is_empty() {
        gltf.buffers.push(Buffer {
            uri: None,
            byte_length: binary_data.len(),
        });
    }

    let bytes = glb_bytes(&gltf, binary_data)?;
    let mut file = std::fs::File::create(output_path)?;
    file.write_all(&bytes)?;

    log::info!("Wrote {} ({} bytes)", output_path.display(), bytes.len());
    Ok(())
}

/// Assemble the GLB container in memory.
fn glb_bytes(gltf: &Gltf, binary_data: &[u8]) -> ExportResult<Vec<u8>> {
    let json = serde_json::to_string(gltf)?;
    let json_len = json.len();
    let json_padding = (4 - (json_len % 4)) % 4;
    let bin_len = binary_data.len();
    let bin_padding = (4 - (bin_len % 4)) % 4;

    let bin_chunk_len = if bin_len > 0 { 8 + bin_len + bin_padding } else { 0 };
    let total_len = 12 + 8 + json_len + json_padding + bin_chunk_len;
    let total = u32::try_from(total_len).map_err(|_| ExportError::TooLarge(total_len))?;

    let mut out = Vec::with_capacity(total_len);

    // GLB header
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total.to_le_bytes());

    // JSON chunk, space padded
    out.extend_from_slice(&((json_len + json_padding) as u32).to_le_bytes());
    out.extend_from_slice(&GLB_CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(json.as_bytes());
    out.extend(std::iter::repeat(0x20).take(json_padding));

    // BIN chunk, zero padded
    if bin_len > 0 {
        out.extend_from_slice(&((bin_len + bin_padding) as u32).to_le_bytes());
        out.extend_from_slice(&GLB_CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(binary_data);
        out.extend(std::iter::repeat(0x00).take(bin_padding));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    #[test]
    fn test_glb_layout() {
        let gltf = Gltf::default();
        let bin = [1u8, 2, 3, 4, 5];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.glb");

        write_output(gltf, &bin, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(u32_at(&bytes, 4), 2);
        assert_eq!(u32_at(&bytes, 8) as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);

        let json_len = u32_at(&bytes, 12) as usize;
        assert_eq!(json_len % 4, 0);
        assert_eq!(u32_at(&bytes, 16), GLB_CHUNK_JSON);
        let json: serde_json::Value = serde_json::from_slice(&bytes[20..20 + json_len]).unwrap();
        assert_eq!(json["buffers"][0]["byteLength"], 5);
        assert!(json["buffers"][0].get("uri").is_none());

        let bin_header = 20 + json_len;
        assert_eq!(u32_at(&bytes, bin_header) as usize, 8);
        assert_eq!(u32_at(&bytes, bin_header + 4), GLB_CHUNK_BIN);
        assert_eq!(&bytes[bin_header + 8..bin_header + 13], &bin);
        assert_eq!(&bytes[bin_header + 13..], &[0, 0, 0]);
    }

    #[test]
    fn test_gltf_writes_side_bin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.gltf");

        write_output(Gltf::default(), &[0u8; 8], &path).unwrap();

        let json: Gltf = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json.asset.version, "2.0");
        assert_eq!(json.buffers[0].uri.as_deref(), Some("scene.bin"));
        assert_eq!(std::fs::read(dir.path().join("scene.bin")).unwrap().len(), 8);
    }
}
