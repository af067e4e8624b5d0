//! Metadata side-channel for processed artifacts
//!
//! - JPEG: a COM segment (`FF FE`) carrying `inspection:<json>`
//! - PNG: an `iTXt` chunk (UTF-8) with keyword `inspection`
//!
//! Other containers have no block we write to; callers save them plain.

use crate::error::{Error, Result};
use crate::models::ArtifactMetadata;
use image::RgbImage;
use std::io::Cursor;
use std::path::Path;

/// Keyword of the PNG text chunk and prefix of the JPEG comment
pub const METADATA_KEYWORD: &str = "inspection";

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const MARKER_APP0: u8 = 0xE0;
const MARKER_COM: u8 = 0xFE;
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;

/// Container chosen from the artifact's file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Jpeg,
    Png,
    Unsupported,
}

impl ContainerFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("jpg") | Some("jpeg") => ContainerFormat::Jpeg,
            Some("png") => ContainerFormat::Png,
            _ => ContainerFormat::Unsupported,
        }
    }
}

fn embed_error(msg: impl Into<String>) -> Error {
    Error::Annotation(msg.into())
}

/// Encode `img` in `format` with `metadata` embedded
pub fn encode_with_metadata(
    img: &RgbImage,
    format: ContainerFormat,
    metadata: &ArtifactMetadata,
) -> Result<Vec<u8>> {
    let payload = serde_json::to_string(metadata)?;
    match format {
        ContainerFormat::Jpeg => {
            let mut plain = Vec::new();
            img.write_to(&mut Cursor::new(&mut plain), image::ImageFormat::Jpeg)
                .map_err(|e| embed_error(format!("jpeg encode failed: {}", e)))?;
            embed_jpeg_comment(&plain, &payload)
        }
        ContainerFormat::Png => encode_png_with_text(img, &payload),
        ContainerFormat::Unsupported => {
            Err(embed_error("container has no metadata block"))
        }
    }
}

/// Insert a COM segment after SOI (and after a leading JFIF APP0, if any)
pub fn embed_jpeg_comment(jpeg: &[u8], payload: &str) -> Result<Vec<u8>> {
    if jpeg.len() < 4 || jpeg[..2] != JPEG_SOI {
        return Err(embed_error("not a JPEG stream"));
    }

    let body = format!("{}:{}", METADATA_KEYWORD, payload);
    // Segment length counts its own two bytes
    let seg_len = body.len() + 2;
    if seg_len > u16::MAX as usize {
        return Err(embed_error("metadata too large for a JPEG comment"));
    }

    let mut insert_at = 2;
    if jpeg[2] == 0xFF && jpeg[3] == MARKER_APP0 && jpeg.len() >= 6 {
        let app0_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        if 4 + app0_len <= jpeg.len() {
            insert_at = 4 + app0_len;
        }
    }

    let mut out = Vec::with_capacity(jpeg.len() + seg_len + 2);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, MARKER_COM]);
    out.extend_from_slice(&(seg_len as u16).to_be_bytes());
    out.extend_from_slice(body.as_bytes());
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}

/// Find our COM segment in the JPEG header segments
pub fn read_jpeg_comment(jpeg: &[u8]) -> Option<String> {
    if jpeg.len() < 4 || jpeg[..2] != JPEG_SOI {
        return None;
    }

    let prefix = format!("{}:", METADATA_KEYWORD);
    let mut i = 2;
    while i + 4 <= jpeg.len() {
        if jpeg[i] != 0xFF {
            return None;
        }
        let marker = jpeg[i + 1];
        match marker {
            // Fill byte
            0xFF => {
                i += 1;
                continue;
            }
            // Standalone markers
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            MARKER_SOS | MARKER_EOI => return None,
            _ => {}
        }

        let len = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
        if len < 2 || i + 2 + len > jpeg.len() {
            return None;
        }
        if marker == MARKER_COM {
            let body = &jpeg[i + 4..i + 2 + len];
            if let Ok(text) = std::str::from_utf8(body) {
                if let Some(json) = text.strip_prefix(&prefix) {
                    return Some(json.to_string());
                }
            }
        }
        i += 2 + len;
    }
    None
}

/// PNG encode with a UTF-8 `iTXt` chunk ahead of the image data
pub fn encode_png_with_text(img: &RgbImage, payload: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, img.width(), img.height());
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .add_itxt_chunk(METADATA_KEYWORD.to_string(), payload.to_string())
            .map_err(|e| embed_error(format!("png text chunk: {}", e)))?;
        let mut writer = encoder
            .write_header()
            .map_err(|e| embed_error(format!("png header: {}", e)))?;
        writer
            .write_image_data(img.as_raw())
            .map_err(|e| embed_error(format!("png data: {}", e)))?;
        writer
            .finish()
            .map_err(|e| embed_error(format!("png finish: {}", e)))?;
    }
    Ok(out)
}

pub fn read_png_text(bytes: &[u8]) -> Option<String> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return None;
    }
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let reader = decoder.read_info().ok()?;
    let text = reader
        .info()
        .utf8_text
        .iter()
        .find(|chunk| chunk.keyword == METADATA_KEYWORD)
        .and_then(|chunk| chunk.get_text().ok());
    text
}

/// Recover embedded metadata from an artifact on disk
///
/// `Ok(None)` when the file carries no (readable) metadata block.
pub fn read_embedded_metadata(path: &Path) -> Result<Option<ArtifactMetadata>> {
    let bytes = std::fs::read(path)?;

    let raw = if bytes.starts_with(&JPEG_SOI) {
        read_jpeg_comment(&bytes)
    } else if bytes.starts_with(&PNG_SIGNATURE) {
        read_png_text(&bytes)
    } else {
        None
    };

    match raw {
        Some(json) => match serde_json::from_str(&json) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable embedded metadata");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}
