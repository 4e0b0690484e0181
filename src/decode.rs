use std::io::{Cursor, Read};

use anyhow::{Context, Result, bail};
use flate2::read::ZlibDecoder;

use crate::error::CommandError;

/// Inflates an RFC 1950 zlib stream that must decompress to exactly
/// `expected` bytes.
///
/// Reads one byte past the expected size so an over-long stream is detected
/// without buffering it whole.
pub fn inflate_exact(data: &[u8], expected: usize) -> Result<Vec<u8>, CommandError> {
    let mut out = Vec::new();
    out.try_reserve_exact(expected).map_err(|_| {
        CommandError::OutOfMemory("Out of memory allocating decompression buffer".to_string())
    })?;
    let mut decoder = ZlibDecoder::new(data).take(expected as u64 + 1);
    decoder.read_to_end(&mut out).map_err(|e| {
        CommandError::Invalid(format!("Failed to inflate image data with error: {e}"))
    })?;
    if out.len() != expected {
        return Err(CommandError::Invalid(
            "Image data size post inflation does not match expected size".to_string(),
        ));
    }
    Ok(out)
}

/// A decoded PNG, normalized to tightly packed RGBA8.
#[derive(Debug)]
pub struct PngPixels {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// The PNG decoding seam.
///
/// The manager calls through this fixed interface so hosts can substitute a
/// hardware or sandboxed decoder; any failure becomes an `EINVAL` response
/// for the offending image only.
pub trait PngEngine {
    fn decode(&mut self, data: &[u8]) -> Result<PngPixels>;
}

/// Software PNG engine backed by the `png` crate.
#[derive(Debug, Default)]
pub struct DefaultPngEngine;

impl PngEngine for DefaultPngEngine {
    fn decode(&mut self, data: &[u8]) -> Result<PngPixels> {
        let mut decoder = png::Decoder::new(Cursor::new(data));
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info().context("reading PNG header")?;
        let mut buf = vec![0u8; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).context("decoding PNG frame")?;
        buf.truncate(info.buffer_size());

        let pixels = (info.width as usize) * (info.height as usize);
        let rgba = match info.color_type {
            png::ColorType::Rgba => buf,
            png::ColorType::Rgb => {
                let mut out = Vec::with_capacity(pixels * 4);
                for px in buf.chunks_exact(3) {
                    out.extend_from_slice(&[px[0], px[1], px[2], 0xFF]);
                }
                out
            }
            png::ColorType::Grayscale => {
                let mut out = Vec::with_capacity(pixels * 4);
                for &g in &buf {
                    out.extend_from_slice(&[g, g, g, 0xFF]);
                }
                out
            }
            png::ColorType::GrayscaleAlpha => {
                let mut out = Vec::with_capacity(pixels * 4);
                for px in buf.chunks_exact(2) {
                    out.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
                }
                out
            }
            // normalize_to_color8 expands palettes, so this cannot be reached
            // with a well-formed file.
            png::ColorType::Indexed => bail!("indexed PNG was not expanded"),
        };

        Ok(PngPixels {
            rgba,
            width: info.width,
            height: info.height,
        })
    }
}
