//! Shared test doubles, exposed through the `test-utils` feature.

use std::sync::{Arc, Mutex};

use crate::manager::{GpuBackend, GraphicsManager};

/// One `send_image_to_gpu` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub texture_id: u32,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    pub is_opaque: bool,
    pub is_4byte_aligned: bool,
}

/// Everything the recording backend observed.
#[derive(Debug, Default)]
pub struct GpuLog {
    pub uploads: Vec<UploadRecord>,
    pub freed: Vec<u32>,
    next_texture: u32,
}

/// GPU backend that hands out sequential texture ids and records calls into
/// a shared log.
pub struct RecordingGpu {
    log: Arc<Mutex<GpuLog>>,
}

impl RecordingGpu {
    pub fn new(log: Arc<Mutex<GpuLog>>) -> Self {
        Self { log }
    }
}

impl GpuBackend for RecordingGpu {
    fn send_image_to_gpu(
        &mut self,
        texture_id: &mut u32,
        pixels: &[u8],
        width: u32,
        height: u32,
        is_opaque: bool,
        is_4byte_aligned: bool,
        _linear_filter: bool,
        _repeat_wrap: bool,
    ) {
        let mut log = self.log.lock().unwrap();
        if *texture_id == 0 {
            log.next_texture += 1;
            *texture_id = log.next_texture;
        }
        log.uploads.push(UploadRecord {
            texture_id: *texture_id,
            width,
            height,
            bytes: pixels.len(),
            is_opaque,
            is_4byte_aligned,
        });
    }

    fn free_texture(&mut self, texture_id: &mut u32) {
        self.log.lock().unwrap().freed.push(*texture_id);
        *texture_id = 0;
    }
}

/// A manager wired to a fresh recording GPU backend.
pub fn recording_manager() -> (GraphicsManager, Arc<Mutex<GpuLog>>) {
    let log = Arc::new(Mutex::new(GpuLog::default()));
    let manager = GraphicsManager::new(Box::new(RecordingGpu::new(log.clone())));
    (manager, log)
}

/// A deterministic RGBA payload for `width * height` pixels.
pub fn rgba_pixels(width: u32, height: u32) -> Vec<u8> {
    (0..width as usize * height as usize * 4)
        .map(|i| (i % 251) as u8)
        .collect()
}

/// A deterministic RGB payload for `width * height` pixels.
pub fn rgb_pixels(width: u32, height: u32) -> Vec<u8> {
    (0..width as usize * height as usize * 3)
        .map(|i| (i % 241) as u8)
        .collect()
}

/// Compresses bytes into an RFC 1950 zlib stream.
pub fn zlib_bytes(data: &[u8]) -> Vec<u8> {
    use std::io::Write;
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Encodes tightly packed RGBA pixels as a PNG stream.
pub fn png_bytes(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(rgba).unwrap();
    }
    out
}
