//! Inline-graphics image manager for a terminal emulator.
//!
//! This crate implements the terminal side of the kitty graphics protocol:
//! it consumes already-parsed command records together with their payloads,
//! assembles and decodes pixel data (raw RGB/RGBA, zlib-compressed streams,
//! PNG), keeps resident images under a fixed storage budget, tracks
//! on-screen placements across scrolls and resizes, and produces a z-ordered
//! list of textured quads for the renderer.
//!
//! The host terminal supplies the collaborators: a [`GpuBackend`] for
//! texture uploads, optionally a [`PngEngine`] replacing the bundled
//! software decoder, and a [`TempFileHook`] for coordinated deletion of
//! transmitted temp files. Everything runs on the owning terminal thread;
//! there is no locking and no suspension point.
//!
//! ```no_run
//! use termgfx::{CellSize, CursorPos, GraphicsCommand, GraphicsManager};
//! # struct Gpu;
//! # impl termgfx::GpuBackend for Gpu {
//! #     fn send_image_to_gpu(&mut self, t: &mut u32, _: &[u8], _: u32, _: u32,
//! #         _: bool, _: bool, _: bool, _: bool) { *t = 1; }
//! #     fn free_texture(&mut self, t: &mut u32) { *t = 0; }
//! # }
//!
//! let mut manager = GraphicsManager::new(Box::new(Gpu));
//! let mut cursor = CursorPos::default();
//! let cell = CellSize { width: 10, height: 20 };
//!
//! let cmd = GraphicsCommand {
//!     action: b'T',
//!     id: 1,
//!     format: 32,
//!     data_width: 2,
//!     data_height: 2,
//!     ..Default::default()
//! };
//! let outcome = manager.handle_command(&cmd, &[0u8; 16], &mut cursor, cell);
//! assert_eq!(outcome.response.as_deref(), Some("Gi=1;OK"));
//! ```

pub mod command;
pub mod decode;
pub mod error;
pub mod image;
pub mod manager;
pub mod payload;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use command::{CellSize, CursorPos, GraphicsCommand, PixelFormat, ScrollData};
pub use decode::{DefaultPngEngine, PngEngine, PngPixels};
pub use error::CommandError;
pub use image::{
    BELOW_TEXT_Z, Image, ImageRect, ImageRef, ImageRenderData, MAX_DATA_SIZE,
    MAX_FILENAME_SIZE, MAX_IMAGE_DIMENSION, STORAGE_LIMIT,
};
pub use manager::{CommandOutcome, GpuBackend, GraphicsManager};
pub use payload::TempFileHook;
