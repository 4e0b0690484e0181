/// A parsed graphics-protocol command.
///
/// The escape-sequence parser lives in the host terminal; by the time a
/// command reaches the manager it has been reduced to this record plus a
/// payload byte slice. Field names follow the protocol keys they were
/// parsed from. Zero means "not specified" for every numeric field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphicsCommand {
    /// `a=`: 0 (transmit), `t`, `T`, `q`, `p`, `d`.
    pub action: u8,
    /// `d=`: delete selector letter; 0 behaves as `a`.
    pub delete_action: u8,
    /// `t=`: `d` (direct), `f` (file), `t` (temp file), `s` (shm); 0 means `d`.
    pub transmission_type: u8,
    /// `f=`: 24 (RGB), 32 (RGBA), 100 (PNG); 0 means RGBA.
    pub format: u32,
    /// `o=`: 0 (none) or `z` (RFC 1950 zlib).
    pub compressed: u8,
    /// `m=`: more chunks follow this one.
    pub more: bool,
    /// `q=`: 0 all responses, 1 errors only, 2 silent.
    pub quiet: u8,
    /// `i=`: client-chosen image id.
    pub id: u32,
    /// `I=`: client-chosen image number.
    pub image_number: u32,
    /// `p=`: placement id, scoped within an image.
    pub placement_id: u32,
    /// `S=`: expected payload size in bytes (decoded, for RGB/RGBA).
    pub data_sz: u64,
    /// `O=`: byte offset into a file/shm payload source.
    pub data_offset: u64,
    /// `s=`: image width in pixels.
    pub data_width: u32,
    /// `v=`: image height in pixels.
    pub data_height: u32,
    /// `x=`: source rect left, or 1-based column for delete selectors.
    pub x_offset: u32,
    /// `y=`: source rect top, or 1-based row for delete selectors.
    pub y_offset: u32,
    /// `w=`: source rect width; 0 means the full image.
    pub width: u32,
    /// `h=`: source rect height; 0 means the full image.
    pub height: u32,
    /// `c=`: requested cell columns; 0 derives from the source size.
    pub num_cells: u32,
    /// `r=`: requested cell rows; 0 derives from the source size.
    pub num_lines: u32,
    /// `X=`: sub-cell x offset in pixels.
    pub cell_x_offset: u32,
    /// `Y=`: sub-cell y offset in pixels.
    pub cell_y_offset: u32,
    /// `z=`: placement z-index.
    pub z_index: i32,
    /// Size of the payload that accompanied this command.
    pub payload_sz: u32,
}

impl GraphicsCommand {
    /// Transmission type with the protocol default applied.
    pub fn transmission(&self) -> u8 {
        if self.transmission_type == 0 {
            b'd'
        } else {
            self.transmission_type
        }
    }
}

/// Pixel format of a transmitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 24-bit, 3 bytes per pixel.
    Rgb,
    /// 32-bit, 4 bytes per pixel.
    Rgba,
    /// PNG-encoded; decoded to RGBA by the PNG engine.
    Png,
}

impl PixelFormat {
    /// Maps a protocol format code; 0 defaults to RGBA.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            24 => Some(PixelFormat::Rgb),
            0 | 32 => Some(PixelFormat::Rgba),
            100 => Some(PixelFormat::Png),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba | PixelFormat::Png => 4,
        }
    }
}

/// Pixel dimensions of one character cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSize {
    pub width: u32,
    pub height: u32,
}

/// Grid position of the terminal cursor.
///
/// The manager only reads and advances it; clamping to the screen bounds is
/// the screen's responsibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorPos {
    pub x: u32,
    pub y: u32,
}

/// Parameters of a screen scroll, as seen by the image manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollData {
    /// Rows to add to every placement's start row (sign matches the scroll).
    pub amt: i32,
    /// Placements whose bottom ends up at or above this row are dropped
    /// (typically the negative scrollback depth).
    pub limit: i32,
    /// Whether the scroll is bounded by margins.
    pub has_margins: bool,
    /// First row of the scroll region.
    pub margin_top: i32,
    /// Row just past the scroll region.
    pub margin_bottom: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_codes() {
        assert_eq!(PixelFormat::from_code(24), Some(PixelFormat::Rgb));
        assert_eq!(PixelFormat::from_code(32), Some(PixelFormat::Rgba));
        assert_eq!(PixelFormat::from_code(0), Some(PixelFormat::Rgba));
        assert_eq!(PixelFormat::from_code(100), Some(PixelFormat::Png));
        assert_eq!(PixelFormat::from_code(7), None);
        assert_eq!(PixelFormat::Rgb.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Png.bytes_per_pixel(), 4);
    }

    #[test]
    fn test_transmission_default() {
        let cmd = GraphicsCommand::default();
        assert_eq!(cmd.transmission(), b'd');
        let cmd = GraphicsCommand {
            transmission_type: b'f',
            ..Default::default()
        };
        assert_eq!(cmd.transmission(), b'f');
    }
}
