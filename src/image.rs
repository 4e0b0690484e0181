use crate::command::CellSize;
use crate::payload::Staging;

/// Total bytes of decoded pixel data the manager may keep resident.
pub const STORAGE_LIMIT: usize = 320 * 1024 * 1024;

/// Ceiling on transmitted bytes for a single image.
pub const MAX_DATA_SIZE: usize = 400_000_000;

/// Ceiling on either pixel dimension of an image.
pub const MAX_IMAGE_DIMENSION: u32 = 10_000;

/// Ceiling on the length of a transmitted filename or shm name.
pub const MAX_FILENAME_SIZE: usize = 2048;

/// Placements with a z-index below this render under the text layer.
pub const BELOW_TEXT_Z: i32 = i32::MIN / 2;

/// An axis-aligned rectangle, used both for UV coordinates in [0, 1] and
/// destination quads in NDC.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImageRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// One on-screen appearance of an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageRef {
    /// Placement id, scoped within the owning image; 0 when anonymous.
    pub client_id: u32,
    /// Grid anchor. The row can go negative as the placement scrolls into
    /// history.
    pub start_row: i32,
    pub start_column: i32,
    /// Source sub-rectangle of the image, in pixels.
    pub src_x: u32,
    pub src_y: u32,
    pub src_width: u32,
    pub src_height: u32,
    /// Fine positioning inside the anchor cell, clamped below the cell size.
    pub cell_x_offset: u32,
    pub cell_y_offset: u32,
    /// Requested cell span; 0 derives the span from the source size.
    pub num_cols: u32,
    pub num_rows: u32,
    /// Resolved span used for hit tests and layer math.
    pub effective_num_cols: u32,
    pub effective_num_rows: u32,
    pub z_index: i32,
    /// Source sub-rectangle as UVs in [0, 1].
    pub src_rect: ImageRect,
}

impl ImageRef {
    /// Recomputes the UV rectangle from the pixel source rect.
    pub fn update_src_rect(&mut self, img_width: u32, img_height: u32) {
        let w = img_width.max(1) as f32;
        let h = img_height.max(1) as f32;
        self.src_rect.left = self.src_x as f32 / w;
        self.src_rect.right = (self.src_x + self.src_width) as f32 / w;
        self.src_rect.top = self.src_y as f32 / h;
        self.src_rect.bottom = (self.src_y + self.src_height) as f32 / h;
    }

    /// Resolves the effective cell span.
    ///
    /// A zero requested span covers however many cells the source rectangle
    /// occupies once shifted by the sub-cell offset, rounded up. At least one
    /// row always remains so cursor advancement stays well-defined.
    pub fn update_dest_rect(&mut self, cell: CellSize) {
        let cols = if self.num_cols == 0 {
            ((self.src_width + self.cell_x_offset) as f64 / cell.width as f64).ceil() as u32
        } else {
            self.num_cols
        };
        let rows = if self.num_rows == 0 {
            ((self.src_height + self.cell_y_offset) as f64 / cell.height as f64).ceil() as u32
        } else {
            self.num_rows
        };
        self.effective_num_cols = cols;
        self.effective_num_rows = rows.max(1);
    }

    /// Whether this placement covers the grid cell `(x, y)`.
    pub fn covers_cell(&self, x: i64, y: i64) -> bool {
        self.covers_column(x) && self.covers_row(y)
    }

    pub fn covers_column(&self, x: i64) -> bool {
        self.start_column as i64 <= x && x < self.start_column as i64 + self.effective_num_cols as i64
    }

    pub fn covers_row(&self, y: i64) -> bool {
        self.start_row as i64 <= y && y < self.start_row as i64 + self.effective_num_rows as i64
    }
}

/// Transient payload state between the first chunk and the GPU upload.
#[derive(Debug, Default)]
pub struct LoadData {
    /// Payload source; `None` once uploaded or after an abort.
    pub staging: Option<Staging>,
    /// Expected decoded byte count.
    pub data_sz: usize,
    pub is_opaque: bool,
    pub is_4byte_aligned: bool,
}

impl LoadData {
    /// The assembled payload view, if any source is staged.
    pub fn data(&self) -> Option<&[u8]> {
        self.staging.as_ref().map(Staging::bytes)
    }

    /// Releases buffers and mappings.
    pub fn reset(&mut self) {
        *self = LoadData::default();
    }
}

/// A decoded bitmap held by the manager, optionally resident on the GPU.
#[derive(Debug, Default)]
pub struct Image {
    /// Process-unique identity, assigned on creation.
    pub internal_id: u64,
    /// Protocol-level id; unique among images when nonzero.
    pub client_id: u32,
    /// Protocol-level number; looked up newest-first.
    pub client_number: u32,
    pub width: u32,
    pub height: u32,
    /// Opaque GPU handle; 0 until uploaded.
    pub texture_id: u32,
    /// Monotonic timestamp of last access.
    pub atime: u64,
    /// Bytes counted against the storage quota.
    pub used_storage: usize,
    /// True once the payload has been fully assembled and validated.
    pub data_loaded: bool,
    pub load: LoadData,
    pub refs: Vec<ImageRef>,
}

/// One visible textured quad, in draw order after the layer build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageRenderData {
    /// Four corners, each as `(u, v, x, y)`, in the order top-right,
    /// bottom-right, bottom-left, top-left.
    pub vertices: [f32; 16],
    pub texture_id: u32,
    /// Length of the run of quads sharing this quad's image; set on the
    /// first quad of the run, 0 on followers.
    pub group_count: u32,
    pub z_index: i32,
    pub image_id: u64,
}

impl ImageRenderData {
    pub fn new(r: &ImageRef, dest: &ImageRect, image_id: u64, texture_id: u32) -> Self {
        let src = &r.src_rect;
        let corners = [
            (src.right, src.top, dest.right, dest.top),
            (src.right, src.bottom, dest.right, dest.bottom),
            (src.left, src.bottom, dest.left, dest.bottom),
            (src.left, src.top, dest.left, dest.top),
        ];
        let mut vertices = [0.0f32; 16];
        for (i, (u, v, x, y)) in corners.into_iter().enumerate() {
            vertices[i * 4] = u;
            vertices[i * 4 + 1] = v;
            vertices[i * 4 + 2] = x;
            vertices[i * 4 + 3] = y;
        }
        Self {
            vertices,
            texture_id,
            group_count: 0,
            z_index: r.z_index,
            image_id,
        }
    }
}
