mod filters;
mod layers;
mod store;

use std::time::Instant;

use log::warn;

use crate::command::{CellSize, CursorPos, GraphicsCommand, PixelFormat};
use crate::decode::{DefaultPngEngine, PngEngine, inflate_exact};
use crate::error::CommandError;
use crate::image::{Image, ImageRenderData, MAX_DATA_SIZE, MAX_IMAGE_DIMENSION, STORAGE_LIMIT};
use crate::payload::{InlineBuffer, Staging, TempFileHook, acquire_mapped};

/// GPU upload seam.
///
/// `send_image_to_gpu` allocates a texture when `texture_id` is 0, otherwise
/// re-uploads into the existing handle. `free_texture` returns the handle and
/// zeroes it.
pub trait GpuBackend {
    #[allow(clippy::too_many_arguments)]
    fn send_image_to_gpu(
        &mut self,
        texture_id: &mut u32,
        pixels: &[u8],
        width: u32,
        height: u32,
        is_opaque: bool,
        is_4byte_aligned: bool,
        linear_filter: bool,
        repeat_wrap: bool,
    );

    fn free_texture(&mut self, texture_id: &mut u32);
}

/// Result of dispatching one command.
#[derive(Debug, Default)]
pub struct CommandOutcome {
    /// Wire response, or `None` when suppressed (quiet level, missing
    /// id/number, or a transmission still in progress).
    pub response: Option<String>,
    /// Whether the screen contents changed.
    pub dirty: bool,
}

enum AddStatus {
    /// More chunks expected; nothing to report yet.
    Pending(u64),
    /// Payload decoded, validated, and uploaded.
    Complete(u64),
}

/// The image manager of the inline-graphics subsystem.
///
/// Owns every image, the chunked-transmission state, and the render list.
/// All state is confined to the owning terminal thread; command handlers run
/// to completion with synchronous I/O.
pub struct GraphicsManager {
    images: Vec<Image>,
    used_storage: usize,
    internal_id_counter: u64,
    /// Internal id of the image receiving direct chunks, or 0.
    loading_image: u64,
    /// Init command of the open transmission, resurrected for follow-on
    /// chunks that carry only a payload.
    last_init_command: GraphicsCommand,
    /// Sender-supplied (id, number) of the query in flight, for response
    /// correlation.
    query_response: (u32, u32),
    layers_dirty: bool,
    last_scrolled_by: u32,
    render_data: Vec<ImageRenderData>,
    below_refs: usize,
    negative_refs: usize,
    positive_refs: usize,
    epoch: Instant,
    last_tick: u64,
    gpu: Box<dyn GpuBackend>,
    png: Box<dyn PngEngine>,
    temp_file_hook: Option<TempFileHook>,
}

impl GraphicsManager {
    pub fn new(gpu: Box<dyn GpuBackend>) -> Self {
        Self {
            images: Vec::new(),
            used_storage: 0,
            internal_id_counter: 0,
            loading_image: 0,
            last_init_command: GraphicsCommand::default(),
            query_response: (0, 0),
            layers_dirty: false,
            last_scrolled_by: 0,
            render_data: Vec::new(),
            below_refs: 0,
            negative_refs: 0,
            positive_refs: 0,
            epoch: Instant::now(),
            last_tick: 0,
            gpu,
            png: Box::new(DefaultPngEngine),
            temp_file_hook: None,
        }
    }

    /// Replaces the bundled software PNG decoder.
    pub fn with_png_engine(mut self, png: Box<dyn PngEngine>) -> Self {
        self.png = png;
        self
    }

    /// Installs the host callback that schedules deletion of transmitted
    /// temp files.
    pub fn set_temp_file_hook(&mut self, hook: TempFileHook) {
        self.temp_file_hook = Some(hook);
    }

    /// Dispatches one parsed command with its payload.
    ///
    /// `cursor` is advanced by placements; `cell` is the current cell size in
    /// pixels.
    pub fn handle_command(
        &mut self,
        cmd: &GraphicsCommand,
        payload: &[u8],
        cursor: &mut CursorPos,
        cell: CellSize,
    ) -> CommandOutcome {
        let mut dirty = false;

        if cmd.id != 0 && cmd.image_number != 0 {
            let err = CommandError::Invalid(
                "Must not specify both image id and image number".to_string(),
            );
            return CommandOutcome {
                response: finish_command_response(cmd, Err(&err)),
                dirty,
            };
        }

        let response = match cmd.action {
            0 | b't' | b'T' | b'q' => self.handle_add(cmd, payload, cursor, cell, &mut dirty),
            b'p' => {
                let result = if cmd.id == 0 && cmd.image_number == 0 {
                    warn!("put graphics command without image id or number");
                    Err(CommandError::NotFound(
                        "Put command without image id or number".to_string(),
                    ))
                } else {
                    self.handle_put(cmd, cursor, cell, &mut dirty, None)
                };
                finish_command_response(cmd, result.as_ref().map(|_| true))
            }
            b'd' => {
                let result = self.handle_delete(cmd, cursor);
                dirty = true;
                finish_command_response(cmd, result.as_ref().map(|_| true))
            }
            other => {
                warn!("unknown graphics command action: {:?}", other as char);
                let err = CommandError::Invalid(format!(
                    "Unknown graphics command action: {}",
                    other as char
                ));
                finish_command_response(cmd, Err(&err))
            }
        };

        CommandOutcome { response, dirty }
    }

    /// Marks the render list stale after a grid geometry change.
    pub fn resize(&mut self) {
        self.layers_dirty = true;
    }

    /// Re-clamps cell offsets and recomputes effective spans after the cell
    /// pixel size changed (font or DPI change). Must run before the next
    /// layer build for free-floating placements to stay correct.
    pub fn rescale(&mut self, cell: CellSize) {
        for img in &mut self.images {
            for r in &mut img.refs {
                r.cell_x_offset = r.cell_x_offset.min(cell.width.saturating_sub(1));
                r.cell_y_offset = r.cell_y_offset.min(cell.height.saturating_sub(1));
                r.update_dest_rect(cell);
            }
        }
        self.layers_dirty = true;
    }

    // ------------------------------------------------------------------
    // Add (actions 0, t, T, q)
    // ------------------------------------------------------------------

    fn handle_add(
        &mut self,
        cmd: &GraphicsCommand,
        payload: &[u8],
        cursor: &mut CursorPos,
        cell: CellSize,
        dirty: &mut bool,
    ) -> Option<String> {
        let continuation = cmd.transmission() == b'd' && self.loading_image != 0;

        let g = if continuation {
            self.last_init_command.more = cmd.more;
            self.last_init_command.payload_sz = payload.len() as u32;
            self.last_init_command.clone()
        } else {
            let mut g = cmd.clone();
            if g.action == b'q' {
                // Queries transmit under a fresh id so they can never clobber
                // a resident image; the sender's keys are kept for the
                // response.
                self.query_response = (g.id, g.image_number);
                g.id = self.free_client_id();
                g.image_number = 0;
            }
            g
        };
        let is_query = g.action == b'q';

        let mut touched = None;
        let mut result = self.do_add(&g, payload, continuation, dirty, &mut touched);
        if result.is_err() {
            // Abort only this image: release its staging, leave it
            // collectable by the next add's trim pass.
            self.loading_image = 0;
            if let Some(id) = touched {
                if let Some(img) = self.image_by_internal_id_mut(id) {
                    img.data_loaded = false;
                    img.load.reset();
                }
            }
        }

        let completed = matches!(&result, Ok(AddStatus::Complete(_)));
        let resident_id = match &result {
            Ok(AddStatus::Complete(id) | AddStatus::Pending(id)) => Some(*id),
            Err(_) => None,
        };

        // `T` places the image as soon as its transmission completes.
        if completed && g.action == b'T' {
            if let Some(id) = resident_id {
                if let Err(e) = self.handle_put(&g, cursor, cell, dirty, Some(id)) {
                    result = Err(e);
                }
            }
        }

        let mut resp_cmd = g.clone();
        if is_query {
            resp_cmd.id = self.query_response.0;
            resp_cmd.image_number = self.query_response.1;
        } else if resp_cmd.image_number != 0 {
            // Number-addressed adds report the assigned id alongside the
            // number.
            if let Some(id) = resident_id {
                if let Some(img) = self.image_by_internal_id(id) {
                    resp_cmd.id = img.client_id;
                }
            }
        }
        let outcome = match &result {
            Ok(AddStatus::Complete(_)) => Ok(true),
            Ok(AddStatus::Pending(_)) => Ok(false),
            Err(e) => Err(e),
        };
        let response = finish_command_response(&resp_cmd, outcome);

        if completed {
            if let Some(id) = resident_id {
                if is_query {
                    // Queries never leave the image resident.
                    if let Some(idx) = self.index_by_internal_id(id) {
                        let img = self.images.remove(idx);
                        self.release_image(img);
                    }
                } else if self.used_storage > STORAGE_LIMIT {
                    self.apply_storage_quota(STORAGE_LIMIT, id);
                }
            }
        }

        response
    }

    fn do_add(
        &mut self,
        g: &GraphicsCommand,
        payload: &[u8],
        continuation: bool,
        dirty: &mut bool,
        touched: &mut Option<u64>,
    ) -> Result<AddStatus, CommandError> {
        let tt = g.transmission();
        let fmt = PixelFormat::from_code(g.format)
            .ok_or_else(|| CommandError::Invalid(format!("Unknown image format: {}", g.format)))?;

        let idx = if continuation {
            let loading = self.loading_image;
            match self.index_by_internal_id(loading) {
                Some(idx) => idx,
                None => {
                    return Err(CommandError::BadSequence(
                        "Additional image data command refers to a non-existent image"
                            .to_string(),
                    ));
                }
            }
        } else {
            if tt == b'd'
                && g.action == 0
                && g.format == 0
                && g.data_width == 0
                && g.data_height == 0
                && g.id == 0
                && g.image_number == 0
                && !payload.is_empty()
            {
                // Shaped like a follow-on chunk, but nothing is loading.
                return Err(CommandError::BadSequence(
                    "Image data chunk received without a transmission in progress".to_string(),
                ));
            }
            self.init_image(g, fmt, dirty, touched)?
        };
        let internal_id = self.images[idx].internal_id;
        *touched = Some(internal_id);

        match tt {
            b'd' => {
                let img = &mut self.images[idx];
                match img.load.staging.as_mut() {
                    Some(Staging::Inline(buf)) => buf.append(payload)?,
                    _ => {
                        return Err(CommandError::BadSequence(
                            "Image data chunk received for an image that is not loading"
                                .to_string(),
                        ));
                    }
                }
                if g.more {
                    return Ok(AddStatus::Pending(internal_id));
                }
                img.data_loaded = true;
                self.loading_image = 0;
            }
            b'f' | b't' | b's' => {
                let region = acquire_mapped(tt, payload, g, &mut self.temp_file_hook)?;
                let img = &mut self.images[idx];
                img.load.staging = Some(Staging::Mapped(region));
                img.data_loaded = true;
            }
            other => {
                return Err(CommandError::Invalid(format!(
                    "Unknown transmission type: {}",
                    other as char
                )));
            }
        }

        // Payload assembled; decompress and decode as needed.
        match g.compressed {
            0 => {}
            b'z' => {
                let expected = self.images[idx].load.data_sz;
                let inflated = inflate_exact(
                    self.images[idx].load.data().unwrap_or(&[]),
                    expected,
                )?;
                self.images[idx].load.staging =
                    Some(Staging::Inline(InlineBuffer::from_vec(inflated)));
            }
            other => {
                return Err(CommandError::Invalid(format!(
                    "Unknown image compression: {}",
                    other as char
                )));
            }
        }

        if fmt == PixelFormat::Png {
            let data = self.images[idx].load.data().unwrap_or(&[]);
            if data.len() > MAX_DATA_SIZE {
                return Err(CommandError::Invalid("PNG data size too large".to_string()));
            }
            let decoded = self.png.decode(data).map_err(|e| {
                warn!("PNG decode failed: {e:#}");
                CommandError::Invalid("Failed to decode PNG image".to_string())
            })?;
            let img = &mut self.images[idx];
            img.width = decoded.width;
            img.height = decoded.height;
            img.load.data_sz = decoded.rgba.len();
            img.load.staging = Some(Staging::Inline(InlineBuffer::from_vec(decoded.rgba)));
        }

        let img = &mut self.images[idx];
        let available = img.load.data().map_or(0, <[u8]>::len);
        if available < img.load.data_sz {
            return Err(CommandError::ShortData(format!(
                "Insufficient image data: {} < {}",
                available, img.load.data_sz
            )));
        }
        let bpp = if img.load.is_opaque { 3 } else { 4 };
        let required_sz = bpp * img.width as usize * img.height as usize;
        if img.load.data_sz != required_sz {
            return Err(CommandError::Invalid(format!(
                "Image dimensions: {}x{} do not match data size: {}, expected size: {}",
                img.width, img.height, img.load.data_sz, required_sz
            )));
        }

        let staging = img.load.staging.take();
        if let Some(staging) = &staging {
            self.gpu.send_image_to_gpu(
                &mut img.texture_id,
                &staging.bytes()[..required_sz],
                img.width,
                img.height,
                img.load.is_opaque,
                img.load.is_4byte_aligned,
                true,
                false,
            );
        }
        drop(staging);
        img.load.reset();
        img.used_storage = required_sz;
        self.used_storage += required_sz;

        Ok(AddStatus::Complete(internal_id))
    }

    /// Starts a new transmission: validates dimensions, collects leftovers
    /// from aborted loads, and allocates or reuses the image slot.
    fn init_image(
        &mut self,
        g: &GraphicsCommand,
        fmt: PixelFormat,
        dirty: &mut bool,
        touched: &mut Option<u64>,
    ) -> Result<usize, CommandError> {
        self.last_init_command = g.clone();
        self.loading_image = 0;

        if g.data_width > MAX_IMAGE_DIMENSION || g.data_height > MAX_IMAGE_DIMENSION {
            return Err(CommandError::Invalid("Image too large".to_string()));
        }

        self.remove_images(|img| !img.data_loaded && img.refs.is_empty(), 0);

        let (idx, existing) = self.find_or_create_image(g.id);
        if existing {
            // Replaced in place: same client id, new identity.
            let fresh_internal = self.next_internal_id();
            let reclaimed = self.images[idx].used_storage;
            self.used_storage = self.used_storage.saturating_sub(reclaimed);
            let img = &mut self.images[idx];
            img.internal_id = fresh_internal;
            img.used_storage = 0;
            img.load.reset();
            img.data_loaded = false;
            img.refs.clear();
            *dirty = true;
            self.layers_dirty = true;
        } else if g.id == 0 && g.image_number != 0 {
            let assigned = self.free_client_id();
            self.images[idx].client_id = assigned;
            self.last_init_command.id = assigned;
        }
        let img = &mut self.images[idx];
        img.client_number = g.image_number;
        *touched = Some(img.internal_id);

        let now = self.monotonic();
        let img = &mut self.images[idx];
        img.atime = now;
        img.width = g.data_width;
        img.height = g.data_height;

        match fmt {
            PixelFormat::Png => {
                if g.data_sz as usize > MAX_DATA_SIZE {
                    return Err(CommandError::Invalid("PNG data size too large".to_string()));
                }
                img.load.is_4byte_aligned = true;
                img.load.is_opaque = false;
                img.load.data_sz = if g.data_sz == 0 {
                    100 * 1024
                } else {
                    g.data_sz as usize
                };
            }
            PixelFormat::Rgb | PixelFormat::Rgba => {
                let sz = g.data_width as usize * g.data_height as usize * fmt.bytes_per_pixel();
                if sz == 0 {
                    return Err(CommandError::Invalid(
                        "Zero width/height not allowed".to_string(),
                    ));
                }
                img.load.data_sz = sz;
                img.load.is_4byte_aligned = fmt == PixelFormat::Rgba || g.data_width % 4 == 0;
                img.load.is_opaque = fmt == PixelFormat::Rgb;
            }
        }

        if g.transmission() == b'd' {
            if g.more {
                self.loading_image = img.internal_id;
            }
            let slack = if g.compressed != 0 { 1024 } else { 16 };
            let limit = match fmt {
                PixelFormat::Png => MAX_DATA_SIZE,
                _ => img.load.data_sz + slack,
            };
            let expected = img.load.data_sz + slack;
            img.load.staging = Some(Staging::Inline(InlineBuffer::new(expected, limit)?));
        }

        Ok(idx)
    }

    // ------------------------------------------------------------------
    // Put (action p, and the placement half of T)
    // ------------------------------------------------------------------

    fn handle_put(
        &mut self,
        g: &GraphicsCommand,
        cursor: &mut CursorPos,
        cell: CellSize,
        dirty: &mut bool,
        internal: Option<u64>,
    ) -> Result<(), CommandError> {
        let idx = match internal {
            Some(id) => self.index_by_internal_id(id),
            None if g.id != 0 => self.index_by_client_id(g.id),
            None => self.index_by_client_number(g.image_number),
        }
        .ok_or_else(|| {
            CommandError::NotFound(format!(
                "Put command refers to non-existent image with id: {} and number: {}",
                g.id, g.image_number
            ))
        })?;
        if !self.images[idx].data_loaded {
            return Err(CommandError::NotFound(format!(
                "Put command refers to image with id: {} that could not load its data",
                g.id
            )));
        }

        *dirty = true;
        self.layers_dirty = true;
        let now = self.monotonic();
        let img = &mut self.images[idx];
        img.atime = now;
        let (img_w, img_h) = (img.width, img.height);

        // A supplied placement id replaces the matching placement; anything
        // else appends.
        let pos = if g.placement_id != 0 && img.client_id != 0 {
            img.refs.iter().position(|r| r.client_id == g.placement_id)
        } else {
            None
        };
        let r = match pos {
            Some(p) => &mut img.refs[p],
            None => {
                img.refs.push(crate::image::ImageRef::default());
                let last = img.refs.len() - 1;
                &mut img.refs[last]
            }
        };

        r.src_x = g.x_offset;
        r.src_y = g.y_offset;
        r.src_width = if g.width != 0 { g.width } else { img_w };
        r.src_height = if g.height != 0 { g.height } else { img_h };
        r.src_width = r.src_width.min(img_w - r.src_x.min(img_w));
        r.src_height = r.src_height.min(img_h - r.src_y.min(img_h));
        r.z_index = g.z_index;
        r.start_row = cursor.y as i32;
        r.start_column = cursor.x as i32;
        r.cell_x_offset = g.cell_x_offset.min(cell.width.saturating_sub(1));
        r.cell_y_offset = g.cell_y_offset.min(cell.height.saturating_sub(1));
        r.num_cols = g.num_cells;
        r.num_rows = g.num_lines;
        r.client_id = g.placement_id;
        r.update_src_rect(img_w, img_h);
        r.update_dest_rect(cell);

        // Advance the cursor; the screen clamps it to its bounds.
        cursor.x += r.effective_num_cols;
        cursor.y += r.effective_num_rows - 1;

        Ok(())
    }

    fn monotonic(&mut self) -> u64 {
        let now = self.epoch.elapsed().as_nanos() as u64;
        let t = now.max(self.last_tick + 1);
        self.last_tick = t;
        t
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Total resident decoded bytes, counted against the 320 MiB budget.
    pub fn used_storage(&self) -> usize {
        self.used_storage
    }

    pub fn image_for_client_id(&self, client_id: u32) -> Option<&Image> {
        self.index_by_client_id(client_id).map(|i| &self.images[i])
    }

    /// Placement counts from the last layer build, split by z order.
    pub fn below_ref_count(&self) -> usize {
        self.below_refs
    }

    pub fn negative_ref_count(&self) -> usize {
        self.negative_refs
    }

    pub fn positive_ref_count(&self) -> usize {
        self.positive_refs
    }
}

impl Drop for GraphicsManager {
    fn drop(&mut self) {
        let images = std::mem::take(&mut self.images);
        for img in images {
            self.release_image(img);
        }
    }
}

/// Builds the wire response for a completed command.
///
/// `Ok(false)` means the command succeeded but its transmission is still in
/// progress, which never produces a response. Responses are also suppressed
/// by the quiet level and when the command carries neither id nor number.
fn finish_command_response(
    g: &GraphicsCommand,
    outcome: Result<bool, &CommandError>,
) -> Option<String> {
    match outcome {
        Ok(_) if g.quiet >= 1 => return None,
        Err(_) if g.quiet >= 2 => return None,
        Ok(false) => return None,
        _ => {}
    }
    if g.id == 0 && g.image_number == 0 {
        return None;
    }
    let mut keys = Vec::new();
    if g.id != 0 {
        keys.push(format!("i={}", g.id));
    }
    if g.image_number != 0 {
        keys.push(format!("I={}", g.image_number));
    }
    if g.placement_id != 0 {
        keys.push(format!("p={}", g.placement_id));
    }
    let trailer = match outcome {
        Ok(_) => "OK".to_string(),
        Err(e) => e.to_string(),
    };
    Some(format!("G{};{}", keys.join(","), trailer))
}
