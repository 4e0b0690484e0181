use crate::command::CellSize;
use crate::image::{BELOW_TEXT_Z, ImageRect, ImageRenderData};

use super::GraphicsManager;

impl GraphicsManager {
    /// Rebuilds the render list of visible quads, in draw order.
    ///
    /// `scrolled_by` is the scrollback offset in rows, `(screen_left,
    /// screen_top)` the screen origin in NDC, `(dx, dy)` the NDC extent of
    /// one cell, and `(num_cols, num_rows)` the grid size. Returns the cached
    /// list untouched when nothing changed since the last build and the
    /// scroll offset is the same.
    #[allow(clippy::too_many_arguments)]
    pub fn update_layers(
        &mut self,
        scrolled_by: u32,
        screen_left: f32,
        screen_top: f32,
        dx: f32,
        dy: f32,
        num_cols: u32,
        num_rows: u32,
        cell: CellSize,
    ) -> &[ImageRenderData] {
        if self.last_scrolled_by != scrolled_by {
            self.layers_dirty = true;
        }
        self.last_scrolled_by = scrolled_by;
        if !self.layers_dirty {
            return &self.render_data;
        }
        self.layers_dirty = false;

        self.below_refs = 0;
        self.negative_refs = 0;
        self.positive_refs = 0;
        self.render_data.clear();

        let screen_width = dx * num_cols as f32;
        let screen_height = dy * num_rows as f32;
        let screen_bottom = screen_top - screen_height;
        let screen_width_px = (num_cols * cell.width) as f32;
        let screen_height_px = (num_rows * cell.height) as f32;
        // Row 0 in NDC, shifted by how far the viewport looks into history.
        let y0 = screen_top - dy * scrolled_by as f32;

        for img in &self.images {
            for r in &img.refs {
                let top =
                    y0 - r.start_row as f32 * dy - dy * r.cell_y_offset as f32 / cell.height as f32;
                let bottom = if r.num_rows > 0 {
                    y0 - (r.start_row + r.num_rows as i32) as f32 * dy
                } else {
                    // Free-floating: sized by the pixel ratio to the screen.
                    top - screen_height * r.src_height as f32 / screen_height_px
                };
                if top <= screen_bottom || bottom >= screen_top {
                    continue;
                }
                let left = screen_left
                    + r.start_column as f32 * dx
                    + dx * r.cell_x_offset as f32 / cell.width as f32;
                let right = if r.num_cols > 0 {
                    screen_left + (r.start_column + r.num_cols as i32) as f32 * dx
                } else {
                    left + screen_width * r.src_width as f32 / screen_width_px
                };

                if r.z_index < BELOW_TEXT_Z {
                    self.below_refs += 1;
                } else if r.z_index < 0 {
                    self.negative_refs += 1;
                } else {
                    self.positive_refs += 1;
                }

                let dest = ImageRect {
                    left,
                    top,
                    right,
                    bottom,
                };
                self.render_data
                    .push(ImageRenderData::new(r, &dest, img.internal_id, img.texture_id));
            }
        }
        if self.render_data.is_empty() {
            return &self.render_data;
        }

        // Draw order: z-index, then image, so each image's quads form one
        // contiguous run for batched GPU calls. (z, id) is a total order over
        // the working set, so an unstable sort is fine.
        self.render_data
            .sort_unstable_by(|a, b| a.z_index.cmp(&b.z_index).then(a.image_id.cmp(&b.image_id)));

        let mut i = 0;
        while i < self.render_data.len() {
            let image_id = self.render_data[i].image_id;
            let start = i;
            while i < self.render_data.len() && self.render_data[i].image_id == image_id {
                i += 1;
            }
            self.render_data[start].group_count = (i - start) as u32;
        }

        &self.render_data
    }
}

#[cfg(test)]
mod tests {
    use crate::command::CellSize;
    use crate::image::{Image, ImageRef};
    use crate::test_utils::recording_manager;

    const CELL: CellSize = CellSize {
        width: 10,
        height: 20,
    };

    // An 80x24 grid mapped to the full NDC range.
    const COLS: u32 = 80;
    const ROWS: u32 = 24;
    const DX: f32 = 2.0 / COLS as f32;
    const DY: f32 = 2.0 / ROWS as f32;

    fn place(
        m: &mut crate::GraphicsManager,
        z_index: i32,
        start_row: i32,
        rows: u32,
    ) -> u64 {
        let internal_id = m.next_internal_id();
        let mut r = ImageRef {
            start_row,
            start_column: 0,
            src_width: CELL.width,
            src_height: rows * CELL.height,
            num_cols: 1,
            num_rows: rows,
            effective_num_cols: 1,
            effective_num_rows: rows,
            z_index,
            ..Default::default()
        };
        r.update_src_rect(CELL.width, rows * CELL.height);
        m.images.push(Image {
            internal_id,
            width: CELL.width,
            height: rows * CELL.height,
            texture_id: internal_id as u32,
            data_loaded: true,
            refs: vec![r],
            ..Default::default()
        });
        m.resize();
        internal_id
    }

    fn build(m: &mut crate::GraphicsManager, scrolled_by: u32) -> Vec<crate::ImageRenderData> {
        m.update_layers(scrolled_by, -1.0, 1.0, DX, DY, COLS, ROWS, CELL)
            .to_vec()
    }

    #[test]
    fn test_sorted_by_z_then_image_with_group_counts() {
        let (mut m, _gpu) = recording_manager();
        let a = place(&mut m, 5, 0, 1);
        let b = place(&mut m, -1, 1, 1);
        let c = place(&mut m, 5, 2, 1);
        // Second placement on image `a` so it forms a run of two.
        let idx = m.index_by_internal_id(a).unwrap();
        let extra = m.images[idx].refs[0].clone();
        m.images[idx].refs.push(ImageRef {
            start_row: 3,
            ..extra
        });
        m.resize();

        let out = build(&mut m, 0);
        assert_eq!(out.len(), 4);
        let order: Vec<(i32, u64)> = out.iter().map(|rd| (rd.z_index, rd.image_id)).collect();
        assert_eq!(order, vec![(-1, b), (5, a), (5, a), (5, c)]);
        let groups: Vec<u32> = out.iter().map(|rd| rd.group_count).collect();
        assert_eq!(groups, vec![1, 2, 0, 1]);
    }

    #[test]
    fn test_offscreen_refs_are_skipped() {
        let (mut m, _gpu) = recording_manager();
        place(&mut m, 0, 0, 1);
        place(&mut m, 0, ROWS as i32 + 5, 1); // below the screen
        place(&mut m, 0, -8, 1); // above the screen
        let out = build(&mut m, 0);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_scroll_offset_brings_history_back() {
        let (mut m, _gpu) = recording_manager();
        place(&mut m, 0, -8, 1);
        assert_eq!(build(&mut m, 0).len(), 0);
        // Looking 8 rows into history puts the placement back on screen.
        assert_eq!(build(&mut m, 8).len(), 1);
    }

    #[test]
    fn test_clean_build_is_cached() {
        let (mut m, _gpu) = recording_manager();
        place(&mut m, 0, 0, 1);
        let first = build(&mut m, 0);
        // Mutating a placement without marking dirty must not rebuild.
        m.images[0].refs[0].start_row = 5;
        let second = build(&mut m, 0);
        assert_eq!(first, second);
        // Changing the scroll offset does.
        let third = build(&mut m, 1);
        assert_ne!(first, third);
    }

    #[test]
    fn test_z_statistics() {
        let (mut m, _gpu) = recording_manager();
        place(&mut m, i32::MIN / 2 - 1, 0, 1);
        place(&mut m, -2, 1, 1);
        place(&mut m, 0, 2, 1);
        place(&mut m, 3, 3, 1);
        build(&mut m, 0);
        assert_eq!(m.below_ref_count(), 1);
        assert_eq!(m.negative_ref_count(), 1);
        assert_eq!(m.positive_ref_count(), 2);
    }

    #[test]
    fn test_quad_geometry_for_single_cell() {
        let (mut m, _gpu) = recording_manager();
        place(&mut m, 0, 0, 1);
        let out = build(&mut m, 0);
        let v = &out[0].vertices;
        // Destination: top-left corner of the screen, one cell.
        let (right, top) = (v[2], v[3]);
        let (left, bottom) = (v[10], v[11]);
        assert!((top - 1.0).abs() < 1e-6);
        assert!((left + 1.0).abs() < 1e-6);
        assert!((right - (-1.0 + DX)).abs() < 1e-6);
        assert!((bottom - (1.0 - DY)).abs() < 1e-6);
    }
}
