use log::warn;

use crate::command::{CellSize, CursorPos, GraphicsCommand, ScrollData};
use crate::error::CommandError;
use crate::image::ImageRef;

use super::GraphicsManager;

/// Owning-image facts a placement predicate may consult.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RefOwner {
    pub width: u32,
    pub height: u32,
    pub client_id: u32,
    pub internal_id: u64,
}

impl GraphicsManager {
    /// Walks every placement, removing those for which `should_remove`
    /// returns true. An image left with no placements is removed when
    /// `free_images` is set, and always when it has no client id (nothing
    /// could ever address it again).
    pub(crate) fn filter_refs<F>(&mut self, free_images: bool, mut should_remove: F)
    where
        F: FnMut(&mut ImageRef, RefOwner) -> bool,
    {
        let mut i = 0;
        let mut changed = false;
        while i < self.images.len() {
            let img = &mut self.images[i];
            let owner = RefOwner {
                width: img.width,
                height: img.height,
                client_id: img.client_id,
                internal_id: img.internal_id,
            };
            let before = img.refs.len();
            img.refs.retain_mut(|r| !should_remove(r, owner));
            if img.refs.len() != before {
                changed = true;
            }
            if img.refs.is_empty() && (free_images || img.client_id == 0) {
                let img = self.images.remove(i);
                self.release_image(img);
                changed = true;
            } else {
                i += 1;
            }
        }
        if changed {
            self.layers_dirty = true;
        }
    }

    /// Applies a scroll to every placement.
    ///
    /// Without margins every start row shifts by `amt` and placements whose
    /// bottom falls at or above `limit` are dropped. With margins only
    /// placements entirely inside the region move, and those pushed across a
    /// boundary are clipped by shrinking their source rectangle.
    pub fn scroll_images(&mut self, data: &ScrollData, cell: CellSize) {
        if self.images.is_empty() {
            return;
        }
        self.layers_dirty = true;
        let d = *data;
        if d.has_margins {
            self.filter_refs(true, move |r, owner| scroll_within_margins(r, &d, cell, owner));
        } else {
            self.filter_refs(true, move |r, _| {
                r.start_row += d.amt;
                r.start_row + r.effective_num_rows as i32 <= d.limit
            });
        }
    }

    /// Screen clear: `all` removes every placement, otherwise only those
    /// that have scrolled entirely into history (bottom at or above row 0).
    pub fn clear_images(&mut self, all: bool) {
        if all {
            self.filter_refs(true, |_, _| true);
        } else {
            self.filter_refs(true, |r, _| r.start_row + r.effective_num_rows as i32 <= 0);
        }
    }

    /// Delete command: the action letter selects placements; the upper-case
    /// variant also frees images left without placements.
    pub(crate) fn handle_delete(
        &mut self,
        g: &GraphicsCommand,
        cursor: &CursorPos,
    ) -> Result<(), CommandError> {
        let x = g.x_offset as i64 - 1;
        let y = g.y_offset as i64 - 1;
        match g.delete_action {
            0 | b'a' | b'A' => {
                self.filter_refs(g.delete_action == b'A', |_, _| true);
            }
            b'i' | b'I' => {
                let (id, pid) = (g.id, g.placement_id);
                self.filter_refs(g.delete_action == b'I', move |r, owner| {
                    id != 0 && owner.client_id == id && (pid == 0 || r.client_id == pid)
                });
            }
            b'n' | b'N' => {
                let Some(idx) = self.index_by_client_number(g.image_number) else {
                    return Err(CommandError::NotFound(format!(
                        "Delete command refers to non-existent image with number: {}",
                        g.image_number
                    )));
                };
                let internal = self.images[idx].internal_id;
                let pid = g.placement_id;
                self.filter_refs(g.delete_action == b'N', move |r, owner| {
                    owner.internal_id == internal && (pid == 0 || r.client_id == pid)
                });
            }
            b'p' | b'P' => {
                self.filter_refs(g.delete_action == b'P', move |r, _| r.covers_cell(x, y));
            }
            b'q' | b'Q' => {
                let z = g.z_index;
                self.filter_refs(g.delete_action == b'Q', move |r, _| {
                    r.covers_cell(x, y) && r.z_index == z
                });
            }
            b'x' | b'X' => {
                self.filter_refs(g.delete_action == b'X', move |r, _| r.covers_column(x));
            }
            b'y' | b'Y' => {
                self.filter_refs(g.delete_action == b'Y', move |r, _| r.covers_row(y));
            }
            b'z' | b'Z' => {
                let z = g.z_index;
                self.filter_refs(g.delete_action == b'Z', move |r, _| r.z_index == z);
            }
            b'c' | b'C' => {
                let (cx, cy) = (cursor.x as i64, cursor.y as i64);
                self.filter_refs(g.delete_action == b'C', move |r, _| r.covers_cell(cx, cy));
            }
            other => {
                warn!(
                    "unknown graphics command delete action: {:?}",
                    other as char
                );
                return Err(CommandError::Invalid(format!(
                    "Unknown graphics command delete action: {}",
                    other as char
                )));
            }
        }
        // A selector that matched nothing still invalidates the layer cache.
        self.layers_dirty = true;
        if self.images.is_empty() {
            self.render_data.clear();
        }
        Ok(())
    }
}

/// Moves one placement under margin-bounded scrolling; returns true when the
/// placement must be dropped.
fn scroll_within_margins(
    r: &mut ImageRef,
    d: &ScrollData,
    cell: CellSize,
    owner: RefOwner,
) -> bool {
    let rows = r.effective_num_rows as i32;
    if !(r.start_row >= d.margin_top && r.start_row + rows <= d.margin_bottom) {
        return false;
    }
    r.start_row += d.amt;
    if r.start_row + rows <= d.margin_top || r.start_row > d.margin_bottom {
        return true;
    }
    // Rows pushed past the top margin shrink the source from above.
    if r.start_row < d.margin_top {
        let clipped = (d.margin_top - r.start_row) as u32;
        if clipped >= r.effective_num_rows {
            return true;
        }
        let px = clipped * cell.height;
        if px >= r.src_height {
            return true;
        }
        r.src_y += px;
        r.src_height -= px;
        r.effective_num_rows -= clipped;
        r.start_row = d.margin_top;
    }
    // Rows pushed past the bottom margin shrink the source from below.
    let overshoot = r.start_row + r.effective_num_rows as i32 - d.margin_bottom;
    if overshoot > 0 {
        let clipped = overshoot as u32;
        if clipped >= r.effective_num_rows {
            return true;
        }
        let px = clipped * cell.height;
        if px >= r.src_height {
            return true;
        }
        r.src_height -= px;
        r.effective_num_rows -= clipped;
    }
    r.update_src_rect(owner.width, owner.height);
    false
}
