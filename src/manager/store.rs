use log::{debug, info};

use crate::image::Image;

use super::GraphicsManager;

impl GraphicsManager {
    pub(crate) fn next_internal_id(&mut self) -> u64 {
        self.internal_id_counter += 1;
        self.internal_id_counter
    }

    pub(crate) fn index_by_internal_id(&self, id: u64) -> Option<usize> {
        self.images.iter().position(|img| img.internal_id == id)
    }

    pub(crate) fn image_by_internal_id(&self, id: u64) -> Option<&Image> {
        self.index_by_internal_id(id).map(|i| &self.images[i])
    }

    pub(crate) fn image_by_internal_id_mut(&mut self, id: u64) -> Option<&mut Image> {
        self.index_by_internal_id(id).map(|i| &mut self.images[i])
    }

    /// First image with the given client id; ids are unique when nonzero.
    pub(crate) fn index_by_client_id(&self, client_id: u32) -> Option<usize> {
        if client_id == 0 {
            return None;
        }
        self.images.iter().position(|img| img.client_id == client_id)
    }

    /// Newest image with the given client number.
    pub(crate) fn index_by_client_number(&self, number: u32) -> Option<usize> {
        if number == 0 {
            return None;
        }
        self.images
            .iter()
            .rposition(|img| img.client_number == number)
    }

    /// The smallest positive client id not currently taken.
    pub(crate) fn free_client_id(&self) -> u32 {
        let mut taken: Vec<u32> = self
            .images
            .iter()
            .map(|img| img.client_id)
            .filter(|&id| id != 0)
            .collect();
        taken.sort_unstable();
        taken.dedup();
        let mut ans = 1u32;
        for id in taken {
            if id != ans {
                break;
            }
            ans = id + 1;
        }
        ans
    }

    /// Returns the slot holding `client_id`, or a fresh zero-initialized
    /// slot. The `bool` is true when an existing image was matched; the
    /// caller resets its load state and placements.
    pub(crate) fn find_or_create_image(&mut self, client_id: u32) -> (usize, bool) {
        if let Some(idx) = self.index_by_client_id(client_id) {
            return (idx, true);
        }
        let internal_id = self.next_internal_id();
        self.images.push(Image {
            internal_id,
            client_id,
            ..Default::default()
        });
        (self.images.len() - 1, false)
    }

    /// Releases everything an image owns: quota accounting, GPU texture,
    /// staging buffers and placements (dropped with the value).
    pub(crate) fn release_image(&mut self, mut img: Image) {
        self.used_storage = self.used_storage.saturating_sub(img.used_storage);
        if img.texture_id != 0 {
            self.gpu.free_texture(&mut img.texture_id);
        }
    }

    /// Removes every image matching `predicate`, except `keep_internal_id`.
    pub(crate) fn remove_images<F: Fn(&Image) -> bool>(
        &mut self,
        predicate: F,
        keep_internal_id: u64,
    ) {
        let mut i = 0;
        let mut removed = false;
        while i < self.images.len() {
            let img = &self.images[i];
            if img.internal_id != keep_internal_id && predicate(img) {
                debug!(
                    "removing image id={} number={} ({} bytes)",
                    img.client_id, img.client_number, img.used_storage
                );
                let img = self.images.remove(i);
                self.release_image(img);
                removed = true;
            } else {
                i += 1;
            }
        }
        if removed {
            self.layers_dirty = true;
        }
    }

    /// Enforces the storage budget after an add.
    ///
    /// Unloaded or unplaced images go first (the image just added is
    /// protected), then least-recently-used images until the budget holds.
    pub(crate) fn apply_storage_quota(&mut self, limit: usize, currently_added: u64) {
        self.remove_images(
            |img| !img.data_loaded || img.refs.is_empty(),
            currently_added,
        );
        if self.used_storage <= limit {
            return;
        }

        // Oldest last, so eviction pops from the tail.
        self.images.sort_unstable_by(|a, b| b.atime.cmp(&a.atime));
        while self.used_storage > limit {
            match self.images.pop() {
                Some(img) => {
                    info!(
                        "evicting image id={} to reclaim {} bytes (in use: {})",
                        img.client_id, img.used_storage, self.used_storage
                    );
                    self.release_image(img);
                }
                None => break,
            }
        }
        if self.images.is_empty() {
            self.used_storage = 0;
        }
        self.layers_dirty = true;
    }
}
