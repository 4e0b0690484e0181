use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd};
use std::path::Path;
use std::ptr;
use std::slice;

use log::{debug, warn};

use crate::command::GraphicsCommand;
use crate::error::CommandError;
use crate::image::{MAX_DATA_SIZE, MAX_FILENAME_SIZE};

/// Host callback that schedules deletion of a transmitted temp file once the
/// terminal is done with it. When absent the file is unlinked immediately
/// after mapping.
pub type TempFileHook = Box<dyn FnMut(&Path)>;

/// Where the bytes of an in-flight transmission live.
///
/// Exactly one source holds the payload at any time; the final pixel bytes
/// are a derived view (`bytes()`), never a separately stored pointer.
#[derive(Debug)]
pub enum Staging {
    /// Accumulated direct-transmission chunks, or a decoded/inflated buffer.
    Inline(InlineBuffer),
    /// A file, temp-file, or shm payload mapped into the address space.
    Mapped(MappedRegion),
}

impl Staging {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Staging::Inline(buf) => buf.bytes(),
            Staging::Mapped(region) => region.bytes(),
        }
    }
}

/// Owned byte buffer for direct transmissions with a hard ceiling.
#[derive(Debug)]
pub struct InlineBuffer {
    bytes: Vec<u8>,
    limit: usize,
}

impl InlineBuffer {
    /// Allocates a buffer that will accept at most `limit` bytes.
    ///
    /// The expected size is reserved up front so appends for well-behaved
    /// clients never reallocate.
    pub fn new(expected: usize, limit: usize) -> Result<Self, CommandError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(expected.min(limit))
            .map_err(|_| CommandError::OutOfMemory("Out of memory".to_string()))?;
        Ok(Self { bytes, limit })
    }

    /// Wraps an already-decoded buffer (inflate/PNG output).
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let limit = bytes.len();
        Self { bytes, limit }
    }

    /// Appends one transmission chunk.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), CommandError> {
        if self.bytes.len() + chunk.len() > self.limit.min(MAX_DATA_SIZE) {
            return Err(CommandError::TooBig("Too much data".to_string()));
        }
        if self.bytes.len() + chunk.len() > self.bytes.capacity() {
            self.bytes
                .try_reserve(chunk.len())
                .map_err(|_| CommandError::OutOfMemory("Out of memory".to_string()))?;
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A read-shared memory mapping of a payload source.
///
/// The mapping always starts at file offset zero; the requested
/// `data_offset` is applied when deriving the payload view, so unaligned
/// offsets need no page arithmetic.
#[derive(Debug)]
pub struct MappedRegion {
    ptr: *mut libc::c_void,
    map_len: usize,
    data_offset: usize,
}

impl MappedRegion {
    /// Maps `data_offset + data_len` bytes of `file` read-shared.
    pub fn map(file: &File, data_offset: usize, data_len: usize) -> std::io::Result<Self> {
        let map_len = data_offset + data_len;
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self {
            ptr,
            map_len,
            data_offset,
        })
    }

    /// The payload view: everything past `data_offset`.
    pub fn bytes(&self) -> &[u8] {
        let full = unsafe { slice::from_raw_parts(self.ptr as *const u8, self.map_len) };
        &full[self.data_offset..]
    }

    pub fn len(&self) -> usize {
        self.map_len - self.data_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr, self.map_len);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// Acquires a non-direct payload source named by the command payload.
///
/// `f` opens and maps a regular file; `t` additionally deletes the file
/// after mapping (through `temp_hook` when the host installed one); `s`
/// opens a POSIX shared-memory name and unlinks it after mapping, so the
/// kernel reclaims the region together with the process mapping.
pub fn acquire_mapped(
    transmission: u8,
    name: &[u8],
    g: &GraphicsCommand,
    temp_hook: &mut Option<TempFileHook>,
) -> Result<MappedRegion, CommandError> {
    if name.len() > MAX_FILENAME_SIZE {
        return Err(CommandError::Invalid("Filename too long".to_string()));
    }
    let fname = std::str::from_utf8(name)
        .map_err(|_| CommandError::Invalid("Filename is not valid UTF-8".to_string()))?;

    let file = match transmission {
        b's' => open_shm(fname)?,
        _ => File::open(fname).map_err(|e| {
            CommandError::BadFile(format!(
                "Failed to open file for graphics transmission with error: {e}"
            ))
        })?,
    };

    let offset = g.data_offset as usize;
    let len = if g.data_sz == 0 {
        let total = file
            .metadata()
            .map_err(|e| {
                CommandError::BadFile(format!(
                    "Failed to stat the image file with error: {e}"
                ))
            })?
            .len() as usize;
        total.saturating_sub(offset)
    } else {
        g.data_sz as usize
    };

    let region = MappedRegion::map(&file, offset, len).map_err(|e| {
        CommandError::BadFile(format!(
            "Failed to map image file into memory with error: {e}"
        ))
    })?;

    match transmission {
        b't' => match temp_hook {
            Some(hook) => hook(Path::new(fname)),
            None => {
                if let Err(e) = std::fs::remove_file(fname) {
                    warn!("failed to delete temp file {fname}: {e}");
                }
            }
        },
        b's' => unlink_shm(fname),
        _ => {}
    }

    Ok(region)
}

fn open_shm(name: &str) -> Result<File, CommandError> {
    let c_name = CString::new(name)
        .map_err(|_| CommandError::Invalid("Filename contains a null byte".to_string()))?;
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
    if fd < 0 {
        return Err(CommandError::BadFile(format!(
            "Failed to open shared memory for graphics transmission with error: {}",
            std::io::Error::last_os_error()
        )));
    }
    // The File takes ownership of the fd and closes it after mapping.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn unlink_shm(name: &str) {
    match CString::new(name) {
        Ok(c_name) => {
            if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
                debug!(
                    "failed to unlink shm {name}: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
        Err(e) => warn!("invalid shm name for unlink: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_inline_buffer_ceiling() {
        let mut buf = InlineBuffer::new(4, 4).unwrap();
        buf.append(&[1, 2, 3]).unwrap();
        buf.append(&[4]).unwrap();
        let err = buf.append(&[5]).unwrap_err();
        assert_eq!(err.code(), "EFBIG");
        assert_eq!(buf.bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_mapped_region_view_skips_offset() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"junkPAYLOAD").unwrap();
        f.flush().unwrap();
        let file = File::open(f.path()).unwrap();
        let region = MappedRegion::map(&file, 4, 7).unwrap();
        assert_eq!(region.bytes(), b"PAYLOAD");
        assert_eq!(region.len(), 7);
    }

    #[test]
    fn test_acquire_temp_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.rgba");
        std::fs::write(&path, [7u8; 16]).unwrap();
        let name = path.to_str().unwrap().as_bytes().to_vec();
        let g = GraphicsCommand {
            data_sz: 16,
            ..Default::default()
        };
        let mut hook: Option<TempFileHook> = None;
        let region = acquire_mapped(b't', &name, &g, &mut hook).unwrap();
        assert_eq!(region.bytes(), &[7u8; 16]);
        assert!(!path.exists(), "temp file should be unlinked after mapping");
    }

    #[test]
    fn test_acquire_shm_unlinks_the_name() {
        let name = format!("/termgfx-test-{}-shm", std::process::id());
        let c_name = CString::new(name.as_str()).unwrap();
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
            )
        };
        assert!(fd >= 0, "shm_open failed: {}", std::io::Error::last_os_error());
        let mut shm = unsafe { File::from_raw_fd(fd) };
        shm.set_len(16).unwrap();
        shm.write_all(&[9u8; 16]).unwrap();

        let g = GraphicsCommand {
            data_sz: 16,
            ..Default::default()
        };
        let mut hook: Option<TempFileHook> = None;
        let region = acquire_mapped(b's', name.as_bytes(), &g, &mut hook).unwrap();
        assert_eq!(region.bytes(), &[9u8; 16]);

        // The name is gone; only the mapping keeps the region alive.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        assert!(fd < 0, "shm name should have been unlinked");
    }

    #[test]
    fn test_acquire_missing_file_is_ebadf() {
        let g = GraphicsCommand::default();
        let mut hook: Option<TempFileHook> = None;
        let err = acquire_mapped(b'f', b"/no/such/file/anywhere", &g, &mut hook).unwrap_err();
        assert_eq!(err.code(), "EBADF");
    }
}
