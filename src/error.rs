use thiserror::Error;

/// Failure outcome of a graphics command.
///
/// Each variant corresponds to one wire-level response code. `Display`
/// renders `CODE:message`, which is exactly the trailer the terminal sends
/// back to the client, e.g. `ENOENT:Put command refers to non-existent image`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Malformed parameters, bad action letter, dimension/format/size mismatch.
    #[error("EINVAL:{0}")]
    Invalid(String),
    /// Filesystem or mmap failure while obtaining a payload.
    #[error("EBADF:{0}")]
    BadFile(String),
    /// Allocation failure for a staging or decompression buffer.
    #[error("ENOMEM:{0}")]
    OutOfMemory(String),
    /// Decoded payload shorter than required.
    #[error("ENODATA:{0}")]
    ShortData(String),
    /// Payload exceeds the per-image ceiling.
    #[error("EFBIG:{0}")]
    TooBig(String),
    /// Follow-on chunk without a matching load in progress.
    #[error("EILSEQ:{0}")]
    BadSequence(String),
    /// Command refers to an image that does not exist.
    #[error("ENOENT:{0}")]
    NotFound(String),
}

impl CommandError {
    /// Returns the bare response code, without the message.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Invalid(_) => "EINVAL",
            CommandError::BadFile(_) => "EBADF",
            CommandError::OutOfMemory(_) => "ENOMEM",
            CommandError::ShortData(_) => "ENODATA",
            CommandError::TooBig(_) => "EFBIG",
            CommandError::BadSequence(_) => "EILSEQ",
            CommandError::NotFound(_) => "ENOENT",
        }
    }
}
