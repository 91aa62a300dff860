//! Transfer Wire Protocol
//!
//! The transfer conversation has two phases on one TCP connection:
//!
//! **Control phase** — newline-terminated JSON records. The initiator
//! sends one `transfer_request` carrying the manifest and aggregate
//! size; the responder replies with one `transfer_response` carrying
//! the accept/reject verdict and an optional reason.
//!
//! **Data phase** (only if accepted) — a sequence of frames, each a
//! 4-byte big-endian length `L` followed by `L` bytes of file content.
//! A zero-length frame is the end-of-transfer sentinel. Frame
//! boundaries are independent of entry boundaries; the receiver tracks
//! bytes-remaining per manifest entry, so no per-file sentinel exists.

use crate::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Record discriminator for the request record
pub const REQUEST_KIND: &str = "transfer_request";

/// Record discriminator for the response record
pub const RESPONSE_KIND: &str = "transfer_response";

/// Fixed chunk size for streaming file content (64 KiB)
///
/// Large enough to amortize framing overhead, small enough to bound
/// memory and give frequent progress updates.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound accepted for any single frame (DoS prevention)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Upper bound accepted for one control record line
pub const MAX_CONTROL_LINE: usize = 256 * 1024;

/// One manifest entry: a file or a directory
///
/// Directory entries carry no byte stream; the entry itself is the
/// instruction to create the directory. For files, `size` is the exact
/// byte count that will be streamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Base name of the file or directory
    pub name: String,

    /// Exact streamed byte count for files; not meaningful for directories
    pub size: u64,

    /// Whether this entry is a directory
    #[serde(default)]
    pub is_directory: bool,

    /// Path relative to the destination root, `/`-separated, used to
    /// preserve folder structure
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub relative_path: Option<String>,

    /// Absolute sender-local source path; never transmitted
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl FileEntry {
    /// A plain file entry
    pub fn file(name: impl Into<String>, size: u64, source_path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            size,
            is_directory: false,
            relative_path: None,
            source_path,
        }
    }

    /// A directory marker entry
    pub fn directory(name: impl Into<String>, relative_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            is_directory: true,
            relative_path: Some(relative_path.into()),
            source_path: None,
        }
    }

    /// Builder: set the relative path
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }
}

/// The initiator's opening control record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Always [`REQUEST_KIND`]
    pub kind: String,

    /// Transfer task identifier; the responder's mirror task reuses it
    pub task_id: String,

    /// Display name of the sending device, for the responder's prompt
    #[serde(default)]
    pub sender_name: String,

    /// Sum of the declared sizes of all non-directory entries
    pub total_size: u64,

    /// Ordered manifest; directories precede the files inside them
    pub files: Vec<FileEntry>,
}

impl TransferRequest {
    pub fn new(
        task_id: impl Into<String>,
        sender_name: impl Into<String>,
        files: Vec<FileEntry>,
    ) -> Self {
        let total_size = manifest_total_size(&files);
        Self {
            kind: REQUEST_KIND.to_string(),
            task_id: task_id.into(),
            sender_name: sender_name.into(),
            total_size,
            files,
        }
    }

    /// Validate the record before any decision or file I/O
    pub fn validate(&self) -> Result<()> {
        if self.kind != REQUEST_KIND {
            return Err(ProtocolError::InvalidMessage(format!(
                "expected {}, got {}",
                REQUEST_KIND, self.kind
            )));
        }
        if self.task_id.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty taskId".to_string()));
        }
        if self.files.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty manifest".to_string()));
        }
        if self.files.iter().any(|f| f.name.is_empty()) {
            return Err(ProtocolError::InvalidMessage(
                "manifest entry with empty name".to_string(),
            ));
        }
        let declared = manifest_total_size(&self.files);
        if declared != self.total_size {
            return Err(ProtocolError::InvalidMessage(format!(
                "totalSize {} disagrees with manifest sum {}",
                self.total_size, declared
            )));
        }
        Ok(())
    }
}

/// The responder's verdict record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    /// Always [`RESPONSE_KIND`]
    pub kind: String,

    /// Whether the transfer may proceed to the data phase
    pub accepted: bool,

    /// Human-readable reason, meaningful on rejection
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl TransferResponse {
    pub fn accept() -> Self {
        Self {
            kind: RESPONSE_KIND.to_string(),
            accepted: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            kind: RESPONSE_KIND.to_string(),
            accepted: false,
            reason: Some(reason.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind != RESPONSE_KIND {
            return Err(ProtocolError::InvalidMessage(format!(
                "expected {}, got {}",
                RESPONSE_KIND, self.kind
            )));
        }
        Ok(())
    }
}

/// Sum of declared sizes over non-directory entries
pub fn manifest_total_size(files: &[FileEntry]) -> u64 {
    files
        .iter()
        .filter(|f| !f.is_directory)
        .map(|f| f.size)
        .sum()
}

/// Write one newline-terminated control record
pub async fn write_record<W, T>(writer: &mut W, record: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(record)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-terminated control record
///
/// A closed connection before the newline, or a line past
/// [`MAX_CONTROL_LINE`], is a protocol error.
pub async fn read_record<R, T>(reader: &mut BufReader<R>) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let n = reader
        .take(MAX_CONTROL_LINE as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Err(ProtocolError::InvalidMessage(
            "connection closed before control record".to_string(),
        ));
    }
    if !line.ends_with('\n') {
        return Err(ProtocolError::InvalidMessage(
            "control record too large or unterminated".to_string(),
        ));
    }
    serde_json::from_str(line.trim_end())
        .map_err(|e| ProtocolError::InvalidMessage(format!("bad control record: {}", e)))
}

/// Write one data frame: 4-byte big-endian length, then the content
pub async fn write_chunk<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug_assert!(!data.is_empty() && data.len() <= MAX_FRAME_LEN);
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(data).await?;
    Ok(())
}

/// Write the reserved zero-length end-of-transfer sentinel
pub async fn write_end<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&0u32.to_be_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one data frame into `buf`
///
/// Returns `Ok(None)` on the end-of-transfer sentinel, `Ok(Some(len))`
/// for a content frame. The reader buffers until the full declared
/// length is available; wire segmentation never shows through.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len, MAX_FRAME_LEN));
    }

    buf.resize(len, 0);
    reader.read_exact(&mut buf[..len]).await?;
    Ok(Some(len))
}
