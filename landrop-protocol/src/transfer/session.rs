//! Transfer Sessions
//!
//! One session drives one transfer conversation over one connection,
//! from the opening request record to a terminal state. Each session
//! reaches exactly one terminal state and reports it with exactly one
//! terminal event; partial destination files are left on disk as-is
//! when a session fails or is cancelled.

use crate::transfer::events::TransferEvent;
use crate::transfer::fs::{
    ensure_parent_dir, resolve_destination, sanitize_relative_path, uniquify_top_level,
};
use crate::transfer::server::{AcceptPolicy, Decision};
use crate::transfer::task::{ThroughputMeter, TransferStatus, TransferTask};
use crate::transfer::wire::{
    read_frame, read_record, write_chunk, write_end, write_record, TransferRequest,
    TransferResponse, CHUNK_SIZE,
};
use crate::{ProtocolError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{watch, OwnedSemaphorePermit};
use tracing::{debug, info, warn};

/// How long to wait for the responder's accept/reject verdict
///
/// Generous because a human may be looking at a prompt.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-operation timeout during the data phase
pub const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle for cancelling a running session from outside
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cancellation; the session stops at once, even while a
    /// read or write is blocked on the peer
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Sessions cancellable by task identifier, shared with the server
pub(crate) type ActiveSessions = Arc<Mutex<HashMap<String, CancelHandle>>>;

pub(crate) fn cancel_channel() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, rx)
}

/// Resolves when cancellation is requested
///
/// Never resolves once the handle is gone: with no sender left,
/// cancellation can no longer be requested.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|&flag| flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn io_deadline<T, F>(what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(IO_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout(what.to_string())),
    }
}

/// Map a finished session onto its terminal status and event
fn finish(
    mut task: TransferTask,
    outcome: Result<()>,
    events: &UnboundedSender<TransferEvent>,
) -> TransferTask {
    match outcome {
        Ok(()) => {
            task.status = TransferStatus::Completed;
            info!(task_id = %task.id, bytes = task.transferred, "Transfer completed");
            let _ = events.send(TransferEvent::Completed { task: task.clone() });
        }
        Err(ProtocolError::Rejected(reason)) => {
            task.status = TransferStatus::Rejected;
            info!(task_id = %task.id, %reason, "Transfer rejected by peer");
            let _ = events.send(TransferEvent::Rejected {
                task_id: task.id.clone(),
                reason,
            });
        }
        Err(ProtocolError::Busy) => {
            task.status = TransferStatus::Rejected;
            info!(task_id = %task.id, "Transfer declined while busy");
            let _ = events.send(TransferEvent::Rejected {
                task_id: task.id.clone(),
                reason: ProtocolError::Busy.to_string(),
            });
        }
        Err(ProtocolError::Cancelled) => {
            task.status = TransferStatus::Cancelled;
            info!(task_id = %task.id, "Transfer cancelled");
            let _ = events.send(TransferEvent::Cancelled {
                task_id: task.id.clone(),
            });
        }
        Err(e) => {
            task.status = TransferStatus::Failed;
            warn!(task_id = %task.id, error = %e, "Transfer failed");
            let _ = events.send(TransferEvent::Failed {
                task_id: task.id.clone(),
                reason: e.to_string(),
            });
        }
    }
    task
}

/// Run the sending side of a transfer over an established connection
pub(crate) async fn run_initiator<S>(
    stream: S,
    mut task: TransferTask,
    sender_name: String,
    events: UnboundedSender<TransferEvent>,
    cancel: watch::Receiver<bool>,
) -> TransferTask
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = drive_initiator(stream, &mut task, &sender_name, &events, cancel).await;
    finish(task, outcome, &events)
}

async fn drive_initiator<S>(
    stream: S,
    task: &mut TransferTask,
    sender_name: &str,
    events: &UnboundedSender<TransferEvent>,
    mut cancel: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let request = TransferRequest::new(task.id.clone(), sender_name, task.files.clone());
    task.status = TransferStatus::AwaitingAcceptance;
    write_record(&mut writer, &request).await?;
    debug!(task_id = %task.id, files = task.files.len(), total = task.total_size, "Sent transfer request");

    let response: TransferResponse = tokio::select! {
        result = tokio::time::timeout(RESPONSE_TIMEOUT, read_record(&mut reader)) => {
            match result {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ProtocolError::Timeout(
                        "awaiting transfer verdict".to_string(),
                    ))
                }
            }
        }
        _ = cancelled(&mut cancel) => return Err(ProtocolError::Cancelled),
    };
    response.validate()?;
    if !response.accepted {
        return Err(ProtocolError::Rejected(
            response.reason.unwrap_or_else(|| "declined".to_string()),
        ));
    }

    task.status = TransferStatus::Transferring;
    let mut meter = ThroughputMeter::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    for entry in task.files.clone() {
        if entry.is_directory || entry.size == 0 {
            continue;
        }
        let source = entry.source_path.as_ref().ok_or_else(|| {
            ProtocolError::InvalidMessage(format!("no source path for {}", entry.name))
        })?;
        let mut file = File::open(source).await?;
        let mut remaining = entry.size;

        while remaining > 0 {
            if *cancel.borrow() {
                return Err(ProtocolError::Cancelled);
            }
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                // Source shrank under us since manifest collection.
                return Err(ProtocolError::SizeMismatch {
                    expected: entry.size,
                    actual: entry.size - remaining,
                });
            }
            tokio::select! {
                result = io_deadline("sending chunk", write_chunk(&mut writer, &buf[..n])) => result?,
                _ = cancelled(&mut cancel) => return Err(ProtocolError::Cancelled),
            }
            remaining -= n as u64;
            task.transferred += n as u64;

            if let Some(bps) = meter.record(task.transferred) {
                task.throughput_bps = bps;
                let _ = events.send(TransferEvent::Progress {
                    task_id: task.id.clone(),
                    transferred: task.transferred,
                    total: task.total_size,
                    throughput_bps: bps,
                });
            }
        }
    }

    io_deadline("finishing stream", write_end(&mut writer)).await?;
    let _ = events.send(TransferEvent::Progress {
        task_id: task.id.clone(),
        transferred: task.transferred,
        total: task.total_size,
        throughput_bps: task.throughput_bps,
    });

    // Wait for the peer to close; its close is the acknowledgment.
    let mut ack = [0u8; 1];
    let _ = tokio::time::timeout(IO_TIMEOUT, reader.read(&mut ack)).await;
    Ok(())
}

/// Run the receiving side for one accepted connection
///
/// Reads the request, consults the policy, and either streams the
/// files into `destination_root` or declines. `permit` is the
/// single-transfer gate; `None` means another transfer is already
/// streaming and this request is declined without touching the disk.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_responder<S>(
    stream: S,
    peer_addr: SocketAddr,
    destination_root: PathBuf,
    policy: Arc<dyn AcceptPolicy>,
    permit: Option<OwnedSemaphorePermit>,
    events: UnboundedSender<TransferEvent>,
    active: ActiveSessions,
) -> Option<TransferTask>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let request: TransferRequest =
        match tokio::time::timeout(RESPONSE_TIMEOUT, read_record(&mut reader)).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                debug!(peer = %peer_addr, error = %e, "Dropping connection without a valid request");
                return None;
            }
            Err(_) => {
                debug!(peer = %peer_addr, "Connection sent no request in time");
                return None;
            }
        };
    if let Err(e) = request.validate() {
        debug!(peer = %peer_addr, error = %e, "Invalid transfer request");
        let _ = write_record(&mut writer, &TransferResponse::reject("invalid request")).await;
        return None;
    }

    let mut task = TransferTask::inbound(&request);
    let _ = events.send(TransferEvent::RequestReceived { task: task.clone() });

    // Manifest paths are checked before any verdict or file I/O.
    if let Err(e) = validate_manifest_paths(&request) {
        let _ = write_record(
            &mut writer,
            &TransferResponse::reject("invalid path in manifest"),
        )
        .await;
        return Some(finish(task, Err(e), &events));
    }

    let permit = match permit {
        Some(permit) => permit,
        None => {
            let reason = ProtocolError::Busy.reason();
            let _ = write_record(&mut writer, &TransferResponse::reject(reason)).await;
            return Some(finish(task, Err(ProtocolError::Busy), &events));
        }
    };

    match policy.decide(&request, peer_addr).await {
        Decision::Accept => {}
        Decision::Reject(reason) => {
            let _ = write_record(&mut writer, &TransferResponse::reject(&reason)).await;
            return Some(finish(task, Err(ProtocolError::Rejected(reason)), &events));
        }
    }

    // Landing spots are fixed once per transfer, before any bytes, so
    // a re-sent tree goes next to the earlier download instead of
    // truncating its files.
    uniquify_top_level(&destination_root, &mut task.files);

    let (cancel_handle, mut cancel) = cancel_channel();
    active
        .lock()
        .expect("active session lock poisoned")
        .insert(task.id.clone(), cancel_handle);

    let outcome = async {
        write_record(&mut writer, &TransferResponse::accept()).await?;
        task.status = TransferStatus::Transferring;
        info!(task_id = %task.id, peer = %peer_addr, files = task.files.len(), total = task.total_size, "Receiving transfer");
        receive_entries(&mut reader, &destination_root, &mut task, &events, &mut cancel).await
    }
    .await;
    drop(permit);

    active
        .lock()
        .expect("active session lock poisoned")
        .remove(&task.id);

    if outcome.is_ok() {
        let _ = events.send(TransferEvent::Progress {
            task_id: task.id.clone(),
            transferred: task.transferred,
            total: task.total_size,
            throughput_bps: task.throughput_bps,
        });
    }
    // Closing the connection is the acknowledgment the sender waits on.
    Some(finish(task, outcome, &events))
}

fn validate_manifest_paths(request: &TransferRequest) -> Result<()> {
    for entry in &request.files {
        match &entry.relative_path {
            Some(rel) => sanitize_relative_path(rel)?,
            None => sanitize_relative_path(&entry.name)?,
        };
    }
    Ok(())
}

/// State for the file currently being written
struct OpenFile {
    file: File,
    remaining: u64,
}

async fn receive_entries<R>(
    reader: &mut R,
    root: &Path,
    task: &mut TransferTask,
    events: &UnboundedSender<TransferEvent>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let entries = task.files.clone();
    let mut next_index = 0usize;
    let mut current: Option<OpenFile> = None;
    let mut meter = ThroughputMeter::new();
    let mut buf = Vec::with_capacity(CHUNK_SIZE);

    loop {
        // Cancellation interrupts even a read blocked on a stalled
        // sender; the partial file is flushed and kept.
        let frame = tokio::select! {
            result = io_deadline("receiving chunk", read_frame(reader, &mut buf)) => result?,
            _ = cancelled(cancel) => {
                if let Some(open) = current.as_mut() {
                    let _ = open.file.flush().await;
                }
                return Err(ProtocolError::Cancelled);
            }
        };
        let len = match frame {
            Some(len) => len,
            None => break,
        };

        let mut offset = 0usize;
        while offset < len {
            if current.is_none() {
                current = open_next_file(root, &entries, &mut next_index).await?;
                if current.is_none() {
                    return Err(ProtocolError::InvalidMessage(
                        "data past the end of the manifest".to_string(),
                    ));
                }
            }
            let open = current.as_mut().expect("file just opened");
            let take = open.remaining.min((len - offset) as u64) as usize;
            open.file.write_all(&buf[offset..offset + take]).await?;
            open.remaining -= take as u64;
            offset += take;
            task.transferred += take as u64;

            if open.remaining == 0 {
                open.file.flush().await?;
                current = None;
            }
        }

        if let Some(bps) = meter.record(task.transferred) {
            task.throughput_bps = bps;
            let _ = events.send(TransferEvent::Progress {
                task_id: task.id.clone(),
                transferred: task.transferred,
                total: task.total_size,
                throughput_bps: bps,
            });
        }
    }

    // Sentinel seen. Trailing directories and empty files still need
    // materializing; any unstreamed file bytes mean a short transfer.
    if current.is_none() {
        current = open_next_file(root, &entries, &mut next_index).await?;
    }
    if current.is_some() || next_index < entries.len() {
        return Err(ProtocolError::SizeMismatch {
            expected: task.total_size,
            actual: task.transferred,
        });
    }
    Ok(())
}

/// Materialize entries until one with bytes to stream is open
///
/// Directories are created and zero-length files written immediately;
/// returns the next entry that expects content, or `None` when the
/// manifest is exhausted.
async fn open_next_file(
    root: &Path,
    entries: &[crate::transfer::wire::FileEntry],
    next_index: &mut usize,
) -> Result<Option<OpenFile>> {
    while *next_index < entries.len() {
        let entry = &entries[*next_index];
        *next_index += 1;

        let destination = resolve_destination(root, entry)?;
        if entry.is_directory {
            tokio::fs::create_dir_all(&destination).await?;
            continue;
        }

        ensure_parent_dir(&destination).await?;
        let file = File::create(&destination).await?;
        debug!(path = %destination.display(), size = entry.size, "Opened destination file");
        if entry.size == 0 {
            continue;
        }
        return Ok(Some(OpenFile {
            file,
            remaining: entry.size,
        }));
    }
    Ok(None)
}
