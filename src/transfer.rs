use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};

use crate::events::{Event, EventBus};

const DEFAULT_MAX_TRANSFER_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferDirection {
    /// OSC 1337 `File=` with `inline=0`: host is sending a file to us.
    Download,
    /// OSC 1337 `RequestUpload=`: host is asking us to send a file to it.
    Upload,
}

#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub id: String,
    pub name: String,
    pub direction: TransferDirection,
    pub size: Option<u64>,
    pub bytes_received: u64,
    pub data: Vec<u8>,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub id: String,
    pub name: String,
    pub status: String,
    pub data: Vec<u8>,
}

/// Tracks in-flight and completed OSC 1337 file transfers, and frames the
/// upload-response return-channel bytes.
pub struct TransferManager {
    max_size: u64,
    active: Vec<FileTransfer>,
    completed: Vec<CompletedTransfer>,
    next_id: u64,
    pending_upload: Option<String>,
    return_bytes: Vec<u8>,
}

impl Default for TransferManager {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_TRANSFER_SIZE,
            active: Vec::new(),
            completed: Vec::new(),
            next_id: 0,
            pending_upload: None,
            return_bytes: Vec::new(),
        }
    }
}

impl TransferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_transfer_size(&self) -> u64 {
        self.max_size
    }

    pub fn set_max_transfer_size(&mut self, bytes: u64) {
        self.max_size = bytes;
    }

    fn alloc_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        format!("xfer-{id}")
    }

    /// OSC 1337 `File=name=<b64name>;size=<n>:<base64-data>` with `inline=0`.
    pub fn start_download(&mut self, name: String, size: Option<u64>, bus: &mut EventBus) -> String {
        let id = self.alloc_id();
        if let Some(sz) = size {
            if sz > self.max_size {
                bus.emit(Event::FileTransferCompleted {
                    id: id.clone(),
                    status: "error".to_string(),
                    bytes_received: 0,
                });
                return id;
            }
        }
        self.active.push(FileTransfer {
            id: id.clone(),
            name: name.clone(),
            direction: TransferDirection::Download,
            size,
            bytes_received: 0,
            data: Vec::new(),
            cancelled: false,
        });
        bus.emit(Event::FileTransferStarted {
            id: id.clone(),
            name,
            size,
        });
        id
    }

    pub fn append_data(&mut self, id: &str, chunk: &[u8], bus: &mut EventBus) {
        if let Some(t) = self.active.iter_mut().find(|t| t.id == id) {
            if t.bytes_received as usize + chunk.len() > self.max_size as usize {
                t.cancelled = true;
                return;
            }
            t.data.extend_from_slice(chunk);
            t.bytes_received += chunk.len() as u64;
            bus.emit(Event::FileTransferProgress {
                id: id.to_string(),
                bytes_received: t.bytes_received,
            });
        }
    }

    pub fn finish(&mut self, id: &str, bus: &mut EventBus) {
        if let Some(pos) = self.active.iter().position(|t| t.id == id) {
            let t = self.active.remove(pos);
            let status = if t.cancelled { "cancelled" } else { "ok" };
            bus.emit(Event::FileTransferCompleted {
                id: t.id.clone(),
                status: status.to_string(),
                bytes_received: t.bytes_received,
            });
            self.completed.push(CompletedTransfer {
                id: t.id,
                name: t.name,
                status: status.to_string(),
                data: t.data,
            });
        }
    }

    /// OSC 1337 `RequestUpload=name=<b64name>`.
    pub fn request_upload(&mut self, name: String, bus: &mut EventBus) {
        self.pending_upload = Some(name.clone());
        bus.emit(Event::UploadRequested { name });
    }

    /// Host calls this with the bytes to upload; frames the `ok\n` +
    /// base64(data) + `\n\n` response onto the return channel.
    pub fn send_upload_data(&mut self, data: &[u8]) {
        if self.pending_upload.take().is_some() {
            self.return_bytes.extend_from_slice(b"ok\n");
            self.return_bytes
                .extend_from_slice(BASE64_STANDARD.encode(data).as_bytes());
            self.return_bytes.extend_from_slice(b"\n\n");
        }
    }

    /// Cancel a pending upload request: a single 0x03 byte on the return channel.
    pub fn cancel_upload(&mut self) {
        if self.pending_upload.take().is_some() {
            self.return_bytes.push(0x03);
        }
    }

    pub fn cancel_file_transfer(&mut self, id: &str, bus: &mut EventBus) -> bool {
        if let Some(t) = self.active.iter_mut().find(|t| t.id == id) {
            t.cancelled = true;
            let id = id.to_string();
            self.finish(&id, bus);
            true
        } else {
            false
        }
    }

    pub fn active_transfers(&self) -> &[FileTransfer] {
        &self.active
    }

    pub fn completed_transfers(&self) -> &[CompletedTransfer] {
        &self.completed
    }

    pub fn take_completed_transfer(&mut self, id: &str) -> Option<CompletedTransfer> {
        let pos = self.completed.iter().position(|t| t.id == id)?;
        Some(self.completed.remove(pos))
    }

    pub fn drain_return_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.return_bytes)
    }
}
