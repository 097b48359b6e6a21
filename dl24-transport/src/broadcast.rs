//! Broadcast transport
//!
//! The serial/Bluetooth front end of the DL24P pushes one status frame per
//! second without being asked. A dedicated read loop accumulates bytes,
//! peels frames, and publishes each valid status snapshot; commands are
//! written on demand and never acknowledged in-band beyond a reply frame.
//!
//! On links whose broadcast stream is incomplete the PX100 micro-protocol
//! serves as a fallback query path; responses to it are routed out of the
//! same byte stream.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use dl24_core::{frame, px100, Command, DeviceStatus};

use crate::{
    error::{Error, Result},
    BoxedLink, ErrorCallback, StatusCallback, Transport,
};

/// Transport for the unsolicited status stream
pub struct BroadcastTransport {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedLink>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    connected: AtomicBool,
    last_status: RwLock<Option<Arc<DeviceStatus>>>,
    status_cb: RwLock<Option<StatusCallback>>,
    error_cb: RwLock<Option<ErrorCallback>>,
    px100_pending: Mutex<Option<oneshot::Sender<Bytes>>>,
}

impl Shared {
    fn publish_status(&self, status: DeviceStatus) {
        let status = Arc::new(status);
        *self.last_status.write() = Some(Arc::clone(&status));

        let callback = self.status_cb.read().clone();
        if let Some(callback) = callback {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&status))).is_err() {
                warn!("Status callback panicked");
            }
        }
    }

    /// Report a terminal link failure at most once per connection
    fn report_error(&self, message: &str) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        warn!(message, "Broadcast link failed");

        let callback = self.error_cb.read().clone();
        if let Some(callback) = callback {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!("Error callback panicked");
            }
        }
    }
}

impl BroadcastTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                last_status: RwLock::new(None),
                status_cb: RwLock::new(None),
                error_cb: RwLock::new(None),
                px100_pending: Mutex::new(None),
            }),
            writer: tokio::sync::Mutex::new(None),
            read_task: Mutex::new(None),
        }
    }

    /// Issue a PX100 fallback query and wait (bounded) for its value
    ///
    /// # Errors
    ///
    /// `QueryInFlight` if another query is outstanding, `ReadTimeout` when
    /// no response arrives within `wait`, plus the usual link errors.
    pub async fn query_px100(&self, query: px100::Query, wait: Duration) -> Result<u32> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.px100_pending.lock();
            if pending.is_some() {
                return Err(Error::QueryInFlight);
            }
            *pending = Some(tx);
        }

        let command = px100::encode_query(query);
        if let Err(e) = self.write_bytes(&command).await {
            self.shared.px100_pending.lock().take();
            return Err(e);
        }

        let packet = match timeout(wait, rx).await {
            Ok(Ok(packet)) => packet,
            Ok(Err(_)) => {
                self.shared.px100_pending.lock().take();
                return Err(Error::ConnectionClosed);
            }
            Err(_) => {
                self.shared.px100_pending.lock().take();
                return Err(Error::ReadTimeout);
            }
        };

        let response = px100::decode_response(&packet)?;
        Ok(response.value)
    }

    async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for BroadcastTransport {
    async fn connect(&self, link: BoxedLink) -> Result<()> {
        if self.shared.connected.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyConnected);
        }

        *self.shared.last_status.write() = None;

        let (read_half, write_half) = tokio::io::split(link);
        *self.writer.lock().await = Some(write_half);

        let shared = Arc::clone(&self.shared);
        *self.read_task.lock() = Some(tokio::spawn(read_loop(read_half, shared)));

        debug!("Broadcast transport connected, read loop started");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::Release);

        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        *self.shared.last_status.write() = None;
        self.shared.px100_pending.lock().take();

        debug!("Broadcast transport disconnected");
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn send(&self, command: &Command) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let frame = frame::encode_command(command).map_err(Error::from_encode)?;
        self.write_bytes(&frame).await
    }

    fn last_status(&self) -> Option<Arc<DeviceStatus>> {
        self.shared.last_status.read().clone()
    }

    fn set_status_callback(&self, callback: StatusCallback) {
        *self.shared.status_cb.write() = Some(callback);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        *self.shared.error_cb.write() = Some(callback);
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("Broadcast transport dropped while still connected");
        }
        if let Some(task) = self.read_task.lock().take() {
            task.abort();
        }
    }
}

async fn read_loop(mut reader: ReadHalf<BoxedLink>, shared: Arc<Shared>) {
    debug!("Read loop started");

    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if !shared.connected.load(Ordering::Acquire) {
            break;
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                shared.report_error("connection closed by link");
                break;
            }
            Ok(n) => {
                trace!("Received {} bytes: {:02X?}", n, &buf[buf.len() - n..]);
                process_buffer(&mut buf, &shared);
            }
            Err(e) => {
                shared.report_error(&format!("read error: {e}"));
                break;
            }
        }
    }

    debug!("Read loop ended");
}

fn process_buffer(buf: &mut BytesMut, shared: &Shared) {
    loop {
        // Route a pending PX100 reply before frame scanning so the scanner
        // does not discard it as inter-frame garbage
        if shared.px100_pending.lock().is_some() {
            let px_at = buf.windows(2).position(|w| w == px100::RSP_HEADER);
            let bc_at = buf.windows(2).position(|w| w == frame::HEADER);

            if let Some(idx) = px_at {
                if bc_at.map_or(true, |b| idx < b) {
                    if buf.len() - idx < px100::RESPONSE_LEN {
                        return;
                    }
                    buf.advance(idx);
                    let packet = buf.split_to(px100::RESPONSE_LEN).freeze();
                    if let Some(tx) = shared.px100_pending.lock().take() {
                        let _ = tx.send(packet);
                    }
                    continue;
                }
            } else if bc_at.is_none() {
                if buf.len() > 1 {
                    buf.advance(buf.len() - 1);
                }
                return;
            }
        }

        let Some(raw) = frame::find_frame(buf) else {
            return;
        };

        match raw[2] {
            frame::MSG_STATUS => match frame::decode_status(&raw) {
                Ok(status) => {
                    trace!(%status, "Status frame");
                    shared.publish_status(status);
                }
                Err(e) => debug!(error = %e, "Discarding invalid status frame"),
            },
            frame::MSG_REPLY => match frame::decode_reply(&raw) {
                Ok(reply) => trace!(?reply, "Device reply"),
                Err(e) => debug!(error = %e, "Discarding invalid reply frame"),
            },
            other => trace!(msg_type = other, "Ignoring frame"),
        }
    }
}
