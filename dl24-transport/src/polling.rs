//! Polling transport
//!
//! The USB front end never volunteers data: every tick the poll loop asks
//! for the counters report, then the live-data report, and merges the pair
//! into one status snapshot. Command writes share the link mutex with the
//! poll loop so a settings write can never interleave a query/response
//! exchange mid-frame.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, trace, warn};

use dl24_core::{hid, Command, DeviceStatus};

use crate::{
    error::{Error, Result},
    BoxedLink, ErrorCallback, StatusCallback, Transport,
};

/// Default time between poll ticks
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bounded wait for one response report
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Transport for the query/response report protocol
pub struct PollingTransport {
    shared: Arc<Shared>,
    io: Arc<tokio::sync::Mutex<Option<BoxedLink>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
    response_timeout: Duration,
}

struct Shared {
    connected: AtomicBool,
    last_status: RwLock<Option<Arc<DeviceStatus>>>,
    status_cb: RwLock<Option<StatusCallback>>,
    error_cb: RwLock<Option<ErrorCallback>>,
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

        warn!(message, "Polling link failed");

        let callback = self.error_cb.read().clone();
        if let Some(callback) = callback {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!("Error callback panicked");
            }
        }
    }
}

impl PollingTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                last_status: RwLock::new(None),
                status_cb: RwLock::new(None),
                error_cb: RwLock::new(None),
            }),
            io: Arc::new(tokio::sync::Mutex::new(None)),
            poll_task: Mutex::new(None),
            poll_interval: POLL_INTERVAL,
            response_timeout: RESPONSE_TIMEOUT,
        }
    }

    /// Set the poll tick interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the bounded wait for one response report
    pub fn with_response_timeout(mut self, wait: Duration) -> Self {
        self.response_timeout = wait;
        self
    }
}

impl Default for PollingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for PollingTransport {
    async fn connect(&self, link: BoxedLink) -> Result<()> {
        if self.shared.connected.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyConnected);
        }

        *self.shared.last_status.write() = None;
        *self.io.lock().await = Some(link);

        let shared = Arc::clone(&self.shared);
        let io = Arc::clone(&self.io);
        let interval = self.poll_interval;
        let wait = self.response_timeout;
        *self.poll_task.lock() = Some(tokio::spawn(poll_loop(io, shared, interval, wait)));

        debug!("Polling transport connected, poll loop started");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::Release);

        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }

        if let Some(mut link) = self.io.lock().await.take() {
            let _ = link.shutdown().await;
        }

        *self.shared.last_status.write() = None;

        debug!("Polling transport disconnected");
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn send(&self, command: &Command) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let reports = hid::encode_command(command).map_err(Error::from_encode)?;

        // Same mutex as the poll loop: a write never splits an exchange
        let mut guard = self.io.lock().await;
        let link = guard.as_mut().ok_or(Error::NotConnected)?;

        for report in &reports {
            trace!(command = %command, "Sending report: {:02X?}", &report[..8]);
            link.write_all(report).await?;
        }
        link.flush().await?;

        Ok(())
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

impl Drop for PollingTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("Polling transport dropped while still connected");
        }
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
    }
}

/// One query/response exchange on the locked link
async fn exchange(
    link: &mut BoxedLink,
    query: hid::Query,
    wait: Duration,
) -> Result<hid::Response> {
    let report = hid::encode_query(query);
    link.write_all(&report).await?;
    link.flush().await?;

    let mut response = [0u8; hid::REPORT_SIZE];
    timeout(wait, link.read_exact(&mut response))
        .await
        .map_err(|_| Error::ReadTimeout)??;

    Ok(hid::decode_response(&response)?)
}

async fn poll_loop(
    io: Arc<tokio::sync::Mutex<Option<BoxedLink>>>,
    shared: Arc<Shared>,
    interval: Duration,
    wait: Duration,
) {
    debug!("Poll loop started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'poll: loop {
        ticker.tick().await;

        if !shared.connected.load(Ordering::Acquire) {
            break;
        }

        let mut counters = None;
        let mut live = None;

        {
            let mut guard = io.lock().await;
            let Some(link) = guard.as_mut() else {
                break;
            };

            for query in [hid::Query::Counters, hid::Query::LiveData] {
                match exchange(link, query, wait).await {
                    Ok(hid::Response::Counters(c)) => counters = Some(c),
                    Ok(hid::Response::LiveData(l)) => live = Some(l),
                    // Local decode faults and missed replies: skip, next
                    // tick resynchronizes
                    Err(Error::Codec(e)) => debug!(error = %e, "Discarding bad report"),
                    Err(Error::ReadTimeout) => {
                        debug!(?query, "Query timed out");
                    }
                    Err(e) => {
                        drop(guard);
                        shared.report_error(&format!("poll error: {e}"));
                        break 'poll;
                    }
                }
            }
        }

        if let Some(status) = hid::merge_status(live.as_ref(), counters.as_ref()) {
            trace!(%status, "Merged poll status");
            shared.publish_status(status);
        }
    }

    debug!("Poll loop ended");
}
