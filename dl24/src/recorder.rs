//! Injected persistence interface
//!
//! The core performs no file or database I/O of its own: the host hands the
//! runner a [`Recorder`] and every sample and session stamp goes through
//! it. A database module, a CSV writer, and the in-memory recorder below
//! are all valid implementations.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use dl24_types::{Reading, SessionMeta};

/// Identifier of one recorded session
pub type SessionId = i64;

/// Error raised by a recorder implementation
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RecorderError(pub String);

impl RecorderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Session persistence, implemented by the host
pub trait Recorder: Send + Sync {
    /// Open a session; returns its identifier
    fn create_session(&self, meta: &SessionMeta) -> Result<SessionId, RecorderError>;

    /// Append one sample to an open session
    fn append_reading(&self, session: SessionId, reading: &Reading) -> Result<(), RecorderError>;

    /// Stamp the end time and close the session
    fn finalize_session(
        &self,
        session: SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<(), RecorderError>;
}

/// One session held by [`MemoryRecorder`]
#[derive(Debug, Clone)]
pub struct RecordedSession {
    pub id: SessionId,
    pub meta: SessionMeta,
    pub readings: Vec<Reading>,
    pub end_time: Option<DateTime<Utc>>,
    /// How many times the session was finalized; anything but 1 is a bug
    /// in the caller
    pub finalize_calls: u32,
}

/// In-memory recorder for tests, examples and dry runs
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    sessions: Mutex<Vec<RecordedSession>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.sessions.lock().clone()
    }
}

impl Recorder for MemoryRecorder {
    fn create_session(&self, meta: &SessionMeta) -> Result<SessionId, RecorderError> {
        let mut sessions = self.sessions.lock();
        let id = sessions.len() as SessionId + 1;
        sessions.push(RecordedSession {
            id,
            meta: meta.clone(),
            readings: Vec::new(),
            end_time: None,
            finalize_calls: 0,
        });
        Ok(id)
    }

    fn append_reading(&self, session: SessionId, reading: &Reading) -> Result<(), RecorderError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session)
            .ok_or_else(|| RecorderError::new(format!("unknown session {session}")))?;
        session.readings.push(reading.clone());
        Ok(())
    }

    fn finalize_session(
        &self,
        session: SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<(), RecorderError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session)
            .ok_or_else(|| RecorderError::new(format!("unknown session {session}")))?;
        session.end_time = Some(end_time);
        session.finalize_calls += 1;
        Ok(())
    }
}
