use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::constants::JOB_HISTORY_CAP;

/// Fresh 12-hex job id
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Tts,
    TtsStream,
    VoiceClone,
    Audiobook,
}

/// One generation job, live or historical
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub engine: String,
    pub mode: String,
    pub status: JobStatus,
    pub title: String,
    pub chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub streamed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub request_id: String,
    pub timestamp: String,
}

impl JobRecord {
    /// Blank record in `started` state; callers fill in what they know
    pub fn new(kind: JobKind, engine: &str, mode: &str, request_id: &str) -> Self {
        Self {
            id: new_job_id(),
            kind,
            engine: engine.to_string(),
            mode: mode.to_string(),
            status: JobStatus::Started,
            title: format!("{} {}", engine, mode),
            chars: 0,
            voice: None,
            speaker: None,
            language: None,
            model: None,
            streamed: false,
            output_path: None,
            audio_url: None,
            error: None,
            request_id: request_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Live generation jobs plus the bounded terminal-history ring
///
/// Live entries sit in a map under a mutex; terminal entries move into a
/// newest-first deque capped at [`JOB_HISTORY_CAP`]. A record that reached a
/// terminal state never changes again.
pub struct JobBoard {
    live: Mutex<HashMap<String, JobRecord>>,
    history: Mutex<VecDeque<JobRecord>>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a new live job
    pub fn insert_live(&self, record: JobRecord) {
        self.live
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    /// Mutate a live, non-terminal job in place
    ///
    /// Returns the updated record, or None when the job is unknown or has
    /// already reached a terminal state.
    pub fn update_live(
        &self,
        id: &str,
        update: impl FnOnce(&mut JobRecord),
    ) -> Option<JobRecord> {
        let mut live = self.live.lock().unwrap();
        let record = live.get_mut(id)?;
        if record.status.is_terminal() {
            return None;
        }
        update(record);
        Some(record.clone())
    }

    /// Move a live job into the history ring with its terminal status
    pub fn finish(
        &self,
        id: &str,
        status: JobStatus,
        update: impl FnOnce(&mut JobRecord),
    ) -> Option<JobRecord> {
        debug_assert!(status.is_terminal());
        let mut record = self.live.lock().unwrap().remove(id)?;
        if record.status.is_terminal() {
            // Should not happen; keep the first terminal transition
            self.push_history(record.clone());
            return Some(record);
        }
        record.status = status;
        update(&mut record);
        self.push_history(record.clone());
        Some(record)
    }

    /// Record an already-terminal job directly (synchronous generations)
    pub fn record_terminal(&self, mut record: JobRecord) {
        if !record.status.is_terminal() {
            record.status = JobStatus::Completed;
        }
        self.push_history(record);
    }

    fn push_history(&self, record: JobRecord) {
        let mut history = self.history.lock().unwrap();
        history.push_front(record);
        while history.len() > JOB_HISTORY_CAP {
            history.pop_back();
        }
    }

    /// Look up a job, checking the live set before history
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        if let Some(record) = self.live.lock().unwrap().get(id) {
            return Some(record.clone());
        }
        self.history
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Live jobs followed by history, newest first, capped at `limit`
    ///
    /// Ties on timestamp break by id so the ordering is stable.
    pub fn snapshot(&self, limit: usize) -> Vec<JobRecord> {
        let mut items: Vec<JobRecord> = self.live.lock().unwrap().values().cloned().collect();
        items.extend(self.history.lock().unwrap().iter().cloned());
        items.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        items.truncate(limit);
        items
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn history_count(&self) -> usize {
        self.history.lock().unwrap().len()
    }
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::new()
    }
}
