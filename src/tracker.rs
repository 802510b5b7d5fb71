use crate::protocol::ResultCode;
use crate::state::CommandName;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Retained history per device. Oldest finished records are evicted first.
pub const MAX_TRACKED_COMMANDS: usize = 64;

// Room for the in-flight command plus a preempting Abort or EndScan
const_assert!(MAX_TRACKED_COMMANDS >= 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("unknown command id {0}")]
    UnknownCommand(String),
    #[error("command {id} already finished with status {status:?}")]
    AlreadyFinished { id: String, status: TaskStatus },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: String,
    pub name: CommandName,
    pub sequence: u32,
    pub status: TaskStatus,
    pub result: Option<ResultCode>,
    /// Last reported completion percentage while executing.
    pub progress: Option<u8>,
    pub submitted_at_ms: u64,
    pub finished_at_ms: Option<u64>,
}

/// Per-device record of long-running commands.
#[derive(Debug, Default)]
pub struct CommandTracker {
    records: Deque<CommandRecord, MAX_TRACKED_COMMANDS>,
    next_sequence: u32,
    latest_result: Option<(String, ResultCode)>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new command as QUEUED and return its id.
    pub fn submit(&mut self, name: CommandName) -> String {
        let mut id = generate_command_id(name);
        while self.find(&id).is_some() {
            id = generate_command_id(name);
        }

        if self.records.is_full() {
            self.evict_one();
        }

        self.next_sequence = self.next_sequence.wrapping_add(1);
        let record = CommandRecord {
            id: id.clone(),
            name,
            sequence: self.next_sequence,
            status: TaskStatus::Queued,
            result: None,
            progress: None,
            submitted_at_ms: unix_millis(),
            finished_at_ms: None,
        };
        if self.records.push_back(record).is_err() {
            warn!(%id, "tracker history full, record not retained");
        }
        id
    }

    fn evict_one(&mut self) {
        let finished = self.records.iter().position(|r| r.status.is_terminal());
        match finished {
            Some(index) => {
                // Deque has no remove(index); rotate the survivors back in order
                let len = self.records.len();
                for i in 0..len {
                    if let Some(record) = self.records.pop_front() {
                        if i != index {
                            let _ = self.records.push_back(record);
                        }
                    }
                }
            }
            None => {
                if let Some(dropped) = self.records.pop_front() {
                    warn!(id = %dropped.id, "evicting unfinished command record");
                }
            }
        }
    }

    pub fn mark_in_progress(&mut self, id: &str) -> Result<(), TrackerError> {
        let record = self.open_record(id)?;
        record.status = TaskStatus::InProgress;
        Ok(())
    }

    pub fn set_progress(&mut self, id: &str, percent: u8) -> Result<(), TrackerError> {
        let record = self.open_record(id)?;
        record.progress = Some(percent.min(100));
        Ok(())
    }

    pub fn complete(&mut self, id: &str, code: ResultCode) -> Result<(), TrackerError> {
        self.finish(id, TaskStatus::Completed, code)
    }

    pub fn fail(&mut self, id: &str, code: ResultCode) -> Result<(), TrackerError> {
        self.finish(id, TaskStatus::Failed, code)
    }

    pub fn abort(&mut self, id: &str) -> Result<(), TrackerError> {
        self.finish(id, TaskStatus::Aborted, ResultCode::Aborted)
    }

    fn finish(&mut self, id: &str, status: TaskStatus, code: ResultCode) -> Result<(), TrackerError> {
        let record = self.open_record(id)?;
        record.status = status;
        record.result = Some(code);
        record.finished_at_ms = Some(unix_millis());
        self.latest_result = Some((id.to_string(), code));
        Ok(())
    }

    fn open_record(&mut self, id: &str) -> Result<&mut CommandRecord, TrackerError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| TrackerError::UnknownCommand(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(TrackerError::AlreadyFinished {
                id: id.to_string(),
                status: record.status,
            });
        }
        Ok(record)
    }

    fn find(&self, id: &str) -> Option<&CommandRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.find(id).map(|r| r.status)
    }

    pub fn get_record(&self, id: &str) -> Option<&CommandRecord> {
        self.find(id)
    }

    /// Most recently submitted command.
    pub fn latest(&self) -> Option<(String, TaskStatus)> {
        self.records.back().map(|r| (r.id.clone(), r.status))
    }

    /// Most recently reported result, whichever command it belongs to.
    pub fn latest_result(&self) -> Option<(String, ResultCode)> {
        self.latest_result.clone()
    }

    pub fn statuses(&self) -> Vec<(String, TaskStatus)> {
        self.records.iter().map(|r| (r.id.clone(), r.status)).collect()
    }

    /// Progress of the executing command, if it has reported any.
    pub fn current_progress(&self) -> Option<(String, u8)> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.status == TaskStatus::InProgress)
            .find_map(|r| r.progress.map(|p| (r.id.clone(), p)))
    }

    fn unfinished(&self) -> impl Iterator<Item = &CommandRecord> {
        self.records.iter().filter(|r| !r.status.is_terminal())
    }

    /// Ids of QUEUED and IN_PROGRESS records, oldest first.
    pub fn ids_in_queue(&self) -> Vec<String> {
        self.unfinished().map(|r| r.id.clone()).collect()
    }

    /// Command names of QUEUED and IN_PROGRESS records, oldest first.
    pub fn names_in_queue(&self) -> Vec<String> {
        self.unfinished().map(|r| r.name.to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// `<unix-seconds>.<micros>_<random suffix>_<command name>`
fn generate_command_id(name: CommandName) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    // Low 48 bits of a v4 uuid, the same width as its node field
    let suffix = Uuid::new_v4().as_u128() & 0xFFFF_FFFF_FFFF;
    format!(
        "{}.{:06}_{}_{}",
        now.as_secs(),
        now.subsec_micros(),
        suffix,
        name.as_str()
    )
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
