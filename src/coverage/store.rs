//! In-memory union of execution data.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::debug;

use super::exec::{ExecDataWriter, ExecFormatError, ExecutionData, SessionInfo};

/// What happened to a record put into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// First record for this class.
    Inserted,
    /// Same class checksum: probes were ORed into the existing record.
    Merged,
    /// Different checksum or probe count: the new record replaced the old one.
    Replaced,
}

/// Execution data of many dumps, merged per class.
///
/// Records are keyed by class name. Records of the same class and checksum
/// are merged by OR-ing their probes; a record whose checksum differs from
/// the stored one (a different build of the class) replaces it, so the last
/// loaded record wins.
#[derive(Debug, Clone, Default)]
pub struct ExecutionDataStore {
    entries: BTreeMap<String, ExecutionData>,
    sessions: Vec<SessionInfo>,
}

impl ExecutionDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class record, merging it with a stored record of the same class.
    pub fn put(&mut self, data: ExecutionData) -> PutOutcome {
        match self.entries.get_mut(data.name()) {
            Some(existing) if existing.is_compatible(&data) => {
                existing.merge(&data);
                PutOutcome::Merged
            }
            Some(existing) => {
                debug!(
                    "Replacing execution data of {} (id {:016x}, {} probes) with id {:016x}, {} probes",
                    data.name(),
                    existing.id(),
                    existing.probes().len(),
                    data.id(),
                    data.probes().len()
                );
                *existing = data;
                PutOutcome::Replaced
            }
            None => {
                self.entries.insert(data.name().to_string(), data);
                PutOutcome::Inserted
            }
        }
    }

    /// Records a session. Sessions are kept even when identical.
    pub fn add_session(&mut self, info: SessionInfo) {
        self.sessions.push(info);
    }

    /// Looks up the merged record of a class.
    pub fn get(&self, name: &str) -> Option<&ExecutionData> {
        self.entries.get(name)
    }

    /// Merged class records, ordered by class name.
    pub fn contents(&self) -> impl Iterator<Item = &ExecutionData> {
        self.entries.values()
    }

    /// Sessions ordered by start time; ties keep load order.
    pub fn sessions(&self) -> Vec<&SessionInfo> {
        let mut sessions: Vec<&SessionInfo> = self.sessions.iter().collect();
        sessions.sort_by_key(|info| info.start);
        sessions
    }

    /// Number of distinct classes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no class was recorded. Sessions are not counted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes all sessions followed by all class records.
    pub fn write_to<W: Write>(&self, writer: &mut ExecDataWriter<W>) -> Result<(), ExecFormatError> {
        for session in self.sessions() {
            writer.write_session_info(session)?;
        }
        for data in self.contents() {
            writer.write_execution_data(data)?;
        }
        Ok(())
    }
}
