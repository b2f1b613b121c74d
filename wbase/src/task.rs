//! The worker's view of one chunk query.

use crate::send_channel::SendChannelRef;
use data_types::{ChunkId, DbTable, ScanInfo, SubChunkId};
use proto::TaskMsg;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One SQL fragment with the sub-chunks it runs against.
#[derive(Debug, Clone, Default)]
pub struct TaskFragment {
    pub queries: Vec<String>,
    pub subchunks: Vec<SubChunkId>,
    pub result_table: String,
}

/// A decoded task plus its reply channel and cancellation flag. Created on
/// request receipt; dropped after the reply channel closes.
#[derive(Debug)]
pub struct Task {
    pub db: String,
    pub chunk_id: ChunkId,
    pub user: String,
    pub session: String,
    pub fragments: Vec<TaskFragment>,
    pub scan_info: ScanInfo,
    pub secondary_sort: Option<String>,
    pub subchunk_tables: Vec<String>,
    /// Stable identity for squash-by-hash lookups.
    pub hash: String,
    send_channel: SendChannelRef,
    poisoned: AtomicBool,
}

impl Task {
    /// Decode a wire message into a task bound to `send_channel`.
    pub fn new(msg: &TaskMsg, send_channel: SendChannelRef) -> Arc<Self> {
        let fragments = msg
            .fragments
            .iter()
            .map(|f| TaskFragment {
                queries: f.queries.clone(),
                subchunks: f.subchunks.clone(),
                result_table: f.result_table.clone(),
            })
            .collect::<Vec<_>>();
        let scan_info = msg
            .scan_info
            .as_ref()
            .map(|s| ScanInfo {
                scan_rating: s.scan_rating,
                tables: s
                    .tables
                    .iter()
                    .map(|t| DbTable::new(t.db.clone(), t.table.clone()))
                    .collect(),
            })
            .unwrap_or_default();

        let mut hasher = DefaultHasher::new();
        msg.db.hash(&mut hasher);
        msg.chunk_id.hash(&mut hasher);
        msg.session.hash(&mut hasher);
        for f in &fragments {
            f.queries.hash(&mut hasher);
        }
        let hash = format!("{:016x}", hasher.finish());

        Arc::new(Self {
            db: msg.db.clone(),
            chunk_id: msg.chunk_id,
            user: msg.user.clone(),
            session: msg.session.clone(),
            fragments,
            scan_info,
            secondary_sort: msg.secondary_sort.clone(),
            subchunk_tables: msg.subchunk_tables.clone(),
            hash,
            send_channel,
            poisoned: AtomicBool::new(false),
        })
    }

    /// The reply channel.
    pub fn send_channel(&self) -> &SendChannelRef {
        &self.send_channel
    }

    /// Is this a shared-scan task?
    pub fn is_scan(&self) -> bool {
        !self.scan_info.is_empty()
    }

    /// Every sub-chunk id referenced by any fragment, deduplicated.
    pub fn all_subchunks(&self) -> Vec<SubChunkId> {
        let mut ids: Vec<SubChunkId> = self
            .fragments
            .iter()
            .flat_map(|f| f.subchunks.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Cooperative cancellation: flag the task; execution checks between
    /// fragment pieces.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    /// Has the task been poisoned?
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::send_channel::MemSendChannel;
    use proto::FragmentMsg;

    #[test]
    fn decodes_and_hashes() {
        let msg = TaskMsg {
            db: "LSST".into(),
            chunk_id: 7,
            protocol: proto::PROTOCOL_VERSION,
            fragments: vec![FragmentMsg {
                queries: vec!["SELECT 1".into()],
                subchunks: vec![2, 1, 2],
                result_table: "r_7".into(),
            }],
            ..Default::default()
        };
        let channel: SendChannelRef = Arc::new(MemSendChannel::new());
        let task = Task::new(&msg, channel);
        assert_eq!(task.chunk_id, 7);
        assert_eq!(task.all_subchunks(), vec![1, 2]);
        assert!(!task.is_scan());
        assert!(!task.is_poisoned());
        task.poison();
        assert!(task.is_poisoned());

        let channel2: SendChannelRef = Arc::new(MemSendChannel::new());
        let same = Task::new(&msg, channel2);
        assert_eq!(task.hash, same.hash);
    }
}
