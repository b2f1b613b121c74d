//! Worker configuration.

use crate::error::{self, Error};
use std::collections::BTreeMap;

/// Memory-manager implementation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemManKind {
    /// Size-bounded reservations.
    Real,
    /// No gating.
    None,
}

/// The closed set of recognized worker options, parsed from flat
/// key-value pairs. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub memman: MemManKind,
    /// Memory budget in megabytes.
    pub memman_mb: u64,
    /// Directory of memory-mappable chunk files.
    pub memman_location: String,
    /// Worker thread-pool size; defaults to the larger of the configured
    /// value and the hardware concurrency.
    pub pool_size: usize,
    /// Max tasks coalesced per group-scheduler dequeue.
    pub group_size: usize,
    /// Tier priorities, fast/medium/slow. Larger runs earlier within the
    /// scan scheduler's bookkeeping; the tier order itself is fixed.
    pub priority_fast: i32,
    pub priority_medium: i32,
    pub priority_slow: i32,
    /// Minimum reserved threads per tier.
    pub reserve_fast: usize,
    pub reserve_medium: usize,
    pub reserve_slow: usize,
    /// Per-worker temporary database.
    pub scratch_db: String,
    /// Local engine socket path.
    pub mysql_socket: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            memman: MemManKind::Real,
            memman_mb: 1000,
            memman_location: String::new(),
            pool_size: hw,
            group_size: 1,
            priority_fast: 3,
            priority_medium: 2,
            priority_slow: 1,
            reserve_fast: 1,
            reserve_medium: 1,
            reserve_slow: 1,
            scratch_db: "qservScratch".into(),
            mysql_socket: String::new(),
        }
    }
}

impl WorkerConfig {
    /// Parse from flat key-value pairs; unknown keys fail.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, Error> {
        let mut config = Self::default();
        let hw_floor = config.pool_size;
        for (key, value) in map {
            let bad = || Error::BadConfigValue {
                key: key.clone(),
                value: value.clone(),
            };
            match key.as_str() {
                "QSW_MEMMAN" => {
                    config.memman = match value.as_str() {
                        "MemManReal" => MemManKind::Real,
                        "MemManNone" => MemManKind::None,
                        _ => return Err(bad()),
                    };
                }
                "QSW_MEMMAN_MB" => config.memman_mb = value.parse().map_err(|_| bad())?,
                "QSW_MEMMAN_LOCATION" => config.memman_location = value.clone(),
                "QSW_THRDPOOLSZ" => {
                    let configured: usize = value.parse().map_err(|_| bad())?;
                    config.pool_size = configured.max(hw_floor);
                }
                "QSW_GROUPSZ" => config.group_size = value.parse().map_err(|_| bad())?,
                "QSW_PRIORITYFAST" => config.priority_fast = value.parse().map_err(|_| bad())?,
                "QSW_PRIORITYMED" => config.priority_medium = value.parse().map_err(|_| bad())?,
                "QSW_PRIORITYSLOW" => config.priority_slow = value.parse().map_err(|_| bad())?,
                "QSW_RESERVEFAST" => config.reserve_fast = value.parse().map_err(|_| bad())?,
                "QSW_RESERVEMED" => config.reserve_medium = value.parse().map_err(|_| bad())?,
                "QSW_RESERVESLOW" => config.reserve_slow = value.parse().map_err(|_| bad())?,
                "scratchDb" => config.scratch_db = value.clone(),
                "mysqlSocket" => config.mysql_socket = value.clone(),
                _ => {
                    return error::UnknownConfigKeySnafu { key: key.clone() }.fail();
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_known_keys_and_floors_pool_size() {
        let mut map = BTreeMap::new();
        map.insert("QSW_MEMMAN".into(), "MemManNone".into());
        map.insert("QSW_MEMMAN_MB".into(), "2048".into());
        map.insert("QSW_THRDPOOLSZ".into(), "1".into());
        map.insert("QSW_GROUPSZ".into(), "4".into());
        map.insert("scratchDb".into(), "scratch".into());
        let config = WorkerConfig::from_map(&map).unwrap();
        assert_eq!(config.memman, MemManKind::None);
        assert_eq!(config.memman_mb, 2048);
        assert_eq!(config.group_size, 4);
        assert_eq!(config.scratch_db, "scratch");
        // Pool size never drops below the hardware concurrency.
        assert!(config.pool_size >= 1);
        assert_eq!(config.pool_size, WorkerConfig::default().pool_size.max(1));
    }

    #[test]
    fn unknown_key_rejected() {
        let mut map = BTreeMap::new();
        map.insert("QSW_TYPO".into(), "1".into());
        assert_matches!(
            WorkerConfig::from_map(&map),
            Err(Error::UnknownConfigKey { .. })
        );
    }

    #[test]
    fn bad_value_rejected() {
        let mut map = BTreeMap::new();
        map.insert("QSW_MEMMAN_MB".into(), "lots".into());
        assert_matches!(
            WorkerConfig::from_map(&map),
            Err(Error::BadConfigValue { .. })
        );
    }
}
