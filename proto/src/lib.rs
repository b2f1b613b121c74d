//! Wire messages for the per-chunk request/response protocol.
//!
//! The message structs are hand-written `prost` derives so the wire shape is
//! visible in one place; there is no schema compilation step.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use prost::Message;

/// Protocol revision carried in every [`TaskMsg`]. Revision 1 (the dump-file
/// protocol) is decoded but no longer emitted.
pub const PROTOCOL_VERSION: i32 = 2;

/// Decode failures surfaced to the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed task message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unsupported protocol revision {0}")]
    UnsupportedProtocol(i32),
}

/// A table participating in a shared scan.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ScanTableMsg {
    /// Database name.
    #[prost(string, tag = "1")]
    pub db: String,
    /// Table name.
    #[prost(string, tag = "2")]
    pub table: String,
}

/// Shared-scan classification of a task.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ScanInfoMsg {
    /// Scan cost rating; larger is slower.
    #[prost(int32, tag = "1")]
    pub scan_rating: i32,
    /// Tables being scanned.
    #[prost(message, repeated, tag = "2")]
    pub tables: Vec<ScanTableMsg>,
}

/// One executable unit within a task: SQL statements plus the sub-chunk ids
/// they are instantiated against.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct FragmentMsg {
    /// SQL statements, in execution order.
    #[prost(string, repeated, tag = "1")]
    pub queries: Vec<String>,
    /// Sub-chunk ids this fragment needs materialized.
    #[prost(int32, repeated, tag = "2")]
    pub subchunks: Vec<i32>,
    /// Result table the worker stages rows into before streaming.
    #[prost(string, tag = "3")]
    pub result_table: String,
}

/// Per-chunk request payload.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct TaskMsg {
    /// Owning database.
    #[prost(string, tag = "1")]
    pub db: String,
    /// Chunk to query.
    #[prost(int32, tag = "2")]
    pub chunk_id: i32,
    /// Protocol revision; see [`PROTOCOL_VERSION`].
    #[prost(int32, tag = "3")]
    pub protocol: i32,
    /// Shared-scan classification, when the query is a scan.
    #[prost(message, optional, tag = "4")]
    pub scan_info: Option<ScanInfoMsg>,
    /// Fragments, in execution order.
    #[prost(message, repeated, tag = "5")]
    pub fragments: Vec<FragmentMsg>,
    /// Requesting user.
    #[prost(string, tag = "6")]
    pub user: String,
    /// Capability token for the session.
    #[prost(string, tag = "7")]
    pub session: String,
    /// Column to order streamed batches by, when set.
    #[prost(string, optional, tag = "8")]
    pub secondary_sort: Option<String>,
    /// Tables whose sub-chunks the fragments reference; the worker stages
    /// these before running.
    #[prost(string, repeated, tag = "9")]
    pub subchunk_tables: Vec<String>,
}

impl TaskMsg {
    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decode and validate the protocol revision.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        let msg = Self::decode(buf)?;
        match msg.protocol {
            1 | 2 => Ok(msg),
            other => Err(Error::UnsupportedProtocol(other)),
        }
    }
}

/// A batch of result rows. Cells are strings with a parallel null mask; the
/// merger re-types them when loading the result table.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct RowBundleMsg {
    /// Column names, present on the first bundle of a response.
    #[prost(string, repeated, tag = "1")]
    pub columns: Vec<String>,
    /// Row cells, row-major.
    #[prost(string, repeated, tag = "2")]
    pub cells: Vec<String>,
    /// Null mask, row-major, same length as `cells`.
    #[prost(bool, repeated, tag = "3")]
    pub nulls: Vec<bool>,
    /// Cells per row.
    #[prost(uint32, tag = "4")]
    pub row_width: u32,
}

impl RowBundleMsg {
    /// Number of rows in the bundle.
    pub fn row_count(&self) -> usize {
        if self.row_width == 0 {
            0
        } else {
            self.cells.len() / self.row_width as usize
        }
    }
}

/// Final envelope closing a response stream.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ResponseSummaryMsg {
    /// Zero on success, otherwise the engine or worker error code.
    #[prost(int32, tag = "1")]
    pub error_code: i32,
    /// Error description; empty on success.
    #[prost(string, tag = "2")]
    pub error_msg: String,
    /// Total rows streamed.
    #[prost(uint64, tag = "3")]
    pub row_count: u64,
}

impl ResponseSummaryMsg {
    /// True when the worker completed the task.
    pub fn success(&self) -> bool {
        self.error_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_msg_round_trip() {
        let msg = TaskMsg {
            db: "LSST".into(),
            chunk_id: 1234,
            protocol: PROTOCOL_VERSION,
            scan_info: Some(ScanInfoMsg {
                scan_rating: 10,
                tables: vec![ScanTableMsg {
                    db: "LSST".into(),
                    table: "Object".into(),
                }],
            }),
            fragments: vec![FragmentMsg {
                queries: vec!["SELECT * FROM LSST.Object_1234".into()],
                subchunks: vec![],
                result_table: "r_1234".into(),
            }],
            user: "qsmaster".into(),
            session: "abc".into(),
            secondary_sort: None,
            subchunk_tables: vec!["Object".into()],
        };
        let decoded = TaskMsg::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_protocol_rejected() {
        let msg = TaskMsg {
            protocol: 9,
            ..Default::default()
        };
        let err = TaskMsg::from_bytes(&msg.to_bytes()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(9)));
    }

    #[test]
    fn row_bundle_geometry() {
        let bundle = RowBundleMsg {
            columns: vec!["a".into(), "b".into()],
            cells: vec!["1".into(), "x".into(), "2".into(), String::new()],
            nulls: vec![false, false, false, true],
            row_width: 2,
        };
        assert_eq!(bundle.row_count(), 2);
    }
}
