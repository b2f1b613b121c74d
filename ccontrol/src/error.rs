//! Control-layer errors.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("{source}"))]
    Session { source: qproc::Error },

    #[snafu(display("merge failed: {source}"))]
    Merge { source: rproc::Error },

    #[snafu(display("database {db} is not in the allowed-db list"))]
    DbNotAllowed { db: String },

    #[snafu(display("unrecognized configuration key {key:?}"))]
    UnknownConfigKey { key: String },

    #[snafu(display("bad value {value:?} for configuration key {key:?}"))]
    BadConfigValue { key: String, value: String },
}
