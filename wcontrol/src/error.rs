//! Worker-control errors.

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("unrecognized configuration key {key:?}"))]
    UnknownConfigKey { key: String },

    #[snafu(display("bad value {value:?} for configuration key {key:?}"))]
    BadConfigValue { key: String, value: String },

    #[snafu(display("malformed task message: {source}"))]
    BadTaskMsg { source: proto::Error },

    #[snafu(display("foreman is shut down"))]
    ShutDown,
}
