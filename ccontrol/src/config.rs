//! Client-side configuration.

use crate::error::{self, Error};
use std::collections::BTreeMap;

/// The recognized client option set, parsed from flat key-value pairs.
/// Unrecognized keys are rejected so typos fail loudly at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Default dispatch endpoint.
    pub xrootd_endpoint: String,
    /// Merge-target database name.
    pub result_db: String,
    /// Merge-target login user.
    pub result_user: String,
    /// Merge-target engine socket.
    pub result_socket: String,
    /// Catalog backend technology tag.
    pub css_technology: String,
    /// Catalog backend connection string.
    pub css_connection: String,
    /// Database unqualified tables resolve against.
    pub default_db: String,
    /// Databases queries may touch; empty means no restriction.
    pub allowed_dbs: Vec<String>,
    /// Sampling seed.
    pub sample_seed: u64,
    /// Sampling fraction.
    pub sample_fraction: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            xrootd_endpoint: "localhost:1094".into(),
            result_db: "qservResult".into(),
            result_user: "qsmaster".into(),
            result_socket: String::new(),
            css_technology: "mem".into(),
            css_connection: String::new(),
            default_db: String::new(),
            allowed_dbs: vec![],
            sample_seed: 0,
            sample_fraction: 1.0,
        }
    }
}

impl ClientConfig {
    /// Parse from flat key-value pairs.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, Error> {
        let mut config = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "frontend.xrootd" => config.xrootd_endpoint = value.clone(),
                "resultdb.db" => config.result_db = value.clone(),
                "resultdb.user" => config.result_user = value.clone(),
                "resultdb.unix_socket" => config.result_socket = value.clone(),
                "css.technology" => config.css_technology = value.clone(),
                "css.connection" => config.css_connection = value.clone(),
                "table.defaultdb" => config.default_db = value.clone(),
                "table.alloweddbs" => {
                    config.allowed_dbs = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "sample.seed" => {
                    config.sample_seed = value.parse().map_err(|_| Error::BadConfigValue {
                        key: key.clone(),
                        value: value.clone(),
                    })?;
                }
                "sample.fraction" => {
                    config.sample_fraction =
                        value.parse().map_err(|_| Error::BadConfigValue {
                            key: key.clone(),
                            value: value.clone(),
                        })?;
                }
                _ => {
                    return error::UnknownConfigKeySnafu { key: key.clone() }.fail();
                }
            }
        }
        Ok(config)
    }

    /// Is `db` queryable under the allow list?
    pub fn db_allowed(&self, db: &str) -> bool {
        self.allowed_dbs.is_empty() || self.allowed_dbs.iter().any(|d| d == db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_known_keys() {
        let mut map = BTreeMap::new();
        map.insert("table.defaultdb".to_string(), "LSST".to_string());
        map.insert("table.alloweddbs".to_string(), "LSST, Winter2012".to_string());
        map.insert("sample.fraction".to_string(), "0.25".to_string());
        let config = ClientConfig::from_map(&map).unwrap();
        assert_eq!(config.default_db, "LSST");
        assert!(config.db_allowed("Winter2012"));
        assert!(!config.db_allowed("Other"));
        assert_eq!(config.sample_fraction, 0.25);
    }

    #[test]
    fn unknown_key_rejected() {
        let mut map = BTreeMap::new();
        map.insert("frontend.xrotd".to_string(), "oops".to_string());
        assert_matches!(
            ClientConfig::from_map(&map),
            Err(Error::UnknownConfigKey { .. })
        );
    }
}
