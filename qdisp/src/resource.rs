//! Worker resource paths.

use data_types::ChunkId;
use std::fmt;

/// The dispatch path of one chunk on the transport. The current protocol
/// uses `/query2/<chunk>`; the legacy `/query/<chunk>` form is still parsed
/// but no longer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUnit {
    chunk: ChunkId,
    legacy: bool,
}

impl ResourceUnit {
    /// Current-protocol path for `chunk`.
    pub fn query2(chunk: ChunkId) -> Self {
        Self {
            chunk,
            legacy: false,
        }
    }

    /// The chunk this resource addresses.
    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// Full path string.
    pub fn path(&self) -> String {
        self.to_string()
    }

    /// Parse either path form.
    pub fn parse(path: &str) -> Option<Self> {
        if let Some(rest) = path.strip_prefix("/query2/") {
            return rest.parse().ok().map(Self::query2);
        }
        if let Some(rest) = path.strip_prefix("/query/") {
            return rest.parse().ok().map(|chunk| Self {
                chunk,
                legacy: true,
            });
        }
        None
    }

    /// Was this parsed from the deprecated form?
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }
}

impl fmt::Display for ResourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.legacy {
            write!(f, "/query/{}", self.chunk)
        } else {
            write!(f, "/query2/{}", self.chunk)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_accepts_legacy() {
        let r = ResourceUnit::query2(1234);
        assert_eq!(r.path(), "/query2/1234");
        assert_eq!(ResourceUnit::parse("/query2/1234"), Some(r));

        let legacy = ResourceUnit::parse("/query/77").unwrap();
        assert!(legacy.is_legacy());
        assert_eq!(legacy.chunk(), 77);
        assert_eq!(legacy.path(), "/query/77");

        assert!(ResourceUnit::parse("/frob/77").is_none());
    }
}
