//! Spatial and key-membership restrictors recognized by the planner.

use itertools::Itertools;
use snafu::Snafu;
use std::fmt;

/// Restrictor validation failures; these surface as analysis errors.
#[derive(Debug, Snafu, PartialEq)]
pub enum RestrictorError {
    #[snafu(display("{name} expects {expected} parameters, got {got}"))]
    BadArity {
        name: &'static str,
        expected: String,
        got: usize,
    },

    #[snafu(display("{name}: parameter {value:?} is not a number"))]
    BadNumber { name: &'static str, value: String },

    #[snafu(display("right-ascension extent {extent} degrees exceeds 180"))]
    RaExtent { extent: f64 },
}

/// A restrictor extracted from the WHERE clause. Consumed twice: the caller
/// bounds the chunk set with it, and the restrictor plugin turns it into
/// concrete predicates over each chunked table's partitioning columns.
///
/// Parameters are kept as their source text so predicate generation
/// reproduces the user's literals exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QsRestrictor {
    /// `qserv_areaspec_box(ra0, dec0, ra1, dec1)`.
    Box { params: Vec<String> },
    /// `qserv_areaspec_circle(ra, dec, radius)`.
    Circle { params: Vec<String> },
    /// `qserv_areaspec_ellipse(ra, dec, semi_major, semi_minor, angle)`.
    Ellipse { params: Vec<String> },
    /// `qserv_areaspec_poly(ra0, dec0, ra1, dec1, ...)`.
    Poly { params: Vec<String> },
    /// `qserv_objectId(id, ...)`: director-key membership.
    ObjectId { ids: Vec<String> },
}

impl QsRestrictor {
    /// Recognize a function call as a restrictor. Returns `None` for names
    /// without the `qserv_` prefix.
    pub fn from_call(name: &str, params: Vec<String>) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "qserv_areaspec_box" => Some(Self::Box { params }),
            "qserv_areaspec_circle" => Some(Self::Circle { params }),
            "qserv_areaspec_ellipse" => Some(Self::Ellipse { params }),
            "qserv_areaspec_poly" => Some(Self::Poly { params }),
            "qserv_objectid" => Some(Self::ObjectId { ids: params }),
            _ => None,
        }
    }

    /// The surface-syntax name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Box { .. } => "qserv_areaspec_box",
            Self::Circle { .. } => "qserv_areaspec_circle",
            Self::Ellipse { .. } => "qserv_areaspec_ellipse",
            Self::Poly { .. } => "qserv_areaspec_poly",
            Self::ObjectId { .. } => "qserv_objectId",
        }
    }

    /// The point-in-region UDF this area spec maps to, without the
    /// `scisql_` prefix; `None` for the key-membership restrictor.
    pub fn udf_suffix(&self) -> Option<&'static str> {
        match self {
            Self::Box { .. } => Some("s2PtInBox"),
            Self::Circle { .. } => Some("s2PtInCircle"),
            Self::Ellipse { .. } => Some("s2PtInEllipse"),
            Self::Poly { .. } => Some("s2PtInCPoly"),
            Self::ObjectId { .. } => None,
        }
    }

    /// The raw parameter texts.
    pub fn params(&self) -> &[String] {
        match self {
            Self::Box { params }
            | Self::Circle { params }
            | Self::Ellipse { params }
            | Self::Poly { params } => params,
            Self::ObjectId { ids } => ids,
        }
    }

    /// Check arity, numeric parameters, and the right-ascension extent
    /// bound. An extent of exactly 180 degrees is accepted.
    pub fn validate(&self) -> Result<(), RestrictorError> {
        let name = self.name();
        let check_arity = |ok: bool, expected: &str| {
            if ok {
                Ok(())
            } else {
                BadAritySnafu {
                    name,
                    expected,
                    got: self.params().len(),
                }
                .fail()
            }
        };
        match self {
            Self::Box { params } => check_arity(params.len() == 4, "4")?,
            Self::Circle { params } => check_arity(params.len() == 3, "3")?,
            Self::Ellipse { params } => check_arity(params.len() == 5, "5")?,
            Self::Poly { params } => {
                check_arity(params.len() >= 6 && params.len() % 2 == 0, "an even count >= 6")?
            }
            Self::ObjectId { ids } => check_arity(!ids.is_empty(), "at least 1")?,
        }
        if matches!(self, Self::ObjectId { .. }) {
            return Ok(());
        }
        let numbers: Vec<f64> = self
            .params()
            .iter()
            .map(|p| {
                p.parse::<f64>().map_err(|_| RestrictorError::BadNumber {
                    name,
                    value: p.clone(),
                })
            })
            .collect::<Result<_, _>>()?;
        if let Self::Box { .. } = self {
            let extent = (numbers[2] - numbers[0]).rem_euclid(360.0);
            if extent > 180.0 {
                return RaExtentSnafu { extent }.fail();
            }
        }
        Ok(())
    }
}

impl fmt::Display for QsRestrictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.params().iter().join(","))
    }
}
