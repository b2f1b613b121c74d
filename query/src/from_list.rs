//! FROM clause structure.

use crate::bool_term::BoolTerm;
use itertools::Itertools;
use std::fmt;

/// Join flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    Union,
}

impl JoinType {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
            Self::Cross => "CROSS JOIN",
            Self::Union => "UNION JOIN",
        }
    }
}

/// ON condition or USING column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinSpec {
    On(BoolTerm),
    Using(Vec<String>),
}

impl fmt::Display for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On(t) => write!(f, "ON {t}"),
            Self::Using(cols) => write!(f, "USING({})", cols.iter().join(",")),
        }
    }
}

/// A joined table hanging off a from-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRef {
    pub join_type: JoinType,
    pub natural: bool,
    pub table: TableRef,
    pub spec: Option<JoinSpec>,
}

impl fmt::Display for JoinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.natural {
            write!(f, "NATURAL ")?;
        }
        write!(f, "{} {}", self.join_type.keyword(), self.table)?;
        if let Some(spec) = &self.spec {
            write!(f, " {spec}")?;
        }
        Ok(())
    }
}

/// One from-list entry: a base table plus any chained joins.
///
/// `db` may be empty until default-database resolution runs; `alias` may be
/// empty until the table plugin assigns one. After the logical plugins every
/// entry has both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRef {
    pub db: String,
    pub table: String,
    pub alias: String,
    pub joins: Vec<JoinRef>,
}

impl TableRef {
    /// Entry without alias or joins.
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            alias: String::new(),
            joins: vec![],
        }
    }

    /// Entry with an explicit alias.
    pub fn aliased(
        db: impl Into<String>,
        table: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            alias: alias.into(),
            joins: vec![],
        }
    }

    fn render_base(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.db.is_empty() {
            write!(f, "{}", self.table)?;
        } else {
            write!(f, "{}.{}", self.db, self.table)?;
        }
        // An alias equal to the table name is the implicit self-alias the
        // analysis assigns; re-printing it would change the user's text.
        if !self.alias.is_empty() && self.alias != self.table {
            write!(f, " AS {}", self.alias)?;
        }
        Ok(())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render_base(f)?;
        for join in &self.joins {
            write!(f, " {join}")?;
        }
        Ok(())
    }
}

/// The ordered FROM clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FromList {
    pub table_refs: Vec<TableRef>,
}

impl FromList {
    /// Build from entries.
    pub fn new(table_refs: Vec<TableRef>) -> Self {
        Self { table_refs }
    }

    /// Iterate over every table reference including join targets.
    pub fn all_tables(&self) -> Vec<&TableRef> {
        let mut out = Vec::new();
        for t in &self.table_refs {
            out.push(t);
            for j in &t.joins {
                out.push(&j.table);
            }
        }
        out
    }

    /// Apply `f` to every table reference, base entries first, then each
    /// entry's join targets.
    pub fn for_each_table_mut(&mut self, mut f: impl FnMut(&mut TableRef)) {
        for t in &mut self.table_refs {
            f(t);
            for j in &mut t.joins {
                f(&mut j.table);
            }
        }
    }
}

impl fmt::Display for FromList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_refs.iter().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bool_term::{BoolFactor, Predicate};
    use crate::value_expr::ValueExpr;
    use crate::value_factor::ValueFactor;

    #[test]
    fn renders_comma_list_with_aliases() {
        let fl = FromList::new(vec![
            TableRef::aliased("LSST", "Object", "o1"),
            TableRef::aliased("LSST", "Object", "o2"),
        ]);
        assert_eq!(fl.to_string(), "LSST.Object AS o1,LSST.Object AS o2");
    }

    #[test]
    fn renders_join_with_on() {
        let mut base = TableRef::aliased("LSST", "Object", "o");
        base.joins.push(JoinRef {
            join_type: JoinType::Left,
            natural: false,
            table: TableRef::aliased("LSST", "Source", "s"),
            spec: Some(JoinSpec::On(BoolTerm::Factor(BoolFactor::from_predicate(
                Predicate::Comp {
                    left: ValueExpr::from_factor(ValueFactor::bare_column("o.objectId")),
                    op: "=".into(),
                    right: ValueExpr::from_factor(ValueFactor::bare_column("s.objectId")),
                },
            )))),
        });
        let fl = FromList::new(vec![base]);
        assert_eq!(
            fl.to_string(),
            "LSST.Object AS o LEFT JOIN LSST.Source AS s ON o.objectId=s.objectId"
        );
    }
}
