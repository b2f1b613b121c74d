//! The SQL frontend.
//!
//! The grammar itself is the `sqlparser` crate's; this crate lowers its AST
//! into the [`query`] statement model and applies the constructs-we-reject
//! rules. Everything the lowering cannot model is a hard error rather than a
//! silent pass-through, so the analysis plugins only ever see trees they
//! understand.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use query::{
    BoolFactor, BoolFactorTerm, BoolTerm, ColumnRef, FactorOp, FromList, FuncExpr, GroupByClause,
    HavingClause, JoinRef, JoinSpec, JoinType, Op, OrderByClause, OrderByTerm, Predicate,
    SelectList, SelectStmt, SortOrder, TableRef, ValueExpr, ValueFactor, WhereClause,
};
use snafu::Snafu;
use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Aggregate function names the analysis pipeline understands.
const AGG_NAMES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];

/// Frontend failures. `Syntax` is the external parser rejecting the text;
/// everything else is a construct Qserv does not accept.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("syntax error: {source}"))]
    Syntax {
        source: sqlparser::parser::ParserError,
    },

    #[snafu(display("expected exactly one SELECT statement"))]
    NotSelect,

    #[snafu(display("subqueries inside FROM are not supported"))]
    SubqueryInFrom,

    #[snafu(display("positional ORDER BY is not supported"))]
    PositionalOrderBy,

    #[snafu(display("identifier {name:?} may not start with an underscore"))]
    UnderscoreIdentifier { name: String },

    #[snafu(display("unsupported construct: {construct}"))]
    Unsupported { construct: String },
}

/// Frontend result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parse one SELECT statement into the statement model.
pub fn parse_select(sql: &str) -> Result<SelectStmt> {
    let statements =
        Parser::parse_sql(&GenericDialect {}, sql).map_err(|source| Error::Syntax { source })?;
    let statement = match statements.as_slice() {
        [sp::Statement::Query(q)] => q,
        _ => return NotSelectSnafu.fail(),
    };
    lower_query(statement)
}

fn lower_query(q: &sp::Query) -> Result<SelectStmt> {
    let select = match &*q.body {
        sp::SetExpr::Select(s) => s,
        _ => {
            return UnsupportedSnafu {
                construct: "non-SELECT query body",
            }
            .fail()
        }
    };

    let mut stmt = SelectStmt {
        distinct: select.distinct,
        select_list: lower_select_list(&select.projection)?,
        from_list: lower_from(&select.from)?,
        ..Default::default()
    };

    if let Some(selection) = &select.selection {
        stmt.where_clause = Some(WhereClause::from_tree(lower_bool(selection)?));
    }
    if !select.group_by.is_empty() {
        let terms = select
            .group_by
            .iter()
            .map(lower_value_expr)
            .collect::<Result<Vec<_>>>()?;
        stmt.group_by = Some(GroupByClause { terms });
    }
    if let Some(having) = &select.having {
        stmt.having = Some(HavingClause {
            tree: lower_bool(having)?,
        });
    }
    if !q.order_by.is_empty() {
        stmt.order_by = Some(lower_order_by(&q.order_by)?);
    }
    if let Some(limit) = &q.limit {
        stmt.limit = Some(lower_limit(limit)?);
    }
    Ok(stmt)
}

fn lower_select_list(projection: &[sp::SelectItem]) -> Result<SelectList> {
    let mut exprs = Vec::with_capacity(projection.len());
    for item in projection {
        let expr = match item {
            sp::SelectItem::UnnamedExpr(e) => lower_value_expr(e)?,
            sp::SelectItem::ExprWithAlias { expr, alias } => {
                let mut e = lower_value_expr(expr)?;
                e.alias = Some(ident(alias)?);
                e
            }
            sp::SelectItem::Wildcard => ValueExpr::from_factor(ValueFactor::Star(None)),
            sp::SelectItem::QualifiedWildcard(name) => {
                ValueExpr::from_factor(ValueFactor::Star(Some(object_name(name)?.join("."))))
            }
        };
        exprs.push(expr);
    }
    Ok(SelectList::new(exprs))
}

fn lower_from(from: &[sp::TableWithJoins]) -> Result<FromList> {
    let mut refs = Vec::with_capacity(from.len());
    for twj in from {
        let mut base = lower_table_factor(&twj.relation)?;
        for join in &twj.joins {
            base.joins.push(lower_join(join)?);
        }
        refs.push(base);
    }
    Ok(FromList::new(refs))
}

fn lower_table_factor(factor: &sp::TableFactor) -> Result<TableRef> {
    match factor {
        sp::TableFactor::Table { name, alias, .. } => {
            let parts = object_name(name)?;
            let (db, table) = match parts.as_slice() {
                [table] => (String::new(), table.clone()),
                [db, table] => (db.clone(), table.clone()),
                _ => {
                    return UnsupportedSnafu {
                        construct: format!("table name with {} parts", parts.len()),
                    }
                    .fail()
                }
            };
            let mut t = TableRef::new(db, table);
            if let Some(a) = alias {
                t.alias = ident(&a.name)?;
            }
            Ok(t)
        }
        sp::TableFactor::Derived { .. } => SubqueryInFromSnafu.fail(),
        other => UnsupportedSnafu {
            construct: format!("FROM item: {other}"),
        }
        .fail(),
    }
}

fn lower_join(join: &sp::Join) -> Result<JoinRef> {
    let table = lower_table_factor(&join.relation)?;
    let (join_type, constraint) = match &join.join_operator {
        sp::JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
        sp::JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
        sp::JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
        sp::JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
        sp::JoinOperator::CrossJoin => (JoinType::Cross, None),
        other => {
            return UnsupportedSnafu {
                construct: format!("join operator: {other:?}"),
            }
            .fail()
        }
    };
    let mut natural = false;
    let spec = match constraint {
        None | Some(sp::JoinConstraint::None) => None,
        Some(sp::JoinConstraint::Natural) => {
            natural = true;
            None
        }
        Some(sp::JoinConstraint::On(e)) => Some(JoinSpec::On(lower_bool(e)?)),
        Some(sp::JoinConstraint::Using(cols)) => Some(JoinSpec::Using(
            cols.iter().map(ident).collect::<Result<Vec<_>>>()?,
        )),
    };
    Ok(JoinRef {
        join_type,
        natural,
        table,
        spec,
    })
}

fn lower_order_by(order_by: &[sp::OrderByExpr]) -> Result<OrderByClause> {
    let mut terms = Vec::with_capacity(order_by.len());
    for ob in order_by {
        if matches!(&ob.expr, sp::Expr::Value(sp::Value::Number(..))) {
            return PositionalOrderBySnafu.fail();
        }
        terms.push(OrderByTerm {
            expr: lower_value_expr(&ob.expr)?,
            order: ob.asc.map(|asc| if asc { SortOrder::Asc } else { SortOrder::Desc }),
        });
    }
    Ok(OrderByClause { terms })
}

fn lower_limit(limit: &sp::Expr) -> Result<i64> {
    match limit {
        sp::Expr::Value(sp::Value::Number(n, _)) => {
            n.parse().map_err(|_| Error::Unsupported {
                construct: format!("LIMIT {n}"),
            })
        }
        other => UnsupportedSnafu {
            construct: format!("LIMIT {other}"),
        }
        .fail(),
    }
}

/// Lower an expression appearing in boolean position.
fn lower_bool(e: &sp::Expr) -> Result<BoolTerm> {
    match e {
        sp::Expr::BinaryOp { left, op, right } => match op {
            sp::BinaryOperator::And => {
                let terms = vec![lower_bool(left)?, lower_bool(right)?];
                Ok(BoolTerm::and(terms).simplify())
            }
            sp::BinaryOperator::Or => {
                let terms = vec![lower_bool(left)?, lower_bool(right)?];
                Ok(BoolTerm::or(terms).simplify())
            }
            sp::BinaryOperator::Eq
            | sp::BinaryOperator::NotEq
            | sp::BinaryOperator::Lt
            | sp::BinaryOperator::LtEq
            | sp::BinaryOperator::Gt
            | sp::BinaryOperator::GtEq => Ok(BoolTerm::Factor(BoolFactor::from_predicate(
                Predicate::Comp {
                    left: lower_value_expr(left)?,
                    op: op.to_string(),
                    right: lower_value_expr(right)?,
                },
            ))),
            other => UnsupportedSnafu {
                construct: format!("operator {other} in boolean position"),
            }
            .fail(),
        },
        sp::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(BoolTerm::Factor(BoolFactor::from_predicate(
            Predicate::Between {
                value: lower_value_expr(expr)?,
                min: lower_value_expr(low)?,
                max: lower_value_expr(high)?,
                not: *negated,
            },
        ))),
        sp::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(BoolTerm::Factor(BoolFactor::from_predicate(
            Predicate::In {
                value: lower_value_expr(expr)?,
                cands: list.iter().map(lower_value_expr).collect::<Result<_>>()?,
                not: *negated,
            },
        ))),
        sp::Expr::IsNull(inner) => Ok(BoolTerm::Factor(BoolFactor::from_predicate(
            Predicate::Null {
                value: lower_value_expr(inner)?,
                not: false,
            },
        ))),
        sp::Expr::IsNotNull(inner) => Ok(BoolTerm::Factor(BoolFactor::from_predicate(
            Predicate::Null {
                value: lower_value_expr(inner)?,
                not: true,
            },
        ))),
        sp::Expr::Nested(inner) => {
            // Redundant parentheses around a whole term are dropped here;
            // mixed nesting is kept as a subtree.
            let tree = lower_bool(inner)?;
            Ok(match tree {
                t @ BoolTerm::Factor(_) => t,
                t => BoolTerm::Factor(BoolFactor {
                    terms: vec![BoolFactorTerm::Subtree(Box::new(t))],
                }),
            })
        }
        // A bare function call in boolean position: restrictors arrive this
        // way and are pulled out by the WHERE normalization pass.
        sp::Expr::Function(_) | sp::Expr::Identifier(_) | sp::Expr::CompoundIdentifier(_) => Ok(
            BoolTerm::Factor(BoolFactor {
                terms: vec![BoolFactorTerm::Value(lower_value_expr(e)?)],
            }),
        ),
        other => UnsupportedSnafu {
            construct: format!("boolean expression: {other}"),
        }
        .fail(),
    }
}

/// Lower an expression appearing in value position.
fn lower_value_expr(e: &sp::Expr) -> Result<ValueExpr> {
    // Arithmetic chains flatten left-to-right into factor/op links.
    if let sp::Expr::BinaryOp { left, op, right } = e {
        if let Some(arith) = arith_op(op) {
            let mut out = lower_value_expr(left)?;
            if let Some(last) = out.factor_ops.last_mut() {
                last.op = arith;
            }
            let rhs = lower_value_expr(right)?;
            out.factor_ops.extend(rhs.factor_ops);
            return Ok(out);
        }
        return UnsupportedSnafu {
            construct: format!("operator {op} in value position"),
        }
        .fail();
    }
    Ok(ValueExpr::from_factor(lower_value_factor(e)?))
}

fn arith_op(op: &sp::BinaryOperator) -> Option<Op> {
    match op {
        sp::BinaryOperator::Plus => Some(Op::Plus),
        sp::BinaryOperator::Minus => Some(Op::Minus),
        sp::BinaryOperator::Multiply => Some(Op::Multiply),
        sp::BinaryOperator::Divide => Some(Op::Divide),
        sp::BinaryOperator::Modulo => Some(Op::Modulo),
        _ => None,
    }
}

fn lower_value_factor(e: &sp::Expr) -> Result<ValueFactor> {
    match e {
        sp::Expr::Identifier(id) => Ok(ValueFactor::Column(ColumnRef::bare(ident(id)?))),
        sp::Expr::CompoundIdentifier(ids) => {
            let parts = ids.iter().map(ident).collect::<Result<Vec<_>>>()?;
            match parts.as_slice() {
                [table, column] => Ok(ValueFactor::Column(ColumnRef::table_column(
                    table.clone(),
                    column.clone(),
                ))),
                [db, table, column] => Ok(ValueFactor::Column(ColumnRef::new(
                    db.clone(),
                    table.clone(),
                    column.clone(),
                ))),
                _ => UnsupportedSnafu {
                    construct: format!("column reference with {} parts", parts.len()),
                }
                .fail(),
            }
        }
        sp::Expr::Value(v) => Ok(ValueFactor::constant(literal_text(v)?)),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Minus,
            expr,
        } => match lower_value_factor(expr)? {
            ValueFactor::Const(text) => Ok(ValueFactor::constant(format!("-{text}"))),
            other => Ok(ValueFactor::Expr(Box::new(ValueExpr {
                factor_ops: vec![
                    FactorOp {
                        factor: ValueFactor::constant("-1"),
                        op: Op::Multiply,
                    },
                    FactorOp {
                        factor: other,
                        op: Op::None,
                    },
                ],
                alias: None,
            }))),
        },
        sp::Expr::Function(func) => lower_function(func),
        sp::Expr::Nested(inner) => Ok(ValueFactor::Expr(Box::new(lower_value_expr(inner)?))),
        other => UnsupportedSnafu {
            construct: format!("value expression: {other}"),
        }
        .fail(),
    }
}

fn lower_function(func: &sp::Function) -> Result<ValueFactor> {
    let name = object_name(&func.name)?.join(".");
    let mut params = Vec::with_capacity(func.args.len());
    for arg in &func.args {
        let arg_expr = match arg {
            sp::FunctionArg::Unnamed(a) => a,
            sp::FunctionArg::Named { .. } => {
                return UnsupportedSnafu {
                    construct: "named function arguments",
                }
                .fail()
            }
        };
        match arg_expr {
            sp::FunctionArgExpr::Expr(e) => params.push(lower_value_expr(e)?),
            sp::FunctionArgExpr::Wildcard => {
                params.push(ValueExpr::from_factor(ValueFactor::Star(None)))
            }
            sp::FunctionArgExpr::QualifiedWildcard(q) => params.push(ValueExpr::from_factor(
                ValueFactor::Star(Some(object_name(q)?.join("."))),
            )),
        }
    }
    let fe = FuncExpr::new(name.clone(), params);
    if AGG_NAMES.contains(&name.to_ascii_uppercase().as_str()) {
        Ok(ValueFactor::AggFunc(fe))
    } else {
        Ok(ValueFactor::Func(fe))
    }
}

fn literal_text(v: &sp::Value) -> Result<String> {
    match v {
        sp::Value::Number(n, _) => Ok(n.clone()),
        sp::Value::SingleQuotedString(s) => Ok(format!("'{s}'")),
        sp::Value::Boolean(b) => Ok(b.to_string()),
        sp::Value::Null => Ok("NULL".to_string()),
        other => UnsupportedSnafu {
            construct: format!("literal: {other}"),
        }
        .fail(),
    }
}

fn ident(id: &sp::Ident) -> Result<String> {
    if id.value.starts_with('_') {
        return UnderscoreIdentifierSnafu {
            name: id.value.clone(),
        }
        .fail();
    }
    Ok(id.value.clone())
}

fn object_name(name: &sp::ObjectName) -> Result<Vec<String>> {
    name.0.iter().map(ident).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn lowers_trivial_select() {
        let stmt = parse_select("SELECT * FROM Object WHERE someField > 5.0;").unwrap();
        assert_eq!(stmt.query_template().to_string(), "SELECT * FROM Object WHERE someField>5.0");
    }

    #[test]
    fn lowers_aliases_joins_and_aggregates() {
        let stmt = parse_select(
            "SELECT SUM(x), AVG(y) FROM LSST.Object GROUP BY chunkId;",
        )
        .unwrap();
        assert!(stmt.select_list.has_agg());
        assert_eq!(
            stmt.query_template().to_string(),
            "SELECT SUM(x),AVG(y) FROM LSST.Object GROUP BY chunkId"
        );

        let stmt = parse_select(
            "SELECT o.objectId FROM Object o JOIN Source s ON o.objectId = s.objectId;",
        )
        .unwrap();
        assert_eq!(
            stmt.query_template().to_string(),
            "SELECT o.objectId FROM Object AS o JOIN Source AS s ON o.objectId=s.objectId"
        );
    }

    #[test]
    fn keeps_restrictor_calls_in_where() {
        let stmt = parse_select(
            "SELECT * FROM Object WHERE qserv_areaspec_box(0,0,1,1) AND x < 3;",
        )
        .unwrap();
        let rendered = stmt.query_template().to_string();
        assert!(rendered.contains("qserv_areaspec_box(0,0,1,1)"), "{rendered}");
        assert!(rendered.contains("x<3"));
    }

    #[test]
    fn rejections() {
        assert_matches!(
            parse_select("SELECT * FROM (SELECT * FROM Object) AS t;"),
            Err(Error::SubqueryInFrom)
        );
        assert_matches!(
            parse_select("SELECT a FROM Object ORDER BY 1;"),
            Err(Error::PositionalOrderBy)
        );
        assert_matches!(
            parse_select("SELECT _private FROM Object;"),
            Err(Error::UnderscoreIdentifier { .. })
        );
        assert_matches!(parse_select("DROP TABLE Object;"), Err(Error::NotSelect));
        assert_matches!(parse_select("not sql at all"), Err(Error::Syntax { .. }));
    }

    #[test]
    fn render_parse_round_trip_is_stable() {
        // Rendering a lowered statement and parsing it again reproduces
        // the same statement, so rewritten trees stay readable by the
        // frontend.
        let inputs = [
            "SELECT * FROM Object WHERE someField > 5.0;",
            "SELECT SUM(x), AVG(y) FROM LSST.Object GROUP BY chunkId;",
            "SELECT o.objectId FROM Object o JOIN Source s ON o.objectId = s.objectId \
             ORDER BY o.objectId DESC LIMIT 3;",
            "SELECT a, b FROM Object WHERE x BETWEEN 1 AND 2 OR y IS NOT NULL;",
        ];
        for input in inputs {
            let once = parse_select(input).unwrap();
            let rendered = once.query_template().to_string();
            let twice = parse_select(&rendered).unwrap();
            assert_eq!(
                rendered,
                twice.query_template().to_string(),
                "round trip diverged for {input:?}"
            );
        }
    }

    #[test]
    fn lowers_between_and_limit() {
        let stmt = parse_select(
            "select * from LSST.Object WHERE ra_PS BETWEEN 150 AND 150.2 \
             and decl_PS between 1.6 and 1.7 limit 2;",
        )
        .unwrap();
        assert_eq!(stmt.limit, Some(2));
        assert_eq!(
            stmt.query_template().to_string(),
            "SELECT * FROM LSST.Object WHERE ra_PS BETWEEN 150 AND 150.2 \
             AND decl_PS BETWEEN 1.6 AND 1.7 LIMIT 2"
        );
    }
}
