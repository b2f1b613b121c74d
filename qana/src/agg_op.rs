//! Aggregate decomposition into parallel partials and merge finishers.

use query::{FactorOp, FuncExpr, Op, ValueExpr, ValueFactor};

/// The split of one aggregate call: the partial expressions computed per
/// chunk and the finisher factor recombining them during the merge.
#[derive(Debug, Clone)]
pub struct AggRecord {
    /// Partial aggregations for the parallel select list, already aliased.
    pub parallel: Vec<ValueExpr>,
    /// Finisher factor for the merge select list.
    pub merge: ValueFactor,
}

/// Generates intermediate aliases and applies the per-operator split rules:
/// `COUNT` re-aggregates with `SUM`, `SUM`/`MIN`/`MAX` pass through, and
/// `AVG` becomes `(SUM, COUNT)` finished as `SUM/SUM`.
#[derive(Debug, Default)]
pub struct AggOpMgr {
    seq: u32,
    has_agg: bool,
}

impl AggOpMgr {
    /// Fresh manager; alias sequence starts at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Were any aggregates decomposed?
    pub fn has_agg(&self) -> bool {
        self.has_agg
    }

    /// Intermediate alias, e.g. `QS1_COUNT`.
    fn next_alias(&mut self, op: &str) -> String {
        self.seq += 1;
        format!("QS{}_{}", self.seq, op)
    }

    /// Split one aggregate call. Unknown aggregate names pass through
    /// unchanged, recomputed verbatim during the merge.
    pub fn apply(&mut self, func: &FuncExpr) -> AggRecord {
        self.has_agg = true;
        let op = func.name.to_ascii_uppercase();
        match op.as_str() {
            "COUNT" => {
                let alias = self.next_alias("COUNT");
                AggRecord {
                    parallel: vec![ValueExpr::from_factor_aliased(
                        ValueFactor::AggFunc(func.clone()),
                        alias.clone(),
                    )],
                    merge: ValueFactor::AggFunc(FuncExpr::new_arg1("SUM", alias)),
                }
            }
            "SUM" | "MIN" | "MAX" => {
                let alias = self.next_alias(&op);
                AggRecord {
                    parallel: vec![ValueExpr::from_factor_aliased(
                        ValueFactor::AggFunc(func.clone()),
                        alias.clone(),
                    )],
                    merge: ValueFactor::AggFunc(FuncExpr::new_arg1(op, alias)),
                }
            }
            "AVG" => {
                let count_alias = self.next_alias("COUNT");
                let sum_alias = self.next_alias("SUM");
                let parallel = vec![
                    ValueExpr::from_factor_aliased(
                        ValueFactor::AggFunc(FuncExpr::new_like(func, "COUNT")),
                        count_alias.clone(),
                    ),
                    ValueExpr::from_factor_aliased(
                        ValueFactor::AggFunc(FuncExpr::new_like(func, "SUM")),
                        sum_alias.clone(),
                    ),
                ];
                let merge = ValueFactor::Expr(Box::new(ValueExpr {
                    factor_ops: vec![
                        FactorOp {
                            factor: ValueFactor::AggFunc(FuncExpr::new_arg1("SUM", sum_alias)),
                            op: Op::Divide,
                        },
                        FactorOp {
                            factor: ValueFactor::AggFunc(FuncExpr::new_arg1("SUM", count_alias)),
                            op: Op::None,
                        },
                    ],
                    alias: None,
                }));
                AggRecord { parallel, merge }
            }
            _ => AggRecord {
                parallel: vec![ValueExpr::from_factor(ValueFactor::AggFunc(func.clone()))],
                merge: ValueFactor::AggFunc(func.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_becomes_sum() {
        let mut mgr = AggOpMgr::new();
        let rec = mgr.apply(&FuncExpr::new_arg1("COUNT", "x"));
        assert_eq!(rec.parallel.len(), 1);
        assert_eq!(rec.parallel[0].to_string(), "COUNT(x) AS QS1_COUNT");
        assert_eq!(rec.merge.to_string(), "SUM(QS1_COUNT)");
        assert!(mgr.has_agg());
    }

    #[test]
    fn avg_splits_into_sum_and_count() {
        let mut mgr = AggOpMgr::new();
        let rec = mgr.apply(&FuncExpr::new_arg1("AVG", "y"));
        let partials: Vec<_> = rec.parallel.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            partials,
            vec!["COUNT(y) AS QS1_COUNT", "SUM(y) AS QS2_SUM"]
        );
        assert_eq!(rec.merge.to_string(), "(SUM(QS2_SUM)/SUM(QS1_COUNT))");
    }

    #[test]
    fn sum_passes_through_with_alias() {
        let mut mgr = AggOpMgr::new();
        let rec = mgr.apply(&FuncExpr::new_arg1("SUM", "flux"));
        assert_eq!(rec.parallel[0].to_string(), "SUM(flux) AS QS1_SUM");
        assert_eq!(rec.merge.to_string(), "SUM(QS1_SUM)");
    }
}
