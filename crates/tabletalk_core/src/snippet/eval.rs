use crate::error::{Error, Result};
use crate::snippet::parser::{parse, BinOp, Expr, Stmt};
use crate::snippet::RESULT_NAME;
use crate::table::{compare, Answer, Column, Table, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

fn err(msg: impl Into<String>) -> Error {
    Error::Snippet(msg.into())
}

/// Evaluate a snippet against the loaded table. Bindings live only for the
/// duration of the call; `table` is pre-bound. Whatever the snippet left in
/// the result name is the answer, the sentinel otherwise.
pub fn run_snippet(table: &Table, source: &str) -> Result<Answer> {
    let stmts = parse(source)?;
    let mut env: HashMap<String, Answer> = HashMap::new();
    env.insert("table".to_string(), Answer::Table(table.clone()));
    for stmt in &stmts {
        let value = eval_stmt(&env, stmt)?;
        env.insert(stmt.target.clone(), value);
    }
    Ok(env.remove(RESULT_NAME).unwrap_or(Answer::None))
}

/// `group(col)` produces this intermediate; only an aggregate may follow.
struct Grouped {
    key_name: String,
    /// Distinct key values in first-seen order, each with its row indices.
    groups: Vec<(Value, Vec<usize>)>,
    table: Table,
}

enum Evaluated {
    Ans(Answer),
    Grouped(Grouped),
}

fn eval_stmt(env: &HashMap<String, Answer>, stmt: &Stmt) -> Result<Answer> {
    match eval_expr(env, &stmt.expr)? {
        Evaluated::Ans(a) => Ok(a),
        Evaluated::Grouped(_) => {
            Err(err("group(...) must be followed by an aggregate such as .sum(col) or .count()"))
        }
    }
}

fn eval_expr(env: &HashMap<String, Answer>, expr: &Expr) -> Result<Evaluated> {
    match expr {
        Expr::Ident(name) => match env.get(name) {
            Some(a) => Ok(Evaluated::Ans(a.clone())),
            None => Err(err(format!("unknown name `{name}`; bindings and `table` are the only names"))),
        },
        Expr::Literal(v) => Ok(Evaluated::Ans(Answer::Scalar(v.clone()))),
        Expr::Call { recv: Some(recv), name, args } => {
            let recv = eval_expr(env, recv)?;
            match recv {
                Evaluated::Ans(Answer::Table(t)) => table_method(&t, name, args),
                Evaluated::Grouped(g) => grouped_method(&g, name, args),
                Evaluated::Ans(_) => {
                    Err(err(format!("`.{name}(...)` needs a table on its left-hand side")))
                }
            }
        }
        Expr::Call { recv: None, name, .. } => {
            Err(err(format!("`{name}(...)` is only valid inside filter(...)")))
        }
        Expr::Binary { .. } | Expr::Not(_) => {
            Err(err("comparisons are only valid inside filter(...)"))
        }
    }
}

fn ident_arg<'a>(args: &'a [Expr], method: &str) -> Result<&'a str> {
    match args {
        [Expr::Ident(name)] => Ok(name),
        _ => Err(err(format!("{method}(...) takes exactly one column name"))),
    }
}

fn column<'a>(t: &'a Table, name: &str, method: &str) -> Result<&'a Column> {
    t.column(name)
        .ok_or_else(|| err(format!("{method}(...): table has no column `{name}`")))
}

fn table_method(t: &Table, name: &str, args: &[Expr]) -> Result<Evaluated> {
    match name {
        "filter" => {
            let [pred] = args else {
                return Err(err("filter(...) takes exactly one predicate"));
            };
            let mut keep = Vec::new();
            for row in 0..t.n_rows() {
                if eval_predicate(t, row, pred)? {
                    keep.push(row);
                }
            }
            Ok(Evaluated::Ans(Answer::Table(t.take_rows(&keep))))
        }
        "select" => {
            if args.is_empty() {
                return Err(err("select(...) needs at least one column name"));
            }
            let mut columns = Vec::new();
            for arg in args {
                let Expr::Ident(col) = arg else {
                    return Err(err("select(...) takes bare column names"));
                };
                columns.push(column(t, col, "select")?.clone());
            }
            Ok(Evaluated::Ans(Answer::Table(Table::new(t.name.clone(), columns))))
        }
        "group" => {
            let key = ident_arg(args, "group")?;
            let col = column(t, key, "group")?;
            let mut groups: Vec<(Value, Vec<usize>)> = Vec::new();
            for (row, v) in col.values.iter().enumerate() {
                if v.is_null() {
                    continue;
                }
                match groups.iter_mut().find(|(k, _)| k == v) {
                    Some((_, rows)) => rows.push(row),
                    None => groups.push((v.clone(), vec![row])),
                }
            }
            Ok(Evaluated::Grouped(Grouped {
                key_name: key.to_string(),
                groups,
                table: t.clone(),
            }))
        }
        "sort" => {
            let (col_name, descending) = match args {
                [Expr::Ident(c)] => (c.as_str(), false),
                [Expr::Ident(c), Expr::Ident(d)] if d == "desc" => (c.as_str(), true),
                [Expr::Ident(c), Expr::Ident(d)] if d == "asc" => (c.as_str(), false),
                _ => return Err(err("sort(...) takes a column name and optionally `desc`")),
            };
            let col = column(t, col_name, "sort")?;
            let mut order: Vec<usize> = (0..t.n_rows()).collect();
            // Stable; incomparable cells (nulls) sink to the end either way.
            order.sort_by(|&a, &b| {
                let va = &col.values[a];
                let vb = &col.values[b];
                match (va.is_null(), vb.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => {
                        let ord = compare(va, vb).unwrap_or(Ordering::Equal);
                        if descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    }
                }
            });
            Ok(Evaluated::Ans(Answer::Table(t.take_rows(&order))))
        }
        "head" => {
            let n = match args {
                [Expr::Literal(Value::Int(n))] if *n >= 0 => *n as usize,
                _ => return Err(err("head(...) takes a non-negative integer")),
            };
            let keep: Vec<usize> = (0..t.n_rows().min(n)).collect();
            Ok(Evaluated::Ans(Answer::Table(t.take_rows(&keep))))
        }
        "unique" => {
            let col = column(t, ident_arg(args, "unique")?, "unique")?;
            let mut seen = Vec::new();
            for v in &col.values {
                if !v.is_null() && !seen.contains(v) {
                    seen.push(v.clone());
                }
            }
            Ok(Evaluated::Ans(Answer::List(seen)))
        }
        "count" => {
            if !args.is_empty() {
                return Err(err("count() takes no arguments"));
            }
            Ok(Evaluated::Ans(Answer::Scalar(Value::Int(t.n_rows() as i64))))
        }
        "sum" | "mean" | "min" | "max" => {
            let col = column(t, ident_arg(args, name)?, name)?;
            let v = aggregate(&col.values, name)?;
            Ok(Evaluated::Ans(Answer::Scalar(v)))
        }
        other => Err(err(format!(
            "unknown method `{other}`; allowed: filter, select, group, sort, head, unique, sum, mean, min, max, count"
        ))),
    }
}

fn grouped_method(g: &Grouped, name: &str, args: &[Expr]) -> Result<Evaluated> {
    let (out_name, values): (String, Vec<Value>) = match name {
        "count" => {
            if !args.is_empty() {
                return Err(err("count() takes no arguments"));
            }
            ("count".to_string(), g.groups.iter().map(|(_, rows)| Value::Int(rows.len() as i64)).collect())
        }
        "sum" | "mean" | "min" | "max" => {
            let col_name = ident_arg(args, name)?;
            let col = column(&g.table, col_name, name)?;
            let mut out = Vec::with_capacity(g.groups.len());
            for (_, rows) in &g.groups {
                let cells: Vec<Value> = rows.iter().map(|&r| col.values[r].clone()).collect();
                out.push(aggregate(&cells, name)?);
            }
            (format!("{name}_{col_name}"), out)
        }
        other => return Err(err(format!("after group(...): unknown aggregate `{other}`"))),
    };
    let keys: Vec<Value> = g.groups.iter().map(|(k, _)| k.clone()).collect();
    Ok(Evaluated::Ans(Answer::Table(Table::new(
        g.table.name.clone(),
        vec![
            Column { name: g.key_name.clone(), values: keys },
            Column { name: out_name, values },
        ],
    ))))
}

/// Nulls are skipped; an all-null column aggregates to null. `sum` over an
/// all-int column stays an int, anything else numeric goes through f64.
fn aggregate(values: &[Value], op: &str) -> Result<Value> {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        return Ok(Value::Null);
    }
    match op {
        "sum" | "mean" => {
            let mut total = 0.0;
            let mut int_total: i64 = 0;
            let mut all_int = true;
            for v in &present {
                match v.as_f64() {
                    Some(x) => {
                        total += x;
                        if let Value::Int(i) = v {
                            if all_int && op == "sum" {
                                // Exact accumulation; f64 rounds above 2^53.
                                int_total = int_total
                                    .checked_add(*i)
                                    .ok_or_else(|| err("sum(...) overflowed the integer range"))?;
                            }
                        } else {
                            all_int = false;
                        }
                    }
                    None => return Err(err(format!("{op}(...) needs a numeric column, found {}", v.type_name()))),
                }
            }
            if op == "mean" {
                Ok(Value::Float(total / present.len() as f64))
            } else if all_int {
                Ok(Value::Int(int_total))
            } else {
                Ok(Value::Float(total))
            }
        }
        "min" | "max" => {
            let mut best = present[0].clone();
            for v in present.iter().skip(1) {
                if let Some(ord) = compare(v, &best) {
                    let better = if op == "min" { ord == Ordering::Less } else { ord == Ordering::Greater };
                    if better {
                        best = (*v).clone();
                    }
                }
            }
            Ok(best)
        }
        _ => Err(err(format!("unknown aggregate `{op}`"))),
    }
}

fn eval_predicate(t: &Table, row: usize, expr: &Expr) -> Result<bool> {
    match expr {
        Expr::Binary { op: BinOp::And, lhs, rhs } => {
            Ok(eval_predicate(t, row, lhs)? && eval_predicate(t, row, rhs)?)
        }
        Expr::Binary { op: BinOp::Or, lhs, rhs } => {
            Ok(eval_predicate(t, row, lhs)? || eval_predicate(t, row, rhs)?)
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_cell(t, row, lhs)?;
            let b = eval_cell(t, row, rhs)?;
            // A null or incomparable pair fails the comparison, so filters
            // drop rows with unparseable or missing cells.
            let ord = match compare(&a, &b) {
                Some(o) => o,
                None => return Ok(*op == BinOp::Ne && !a.is_null() && !b.is_null()),
            };
            Ok(match op {
                BinOp::Eq => ord == Ordering::Equal,
                BinOp::Ne => ord != Ordering::Equal,
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Le => ord != Ordering::Greater,
                BinOp::Gt => ord == Ordering::Greater,
                BinOp::Ge => ord != Ordering::Less,
                BinOp::And | BinOp::Or => unreachable!(),
            })
        }
        Expr::Not(inner) => Ok(!eval_predicate(t, row, inner)?),
        _ => match eval_cell(t, row, expr)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(err(format!("predicate must be a comparison, found a {}", other.type_name()))),
        },
    }
}

fn eval_cell(t: &Table, row: usize, expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Ident(name) => {
            let col = t
                .column(name)
                .ok_or_else(|| err(format!("filter(...): table has no column `{name}`")))?;
            Ok(col.values[row].clone())
        }
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Call { recv: None, name, args } => match name.as_str() {
            "year" | "month" | "day" => {
                let [arg] = args.as_slice() else {
                    return Err(err(format!("{name}(...) takes exactly one column")));
                };
                let v = eval_cell(t, row, arg)?;
                let Some(date) = v.as_date() else {
                    return Ok(Value::Null);
                };
                use chrono::Datelike;
                Ok(Value::Int(match name.as_str() {
                    "year" => date.year() as i64,
                    "month" => date.month() as i64,
                    _ => date.day() as i64,
                }))
            }
            "contains" => {
                let [col, needle] = args.as_slice() else {
                    return Err(err("contains(...) takes a column and a string"));
                };
                let hay = eval_cell(t, row, col)?;
                let Expr::Literal(Value::Str(needle)) = needle else {
                    return Err(err("contains(...): second argument must be a string literal"));
                };
                match hay {
                    Value::Str(s) => Ok(Value::Bool(s.contains(needle.as_str()))),
                    Value::Null => Ok(Value::Null),
                    other => Err(err(format!("contains(...) needs a string column, found {}", other.type_name()))),
                }
            }
            other => Err(err(format!(
                "unknown helper `{other}` in filter(...); allowed: year, month, day, contains"
            ))),
        },
        Expr::Call { recv: Some(_), .. } => {
            Err(err("method calls are not allowed inside filter(...)"))
        }
        Expr::Binary { .. } | Expr::Not(_) => {
            Err(err("nested comparisons must be combined with `and`/`or`"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, day).unwrap())
    }

    fn sales() -> Table {
        Table::new(
            "sales",
            vec![
                Column {
                    name: "date".into(),
                    values: vec![d(2025, 1, 3), d(2025, 1, 20), d(2025, 2, 2), d(2025, 2, 14)],
                },
                Column {
                    name: "amount".into(),
                    values: vec![
                        Value::Float(10.0),
                        Value::Float(5.5),
                        Value::Float(7.0),
                        Value::Float(1.5),
                    ],
                },
                Column {
                    name: "city".into(),
                    values: vec![
                        Value::Str("Oslo".into()),
                        Value::Str("Bergen".into()),
                        Value::Str("Oslo".into()),
                        Value::Str("Oslo".into()),
                    ],
                },
            ],
        )
    }

    #[test]
    fn filter_and_sum_by_month() {
        let got = run_snippet(&sales(), "answer = table.filter(month(date) == 1).sum(amount)").unwrap();
        let Answer::Scalar(Value::Float(x)) = got else { panic!("{got:?}") };
        assert!((x - 15.5).abs() < 1e-9);
    }

    #[test]
    fn unbound_result_yields_sentinel() {
        let got = run_snippet(&sales(), "total = table.sum(amount)").unwrap();
        assert!(matches!(got, Answer::None));
        assert_eq!(got.render(), "no result");
    }

    #[test]
    fn intermediate_bindings_chain() {
        let src = "jan = table.filter(month(date) == 1)\nanswer = jan.count()";
        let got = run_snippet(&sales(), src).unwrap();
        assert!(matches!(got, Answer::Scalar(Value::Int(2))));
    }

    #[test]
    fn last_binding_of_answer_wins() {
        let src = "answer = table.count()\nanswer = table.sum(amount)";
        let got = run_snippet(&sales(), src).unwrap();
        assert!(matches!(got, Answer::Scalar(Value::Float(_))));
    }

    #[test]
    fn string_equality_filter() {
        let got = run_snippet(&sales(), r#"answer = table.filter(city == "Oslo").count()"#).unwrap();
        assert!(matches!(got, Answer::Scalar(Value::Int(3))));
    }

    #[test]
    fn date_helpers_coerce_string_columns() {
        let t = Table::new(
            "t",
            vec![
                Column {
                    name: "when".into(),
                    values: vec![
                        Value::Str("2025-01-03".into()),
                        Value::Str("not a date".into()),
                        Value::Str("2024-01-09".into()),
                    ],
                },
                Column {
                    name: "n".into(),
                    values: vec![Value::Int(1), Value::Int(2), Value::Int(4)],
                },
            ],
        );
        let got = run_snippet(&t, "answer = table.filter(month(when) == 1).sum(n)").unwrap();
        // The unparseable row compares as null and is excluded.
        assert!(matches!(got, Answer::Scalar(Value::Int(5))));
    }

    #[test]
    fn date_literal_comparison() {
        let got = run_snippet(&sales(), r#"answer = table.filter(date >= "2025-02-01").count()"#).unwrap();
        assert!(matches!(got, Answer::Scalar(Value::Int(2))));
    }

    #[test]
    fn group_then_aggregate() {
        let got = run_snippet(&sales(), "answer = table.group(city).sum(amount)").unwrap();
        let Answer::Table(t) = got else { panic!() };
        assert_eq!(t.columns[0].name, "city");
        assert_eq!(t.columns[1].name, "sum_amount");
        // First-seen key order: Oslo, Bergen.
        assert_eq!(t.columns[0].values[0], Value::Str("Oslo".into()));
        let Value::Float(oslo) = t.columns[1].values[0] else { panic!() };
        assert!((oslo - 18.5).abs() < 1e-9);
    }

    #[test]
    fn group_without_aggregate_is_an_error() {
        let e = run_snippet(&sales(), "answer = table.group(city)").unwrap_err();
        assert!(e.to_string().contains("aggregate"));
    }

    #[test]
    fn sort_desc_and_head() {
        let got = run_snippet(&sales(), "answer = table.sort(amount, desc).head(1).select(city)").unwrap();
        let Answer::Table(t) = got else { panic!() };
        assert_eq!(t.n_rows(), 1);
        assert_eq!(t.columns[0].values[0], Value::Str("Oslo".into()));
    }

    #[test]
    fn unique_preserves_first_seen_order() {
        let got = run_snippet(&sales(), "answer = table.unique(city)").unwrap();
        let Answer::List(vs) = got else { panic!() };
        assert_eq!(vs, vec![Value::Str("Oslo".into()), Value::Str("Bergen".into())]);
    }

    #[test]
    fn contains_filter() {
        let got = run_snippet(&sales(), r#"answer = table.filter(contains(city, "erg")).count()"#).unwrap();
        assert!(matches!(got, Answer::Scalar(Value::Int(1))));
    }

    #[test]
    fn not_and_parenthesised_predicates() {
        let src = r#"answer = table.filter(not (city == "Oslo") or amount > 9.0).count()"#;
        let got = run_snippet(&sales(), src).unwrap();
        assert!(matches!(got, Answer::Scalar(Value::Int(2))));
    }

    #[test]
    fn nulls_are_skipped_by_aggregates() {
        let t = Table::new(
            "t",
            vec![Column {
                name: "v".into(),
                values: vec![Value::Int(3), Value::Null, Value::Int(4)],
            }],
        );
        let got = run_snippet(&t, "answer = table.mean(v)").unwrap();
        let Answer::Scalar(Value::Float(m)) = got else { panic!() };
        assert!((m - 3.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_column_is_a_snippet_error() {
        let e = run_snippet(&sales(), "answer = table.sum(revenue)").unwrap_err();
        assert!(e.to_string().contains("revenue"));
    }

    #[test]
    fn unknown_method_is_a_snippet_error() {
        let e = run_snippet(&sales(), "answer = table.explode(city)").unwrap_err();
        assert!(e.to_string().contains("explode"));
    }

    #[test]
    fn sum_of_string_column_is_a_snippet_error() {
        let e = run_snippet(&sales(), "answer = table.sum(city)").unwrap_err();
        assert!(e.to_string().contains("numeric"));
    }

    #[test]
    fn integer_sum_is_exact_beyond_f64_precision() {
        // 2^53 + 1 is not representable as f64; the exact total must survive.
        let t = Table::new(
            "t",
            vec![Column {
                name: "v".into(),
                values: vec![Value::Int((1_i64 << 53) + 1), Value::Int(2)],
            }],
        );
        let got = run_snippet(&t, "answer = table.sum(v)").unwrap();
        assert!(matches!(got, Answer::Scalar(Value::Int(x)) if x == (1_i64 << 53) + 3));
    }

    #[test]
    fn integer_sum_overflow_is_a_snippet_error() {
        let t = Table::new(
            "t",
            vec![Column {
                name: "v".into(),
                values: vec![Value::Int(i64::MAX), Value::Int(1)],
            }],
        );
        let e = run_snippet(&t, "answer = table.sum(v)").unwrap_err();
        assert!(e.to_string().contains("overflow"));
    }
}
