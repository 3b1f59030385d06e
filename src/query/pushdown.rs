//! Criteria to `WHERE` clause translation.
//!
//! Only a safe subset of the criteria is pushed to the engine: conditions on scalar,
//! non-auto-increment columns known to the catalog, compared against literals of the
//! column's own type. Everything else is left out of the clause, which only widens the
//! selection; the executor re-checks every row against the full criteria.
//!
//! Two column kinds need care:
//!
//! - Boolean columns decode any non-zero value as `true`, so booleans are compared
//!   against zero rather than bound as `1`.
//! - Text columns compare under the engine's collation, which may fold case and
//!   trailing spaces. Equality and `IN` then only widen the selection and are pushed.
//!   Inequality, `NOT IN` and ranges could drop matches and stay in the evaluator.
use serde_json::Value;

use crate::{
    catalog::{Catalog, ColumnInfo, types::ShortType},
    codec::flatten_value,
    document::{Document, ValueShape},
    engine::SqlValue,
    evaluator::is_operator_expression,
    sql::Sql,
};

/// Builds the filter for `criteria`; `None` means the engine must return every row.
pub fn pushdown(criteria: &Document, catalog: &Catalog) -> Option<Sql> {
    conjunction(criteria, catalog)
}

fn combine(parts: Vec<Sql>, separator: &'static str) -> Option<Sql> {
    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => {
            let mut sql = Sql::new("(");
            sql.append(Sql::join(parts, separator)).push(")");
            Some(sql)
        }
    }
}

fn conjunction(criteria: &Document, catalog: &Catalog) -> Option<Sql> {
    let mut parts = Vec::new();
    for (key, condition) in criteria {
        let part = match key.as_str() {
            "$and" => and_clauses(condition, catalog),
            "$or" => or_clauses(condition, catalog),
            op if op.starts_with('$') => None,
            field => field_condition(field, condition, catalog),
        };
        parts.extend(part);
    }
    combine(parts, " AND ")
}

fn and_clauses(condition: &Value, catalog: &Catalog) -> Option<Sql> {
    let clauses = condition.as_array()?;
    let parts = clauses
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|clause| conjunction(clause, catalog))
        .collect();
    combine(parts, " AND ")
}

/// A disjunction restricts rows only if every branch does.
fn or_clauses(condition: &Value, catalog: &Catalog) -> Option<Sql> {
    let clauses = condition.as_array()?;
    if clauses.is_empty() {
        return None;
    }
    let mut parts = Vec::with_capacity(clauses.len());
    for clause in clauses {
        parts.push(conjunction(clause.as_object()?, catalog)?);
    }
    combine(parts, " OR ")
}

fn pushable<'a>(catalog: &'a Catalog, field: &str) -> Option<&'a ColumnInfo> {
    catalog
        .field(field)
        .filter(|c| c.short_type.is_scalar() && !c.is_auto_increment)
}

/// Binds a literal only when it has the column's own type.
fn literal(column: &ColumnInfo, value: &Value) -> Option<SqlValue> {
    column
        .short_type
        .accepts(ValueShape::of(value))
        .then(|| flatten_value(value))
}

fn field_condition(field: &str, condition: &Value, catalog: &Catalog) -> Option<Sql> {
    let column = pushable(catalog, field)?;

    match condition {
        Value::Object(operators) if is_operator_expression(condition) => {
            let parts = operators
                .iter()
                .filter_map(|(operator, argument)| operator_condition(column, operator, argument))
                .collect();
            combine(parts, " AND ")
        }
        _ => equals(column, condition),
    }
}

/// `= 0` for `false` and `<> 0` for `true`.
fn truth(column: &ColumnInfo, value: &Value, negated: bool) -> Option<Sql> {
    let symbol = match (value.as_bool()?, negated) {
        (true, false) | (false, true) => " <> ",
        (false, false) | (true, true) => " = ",
    };
    let mut sql = Sql::default();
    sql.identifier(column.name.as_str())
        .push(symbol)
        .value(SqlValue::Int(0));
    Some(sql)
}

fn equals(column: &ColumnInfo, value: &Value) -> Option<Sql> {
    let mut sql = Sql::new("(");
    if value.is_null() {
        sql.identifier(column.name.as_str()).push(" IS NULL)");
    } else if column.short_type == ShortType::Boolean {
        sql.append(truth(column, value, false)?).push(")");
    } else {
        sql.identifier(column.name.as_str())
            .push(" = ")
            .value(literal(column, value)?)
            .push(")");
    }
    Some(sql)
}

fn not_equals(column: &ColumnInfo, value: &Value) -> Option<Sql> {
    let mut sql = Sql::new("(");
    sql.identifier(column.name.as_str());
    if value.is_null() {
        sql.push(" IS NOT NULL)");
        return Some(sql);
    }

    let compared = match column.short_type {
        ShortType::Boolean => truth(column, value, true)?,
        ShortType::Number => {
            let mut compared = Sql::default();
            compared
                .identifier(column.name.as_str())
                .push(" <> ")
                .value(literal(column, value)?);
            compared
        }
        _ => return None,
    };
    sql.push(" IS NULL OR ").append(compared).push(")");
    Some(sql)
}

fn range(column: &ColumnInfo, symbol: &'static str, value: &Value) -> Option<Sql> {
    if column.short_type != ShortType::Number {
        return None;
    }
    let bound = literal(column, value)?;
    let mut sql = Sql::new("(");
    sql.identifier(column.name.as_str())
        .push(symbol)
        .value(bound)
        .push(")");
    Some(sql)
}

fn value_list(values: Vec<SqlValue>) -> Sql {
    let parts = values
        .into_iter()
        .map(|value| {
            let mut sql = Sql::default();
            sql.value(value);
            sql
        })
        .collect();
    Sql::join(parts, ", ")
}

fn in_list(column: &ColumnInfo, argument: &Value) -> Option<Sql> {
    if column.short_type == ShortType::Boolean {
        return None;
    }
    let items = argument.as_array()?;
    if items.is_empty() {
        return Some(Sql::new("(1 = 0)"));
    }

    let mut values = Vec::with_capacity(items.len());
    let mut with_null = false;
    for item in items {
        if item.is_null() {
            with_null = true;
        } else {
            values.push(literal(column, item)?);
        }
    }

    let mut sql = Sql::new("(");
    if !values.is_empty() {
        sql.identifier(column.name.as_str())
            .push(" IN (")
            .append(value_list(values))
            .push(")");
        if with_null {
            sql.push(" OR ");
        }
    }
    if with_null {
        sql.identifier(column.name.as_str()).push(" IS NULL");
    }
    sql.push(")");
    Some(sql)
}

fn not_in_list(column: &ColumnInfo, argument: &Value) -> Option<Sql> {
    if column.short_type != ShortType::Number {
        return None;
    }
    let items = argument.as_array()?;
    if items.is_empty() {
        return None;
    }
    let values = items
        .iter()
        .map(|item| match item {
            Value::Null => None,
            _ => literal(column, item),
        })
        .collect::<Option<Vec<_>>>()?;

    let mut sql = Sql::new("(");
    sql.identifier(column.name.as_str())
        .push(" IS NULL OR ")
        .identifier(column.name.as_str())
        .push(" NOT IN (")
        .append(value_list(values))
        .push("))");
    Some(sql)
}

fn operator_condition(column: &ColumnInfo, operator: &str, argument: &Value) -> Option<Sql> {
    match operator {
        "$eq" => equals(column, argument),
        "$ne" => not_equals(column, argument),
        "$gt" => range(column, " > ", argument),
        "$gte" => range(column, " >= ", argument),
        "$lt" => range(column, " < ", argument),
        "$lte" => range(column, " <= ", argument),
        "$in" => in_list(column, argument),
        "$nin" => not_in_list(column, argument),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        catalog::migrate::ensure_schema,
        engine::{Connector, memory::MemoryEngine},
        settings::Settings,
    };

    /// Catalog for a table with `_id`, `name` (text), `age` (number), `ok` (boolean)
    /// and `tags` (JSON) columns.
    fn catalog() -> Catalog {
        let settings = Settings::new("db", "t", "root", "").with_modify_schema(true);
        let engine = MemoryEngine::new();
        let mut conn = engine.connect(&settings).unwrap();
        let mut catalog = Catalog::new();
        let document = json!({"name": "a", "age": 1, "ok": true, "tags": ["x"]});
        ensure_schema(
            conn.as_mut(),
            &mut catalog,
            &settings,
            document.as_object().unwrap(),
        )
        .unwrap();
        catalog
    }

    fn push(criteria: Value) -> Option<Sql> {
        pushdown(criteria.as_object().unwrap(), &catalog())
    }

    #[test]
    fn literal_equality() {
        let sql = push(json!({"name": "ann", "age": 3})).unwrap();

        assert_eq!(sql.text(), "((?? = ?) AND (?? = ?))");
        assert_eq!(
            sql.values(),
            vec![&SqlValue::Int(3), &SqlValue::Text("ann".into())]
        );
    }

    #[test]
    fn booleans_compare_against_zero() {
        let sql = push(json!({"ok": false})).unwrap();
        assert_eq!(sql.text(), "(?? = ?)");
        assert_eq!(sql.values(), vec![&SqlValue::Int(0)]);

        let sql = push(json!({"ok": true})).unwrap();
        assert_eq!(sql.text(), "(?? <> ?)");
        assert_eq!(sql.values(), vec![&SqlValue::Int(0)]);

        let sql = push(json!({"ok": {"$ne": true}})).unwrap();
        assert_eq!(sql.text(), "(?? IS NULL OR ?? = ?)");
        assert_eq!(sql.values(), vec![&SqlValue::Int(0)]);

        let sql = push(json!({"ok": {"$ne": false}})).unwrap();
        assert_eq!(sql.text(), "(?? IS NULL OR ?? <> ?)");

        assert!(push(json!({"ok": {"$in": [true]}})).is_none());
        assert!(push(json!({"ok": {"$nin": [false]}})).is_none());
    }

    #[test]
    fn null_literals() {
        assert_eq!(push(json!({"age": null})).unwrap().text(), "(?? IS NULL)");
        assert_eq!(
            push(json!({"age": {"$ne": null}})).unwrap().text(),
            "(?? IS NOT NULL)"
        );
    }

    #[test]
    fn inequality_keeps_nulls() {
        let sql = push(json!({"age": {"$ne": 3}})).unwrap();
        assert_eq!(sql.text(), "(?? IS NULL OR ?? <> ?)");
    }

    #[test]
    fn text_pushes_only_equality_and_membership() {
        assert_eq!(push(json!({"name": "ann"})).unwrap().text(), "(?? = ?)");
        assert_eq!(
            push(json!({"name": {"$in": ["ann", "bea"]}}))
                .unwrap()
                .text(),
            "(?? IN (?, ?))"
        );

        let cases = vec![
            json!({"name": {"$ne": "ann"}}),
            json!({"name": {"$nin": ["ann"]}}),
            json!({"name": {"$gt": "a"}}),
            json!({"name": {"$lte": "z"}}),
        ];
        for criteria in cases {
            assert!(push(criteria.clone()).is_none(), "{criteria}");
        }
    }

    #[test]
    fn ranges() {
        let sql = push(json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        assert_eq!(sql.text(), "((?? >= ?) AND (?? < ?))");

        assert!(push(json!({"ok": {"$gt": false}})).is_none());
        assert!(push(json!({"age": {"$gt": "18"}})).is_none());
    }

    #[test]
    fn membership() {
        assert_eq!(
            push(json!({"age": {"$in": [1, 2, null]}})).unwrap().text(),
            "(?? IN (?, ?) OR ?? IS NULL)"
        );
        assert_eq!(
            push(json!({"age": {"$in": []}})).unwrap().text(),
            "(1 = 0)"
        );
        assert_eq!(
            push(json!({"age": {"$nin": [1]}})).unwrap().text(),
            "(?? IS NULL OR ?? NOT IN (?))"
        );
        assert!(push(json!({"age": {"$nin": [1, null]}})).is_none());
        assert!(push(json!({"age": {"$in": [1, "2"]}})).is_none());
    }

    #[test]
    fn unpushable_conditions_omitted() {
        let cases = vec![
            json!({"_id": 1}),
            json!({"tags": "x"}),
            json!({"unknown": 1}),
            json!({"address.city": "Oslo"}),
            json!({"name": 5}),
            json!({"name": {"$exists": true}}),
            json!({"age": {"$not": {"$gt": 1}}}),
            json!({"$nor": [{"age": 1}]}),
            json!({"$where": "x"}),
        ];

        for criteria in cases {
            assert!(push(criteria.clone()).is_none(), "{criteria}");
        }
    }

    #[test]
    fn disjunctions_need_every_branch() {
        let sql = push(json!({"$or": [{"age": 1}, {"name": "b"}]})).unwrap();
        assert_eq!(sql.text(), "((?? = ?) OR (?? = ?))");

        assert!(push(json!({"$or": [{"age": 1}, {"tags": "x"}]})).is_none());
    }

    #[test]
    fn conjunctions_keep_translatable_parts() {
        let sql = push(json!({"$and": [{"age": 1}, {"tags": "x"}], "name": {"$exists": 1}}))
            .unwrap();
        assert_eq!(sql.text(), "(?? = ?)");
    }

    #[test]
    fn identifiers_are_placeholders() {
        let sql = push(json!({"name": "x`; DROP TABLE t; --"})).unwrap();

        assert!(!sql.text().contains("name"));
        assert!(!sql.text().contains("DROP"));
    }
}
