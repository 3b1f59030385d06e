use std::cmp::Ordering;

use bincode::{Decode, Encode};

use crate::engine::{ColumnMeta, EngineError, ErrorCode, ResultSet, SqlValue, flags, types};

use super::parser::{ColumnDef, CompareOp, Expr, Operand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum ColumnKind {
    TinyInt,
    Int,
    Double,
    MediumText,
    Json,
}

impl ColumnKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "TINYINT" | "BOOL" | "BOOLEAN" => Some(ColumnKind::TinyInt),
            "INT" | "INTEGER" | "BIGINT" => Some(ColumnKind::Int),
            "DOUBLE" | "FLOAT" | "REAL" => Some(ColumnKind::Double),
            "MEDIUMTEXT" | "TEXT" | "LONGTEXT" => Some(ColumnKind::MediumText),
            "JSON" => Some(ColumnKind::Json),
            _ => None,
        }
    }

    pub fn type_code(&self) -> u8 {
        match self {
            ColumnKind::TinyInt => types::TINY,
            ColumnKind::Int => types::LONG,
            ColumnKind::Double => types::DOUBLE,
            ColumnKind::MediumText => types::BLOB,
            ColumnKind::Json => types::JSON,
        }
    }

    /// Converts a bound value into this column's storage representation.
    fn coerce(&self, column: &str, value: SqlValue) -> Result<SqlValue, EngineError> {
        let wrong = |v: &SqlValue| {
            EngineError::new(
                ErrorCode::WrongValue,
                format!("incorrect {self:?} value {v} for column '{column}'"),
            )
        };

        match (self, value) {
            (_, SqlValue::Null) => Ok(SqlValue::Null),
            (ColumnKind::TinyInt | ColumnKind::Int, SqlValue::Int(i)) => Ok(SqlValue::Int(i)),
            (ColumnKind::TinyInt | ColumnKind::Int, SqlValue::Double(d)) if d.is_finite() => {
                Ok(SqlValue::Int(d.round() as i64))
            }
            (ColumnKind::TinyInt | ColumnKind::Int, SqlValue::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Int)
                .map_err(|_| wrong(&SqlValue::Text(s))),
            (ColumnKind::Double, SqlValue::Int(i)) => Ok(SqlValue::Double(i as f64)),
            (ColumnKind::Double, SqlValue::Double(d)) => Ok(SqlValue::Double(d)),
            (ColumnKind::Double, SqlValue::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Double)
                .map_err(|_| wrong(&SqlValue::Text(s))),
            (ColumnKind::MediumText, SqlValue::Text(s) | SqlValue::Json(s)) => {
                Ok(SqlValue::Text(s))
            }
            (ColumnKind::MediumText, SqlValue::Int(i)) => Ok(SqlValue::Text(i.to_string())),
            (ColumnKind::MediumText, SqlValue::Double(d)) => Ok(SqlValue::Text(d.to_string())),
            (ColumnKind::Json, SqlValue::Json(s) | SqlValue::Text(s)) => {
                match serde_json::from_str::<serde_json::Value>(&s) {
                    Ok(_) => Ok(SqlValue::Json(s)),
                    Err(e) => Err(EngineError::new(
                        ErrorCode::InvalidJson,
                        format!("invalid JSON text for column '{column}': {e}"),
                    )),
                }
            }
            (ColumnKind::Json, SqlValue::Int(i)) => Ok(SqlValue::Json(i.to_string())),
            (ColumnKind::Json, SqlValue::Double(d)) if d.is_finite() => {
                Ok(SqlValue::Json(d.to_string()))
            }
            (_, other) => Err(wrong(&other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub(crate) struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub auto_increment: bool,
}

impl Column {
    fn flags(&self) -> u16 {
        let mut out = 0;
        if self.not_null {
            out |= flags::NOT_NULL;
        }
        if self.primary_key {
            out |= flags::PRI_KEY;
        }
        if self.unique {
            out |= flags::UNIQUE_KEY;
        }
        if self.auto_increment {
            out |= flags::AUTO_INCREMENT;
        }
        if self.kind == ColumnKind::MediumText {
            out |= flags::BLOB;
        }
        out
    }

    fn meta(&self) -> ColumnMeta {
        ColumnMeta {
            name: self.name.clone(),
            type_code: self.kind.type_code(),
            flags: self.flags(),
        }
    }

    fn is_key(&self) -> bool {
        self.primary_key || self.unique
    }
}

impl From<ColumnDef> for Column {
    fn from(def: ColumnDef) -> Self {
        Self {
            name: def.name,
            kind: def.kind,
            not_null: def.not_null || def.primary_key,
            primary_key: def.primary_key,
            unique: def.unique,
            auto_increment: def.auto_increment,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub(crate) struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<SqlValue>>,
    /// Next auto-increment value.
    pub next_id: u64,
}

impl Table {
    pub fn create(defs: Vec<ColumnDef>, primary_key: Option<String>) -> Result<Self, EngineError> {
        let mut table = Self {
            columns: Vec::new(),
            rows: Vec::new(),
            next_id: 1,
        };
        for def in defs {
            table.push_column(def.into())?;
        }
        if let Some(key) = primary_key {
            let position = table.position(&key)?;
            let column = &mut table.columns[position];
            column.primary_key = true;
            column.not_null = true;
        }
        table.check_auto_increment()?;
        Ok(table)
    }

    pub fn add_columns(&mut self, defs: Vec<ColumnDef>) -> Result<(), EngineError> {
        let mut staged = self.clone();
        for def in defs {
            let column: Column = def.into();
            let fill_auto = column.auto_increment;
            let zero = match column.kind {
                ColumnKind::TinyInt | ColumnKind::Int => SqlValue::Int(0),
                ColumnKind::Double => SqlValue::Double(0.0),
                ColumnKind::MediumText => SqlValue::Text(String::new()),
                ColumnKind::Json => SqlValue::Json("null".into()),
            };
            let not_null = column.not_null;
            staged.push_column(column)?;

            for row in staged.rows.iter_mut() {
                let value = if fill_auto {
                    let id = staged.next_id;
                    staged.next_id += 1;
                    SqlValue::Int(id as i64)
                } else if not_null {
                    zero.clone()
                } else {
                    SqlValue::Null
                };
                row.push(value);
            }
        }
        staged.check_auto_increment()?;
        *self = staged;
        Ok(())
    }

    fn push_column(&mut self, column: Column) -> Result<(), EngineError> {
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(EngineError::new(
                ErrorCode::DuplicateField,
                format!("duplicate column name '{}'", column.name),
            ));
        }
        self.columns.push(column);
        Ok(())
    }

    fn check_auto_increment(&self) -> Result<(), EngineError> {
        let autos = self
            .columns
            .iter()
            .filter(|c| c.auto_increment)
            .collect::<Vec<_>>();
        if autos.len() > 1 || autos.iter().any(|c| !c.is_key()) {
            return Err(EngineError::new(
                ErrorCode::Other,
                "incorrect table definition; there can be only one auto column and it must be defined as a key",
            ));
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Result<usize, EngineError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| {
                EngineError::new(ErrorCode::BadField, format!("unknown column '{name}'"))
            })
    }

    pub fn metadata(&self) -> Vec<ColumnMeta> {
        self.columns.iter().map(Column::meta).collect()
    }

    pub fn select(&self, filter: Option<&Expr>) -> Result<ResultSet, EngineError> {
        let mut rows = Vec::new();
        for row in &self.rows {
            if self.accepts(filter, row)? {
                rows.push(row.clone());
            }
        }
        Ok(ResultSet {
            columns: self.metadata(),
            rows,
            ..Default::default()
        })
    }

    pub fn insert(
        &mut self,
        columns: Vec<String>,
        values: Vec<Operand>,
    ) -> Result<ResultSet, EngineError> {
        if columns.len() != values.len() {
            return Err(EngineError::new(
                ErrorCode::WrongValueCount,
                "column count doesn't match value count",
            ));
        }

        let mut row = vec![SqlValue::Null; self.columns.len()];
        let mut provided = vec![false; self.columns.len()];
        for (name, operand) in columns.iter().zip(values) {
            let position = self.position(name)?;
            if provided[position] {
                return Err(EngineError::new(
                    ErrorCode::DuplicateField,
                    format!("column '{name}' specified twice"),
                ));
            }
            let value = literal(operand)?;
            row[position] = self.columns[position].kind.coerce(name, value)?;
            provided[position] = true;
        }

        let mut insert_id = 0;
        let mut next_id = self.next_id;
        for (position, column) in self.columns.iter().enumerate() {
            if column.auto_increment {
                let explicit = match &row[position] {
                    SqlValue::Null | SqlValue::Int(0) => None,
                    SqlValue::Int(id) => Some(*id),
                    _ => continue,
                };
                match explicit {
                    None => {
                        row[position] = SqlValue::Int(next_id as i64);
                        insert_id = next_id;
                        next_id += 1;
                    }
                    Some(id) if id > 0 => {
                        insert_id = id as u64;
                        next_id = next_id.max(id as u64 + 1);
                    }
                    Some(_) => {}
                }
            } else if column.not_null && row[position].is_null() {
                return Err(EngineError::new(
                    ErrorCode::NoDefault,
                    format!("field '{}' doesn't have a default value", column.name),
                ));
            }
        }

        self.check_unique(&row, None)?;
        self.rows.push(row);
        self.next_id = next_id;

        Ok(ResultSet {
            affected_rows: 1,
            insert_id,
            ..Default::default()
        })
    }

    pub fn update(
        &mut self,
        assignments: Vec<(String, Operand)>,
        filter: Option<&Expr>,
    ) -> Result<ResultSet, EngineError> {
        let mut resolved = Vec::with_capacity(assignments.len());
        for (name, operand) in assignments {
            let position = self.position(&name)?;
            let column = &self.columns[position];
            let value = column.kind.coerce(&name, literal(operand)?)?;
            if column.not_null && value.is_null() {
                return Err(EngineError::new(
                    ErrorCode::WrongValue,
                    format!("column '{name}' cannot be null"),
                ));
            }
            resolved.push((position, value));
        }

        let mut matched = Vec::new();
        for (index, row) in self.rows.iter().enumerate() {
            if self.accepts(filter, row)? {
                matched.push(index);
            }
        }

        let mut staged = self.rows.clone();
        for index in &matched {
            for (position, value) in &resolved {
                staged[*index][*position] = value.clone();
            }
        }
        for index in &matched {
            check_unique(&self.columns, &staged, &staged[*index], Some(*index))?;
        }
        self.rows = staged;

        Ok(ResultSet {
            affected_rows: matched.len() as u64,
            ..Default::default()
        })
    }

    pub fn delete(&mut self, filter: Option<&Expr>) -> Result<ResultSet, EngineError> {
        let mut doomed = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            doomed.push(self.accepts(filter, row)?);
        }
        let removed = doomed.iter().filter(|d| **d).count() as u64;

        let mut doomed = doomed.into_iter();
        self.rows.retain(|_| !doomed.next().unwrap_or(false));

        Ok(ResultSet {
            affected_rows: removed,
            ..Default::default()
        })
    }

    fn accepts(&self, filter: Option<&Expr>, row: &[SqlValue]) -> Result<bool, EngineError> {
        accepts(&self.columns, filter, row)
    }

    fn check_unique(&self, row: &[SqlValue], skip: Option<usize>) -> Result<(), EngineError> {
        check_unique(&self.columns, &self.rows, row, skip)
    }
}

fn check_unique(
    columns: &[Column],
    rows: &[Vec<SqlValue>],
    row: &[SqlValue],
    skip: Option<usize>,
) -> Result<(), EngineError> {
    for (position, column) in columns.iter().enumerate() {
        if !column.is_key() || row[position].is_null() {
            continue;
        }
        let duplicate = rows
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != skip)
            .any(|(_, other)| compare(&other[position], &row[position]) == Some(Ordering::Equal));
        if duplicate {
            return Err(EngineError::new(
                ErrorCode::DuplicateEntry,
                format!(
                    "duplicate entry '{}' for key '{}'",
                    row[position], column.name
                ),
            ));
        }
    }
    Ok(())
}

fn literal(operand: Operand) -> Result<SqlValue, EngineError> {
    match operand {
        Operand::Literal(value) => Ok(value),
        Operand::Column(name) => Err(EngineError::new(
            ErrorCode::Parse,
            format!("column reference '{name}' not allowed here"),
        )),
    }
}

fn accepts(
    columns: &[Column],
    filter: Option<&Expr>,
    row: &[SqlValue],
) -> Result<bool, EngineError> {
    match filter {
        None => Ok(true),
        Some(expr) => Ok(evaluate(columns, expr, row)? == Some(true)),
    }
}

fn resolve<'a>(
    columns: &[Column],
    operand: &'a Operand,
    row: &'a [SqlValue],
) -> Result<&'a SqlValue, EngineError> {
    match operand {
        Operand::Literal(value) => Ok(value),
        Operand::Column(name) => columns
            .iter()
            .position(|c| &c.name == name)
            .map(|position| &row[position])
            .ok_or_else(|| {
                EngineError::new(ErrorCode::BadField, format!("unknown column '{name}'"))
            }),
    }
}

/// Three-valued predicate evaluation; `None` is SQL UNKNOWN.
fn evaluate(columns: &[Column], expr: &Expr, row: &[SqlValue]) -> Result<Option<bool>, EngineError> {
    Ok(match expr {
        Expr::And(left, right) => {
            match (evaluate(columns, left, row)?, evaluate(columns, right, row)?) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }
        }
        Expr::Or(left, right) => {
            match (evaluate(columns, left, row)?, evaluate(columns, right, row)?) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }
        Expr::Not(inner) => evaluate(columns, inner, row)?.map(|b| !b),
        Expr::Compare { left, op, right } => {
            let left = resolve(columns, left, row)?;
            let right = resolve(columns, right, row)?;
            compare(left, right).map(|ordering| match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
            })
        }
        Expr::IsNull { operand, negated } => {
            let is_null = resolve(columns, operand, row)?.is_null();
            Some(is_null != *negated)
        }
        Expr::InList {
            operand,
            list,
            negated,
        } => {
            let value = resolve(columns, operand, row)?;
            let mut unknown = false;
            let mut found = false;
            for item in list {
                match compare(value, resolve(columns, item, row)?) {
                    Some(Ordering::Equal) => {
                        found = true;
                        break;
                    }
                    Some(_) => {}
                    None => unknown = true,
                }
            }
            if found {
                Some(!*negated)
            } else if unknown {
                None
            } else {
                Some(*negated)
            }
        }
    })
}

fn as_number(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Int(i) => Some(*i as f64),
        SqlValue::Double(d) => Some(*d),
        SqlValue::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Compares two values, `None` when either side is NULL or they are incomparable.
fn compare(left: &SqlValue, right: &SqlValue) -> Option<Ordering> {
    match (left, right) {
        (SqlValue::Null, _) | (_, SqlValue::Null) => None,
        (SqlValue::Int(a), SqlValue::Int(b)) => Some(a.cmp(b)),
        (SqlValue::Text(a) | SqlValue::Json(a), SqlValue::Text(b) | SqlValue::Json(b)) => {
            Some(a.cmp(b))
        }
        (a, b) => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, kind: ColumnKind) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            kind,
            not_null: false,
            auto_increment: false,
            unique: false,
            primary_key: false,
        }
    }

    fn people() -> Table {
        let id = ColumnDef {
            not_null: true,
            auto_increment: true,
            ..def("_id", ColumnKind::Int)
        };
        let mut table = Table::create(vec![id], Some("_id".into())).unwrap();
        table
            .add_columns(vec![
                def("name", ColumnKind::MediumText),
                def("age", ColumnKind::Double),
            ])
            .unwrap();
        table
    }

    fn insert(table: &mut Table, name: &str, age: SqlValue) -> u64 {
        table
            .insert(
                vec!["name".into(), "age".into()],
                vec![
                    Operand::Literal(SqlValue::Text(name.into())),
                    Operand::Literal(age),
                ],
            )
            .unwrap()
            .insert_id
    }

    #[test]
    fn auto_increment_assigns_ids() {
        let mut table = people();
        assert_eq!(insert(&mut table, "a", SqlValue::Int(1)), 1);
        assert_eq!(insert(&mut table, "b", SqlValue::Int(2)), 2);

        let result = table.select(None).unwrap();
        assert_eq!(result.rows[1][0], SqlValue::Int(2));
        assert_eq!(result.rows[1][2], SqlValue::Double(2.0));
    }

    #[test]
    fn metadata_reports_flags() {
        let meta = people().metadata();
        assert_eq!(meta[0].type_code, types::LONG);
        assert!(flags::has(meta[0].flags, flags::AUTO_INCREMENT));
        assert!(flags::has(meta[0].flags, flags::PRI_KEY));
        assert!(!flags::has(meta[1].flags, flags::NOT_NULL));
    }

    #[test]
    fn null_comparisons_are_unknown() {
        let mut table = people();
        insert(&mut table, "a", SqlValue::Null);
        insert(&mut table, "b", SqlValue::Int(5));

        let ne = Expr::Compare {
            left: Operand::Column("age".into()),
            op: CompareOp::Ne,
            right: Operand::Literal(SqlValue::Int(5)),
        };
        assert!(table.select(Some(&ne)).unwrap().rows.is_empty());

        let not_in = Expr::InList {
            operand: Operand::Column("age".into()),
            list: vec![Operand::Literal(SqlValue::Int(7))],
            negated: true,
        };
        assert_eq!(table.select(Some(&not_in)).unwrap().rows.len(), 1);
    }

    #[test]
    fn added_auto_column_fills_existing_rows() {
        let mut table = Table::create(vec![def("name", ColumnKind::MediumText)], None).unwrap();
        table
            .insert(
                vec!["name".into()],
                vec![Operand::Literal(SqlValue::Text("a".into()))],
            )
            .unwrap();

        table
            .add_columns(vec![ColumnDef {
                not_null: true,
                auto_increment: true,
                unique: true,
                ..def("_id", ColumnKind::Int)
            }])
            .unwrap();
        assert_eq!(table.rows[0][1], SqlValue::Int(1));
        assert_eq!(table.next_id, 2);
    }

    #[test]
    #[should_panic(expected = "DuplicateField")]
    fn duplicate_column_rejected() {
        let mut table = people();
        table
            .add_columns(vec![def("name", ColumnKind::MediumText)])
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "InvalidJson")]
    fn invalid_json_rejected() {
        let mut table = people();
        table.add_columns(vec![def("tags", ColumnKind::Json)]).unwrap();
        table
            .insert(
                vec!["tags".into()],
                vec![Operand::Literal(SqlValue::Json("[1,".into()))],
            )
            .unwrap();
    }

    #[test]
    fn update_and_delete_by_filter() {
        let mut table = people();
        insert(&mut table, "a", SqlValue::Int(1));
        insert(&mut table, "b", SqlValue::Int(2));

        let by_id = Expr::Compare {
            left: Operand::Column("_id".into()),
            op: CompareOp::Eq,
            right: Operand::Literal(SqlValue::Int(2)),
        };
        let updated = table
            .update(
                vec![("age".into(), Operand::Literal(SqlValue::Int(9)))],
                Some(&by_id),
            )
            .unwrap();
        assert_eq!(updated.affected_rows, 1);
        assert_eq!(table.rows[1][2], SqlValue::Double(9.0));

        let deleted = table.delete(Some(&by_id)).unwrap();
        assert_eq!(deleted.affected_rows, 1);
        assert_eq!(table.rows.len(), 1);
    }
}
