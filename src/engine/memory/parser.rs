//! Statement parsing for the embedded engine.
//!
//! Statements are rendered with their identifiers escaped (see [`Sql::escaped`]) and
//! parsed with `sqlparser` in the MySQL dialect. The resulting syntax tree is lowered
//! into the small statement set the engine executes, binding each `?` placeholder to
//! the next bound value in statement order.
use sqlparser::{
    ast::{
        self, AlterTableOperation, BinaryOperator, ColumnOption, ObjectName, ObjectType,
        SelectItem, SetExpr, TableConstraint, TableFactor, TableWithJoins, UnaryOperator,
    },
    dialect::MySqlDialect,
    parser::{Parser, ParserError},
};

use crate::{
    engine::{EngineError, ErrorCode, SqlValue},
    sql::Sql,
};

use super::table::ColumnKind;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TableRef {
    pub database: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub not_null: bool,
    pub auto_increment: bool,
    pub unique: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Column(String),
    Literal(SqlValue),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    InList {
        operand: Operand,
        list: Vec<Operand>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    Select {
        table: TableRef,
        filter: Option<Expr>,
    },
    CreateTable {
        table: TableRef,
        columns: Vec<ColumnDef>,
        primary_key: Option<String>,
    },
    AlterTable {
        table: TableRef,
        columns: Vec<ColumnDef>,
    },
    Insert {
        table: TableRef,
        columns: Vec<String>,
        values: Vec<Operand>,
    },
    Update {
        table: TableRef,
        assignments: Vec<(String, Operand)>,
        filter: Option<Expr>,
    },
    Delete {
        table: TableRef,
        filter: Option<Expr>,
    },
    DropTable {
        table: TableRef,
    },
}

impl Statement {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Statement::Select { .. })
    }
}

fn parse_error(message: impl Into<String>) -> EngineError {
    EngineError::new(ErrorCode::Parse, message)
}

impl From<ParserError> for EngineError {
    fn from(err: ParserError) -> Self {
        parse_error(err.to_string())
    }
}

pub(crate) fn parse(sql: &Sql) -> Result<Statement, EngineError> {
    let mut statements = Parser::parse_sql(&MySqlDialect {}, &sql.escaped())?;
    if statements.len() != 1 {
        return Err(parse_error(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    }

    let mut binder = Binder {
        values: sql.values().into_iter().cloned().collect::<Vec<_>>().into_iter(),
    };
    let statement = binder.statement(statements.remove(0))?;
    if binder.values.next().is_some() {
        return Err(parse_error("more bound values than placeholders"));
    }
    Ok(statement)
}

fn table_ref(name: ObjectName) -> Result<TableRef, EngineError> {
    let mut parts = name.0.into_iter().map(|ident| ident.value);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(table), None, None) => Ok(TableRef {
            database: None,
            table,
        }),
        (Some(database), Some(table), None) => Ok(TableRef {
            database: Some(database),
            table,
        }),
        _ => Err(parse_error("expected [database.]table")),
    }
}

fn relation(table: TableWithJoins) -> Result<TableRef, EngineError> {
    if !table.joins.is_empty() {
        return Err(parse_error("joins are not supported"));
    }
    match table.relation {
        TableFactor::Table { name, .. } => table_ref(name),
        other => Err(parse_error(format!("unsupported table source '{other}'"))),
    }
}

fn single_relation(from: Vec<TableWithJoins>) -> Result<TableRef, EngineError> {
    let mut from = from.into_iter();
    match (from.next(), from.next()) {
        (Some(table), None) => relation(table),
        _ => Err(parse_error("expected exactly one table")),
    }
}

fn column_def(def: ast::ColumnDef) -> Result<ColumnDef, EngineError> {
    // Display width and other modifiers are ignored, e.g. INT(11).
    let type_name = def.data_type.to_string();
    let keyword = type_name
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_uppercase();
    let kind = ColumnKind::from_keyword(&keyword)
        .ok_or_else(|| parse_error(format!("unsupported column type '{type_name}'")))?;

    let mut column = ColumnDef {
        name: def.name.value,
        kind,
        not_null: false,
        auto_increment: false,
        unique: false,
        primary_key: false,
    };

    for option in def.options {
        match option.option {
            ColumnOption::NotNull => column.not_null = true,
            ColumnOption::Null => column.not_null = false,
            ColumnOption::Default(_) => {}
            ColumnOption::Unique { is_primary, .. } => {
                if is_primary {
                    column.primary_key = true;
                } else {
                    column.unique = true;
                }
            }
            ColumnOption::DialectSpecific(tokens)
                if tokens
                    .iter()
                    .any(|t| t.to_string().eq_ignore_ascii_case("AUTO_INCREMENT")) =>
            {
                column.auto_increment = true;
            }
            other => {
                return Err(parse_error(format!("unsupported column option '{other}'")));
            }
        }
    }

    Ok(column)
}

fn compare_op(op: &BinaryOperator) -> Result<CompareOp, EngineError> {
    match op {
        BinaryOperator::Eq => Ok(CompareOp::Eq),
        BinaryOperator::NotEq => Ok(CompareOp::Ne),
        BinaryOperator::Lt => Ok(CompareOp::Lt),
        BinaryOperator::LtEq => Ok(CompareOp::Le),
        BinaryOperator::Gt => Ok(CompareOp::Gt),
        BinaryOperator::GtEq => Ok(CompareOp::Ge),
        other => Err(parse_error(format!("unsupported operator '{other}'"))),
    }
}

fn number(text: &str) -> Result<SqlValue, EngineError> {
    match text.parse::<i64>() {
        Ok(i) => Ok(SqlValue::Int(i)),
        Err(_) => text
            .parse::<f64>()
            .map(SqlValue::Double)
            .map_err(|e| parse_error(format!("invalid number '{text}': {e}"))),
    }
}

/// Lowers syntax trees, binding placeholders in the order they are visited.
struct Binder {
    values: std::vec::IntoIter<SqlValue>,
}

impl Binder {
    fn statement(&mut self, statement: ast::Statement) -> Result<Statement, EngineError> {
        match statement {
            ast::Statement::Query(query) => self.select(*query),
            ast::Statement::CreateTable {
                name,
                columns,
                constraints,
                ..
            } => {
                let mut primary_key = None;
                for constraint in constraints {
                    match constraint {
                        TableConstraint::Unique {
                            columns: key,
                            is_primary: true,
                            ..
                        } if key.len() == 1 => {
                            primary_key = key.into_iter().next().map(|c| c.value);
                        }
                        other => {
                            return Err(parse_error(format!(
                                "unsupported table constraint '{other}'"
                            )));
                        }
                    }
                }

                Ok(Statement::CreateTable {
                    table: table_ref(name)?,
                    columns: columns
                        .into_iter()
                        .map(column_def)
                        .collect::<Result<_, _>>()?,
                    primary_key,
                })
            }
            ast::Statement::AlterTable {
                name, operations, ..
            } => {
                let columns = operations
                    .into_iter()
                    .map(|operation| match operation {
                        AlterTableOperation::AddColumn { column_def: def, .. } => column_def(def),
                        other => Err(parse_error(format!("unsupported alteration '{other}'"))),
                    })
                    .collect::<Result<_, _>>()?;

                Ok(Statement::AlterTable {
                    table: table_ref(name)?,
                    columns,
                })
            }
            ast::Statement::Insert {
                table_name,
                columns,
                source,
                ..
            } => {
                let source = source.ok_or_else(|| parse_error("INSERT without VALUES"))?;
                let ast::Query { body, .. } = *source;
                let rows = match *body {
                    SetExpr::Values(values) => values.rows,
                    other => return Err(parse_error(format!("unsupported INSERT source '{other}'"))),
                };
                let mut rows = rows.into_iter();
                let row = match (rows.next(), rows.next()) {
                    (Some(row), None) => row,
                    _ => return Err(parse_error("expected exactly one VALUES row")),
                };

                Ok(Statement::Insert {
                    table: table_ref(table_name)?,
                    columns: columns.into_iter().map(|c| c.value).collect(),
                    values: row
                        .into_iter()
                        .map(|value| self.operand(value))
                        .collect::<Result<_, _>>()?,
                })
            }
            ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let table = relation(table)?;
                let mut bound = Vec::with_capacity(assignments.len());
                for assignment in assignments {
                    let column = assignment
                        .id
                        .into_iter()
                        .last()
                        .map(|ident| ident.value)
                        .ok_or_else(|| parse_error("empty assignment target"))?;
                    bound.push((column, self.operand(assignment.value)?));
                }

                Ok(Statement::Update {
                    table,
                    assignments: bound,
                    filter: self.filter(selection)?,
                })
            }
            ast::Statement::Delete {
                from, selection, ..
            } => Ok(Statement::Delete {
                table: single_relation(from)?,
                filter: self.filter(selection)?,
            }),
            ast::Statement::Drop {
                object_type: ObjectType::Table,
                names,
                ..
            } => {
                let mut names = names.into_iter();
                match (names.next(), names.next()) {
                    (Some(name), None) => Ok(Statement::DropTable {
                        table: table_ref(name)?,
                    }),
                    _ => Err(parse_error("expected exactly one table to drop")),
                }
            }
            other => Err(parse_error(format!("unsupported statement '{other}'"))),
        }
    }

    fn select(&mut self, query: ast::Query) -> Result<Statement, EngineError> {
        let ast::Query { body, .. } = query;
        let select = match *body {
            SetExpr::Select(select) => *select,
            other => return Err(parse_error(format!("unsupported query '{other}'"))),
        };
        if !matches!(select.projection.as_slice(), [SelectItem::Wildcard(_)]) {
            return Err(parse_error("only SELECT * is supported"));
        }

        Ok(Statement::Select {
            table: single_relation(select.from)?,
            filter: self.filter(select.selection)?,
        })
    }

    fn filter(&mut self, selection: Option<ast::Expr>) -> Result<Option<Expr>, EngineError> {
        selection.map(|expr| self.condition(expr)).transpose()
    }

    fn bind(&mut self) -> Result<SqlValue, EngineError> {
        self.values
            .next()
            .ok_or_else(|| parse_error("more placeholders than bound values"))
    }

    fn condition(&mut self, expr: ast::Expr) -> Result<Expr, EngineError> {
        match expr {
            ast::Expr::Nested(inner) => self.condition(*inner),
            ast::Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => Ok(Expr::And(
                Box::new(self.condition(*left)?),
                Box::new(self.condition(*right)?),
            )),
            ast::Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } => Ok(Expr::Or(
                Box::new(self.condition(*left)?),
                Box::new(self.condition(*right)?),
            )),
            ast::Expr::BinaryOp { left, op, right } => {
                let op = compare_op(&op)?;
                let left = self.operand(*left)?;
                Ok(Expr::Compare {
                    left,
                    op,
                    right: self.operand(*right)?,
                })
            }
            ast::Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => Ok(Expr::Not(Box::new(self.condition(*expr)?))),
            ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
                operand: self.operand(*inner)?,
                negated: false,
            }),
            ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
                operand: self.operand(*inner)?,
                negated: true,
            }),
            ast::Expr::InList {
                expr,
                list,
                negated,
            } => {
                let operand = self.operand(*expr)?;
                Ok(Expr::InList {
                    operand,
                    list: list
                        .into_iter()
                        .map(|item| self.operand(item))
                        .collect::<Result<_, _>>()?,
                    negated,
                })
            }
            other => Err(parse_error(format!("unsupported condition '{other}'"))),
        }
    }

    fn operand(&mut self, expr: ast::Expr) -> Result<Operand, EngineError> {
        match expr {
            ast::Expr::Identifier(ident) => Ok(Operand::Column(ident.value)),
            ast::Expr::CompoundIdentifier(parts) => parts
                .into_iter()
                .last()
                .map(|ident| Operand::Column(ident.value))
                .ok_or_else(|| parse_error("empty column reference")),
            ast::Expr::Nested(inner) => self.operand(*inner),
            ast::Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match self.operand(*expr)? {
                Operand::Literal(SqlValue::Int(i)) => Ok(Operand::Literal(SqlValue::Int(-i))),
                Operand::Literal(SqlValue::Double(d)) => {
                    Ok(Operand::Literal(SqlValue::Double(-d)))
                }
                other => Err(parse_error(format!("cannot negate {other:?}"))),
            },
            ast::Expr::Value(value) => {
                let literal = match value {
                    ast::Value::Placeholder(_) => self.bind()?,
                    ast::Value::Number(text, _) => number(&text)?,
                    ast::Value::Null => SqlValue::Null,
                    ast::Value::Boolean(b) => SqlValue::Int(i64::from(b)),
                    ast::Value::SingleQuotedString(s) => SqlValue::Text(s),
                    other => return Err(parse_error(format!("unsupported literal '{other}'"))),
                };
                Ok(Operand::Literal(literal))
            }
            other => Err(parse_error(format!("expected operand, found '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef {
            database: Some("db".into()),
            table: "t".into(),
        }
    }

    #[test]
    fn parse_introspection_select() {
        let mut sql = Sql::new("SELECT * FROM ");
        sql.table("db", "t").push(" WHERE (1 = 0);");

        let statement = parse(&sql).unwrap();
        assert_eq!(
            statement,
            Statement::Select {
                table: table(),
                filter: Some(Expr::Compare {
                    left: Operand::Literal(SqlValue::Int(1)),
                    op: CompareOp::Eq,
                    right: Operand::Literal(SqlValue::Int(0)),
                }),
            }
        );
    }

    #[test]
    fn parse_create_table() {
        let mut sql = Sql::new("CREATE TABLE ");
        sql.table("db", "t")
            .push(" (")
            .identifier("_id")
            .push(" INT(11) NOT NULL AUTO_INCREMENT, PRIMARY KEY (")
            .identifier("_id")
            .push("))");

        match parse(&sql).unwrap() {
            Statement::CreateTable {
                columns,
                primary_key,
                ..
            } => {
                assert_eq!(columns.len(), 1);
                assert_eq!(columns[0].kind, ColumnKind::Int);
                assert!(columns[0].not_null && columns[0].auto_increment);
                assert_eq!(primary_key, Some("_id".into()));
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn parse_alter_with_multiple_columns() {
        let mut sql = Sql::new("ALTER TABLE ");
        sql.table("db", "t")
            .push(" ADD COLUMN ")
            .identifier("flag")
            .push(" TINYINT(1) DEFAULT NULL, ADD COLUMN ")
            .identifier("tags")
            .push(" JSON DEFAULT NULL");

        match parse(&sql).unwrap() {
            Statement::AlterTable { columns, .. } => {
                assert_eq!(columns[0].kind, ColumnKind::TinyInt);
                assert_eq!(columns[1].kind, ColumnKind::Json);
                assert!(!columns[1].not_null);
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn parse_precedence() {
        // a = 1 OR b = 2 AND NOT c IS NULL  =>  a = 1 OR (b = 2 AND (NOT c IS NULL))
        let mut sql = Sql::new("SELECT * FROM ");
        sql.table("db", "t")
            .push(" WHERE ")
            .identifier("a")
            .push(" = ")
            .value(SqlValue::Int(1))
            .push(" OR ")
            .identifier("b")
            .push(" = ")
            .value(SqlValue::Int(2))
            .push(" AND NOT ")
            .identifier("c")
            .push(" IS NULL");

        match parse(&sql).unwrap() {
            Statement::Select {
                filter: Some(Expr::Or(_, right)),
                ..
            } => assert!(matches!(*right, Expr::And(_, _))),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn parse_not_in() {
        let mut sql = Sql::new("DELETE FROM ");
        sql.table("db", "t")
            .push(" WHERE (")
            .identifier("a")
            .push(" NOT IN (")
            .value(SqlValue::Int(1))
            .push(", ")
            .value(SqlValue::Int(2))
            .push("))");

        match parse(&sql).unwrap() {
            Statement::Delete {
                filter: Some(Expr::InList { list, negated, .. }),
                ..
            } => {
                assert!(negated);
                assert_eq!(list.len(), 2);
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "Parse")]
    fn placeholder_kind_mismatch() {
        let mut sql = Sql::new("DROP TABLE ");
        sql.value(SqlValue::Int(1));
        parse(&sql).unwrap();
    }

    #[test]
    fn parse_insert_literals() {
        let sql = Sql::new("INSERT INTO t (a, b, c, d) VALUES (-3, TRUE, 'x', 2.5)");

        match parse(&sql).unwrap() {
            Statement::Insert {
                table,
                columns,
                values,
            } => {
                assert_eq!(table.database, None);
                assert_eq!(columns, vec!["a", "b", "c", "d"]);
                assert_eq!(
                    values,
                    vec![
                        Operand::Literal(SqlValue::Int(-3)),
                        Operand::Literal(SqlValue::Int(1)),
                        Operand::Literal(SqlValue::Text("x".into())),
                        Operand::Literal(SqlValue::Double(2.5)),
                    ]
                );
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn parse_binds_values_in_order() {
        let mut sql = Sql::new("UPDATE ");
        sql.table("db", "t")
            .push(" SET ")
            .identifier("a")
            .push(" = ")
            .value(SqlValue::Text("first".into()))
            .push(" WHERE (")
            .identifier("_id")
            .push(" = ")
            .value(SqlValue::Int(7))
            .push(")");

        match parse(&sql).unwrap() {
            Statement::Update {
                table: t,
                assignments,
                filter,
            } => {
                assert_eq!(t, table());
                assert_eq!(
                    assignments,
                    vec![(
                        "a".to_string(),
                        Operand::Literal(SqlValue::Text("first".into()))
                    )]
                );
                assert_eq!(
                    filter,
                    Some(Expr::Compare {
                        left: Operand::Column("_id".into()),
                        op: CompareOp::Eq,
                        right: Operand::Literal(SqlValue::Int(7)),
                    })
                );
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "more placeholders than bound values")]
    fn unbound_placeholder() {
        parse(&Sql::new("SELECT * FROM t WHERE a = ?")).unwrap();
    }

    #[test]
    #[should_panic(expected = "more bound values than placeholders")]
    fn quoted_placeholder_leaves_value_unbound() {
        let mut sql = Sql::new("SELECT * FROM t WHERE a = '");
        sql.value(SqlValue::Int(1)).push("'");
        parse(&sql).unwrap();
    }

    #[test]
    #[should_panic(expected = "expected one statement")]
    fn multiple_statements() {
        parse(&Sql::new("DROP TABLE a; DROP TABLE b")).unwrap();
    }

    #[test]
    #[should_panic(expected = "Parse")]
    fn unsupported_statement() {
        parse(&Sql::new("TRUNCATE TABLE x")).unwrap();
    }
}
