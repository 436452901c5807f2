use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

/// Parsed command from SQL input.
///
/// Instants and days stay as the client wrote them; the engine reads them
/// against the restaurant's time zone.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectAvailability {
        start: String,
        end: String,
    },
    /// One JSON document: base capacity plus the override and reservation maps.
    SelectAvailabilityReport {
        start: String,
        end: String,
    },
    SelectSettings,
    UpsertSettings {
        base_capacity: i64,
        address: Option<String>,
    },
    InsertReservation {
        name: String,
        email: String,
        party_size: i64,
        time: String,
    },
    SelectReservations {
        start: String,
        end: String,
    },
    DeleteReservation {
        id: Ulid,
    },
    InsertOverrides {
        entries: Vec<(String, i64)>, // (slot, capacity)
    },
    DeleteOverride {
        slot: String,
    },
    SelectSchedule {
        day: String,
    },
    ImportLegacyDay {
        day: String,
        capacities: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// Values are positional; column lists are accepted but not reordered.
fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "settings" => {
            let values = single_row(&rows, "settings", 1)?;
            let address = match values.get(1) {
                Some(expr) => parse_text_or_null(expr)?,
                None => None,
            };
            Ok(Command::UpsertSettings {
                base_capacity: parse_i64_expr(&values[0])?,
                address,
            })
        }
        "reservations" => {
            let values = single_row(&rows, "reservations", 4)?;
            Ok(Command::InsertReservation {
                name: parse_text(&values[0])?,
                email: parse_text(&values[1])?,
                party_size: parse_i64_expr(&values[2])?,
                time: parse_text(&values[3])?,
            })
        }
        "overrides" => {
            let mut entries = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 2 {
                    return Err(SqlError::WrongArity("overrides row", 2, row.len()));
                }
                entries.push((
                    parse_text(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    parse_i64_expr(&row[1]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                ));
            }
            Ok(Command::InsertOverrides { entries })
        }
        "legacy_inventory" => {
            let values = single_row(&rows, "legacy_inventory", 2)?;
            Ok(Command::ImportLegacyDay {
                day: parse_text(&values[0])?,
                capacities: parse_text(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "reservations" => {
            let id = extract_where_eq(&delete.selection, "id")?;
            Ok(Command::DeleteReservation { id: parse_ulid_expr(id)? })
        }
        "overrides" => {
            let slot = extract_where_eq(&delete.selection, "slot")?;
            Ok(Command::DeleteOverride { slot: parse_text(slot)? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "settings" => Ok(Command::SelectSettings),
        "availability" => {
            let (start, end) = extract_range_filters(&select.selection)?;
            Ok(Command::SelectAvailability { start, end })
        }
        "availability_report" => {
            let (start, end) = extract_range_filters(&select.selection)?;
            Ok(Command::SelectAvailabilityReport { start, end })
        }
        "reservations" => {
            let (start, end) = extract_range_filters(&select.selection)?;
            Ok(Command::SelectReservations { start, end })
        }
        "schedule" => {
            let day = extract_where_eq(&select.selection, "day")?;
            Ok(Command::SelectSchedule { day: parse_text(day)? })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `start >= '…' AND "end" <= '…'`, in either order.
fn extract_range_filters(selection: &Option<Expr>) -> Result<(String, String), SqlError> {
    let (mut start, mut end) = (None, None);
    if let Some(selection) = selection {
        collect_range_filters(selection, &mut start, &mut end)?;
    }
    Ok((
        start.ok_or(SqlError::MissingFilter("start"))?,
        end.ok_or(SqlError::MissingFilter("end"))?,
    ))
}

fn collect_range_filters(
    expr: &Expr,
    start: &mut Option<String>,
    end: &mut Option<String>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                collect_range_filters(left, start, end)?;
                collect_range_filters(right, start, end)?;
            }
            ast::BinaryOperator::GtEq if expr_column_name(left).as_deref() == Some("start") => {
                *start = Some(parse_text(right)?);
            }
            ast::BinaryOperator::LtEq if expr_column_name(left).as_deref() == Some("end") => {
                *end = Some(parse_text(right)?);
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.as_slice())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn single_row<'a>(
    rows: &'a [Vec<Expr>],
    table: &'static str,
    min_values: usize,
) -> Result<&'a [Expr], SqlError> {
    if rows.len() != 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let values = rows[0].as_slice();
    if values.len() < min_values {
        return Err(SqlError::WrongArity(table, min_values, values.len()));
    }
    Ok(values)
}

/// Right-hand side of `WHERE <column> = <value>`.
fn extract_where_eq<'a>(selection: &'a Option<Expr>, column: &'static str) -> Result<&'a Expr, SqlError> {
    match selection.as_ref() {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some(column) => Ok(right.as_ref()),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_select_availability() {
        let sql = r#"SELECT * FROM availability WHERE start >= '2026-10-17T00:00:00Z' AND "end" <= '2026-10-18T00:00:00Z'"#;
        let cmd = parse_sql(sql).unwrap();
        assert_eq!(
            cmd,
            Command::SelectAvailability {
                start: "2026-10-17T00:00:00Z".into(),
                end: "2026-10-18T00:00:00Z".into(),
            }
        );
    }

    #[test]
    fn parse_select_availability_report() {
        let sql = r#"SELECT report FROM availability_report WHERE start >= '2026-10-17' AND "end" <= '2026-10-18'"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailabilityReport {
                start: "2026-10-17".into(),
                end: "2026-10-18".into(),
            }
        );
    }

    #[test]
    fn parse_range_filters_in_any_order() {
        let sql = r#"SELECT * FROM reservations WHERE "end" <= '2026-10-18' AND start >= '2026-10-17'"#;
        match parse_sql(sql).unwrap() {
            Command::SelectReservations { start, end } => {
                assert_eq!(start, "2026-10-17");
                assert_eq!(end, "2026-10-18");
            }
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_requires_range() {
        let sql = "SELECT * FROM availability WHERE start >= '2026-10-17T00:00:00Z'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("end"))));
        let sql = "SELECT * FROM availability";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("start"))));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = "INSERT INTO reservations (name, email, party_size, time) VALUES ('Ada', 'ada@example.com', 4, '2026-10-17T19:07:00Z')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertReservation {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                party_size: 4,
                time: "2026-10-17T19:07:00Z".into(),
            }
        );
    }

    #[test]
    fn parse_insert_reservation_keeps_negative_party_size() {
        // Rejected later by the engine, not by the parser
        let sql = "INSERT INTO reservations (name, email, party_size, time) VALUES ('Ada', 'a@b', -2, '2026-10-17T19:00:00Z')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation { party_size, .. } => assert_eq!(party_size, -2),
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_wrong_arity() {
        let sql = "INSERT INTO reservations (name, email) VALUES ('Ada', 'a@b')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::WrongArity("reservations", 4, 2))
        ));
    }

    #[test]
    fn parse_settings() {
        assert_eq!(parse_sql("SELECT * FROM settings").unwrap(), Command::SelectSettings);
        assert_eq!(
            parse_sql("INSERT INTO settings (base_capacity, address) VALUES (8, '1 Main St')").unwrap(),
            Command::UpsertSettings {
                base_capacity: 8,
                address: Some("1 Main St".into()),
            }
        );
        assert_eq!(
            parse_sql("INSERT INTO settings (base_capacity, address) VALUES (3, NULL)").unwrap(),
            Command::UpsertSettings {
                base_capacity: 3,
                address: None,
            }
        );
        assert_eq!(
            parse_sql("INSERT INTO settings (base_capacity) VALUES (3)").unwrap(),
            Command::UpsertSettings {
                base_capacity: 3,
                address: None,
            }
        );
    }

    #[test]
    fn parse_batch_insert_overrides() {
        let sql = "INSERT INTO overrides (slot, capacity) VALUES ('2026-10-17T19:00:00Z', 0), ('2026-10-17T19:15:00Z', 2)";
        match parse_sql(sql).unwrap() {
            Command::InsertOverrides { entries } => {
                assert_eq!(
                    entries,
                    vec![
                        ("2026-10-17T19:00:00Z".to_string(), 0),
                        ("2026-10-17T19:15:00Z".to_string(), 2),
                    ]
                );
            }
            cmd => panic!("expected InsertOverrides, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_deletes() {
        let sql = "DELETE FROM reservations WHERE id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'";
        match parse_sql(sql).unwrap() {
            Command::DeleteReservation { id } => {
                assert_eq!(id.to_string(), "01ARZ3NDEKTSV4RRFFQ69G5FAV");
            }
            cmd => panic!("expected DeleteReservation, got {cmd:?}"),
        }

        let sql = "DELETE FROM overrides WHERE slot = '2026-10-17T19:00:00Z'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::DeleteOverride {
                slot: "2026-10-17T19:00:00Z".into()
            }
        );

        let sql = "DELETE FROM reservations WHERE name = 'Ada'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_schedule_and_legacy_import() {
        assert_eq!(
            parse_sql("SELECT * FROM schedule WHERE day = '2026-10-17'").unwrap(),
            Command::SelectSchedule {
                day: "2026-10-17".into()
            }
        );
        assert_eq!(
            parse_sql("INSERT INTO legacy_inventory (day, capacities) VALUES ('2026-10-17', '5,5,-1')").unwrap(),
            Command::ImportLegacyDay {
                day: "2026-10-17".into(),
                capacities: "5,5,-1".into(),
            }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = "INSERT INTO foobar (id) VALUES ('x')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownTable(t)) if t == "foobar"));
        assert!(matches!(
            parse_sql("SELECT * FROM kitchen"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_unsupported_statement() {
        assert!(matches!(
            parse_sql("DROP TABLE reservations"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
