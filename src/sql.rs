use std::collections::HashMap;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

/// Which bookings a `SELECT ... FROM bookings` asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingFilter {
    Id(String),
    Room(String),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Dates stay raw: a bad range is reported in the availability result,
    /// not as a SQL error.
    SelectAvailability {
        start: String,
        end: String,
    },
    SelectConflicts {
        room_number: String,
        start: Day,
        end: Day,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    CreateBooking(BookingRequest),
    UpdateStatus {
        id: String,
        status: BookingStatus,
    },
    AnnounceLease(LeaseNotice),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = named_insert_values(insert)?;

    match table.as_str() {
        "bookings" => Ok(Command::CreateBooking(BookingRequest {
            guest_name: required(&values, "guest_name")?,
            guest_email: optional(&values, "guest_email"),
            guest_phone: optional(&values, "guest_phone"),
            number_of_guests: match optional(&values, "number_of_guests") {
                Some(n) => n
                    .parse()
                    .map_err(|_| SqlError::Parse(format!("bad number_of_guests: {n}")))?,
                None => 1,
            },
            check_in: parse_date(&required(&values, "check_in")?)?,
            check_out: parse_date(&required(&values, "check_out")?)?,
            room_number: required(&values, "room_number")?,
            daily_rate: parse_money(&required(&values, "daily_rate")?)?,
            purpose_of_visit: optional(&values, "purpose_of_visit"),
            source: optional(&values, "source"),
            payment_status: optional(&values, "payment_status"),
        })),
        "leases" => Ok(Command::AnnounceLease(LeaseNotice {
            tenant_name: required(&values, "tenant_name")?,
            room_number: required(&values, "room_number")?,
            lease_start: parse_date(&required(&values, "lease_start")?)?,
            lease_end: parse_date(&required(&values, "lease_end")?)?,
            monthly_rent: optional(&values, "monthly_rent")
                .map(|m| parse_money(&m))
                .transpose()?,
            tenant_email: optional(&values, "tenant_email"),
            tenant_phone: optional(&values, "tenant_phone"),
        })),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table_name = table_factor_name(&table.relation)?;
    if table_name != "bookings" {
        return Err(SqlError::UnknownTable(table_name));
    }

    let mut status = None;
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        };
        match column.as_deref() {
            Some("status") => {
                let raw = literal_text(&assignment.value)?
                    .ok_or_else(|| SqlError::Parse("status cannot be NULL".into()))?;
                status = Some(parse_target_status(&raw)?);
            }
            Some(other) => {
                return Err(SqlError::Unsupported(format!(
                    "only status can be updated, not {other}"
                )));
            }
            None => return Err(SqlError::Parse("unsupported assignment target".into())),
        }
    }

    let filters = where_equalities(selection)?;
    Ok(Command::UpdateStatus {
        id: filters.get("id").cloned().ok_or(SqlError::MissingFilter("id"))?,
        status: status.ok_or(SqlError::MissingFilter("status"))?,
    })
}

/// Only the transitions the engine performs can be requested.
fn parse_target_status(raw: &str) -> Result<BookingStatus, SqlError> {
    match BookingStatus::parse(raw) {
        Some(s @ (BookingStatus::CheckedIn | BookingStatus::CheckedOut | BookingStatus::Cancelled)) => {
            Ok(s)
        }
        _ => Err(SqlError::Parse(format!(
            "status must be Checked-In, Checked-Out or Cancelled, got {raw:?}"
        ))),
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
    let mut filters = RangeFilters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "availability" => Ok(Command::SelectAvailability {
            start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
        }),
        "conflicts" => Ok(Command::SelectConflicts {
            room_number: filters
                .equals
                .remove("room_number")
                .ok_or(SqlError::MissingFilter("room_number"))?,
            start: parse_date(&filters.start.ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_date(&filters.end.ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        "bookings" => {
            let filter = if let Some(id) = filters.equals.remove("id") {
                BookingFilter::Id(id)
            } else if let Some(room) = filters.equals.remove("room_number") {
                BookingFilter::Room(room)
            } else {
                return Err(SqlError::MissingFilter("id or room_number"));
            };
            Ok(Command::SelectBookings { filter })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct RangeFilters {
    equals: HashMap<String, String>,
    start: Option<String>,
    end: Option<String>,
}

fn collect_filters(expr: &Expr, filters: &mut RangeFilters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => {
                if let Some(col) = expr_column_name(left)
                    && let Some(value) = literal_text(right)?
                {
                    filters.equals.insert(col, value);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    filters.start = literal_text(right)?;
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("end") {
                    filters.end = literal_text(right)?;
                }
            }
            _ => {}
        },
        _ => {}
    }
    Ok(())
}

fn where_equalities(selection: &Option<Expr>) -> Result<HashMap<String, String>, SqlError> {
    let mut filters = RangeFilters::default();
    if let Some(sel) = selection {
        collect_filters(sel, &mut filters)?;
    }
    Ok(filters.equals)
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// Column name -> literal text for a single-row INSERT with a column list.
/// NULL values are left out.
fn named_insert_values(insert: &ast::Insert) -> Result<HashMap<String, String>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("one row per INSERT".into())),
    };
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs a column list".into()));
    }
    if insert.columns.len() != row.len() {
        return Err(SqlError::WrongArity("VALUES", insert.columns.len(), row.len()));
    }

    let mut values = HashMap::with_capacity(row.len());
    for (column, expr) in insert.columns.iter().zip(row) {
        if let Some(text) = literal_text(expr)? {
            values.insert(column.value.to_lowercase(), text);
        }
    }
    Ok(values)
}

fn required(values: &HashMap<String, String>, column: &'static str) -> Result<String, SqlError> {
    values
        .get(column)
        .cloned()
        .ok_or(SqlError::MissingColumn(column))
}

fn optional(values: &HashMap<String, String>, column: &str) -> Option<String> {
    values.get(column).cloned()
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

/// Text of a literal; `None` for NULL.
fn literal_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(s.clone())),
            Value::Boolean(b) => Ok(Some(b.to_string())),
            _ => Err(SqlError::Parse(format!("expected literal, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(literal_text(expr)?.map(|s| format!("-{s}")))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(raw: &str) -> Result<Day, SqlError> {
    parse_day(raw).ok_or_else(|| SqlError::Parse(format!("bad date: {raw:?} (expected YYYY-MM-DD)")))
}

fn parse_money(raw: &str) -> Result<Money, SqlError> {
    Money::parse(raw).ok_or_else(|| SqlError::Parse(format!("bad amount: {raw:?}")))
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
    MissingColumn(&'static str),
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
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
