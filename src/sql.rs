use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVenue {
        id: Option<Ulid>,
        venue: VenueInput,
    },
    UpdateVenue {
        id: Ulid,
        changes: VenueChanges,
    },
    DeleteVenue {
        id: Ulid,
    },
    SelectVenues {
        id: Option<Ulid>,
    },
    InsertEvent {
        id: Option<Ulid>,
        event: EventInput,
        force: bool,
    },
    UpdateEvent {
        id: Ulid,
        changes: EventChanges,
        force: bool,
    },
    CancelEvent {
        id: Ulid,
    },
    DeleteEvent {
        id: Ulid,
    },
    SelectEvents {
        filter: EventFilter,
    },
    SelectConflicts {
        venue_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    },
    SelectClashes {
        date: NaiveDate,
    },
    SelectSuggestions {
        start: Ms,
        end: Ms,
        event_id: Option<Ulid>,
    },
}

/// Positional column order for INSERT without a column list.
const VENUE_COLUMNS: &[&str] = &["id", "name", "location", "capacity"];
const EVENT_COLUMNS: &[&str] = &[
    "id",
    "title",
    "venue_id",
    "date",
    "start_time",
    "end_time",
    "organizer",
    "description",
    "force",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::TooLong(sql.len()));
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "venues" => {
            let row = insert_row(insert, "venues", VENUE_COLUMNS)?;
            let mut id = None;
            let mut venue = VenueInput::default();
            let mut has_name = false;
            for (column, expr) in row {
                match column.as_str() {
                    "id" => id = parse_ulid_or_null(expr)?,
                    "name" => {
                        venue.name = parse_text(expr)?;
                        has_name = true;
                    }
                    "location" => venue.location = parse_text_or_null(expr)?,
                    "capacity" => venue.capacity = parse_u32_or_null(expr)?,
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            if !has_name {
                return Err(SqlError::MissingColumn("name"));
            }
            Ok(Command::InsertVenue { id, venue })
        }
        "events" => {
            let row = insert_row(insert, "events", EVENT_COLUMNS)?;
            let mut id = None;
            let mut title = None;
            let mut venue = None;
            let mut date = None;
            let mut start = None;
            let mut end = None;
            let mut organizer = None;
            let mut description = None;
            let mut force = false;
            for (column, expr) in row {
                match column.as_str() {
                    "id" => id = parse_ulid_or_null(expr)?,
                    "title" => title = Some(parse_text(expr)?),
                    "venue_id" | "venue_name" => {
                        if venue.is_some() {
                            return Err(SqlError::Parse(
                                "give either venue_id or venue_name, not both".into(),
                            ));
                        }
                        venue = Some(parse_venue_ref(&column, expr)?);
                    }
                    "date" => date = parse_date_or_null(expr)?,
                    "start_time" => start = Some(parse_instant(expr)?),
                    "end_time" => end = Some(parse_instant(expr)?),
                    "organizer" => organizer = parse_text_or_null(expr)?,
                    "description" => description = parse_text_or_null(expr)?,
                    "force" => force = parse_bool(expr)?,
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            let event = EventInput {
                title: title.ok_or(SqlError::MissingColumn("title"))?,
                venue: venue.ok_or(SqlError::MissingColumn("venue_id or venue_name"))?,
                date,
                start: start.ok_or(SqlError::MissingColumn("start_time"))?,
                end: end.ok_or(SqlError::MissingColumn("end_time"))?,
                organizer,
                description,
            };
            Ok(Command::InsertEvent { id, event, force })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Pair each VALUES entry with its column name, from the column list if
/// present or from `positional` otherwise.
fn insert_row<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    positional: &[&str],
) -> Result<Vec<(String, &'a Expr)>, SqlError> {
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        if values.len() > positional.len() {
            return Err(SqlError::WrongArity(table, positional.len(), values.len()));
        }
        positional.iter().map(|c| c.to_string()).collect()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    Ok(columns.into_iter().zip(values.iter()).collect())
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut sets = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        sets.push((column, &assignment.value));
    }

    match table.as_str() {
        "venues" => {
            let mut changes = VenueChanges::default();
            for (column, expr) in sets {
                match column.as_str() {
                    "name" => changes.name = Some(parse_text(expr)?),
                    "location" => changes.location = Some(parse_text_or_null(expr)?),
                    "capacity" => changes.capacity = Some(parse_u32_or_null(expr)?),
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            Ok(Command::UpdateVenue { id, changes })
        }
        "events" => {
            let mut changes = EventChanges::default();
            let mut force = false;
            let mut cancel = false;
            for (column, expr) in sets {
                match column.as_str() {
                    "title" => changes.title = Some(parse_text(expr)?),
                    "venue_id" | "venue_name" => {
                        if changes.venue.is_some() {
                            return Err(SqlError::Parse(
                                "give either venue_id or venue_name, not both".into(),
                            ));
                        }
                        changes.venue = Some(parse_venue_ref(&column, expr)?);
                    }
                    "date" => changes.date = parse_date_or_null(expr)?,
                    "start_time" => changes.start = Some(parse_instant(expr)?),
                    "end_time" => changes.end = Some(parse_instant(expr)?),
                    "organizer" => changes.organizer = Some(parse_text_or_null(expr)?),
                    "description" => changes.description = Some(parse_text_or_null(expr)?),
                    "force" => force = parse_bool(expr)?,
                    "status" => {
                        let status: EventStatus = parse_text(expr)?.parse().map_err(SqlError::Parse)?;
                        if status != EventStatus::Cancelled {
                            return Err(SqlError::Unsupported(format!(
                                "status {status} is derived; only 'cancelled' can be set"
                            )));
                        }
                        cancel = true;
                    }
                    _ => return Err(SqlError::UnknownColumn(column)),
                }
            }
            if cancel {
                if changes != EventChanges::default() {
                    return Err(SqlError::Unsupported(
                        "cancel cannot be combined with other changes".into(),
                    ));
                }
                return Ok(Command::CancelEvent { id });
            }
            Ok(Command::UpdateEvent { id, changes, force })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "venues" => Ok(Command::DeleteVenue { id }),
        "events" => Ok(Command::DeleteEvent { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// One `column <op> value` term from an AND-ed WHERE clause.
struct Filter<'a> {
    column: String,
    op: FilterOp,
    value: &'a Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    GtEq,
    LtEq,
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "venues" => {
            let mut id = None;
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("id", FilterOp::Eq) => id = Some(parse_ulid_expr(f.value)?),
                    _ => return Err(unsupported_filter(&table, &f)),
                }
            }
            Ok(Command::SelectVenues { id })
        }
        "events" => {
            let mut filter = EventFilter::default();
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("venue_id", FilterOp::Eq) => filter.venue_id = Some(parse_ulid_expr(f.value)?),
                    ("date", FilterOp::Eq) => filter.date = Some(parse_date(f.value)?),
                    ("date", FilterOp::GtEq) => filter.from = Some(parse_date(f.value)?),
                    ("date", FilterOp::LtEq) => filter.to = Some(parse_date(f.value)?),
                    _ => return Err(unsupported_filter(&table, &f)),
                }
            }
            Ok(Command::SelectEvents { filter })
        }
        "conflicts" => {
            let (mut venue_id, mut start, mut end, mut exclude) = (None, None, None, None);
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("venue_id", FilterOp::Eq) => venue_id = Some(parse_ulid_expr(f.value)?),
                    ("start_time", FilterOp::Eq) => start = Some(parse_instant(f.value)?),
                    ("end_time", FilterOp::Eq) => end = Some(parse_instant(f.value)?),
                    ("exclude_id", FilterOp::Eq) => exclude = parse_ulid_or_null(f.value)?,
                    _ => return Err(unsupported_filter(&table, &f)),
                }
            }
            Ok(Command::SelectConflicts {
                venue_id: venue_id.ok_or(SqlError::MissingFilter("venue_id"))?,
                start: start.ok_or(SqlError::MissingFilter("start_time"))?,
                end: end.ok_or(SqlError::MissingFilter("end_time"))?,
                exclude,
            })
        }
        "clashes" => {
            let mut date = None;
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("date", FilterOp::Eq) => date = Some(parse_date(f.value)?),
                    _ => return Err(unsupported_filter(&table, &f)),
                }
            }
            Ok(Command::SelectClashes {
                date: date.ok_or(SqlError::MissingFilter("date"))?,
            })
        }
        "suggestions" => {
            let (mut start, mut end, mut event_id) = (None, None, None);
            for f in filters {
                match (f.column.as_str(), f.op) {
                    ("start_time", FilterOp::Eq) => start = Some(parse_instant(f.value)?),
                    ("end_time", FilterOp::Eq) => end = Some(parse_instant(f.value)?),
                    ("event_id", FilterOp::Eq) => event_id = parse_ulid_or_null(f.value)?,
                    _ => return Err(unsupported_filter(&table, &f)),
                }
            }
            Ok(Command::SelectSuggestions {
                start: start.ok_or(SqlError::MissingFilter("start_time"))?,
                end: end.ok_or(SqlError::MissingFilter("end_time"))?,
                event_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a AND b AND (c)` into filter terms. `x BETWEEN lo AND hi` becomes
/// `x >= lo AND x <= hi`.
fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::Eq => FilterOp::Eq,
                ast::BinaryOperator::GtEq => FilterOp::GtEq,
                ast::BinaryOperator::LtEq => FilterOp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push(Filter { column, op, value: right });
            Ok(())
        }
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => {
            let column = expr_column_name(expr)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {expr}")))?;
            out.push(Filter { column: column.clone(), op: FilterOp::GtEq, value: low });
            out.push(Filter { column, op: FilterOp::LtEq, value: high });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn unsupported_filter(table: &str, f: &Filter<'_>) -> SqlError {
    SqlError::Unsupported(format!("filter {} {:?} on {table}", f.column, f.op))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.as_slice()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid_expr(expr).map(Some)
}

fn parse_venue_ref(column: &str, expr: &Expr) -> Result<VenueRef, SqlError> {
    if column == "venue_id" {
        Ok(VenueRef::Id(parse_ulid_expr(expr)?))
    } else {
        Ok(VenueRef::Name(parse_text(expr)?))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("number out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// Unix milliseconds, as a number or a string, or an RFC 3339 timestamp.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.parse::<i64>().is_err()
    {
        return DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s:?}: {e}")));
    }
    parse_i64_expr(expr)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}"))),
        _ => Err(SqlError::Parse(format!("expected 'YYYY-MM-DD', got {expr}"))),
    }
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let v = parse_i64_expr(expr)?;
    u32::try_from(v)
        .map(Some)
        .map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::Null => Ok(false),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    TooLong(usize),
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::TooLong(n) => write!(f, "query too long: {n} bytes (max {MAX_SQL_LEN})"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
