use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        number: RoomNumber,
        capacity: u32,
        rate: Money,
    },
    UpdateRoom {
        number: RoomNumber,
        capacity: Option<u32>,
        rate: Option<Money>,
    },
    DeleteRoom {
        number: RoomNumber,
    },
    SelectRooms {
        number: Option<RoomNumber>,
    },
    InsertReservation {
        id: Ulid,
        /// `None` books for the connected account.
        customer: Option<String>,
        start: NaiveDate,
        nights: u32,
        party_size: u32,
        room: Option<RoomNumber>,
    },
    UpdateReservation {
        id: Ulid,
        change: StayChange,
    },
    PayReservation {
        id: Ulid,
        price: Money,
    },
    ReplaceRoom {
        id: Ulid,
        old: RoomNumber,
        new: RoomNumber,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectAvailability {
        start: NaiveDate,
        nights: u32,
    },
    SelectRoomCandidates {
        id: Ulid,
        room: RoomNumber,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
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

/// Column → expression pairs, from an INSERT row, a SET list, or an
/// AND-chain of equalities in a WHERE clause.
#[derive(Default)]
struct Fields<'a> {
    pairs: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn push(&mut self, column: String, expr: &'a Expr) -> Result<(), SqlError> {
        if self.pairs.iter().any(|(c, _)| *c == column) {
            return Err(SqlError::Parse(format!("column {column} given twice")));
        }
        self.pairs.push((column, expr));
        Ok(())
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.pairs
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, e)| *e)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }

    /// Reject any column outside `allowed`.
    fn only(self, table: &str, allowed: &[&str]) -> Result<Self, SqlError> {
        if let Some((c, _)) = self.pairs.iter().find(|(c, _)| !allowed.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(table.to_string(), c.clone()));
        }
        Ok(self)
    }
}

// ── INSERT ────────────────────────────────────────────────────

const ROOM_COLUMNS: &[&str] = &["number", "capacity", "rate"];
const RESERVATION_COLUMNS: &[&str] = &["id", "customer", "start", "nights", "party_size", "room"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let defaults = match table.as_str() {
        "rooms" => ROOM_COLUMNS,
        "reservations" => RESERVATION_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let mut fields = Fields::default();
    if insert.columns.is_empty() {
        if values.len() > defaults.len() {
            return Err(SqlError::WrongArity(defaults.len(), values.len()));
        }
        for (column, expr) in defaults.iter().zip(values) {
            fields.push(column.to_string(), expr)?;
        }
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(insert.columns.len(), values.len()));
        }
        for (ident, expr) in insert.columns.iter().zip(values) {
            fields.push(ident.value.to_lowercase(), expr)?;
        }
    }
    let fields = fields.only(&table, defaults)?;

    match table.as_str() {
        "rooms" => Ok(Command::InsertRoom {
            number: parse_u32(fields.require("number")?)?,
            capacity: parse_u32(fields.require("capacity")?)?,
            rate: parse_u64(fields.require("rate")?)?,
        }),
        _ => Ok(Command::InsertReservation {
            id: parse_ulid_expr(fields.require("id")?)?,
            customer: fields.get("customer").map(parse_string_or_null).transpose()?.flatten(),
            start: parse_date(fields.require("start")?)?,
            nights: parse_u32(fields.require("nights")?)?,
            party_size: parse_u32(fields.require("party_size")?)?,
            room: fields.get("room").map(parse_u32_or_null).transpose()?.flatten(),
        }),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    let mut set = Fields::default();
    for assignment in assignments {
        let AssignmentTarget::ColumnName(name) = &assignment.target else {
            return Err(SqlError::Unsupported("tuple assignment".into()));
        };
        let column = object_name_last(name).ok_or_else(|| SqlError::Parse("empty column".into()))?;
        set.push(column, &assignment.value)?;
    }
    let filter = where_fields(selection)?;

    match table.as_str() {
        "rooms" => {
            let set = set.only(&table, &["capacity", "rate"])?;
            let filter = filter.only(&table, &["number"])?;
            Ok(Command::UpdateRoom {
                number: parse_u32(filter.require("number")?)?,
                capacity: set.get("capacity").map(parse_u32).transpose()?,
                rate: set.get("rate").map(parse_u64).transpose()?,
            })
        }
        "reservations" if set.get("paid").is_some() => {
            let set = set.only(&table, &["paid"])?;
            let filter = filter.only(&table, &["id", "price"])?;
            if !parse_bool(set.require("paid")?)? {
                return Err(SqlError::Unsupported("payments cannot be reversed".into()));
            }
            Ok(Command::PayReservation {
                id: parse_ulid_expr(filter.require("id")?)?,
                price: parse_u64(filter.require("price")?)?,
            })
        }
        "reservations" => {
            let set = set.only(&table, &["start", "nights", "party_size"])?;
            let filter = filter.only(&table, &["id"])?;
            let change = StayChange {
                start: set.get("start").map(parse_date).transpose()?,
                nights: set.get("nights").map(parse_u32).transpose()?,
                party_size: set.get("party_size").map(parse_u32).transpose()?,
            };
            Ok(Command::UpdateReservation {
                id: parse_ulid_expr(filter.require("id")?)?,
                change,
            })
        }
        "reservation_rooms" => {
            let set = set.only(&table, &["room"])?;
            let filter = filter.only(&table, &["reservation_id", "room"])?;
            Ok(Command::ReplaceRoom {
                id: parse_ulid_expr(filter.require("reservation_id")?)?,
                old: parse_u32(filter.require("room")?)?,
                new: parse_u32(set.require("room")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filter = where_fields(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            number: parse_u32(filter.only(&table, &["number"])?.require("number")?)?,
        }),
        "reservations" => Ok(Command::DeleteReservation {
            id: parse_ulid_expr(filter.only(&table, &["id"])?.require("id")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match table.as_str() {
        "rooms" => {
            let filter = where_fields(&select.selection)?.only(&table, &["number"])?;
            Ok(Command::SelectRooms {
                number: filter.get("number").map(parse_u32).transpose()?,
            })
        }
        "reservations" => {
            let mut customer_contains = None;
            let filter = match &select.selection {
                Some(expr) => {
                    let mut fields = Fields::default();
                    collect_conditions(expr, &mut fields, &mut customer_contains)?;
                    fields
                }
                None => Fields::default(),
            };
            let filter = filter.only(&table, &["id", "requester", "start", "paid"])?;
            Ok(Command::SelectReservations {
                filter: ReservationFilter {
                    id: filter.get("id").map(parse_ulid_expr).transpose()?,
                    requester: filter.get("requester").map(parse_string).transpose()?,
                    customer_contains,
                    start: filter.get("start").map(parse_date).transpose()?,
                    paid: filter.get("paid").map(parse_bool).transpose()?,
                },
            })
        }
        "availability" => {
            let filter = where_fields(&select.selection)?.only(&table, &["start", "nights"])?;
            Ok(Command::SelectAvailability {
                start: parse_date(filter.require("start")?)?,
                nights: parse_u32(filter.require("nights")?)?,
            })
        }
        "room_candidates" => {
            let filter = where_fields(&select.selection)?.only(&table, &["reservation_id", "room"])?;
            Ok(Command::SelectRoomCandidates {
                id: parse_ulid_expr(filter.require("reservation_id")?)?,
                room: parse_u32(filter.require("room")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into fields. `customer [I]LIKE '%..%'`
/// is lifted out as a substring search.
fn collect_conditions<'a>(
    expr: &'a Expr,
    fields: &mut Fields<'a>,
    customer_contains: &mut Option<String>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_conditions(left, fields, customer_contains)?;
            collect_conditions(right, fields, customer_contains)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("condition on {left}")))?;
            fields.push(column, right)
        }
        Expr::Nested(inner) => collect_conditions(inner, fields, customer_contains),
        Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        }
        | Expr::ILike {
            negated: false,
            expr,
            pattern,
            ..
        } if expr_column_name(expr).as_deref() == Some("customer") => {
            *customer_contains = Some(substring_needle(&parse_string(pattern)?)?);
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

/// Only `'%needle%'` is understood: a plain substring search with no other
/// wildcards inside.
fn substring_needle(pattern: &str) -> Result<String, SqlError> {
    let needle = pattern
        .strip_prefix('%')
        .and_then(|p| p.strip_suffix('%'))
        .filter(|n| !n.is_empty() && !n.contains(['%', '_']))
        .ok_or_else(|| {
            SqlError::Unsupported(format!("customer pattern {pattern:?}, expected '%text%'"))
        })?;
    Ok(needle.to_string())
}

fn where_fields(selection: &Option<Expr>) -> Result<Fields<'_>, SqlError> {
    let mut fields = Fields::default();
    if let Some(expr) = selection {
        let mut customer = None;
        collect_conditions(expr, &mut fields, &mut customer)?;
        if customer.is_some() {
            return Err(SqlError::Unsupported("LIKE outside reservations".into()));
        }
    }
    Ok(fields)
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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
            [row] => Ok(row),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64_expr(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

/// Dates travel as `'YYYY-MM-DD'` strings.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    s.parse()
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String, String),
    WrongArity(usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
