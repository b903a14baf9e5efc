use chrono::NaiveDate;
use sqlparser::ast::{self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertRoom {
        room: Room,
    },
    DeleteRoom {
        id: Ulid,
    },
    ReplaceSurcharges {
        room_id: Ulid,
        rules: Vec<SurchargeRule>,
    },
    ClearSurcharges {
        room_id: Ulid,
    },
    SetDay {
        room_id: Ulid,
        date: NaiveDate,
        edit: DayEdit,
    },
    ApplyDailyRules {
        room_id: Ulid,
        from: NaiveDate,
        to_inclusive: NaiveDate,
        rules: WeeklyRules,
    },
    Reserve {
        room_id: Ulid,
        stay: DateRange,
        quantity: u32,
    },
    Release {
        room_id: Ulid,
        stay: DateRange,
        quantity: u32,
    },
    SelectRooms,
    SelectSurcharges {
        room_id: Ulid,
    },
    SelectAvailability {
        room_id: Ulid,
        stay: DateRange,
        rooms: u32,
        mode: AvailabilityMode,
    },
    SelectPrices {
        room_id: Ulid,
        stay: DateRange,
        track: PriceTrack,
    },
    SelectQuote {
        request: QuoteRequest,
    },
    SelectCalendar {
        room_id: Ulid,
        window: DateRange,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if let Some(prefix) = trimmed.get(..7)
        && prefix.eq_ignore_ascii_case("LISTEN ")
    {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "rooms" => {
            parse_room_row(single_row("rooms", &rows)?).map(|room| Command::UpsertRoom { room })
        }
        "surcharges" => parse_surcharge_rows(&rows),
        "pricing_days" => parse_pricing_day_row(single_row("pricing_days", &rows)?),
        "daily_rules" => parse_daily_rule_rows(&rows),
        "reservations" => {
            let values = single_row("reservations", &rows)?;
            require_arity("reservations", values, 4)?;
            Ok(Command::Reserve {
                room_id: parse_ulid(&values[0])?,
                stay: DateRange::new(parse_date(&values[1])?, parse_date(&values[2])?),
                quantity: parse_u32(&values[3])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Tables whose INSERT maps to one command take exactly one VALUES row.
fn single_row<'a>(table: &str, rows: &'a [Vec<Expr>]) -> Result<&'a [Expr], SqlError> {
    match rows {
        [row] => Ok(row.as_slice()),
        _ => Err(SqlError::Parse(format!(
            "{table} takes one VALUES row per statement, got {}",
            rows.len()
        ))),
    }
}

fn require_arity(table: &'static str, values: &[Expr], min: usize) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

/// `(id, base_price, base_occupancy, max_adults, max_children, total_rooms[, active[, name]])`
fn parse_room_row(values: &[Expr]) -> Result<Room, SqlError> {
    require_arity("rooms", values, 6)?;
    let active = match values.get(6) {
        Some(v) => parse_bool(v)?,
        None => true,
    };
    let name = match values.get(7) {
        Some(v) => parse_string_or_null(v)?,
        None => None,
    };
    Ok(Room {
        id: parse_ulid(&values[0])?,
        name,
        base_price: parse_i64(&values[1])?,
        base_occupancy: parse_u32(&values[2])?,
        max_adults: parse_u32(&values[3])?,
        max_children: parse_u32(&values[4])?,
        total_rooms: parse_u32(&values[5])?,
        status: if active {
            RoomStatus::Active
        } else {
            RoomStatus::Inactive
        },
    })
}

/// Every row is one rule of the same room; together they replace its set.
fn parse_surcharge_rows(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut room_id = None;
    let mut rules = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let (rid, rule) = parse_surcharge_row(row).map_err(|e| e.in_row(i))?;
        if let Some(first) = room_id {
            if first != rid {
                return Err(SqlError::Parse(format!(
                    "row {i}: all surcharge rows must share one room_id"
                )));
            }
        } else {
            room_id = Some(rid);
        }
        rules.push(rule);
    }
    let room_id = room_id.ok_or(SqlError::Parse("empty VALUES".into()))?;
    Ok(Command::ReplaceSurcharges { room_id, rules })
}

/// `(id, room_id, kind, amount, amount_type, is_per_night, is_mandatory,
/// applies_to_room, applies_to_combo[, min_age, max_age, label[, active]])`
fn parse_surcharge_row(values: &[Expr]) -> Result<(Ulid, SurchargeRule), SqlError> {
    require_arity("surcharges", values, 9)?;
    let optional_u32 = |idx: usize| match values.get(idx) {
        Some(v) => parse_u32_or_null(v),
        None => Ok(None),
    };
    let rule = SurchargeRule {
        id: parse_ulid(&values[0])?,
        kind: parse_string(&values[2])?.parse().map_err(SqlError::Parse)?,
        min_age: optional_u32(9)?,
        max_age: optional_u32(10)?,
        amount: parse_i64(&values[3])?,
        amount_type: parse_string(&values[4])?.parse().map_err(SqlError::Parse)?,
        is_per_night: parse_bool(&values[5])?,
        is_mandatory: parse_bool(&values[6])?,
        applies_to_room: parse_bool(&values[7])?,
        applies_to_combo: parse_bool(&values[8])?,
        active: match values.get(12) {
            Some(v) => parse_bool(v)?,
            None => true,
        },
        label: match values.get(11) {
            Some(v) => parse_string_or_null(v)?,
            None => None,
        },
    };
    Ok((parse_ulid(&values[1])?, rule))
}

/// `(room_id, date, price_room, price_combo, stock, status[, min_stay, max_stay, notes])`
fn parse_pricing_day_row(values: &[Expr]) -> Result<Command, SqlError> {
    require_arity("pricing_days", values, 6)?;
    let optional_u32 = |idx: usize| match values.get(idx) {
        Some(v) => parse_u32_or_null(v).map(|n| n.unwrap_or(0)),
        None => Ok(0),
    };
    let edit = DayEdit {
        price_room: parse_i64_or_null(&values[2])?,
        price_combo: parse_i64_or_null(&values[3])?,
        stock: parse_u32(&values[4])?,
        status: parse_string(&values[5])?.parse().map_err(SqlError::Parse)?,
        min_stay: optional_u32(6)?,
        max_stay: optional_u32(7)?,
        notes: match values.get(8) {
            Some(v) => parse_string_or_null(v)?,
            None => None,
        },
    };
    Ok(Command::SetDay {
        room_id: parse_ulid(&values[0])?,
        date: parse_date(&values[1])?,
        edit,
    })
}

/// `(room_id, date_from, date_to, weekday, price_room, price_combo, stock, status)`,
/// one row per weekday (1 = Monday … 7 = Sunday). NULL leaves a field unset.
fn parse_daily_rule_rows(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut target: Option<(Ulid, NaiveDate, NaiveDate)> = None;
    let mut rules = WeeklyRules::new();

    for (i, row) in rows.iter().enumerate() {
        let parsed = (|| -> Result<_, SqlError> {
            require_arity("daily_rules", row, 8)?;
            let key = (parse_ulid(&row[0])?, parse_date(&row[1])?, parse_date(&row[2])?);
            let weekday = parse_u32(&row[3])?;
            let rule = WeekdayRule {
                price_room: parse_i64_or_null(&row[4])?,
                price_combo: parse_i64_or_null(&row[5])?,
                stock: parse_u32_or_null(&row[6])?,
                status: match parse_string_or_null(&row[7])? {
                    Some(s) => Some(s.parse().map_err(SqlError::Parse)?),
                    None => None,
                },
            };
            Ok((key, weekday, rule))
        })();
        let (key, weekday, rule) = parsed.map_err(|e| e.in_row(i))?;

        if let Some(first) = target {
            if first != key {
                return Err(SqlError::Parse(format!(
                    "row {i}: all daily rule rows must share room_id, date_from and date_to"
                )));
            }
        } else {
            target = Some(key);
        }
        let weekday = u8::try_from(weekday).unwrap_or(0);
        if rules.get(weekday).is_some() {
            return Err(SqlError::Parse(format!("row {i}: weekday {weekday} given twice")));
        }
        if !rules.set(weekday, rule) {
            return Err(SqlError::Parse(format!("row {i}: weekday must be 1..=7")));
        }
    }

    let (room_id, from, to_inclusive) = target.ok_or(SqlError::Parse("empty VALUES".into()))?;
    Ok(Command::ApplyDailyRules {
        room_id,
        from,
        to_inclusive,
        rules,
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: parse_ulid(filters.require("id")?)?,
        }),
        "surcharges" => Ok(Command::ClearSurcharges {
            room_id: parse_ulid(filters.require("room_id")?)?,
        }),
        "reservations" => Ok(Command::Release {
            room_id: parse_ulid(filters.require("room_id")?)?,
            stay: filters.stay()?,
            quantity: parse_u32(filters.require("quantity")?)?,
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
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "surcharges" => Ok(Command::SelectSurcharges {
            room_id: parse_ulid(filters.require("room_id")?)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            room_id: parse_ulid(filters.require("room_id")?)?,
            stay: filters.stay()?,
            rooms: filters.u32_or("rooms", 1)?,
            mode: match filters.eq("mode") {
                Some(e) => parse_mode(&parse_string(e)?)?,
                None => AvailabilityMode::StopAtFirst,
            },
        }),
        "prices" => Ok(Command::SelectPrices {
            room_id: parse_ulid(filters.require("room_id")?)?,
            stay: filters.stay()?,
            track: filters.track()?,
        }),
        "quote" => {
            let children_ages = match filters.eq("children_ages") {
                Some(e) => parse_ages(&parse_string(e)?)?,
                None => Vec::new(),
            };
            Ok(Command::SelectQuote {
                request: QuoteRequest {
                    room_id: parse_ulid(filters.require("room_id")?)?,
                    stay: filters.stay()?,
                    num_rooms: filters.u32_or("rooms", 1)?,
                    occupancy: OccupancyRequest {
                        adults: filters.u32_or("adults", 1)?,
                        children_ages,
                        other_quantity: filters.u32_or("other", 0)?,
                    },
                    track: filters.track()?,
                },
            })
        }
        "calendar" => Ok(Command::SelectCalendar {
            room_id: parse_ulid(filters.require("room_id")?)?,
            window: filters.window()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_mode(s: &str) -> Result<AvailabilityMode, SqlError> {
    match s.to_ascii_lowercase().as_str() {
        "first" => Ok(AvailabilityMode::StopAtFirst),
        "all" => Ok(AvailabilityMode::CollectAll),
        other => Err(SqlError::Parse(format!("unknown availability mode: {other}"))),
    }
}

/// `'8,5'` → `[8, 5]`. Blank entries are skipped.
fn parse_ages(s: &str) -> Result<Vec<u32>, SqlError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse()
                .map_err(|_| SqlError::Parse(format!("bad child age: {part}")))
        })
        .collect()
}

/// `column <op> value` terms of a WHERE clause joined by AND.
struct Filters<'a> {
    terms: Vec<(String, BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn get(&self, column: &str, op: &BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.get(column, &BinaryOperator::Eq)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }

    fn u32_or(&self, column: &str, default: u32) -> Result<u32, SqlError> {
        match self.eq(column) {
            Some(e) => parse_u32(e),
            None => Ok(default),
        }
    }

    fn track(&self) -> Result<PriceTrack, SqlError> {
        match self.eq("track") {
            Some(e) => parse_string(e)?.parse().map_err(SqlError::Parse),
            None => Ok(PriceTrack::Room),
        }
    }

    /// `check_in = … AND check_out = …`
    fn stay(&self) -> Result<DateRange, SqlError> {
        Ok(DateRange::new(
            parse_date(self.require("check_in")?)?,
            parse_date(self.require("check_out")?)?,
        ))
    }

    /// `date_from = … AND date_to = …` or `"date" >= … AND "date" < …`;
    /// the upper bound is exclusive either way.
    fn window(&self) -> Result<DateRange, SqlError> {
        let from = self
            .eq("date_from")
            .or_else(|| self.get("date", &BinaryOperator::GtEq))
            .ok_or(SqlError::MissingFilter("date_from"))?;
        let to = self
            .eq("date_to")
            .or_else(|| self.get("date", &BinaryOperator::Lt))
            .ok_or(SqlError::MissingFilter("date_to"))?;
        Ok(DateRange::new(parse_date(from)?, parse_date(to)?))
    }
}

fn collect_terms<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_terms(left, out)?;
            collect_terms(right, out)
        }
        Expr::BinaryOp { left, op, right } => match (expr_column_name(left), op) {
            (
                Some(col),
                BinaryOperator::Eq
                | BinaryOperator::GtEq
                | BinaryOperator::Gt
                | BinaryOperator::Lt
                | BinaryOperator::LtEq,
            ) => {
                out.push((col, op.clone(), right.as_ref()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
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

/// Every VALUES row. Never empty on success.
fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
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
        parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
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
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl SqlError {
    fn in_row(self, row: usize) -> SqlError {
        SqlError::Parse(format!("row {row}: {self}"))
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
