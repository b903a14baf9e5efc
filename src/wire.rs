use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::HotelCalAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::property::PropertyManager;
use crate::sql::{self, Command};

pub struct HotelCalHandler {
    properties: Arc<PropertyManager>,
    query_parser: Arc<HotelCalQueryParser>,
}

impl HotelCalHandler {
    pub fn new(properties: Arc<PropertyManager>) -> Self {
        Self {
            properties,
            query_parser: Arc::new(HotelCalQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.properties
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("property error: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = std::time::Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::UpsertRoom { room } => {
                engine.upsert_room(room).await.map_err(engine_err)?;
                Ok(vec![execution("INSERT", 1)])
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(vec![execution("DELETE", 1)])
            }
            Command::ReplaceSurcharges { room_id, rules } => {
                let count = rules.len();
                engine
                    .replace_surcharge_rules(room_id, rules)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![execution("INSERT", count)])
            }
            Command::ClearSurcharges { room_id } => {
                let previous = engine
                    .get_surcharge_rules(room_id)
                    .await
                    .map_err(engine_err)?
                    .len();
                engine
                    .replace_surcharge_rules(room_id, Vec::new())
                    .await
                    .map_err(engine_err)?;
                Ok(vec![execution("DELETE", previous)])
            }
            Command::SetDay {
                room_id,
                date,
                edit,
            } => {
                engine.set_day(room_id, date, edit).await.map_err(engine_err)?;
                Ok(vec![execution("INSERT", 1)])
            }
            Command::ApplyDailyRules {
                room_id,
                from,
                to_inclusive,
                rules,
            } => {
                let outcome = engine
                    .apply_daily_rules(room_id, from, to_inclusive, rules)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![execution("INSERT", outcome.dates_processed)])
            }
            Command::Reserve {
                room_id,
                stay,
                quantity,
            } => {
                engine
                    .reserve_stock(room_id, stay, quantity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![execution("INSERT", 1)])
            }
            Command::Release {
                room_id,
                stay,
                quantity,
            } => {
                engine
                    .release_stock(room_id, stay, quantity)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![execution("DELETE", 1)])
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<DataRow>> = rooms
                    .iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id.to_string())?;
                        encoder.encode_field(&room.name)?;
                        encoder.encode_field(&room.base_price)?;
                        encoder.encode_field(&i64::from(room.base_occupancy))?;
                        encoder.encode_field(&i64::from(room.max_adults))?;
                        encoder.encode_field(&i64::from(room.max_children))?;
                        encoder.encode_field(&i64::from(room.total_rooms))?;
                        encoder.encode_field(&(room.status == RoomStatus::Active))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectSurcharges { room_id } => {
                let rules = engine
                    .get_surcharge_rules(room_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(surcharges_schema());
                let rid = room_id.to_string();
                let rows: Vec<PgWireResult<DataRow>> = rules
                    .iter()
                    .map(|rule| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rule.id.to_string())?;
                        encoder.encode_field(&rid)?;
                        encoder.encode_field(&rule.kind.as_str())?;
                        encoder.encode_field(&rule.amount)?;
                        encoder.encode_field(&match rule.amount_type {
                            AmountType::Fixed => "fixed",
                            AmountType::Percent => "percent",
                        })?;
                        encoder.encode_field(&rule.is_per_night)?;
                        encoder.encode_field(&rule.is_mandatory)?;
                        encoder.encode_field(&rule.applies_to_room)?;
                        encoder.encode_field(&rule.applies_to_combo)?;
                        encoder.encode_field(&rule.min_age.map(i64::from))?;
                        encoder.encode_field(&rule.max_age.map(i64::from))?;
                        encoder.encode_field(&rule.label)?;
                        encoder.encode_field(&rule.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectAvailability {
                room_id,
                stay,
                rooms,
                mode,
            } => {
                let report = engine
                    .check_availability(room_id, stay, rooms, mode)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rid = room_id.to_string();
                let encode = |failure: Option<&AvailabilityFailure>| -> PgWireResult<DataRow> {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&rid)?;
                    encoder.encode_field(&report.available)?;
                    encoder.encode_field(&failure.map(|f| f.date.to_string()))?;
                    encoder.encode_field(&failure.map(|f| f.reason.as_str()))?;
                    encoder.encode_field(&failure.map(|f| i64::from(f.available)))?;
                    encoder.encode_field(&i64::from(rooms))?;
                    encoder.encode_field(&failure.map_or_else(|| report.message(), |f| f.message()))?;
                    Ok(encoder.take_row())
                };
                let rows: Vec<PgWireResult<DataRow>> = if report.failures.is_empty() {
                    vec![encode(None)]
                } else {
                    report.failures.iter().map(|f| encode(Some(f))).collect()
                };
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectPrices {
                room_id,
                stay,
                track,
            } => {
                let nights = engine
                    .nightly_prices(room_id, stay, track)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(prices_schema());
                let rows: Vec<PgWireResult<DataRow>> = nights
                    .iter()
                    .map(|night| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&night.date.to_string())?;
                        encoder.encode_field(&track.as_str())?;
                        encoder.encode_field(&night.price)?;
                        encoder.encode_field(&night.source.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectQuote { request } => {
                let quote = engine.quote(&request).await.map_err(engine_err)?;
                let schema = Arc::new(quote_schema());
                let rows = quote_rows(&schema, &quote)?;
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectCalendar { room_id, window } => {
                let days = engine.calendar(room_id, window).await.map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<DataRow>> = days
                    .iter()
                    .map(|day| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&day.date.to_string())?;
                        encoder.encode_field(&i64::from(day.day_of_week))?;
                        encoder.encode_field(&day.price_room)?;
                        encoder.encode_field(&day.price_combo)?;
                        encoder.encode_field(&i64::from(day.stock))?;
                        encoder.encode_field(&i64::from(day.booked))?;
                        encoder.encode_field(&day.status.as_str())?;
                        encoder.encode_field(&i64::from(day.min_stay))?;
                        encoder.encode_field(&i64::from(day.max_stay))?;
                        encoder.encode_field(&day.notes)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::Listen { channel } => {
                let room_id = channel
                    .strip_prefix("room_")
                    .ok_or_else(|| {
                        user_error(
                            "42000",
                            format!("invalid channel: {channel} (expected room_{{id}})"),
                        )
                    })?;
                Ulid::from_string(room_id)
                    .map_err(|e| user_error("42000", format!("bad ULID in channel: {e}")))?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn execution(tag: &str, rows: usize) -> Response {
    Response::Execution(Tag::new(tag).with_rows(rows))
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// One row per night, one per surcharge line, then a total row whose
/// `detail` is the JSON snapshot of the whole quote.
fn quote_rows(schema: &Arc<Vec<FieldInfo>>, quote: &Quote) -> PgWireResult<Vec<PgWireResult<DataRow>>> {
    let snapshot = serde_json::to_string(quote)
        .map_err(|e| user_error("XX000", format!("quote snapshot: {e}")))?;
    let rooms = i64::from(quote.num_rooms);

    let mut rows = Vec::with_capacity(quote.nights.len() + quote.surcharges.lines.len() + 1);
    for night in &quote.nights {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&"night")?;
        encoder.encode_field(&Some(night.date.to_string()))?;
        encoder.encode_field(&night.source.as_str())?;
        encoder.encode_field(&rooms)?;
        encoder.encode_field(&night.price)?;
        encoder.encode_field(&night.price.saturating_mul(rooms))?;
        rows.push(Ok(encoder.take_row()));
    }
    for line in &quote.surcharges.lines {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&"surcharge")?;
        encoder.encode_field(&None::<String>)?;
        encoder.encode_field(&line.label)?;
        encoder.encode_field(&i64::from(line.quantity))?;
        encoder.encode_field(&line.unit_amount)?;
        encoder.encode_field(&line.amount)?;
        rows.push(Ok(encoder.take_row()));
    }
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&"total")?;
    encoder.encode_field(&None::<String>)?;
    encoder.encode_field(&snapshot)?;
    encoder.encode_field(&rooms)?;
    encoder.encode_field(&quote.room_subtotal)?;
    encoder.encode_field(&quote.total)?;
    rows.push(Ok(encoder.take_row()));
    Ok(rows)
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("base_price", Type::INT8),
        field("base_occupancy", Type::INT8),
        field("max_adults", Type::INT8),
        field("max_children", Type::INT8),
        field("total_rooms", Type::INT8),
        field("active", Type::BOOL),
    ]
}

fn surcharges_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("kind", Type::VARCHAR),
        field("amount", Type::INT8),
        field("amount_type", Type::VARCHAR),
        field("is_per_night", Type::BOOL),
        field("is_mandatory", Type::BOOL),
        field("applies_to_room", Type::BOOL),
        field("applies_to_combo", Type::BOOL),
        field("min_age", Type::INT8),
        field("max_age", Type::INT8),
        field("label", Type::VARCHAR),
        field("active", Type::BOOL),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("available", Type::BOOL),
        field("date", Type::VARCHAR),
        field("reason", Type::VARCHAR),
        field("stock", Type::INT8),
        field("requested", Type::INT8),
        field("message", Type::VARCHAR),
    ]
}

fn prices_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("track", Type::VARCHAR),
        field("price", Type::INT8),
        field("source", Type::VARCHAR),
    ]
}

fn quote_schema() -> Vec<FieldInfo> {
    vec![
        field("line", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("detail", Type::VARCHAR),
        field("quantity", Type::INT8),
        field("unit_amount", Type::INT8),
        field("amount", Type::INT8),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        field("date", Type::VARCHAR),
        field("day_of_week", Type::INT8),
        field("price_room", Type::INT8),
        field("price_combo", Type::INT8),
        field("stock", Type::INT8),
        field("booked", Type::INT8),
        field("status", Type::VARCHAR),
        field("min_stay", Type::INT8),
        field("max_stay", Type::INT8),
        field("notes", Type::VARCHAR),
    ]
}

/// Table named after the first `FROM` of a SELECT, lowercased.
fn select_table(sql: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("SELECT") {
        return None;
    }
    words
        .skip_while(|w| !w.eq_ignore_ascii_case("FROM"))
        .nth(1)
        .map(|t| t.trim_end_matches(';').trim_matches('"').to_lowercase())
}

/// Row shape of a statement, known before it runs.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("rooms") => rooms_schema(),
        Some("surcharges") => surcharges_schema(),
        Some("availability") => availability_schema(),
        Some("prices") => prices_schema(),
        Some("quote") => quote_schema(),
        Some("calendar") => calendar_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for HotelCalHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HotelCalQueryParser;

#[async_trait]
impl QueryParser for HotelCalQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HotelCalHandler {
    type Statement = String;
    type QueryParser = HotelCalQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text-format parameters as quoted literals. Highest index
/// first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HotelCalFactory {
    handler: Arc<HotelCalHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<HotelCalAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl HotelCalFactory {
    pub fn new(properties: Arc<PropertyManager>, password: String) -> Self {
        Self {
            handler: Arc::new(HotelCalHandler::new(properties)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                HotelCalAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HotelCalFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    properties: Arc<PropertyManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = HotelCalFactory::new(properties, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Invalid(_) => "22023",
        EngineError::Unavailable(_) => "55000",
        EngineError::NotFound(_) | EngineError::LimitExceeded(_) | EngineError::WalError(_) => {
            "P0001"
        }
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
