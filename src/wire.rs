use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::InnkeepAuthSource;
use crate::engine::{Engine, EngineError};
use crate::facility::FacilityManager;
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command};

const DEFAULT_FACILITY: &str = "default";

pub struct InnkeepHandler {
    facilities: Arc<FacilityManager>,
    query_parser: Arc<InnkeepQueryParser>,
}

impl InnkeepHandler {
    pub fn new(facilities: Arc<FacilityManager>) -> Self {
        Self {
            facilities,
            query_parser: Arc::new(InnkeepQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FACILITY.to_string());
        self.facilities.get_or_create(&db).map_err(|e| {
            user_error("08006", format!("facility error: {e}"))
        })
    }

    /// Run one command, recording RED metrics around it.
    async fn execute(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::SelectAvailability { start, end } => {
                let report = engine.available_rooms(&start, &end).await;
                if !report.success {
                    let msg = report.error.unwrap_or_else(|| "availability failed".into());
                    return Err(user_error("22023", msg));
                }
                let nights = report.nights.unwrap_or(0);
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = report
                    .rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.room_number)?;
                        encoder.encode_field(&room.room_name)?;
                        encoder.encode_field(&room.room_type)?;
                        encoder.encode_field(&room.daily_rate)?;
                        encoder.encode_field(&room.available)?;
                        encoder.encode_field(&room.status)?;
                        encoder.encode_field(&nights)?;
                        encoder.encode_field(&conflict_summary(&room.conflicts))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectConflicts {
                room_number,
                start,
                end,
            } => {
                let conflicts = engine
                    .find_conflicts(&room_number, Stay::new(start, end))
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(conflict_schema());
                let rows: Vec<PgWireResult<_>> = conflicts
                    .into_iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.booking_id)?;
                        encoder.encode_field(&c.guest)?;
                        encoder.encode_field(&c.check_in)?;
                        encoder.encode_field(&c.check_out)?;
                        encoder.encode_field(&c.status)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectBookings { filter } => {
                let records = match filter {
                    BookingFilter::Id(id) => match engine.find_booking(&id).await {
                        Ok(found) => vec![found],
                        Err(EngineError::BookingNotFound(_)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    BookingFilter::Room(room) => {
                        engine.room_bookings(&room).await.map_err(engine_err)?
                    }
                };
                let schema = Arc::new(booking_schema());
                let rows: Vec<PgWireResult<_>> = records
                    .into_iter()
                    .map(|stored| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        for column in columns::LAYOUT {
                            encoder.encode_field(&stored.record.get(column).to_string())?;
                        }
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::CreateBooking(req) => {
                let conf = engine.create_booking(req).await.map_err(engine_err)?;
                confirmation_response(&conf.booking_id, &conf.to_string())
            }
            Command::UpdateStatus { id, status } => {
                let msg = match status {
                    BookingStatus::CheckedIn => engine.check_in(&id).await,
                    BookingStatus::CheckedOut => engine.check_out(&id).await,
                    BookingStatus::Cancelled => engine.cancel_booking(&id).await,
                    BookingStatus::Reserved => Err(EngineError::Validation(
                        "a booking cannot be moved back to Reserved".into(),
                    )),
                }
                .map_err(engine_err)?;
                // Lookups match the trimmed id, which is the stored one.
                confirmation_response(id.trim(), &msg)
            }
            Command::AnnounceLease(lease) => {
                engine.announce_lease(lease).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
        }
    }
}

fn confirmation_response(booking_id: &str, message: &str) -> PgWireResult<Response> {
    let schema = Arc::new(confirmation_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&booking_id.to_string())?;
    encoder.encode_field(&message.to_string())?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn conflict_summary(conflicts: &[Conflict]) -> Option<String> {
    if conflicts.is_empty() {
        return None;
    }
    Some(
        conflicts
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_number"),
        text_field("room_name"),
        text_field("room_type"),
        text_field("daily_rate"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        text_field("status"),
        FieldInfo::new("nights".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("conflicts"),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    ["booking_id", "guest", "check_in", "check_out", "status"]
        .into_iter()
        .map(text_field)
        .collect()
}

/// `Check-In Date` -> `check_in_date`.
fn column_label(header: &str) -> String {
    header
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

fn booking_schema() -> Vec<FieldInfo> {
    columns::LAYOUT
        .iter()
        .map(|header| text_field(&column_label(header)))
        .collect()
}

fn confirmation_schema() -> Vec<FieldInfo> {
    vec![text_field("booking_id"), text_field("confirmation")]
}

/// Result columns a statement will produce, from its SQL text alone.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(sql) {
        Ok(Command::SelectAvailability { .. }) => availability_schema(),
        Ok(Command::SelectConflicts { .. }) => conflict_schema(),
        Ok(Command::SelectBookings { .. }) => booking_schema(),
        Ok(Command::CreateBooking(_) | Command::UpdateStatus { .. }) => confirmation_schema(),
        _ => schema_by_keyword(sql),
    }
}

/// Statements with unbound `$n` placeholders do not parse into commands;
/// fall back to the target table.
fn schema_by_keyword(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains("SELECT") && upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("SELECT") && upper.contains("CONFLICTS") {
        conflict_schema()
    } else if upper.contains("SELECT") && upper.contains("BOOKINGS") {
        booking_schema()
    } else if (upper.contains("INSERT") || upper.contains("UPDATE")) && upper.contains("BOOKINGS") {
        confirmation_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for InnkeepHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.execute(&engine, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct InnkeepQueryParser;

#[async_trait]
impl QueryParser for InnkeepQueryParser {
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
impl ExtendedQueryHandler for InnkeepHandler {
    type Statement = String;
    type QueryParser = InnkeepQueryParser;

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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.execute(&engine, cmd).await
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

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute_text_params(&portal.statement.statement, &params)
}

fn substitute_text_params(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct InnkeepFactory {
    handler: Arc<InnkeepHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<InnkeepAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl InnkeepFactory {
    pub fn new(facilities: Arc<FacilityManager>, password: String) -> Self {
        let auth_source = InnkeepAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(InnkeepHandler::new(facilities)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for InnkeepFactory {
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
    facilities: Arc<FacilityManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(InnkeepFactory::new(facilities, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn user_error(code: &str, msg: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), msg)))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::Validation(_) => "22023",
        EngineError::RoomUnavailable { .. } => "23P01",
        EngineError::BookingNotFound(_) => "P0002",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::IdSpaceExhausted => "55000",
        EngineError::Store(_) => "58030",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
