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

use crate::access::{AccessError, AccessPolicy, Requester};
use crate::auth::LedgerAuthSource;
use crate::engine::{Engine, EngineError};
use crate::hotel::HotelManager;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct LedgerHandler {
    hotels: Arc<HotelManager>,
    policy: Arc<AccessPolicy>,
    query_parser: Arc<LedgerQueryParser>,
}

impl LedgerHandler {
    pub fn new(hotels: Arc<HotelManager>, policy: Arc<AccessPolicy>) -> Self {
        Self {
            hotels,
            policy,
            query_parser: Arc::new(LedgerQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let hotel = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.hotels.get_or_create(&hotel).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("hotel error: {e}"),
            )))
        })
    }

    fn resolve_requester<C: ClientInfo>(&self, client: &C) -> PgWireResult<Requester> {
        match client.metadata().get("user") {
            Some(user) => Ok(self.policy.requester(user)),
            None => Err(access_err(AccessError::Forbidden("no account on connection"))),
        }
    }

    /// Parse, authorize and run one statement, recording RED metrics.
    async fn run<C: ClientInfo>(&self, client: &C, sql_text: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let requester = self.resolve_requester(client)?;
        let cmd = sql::parse_sql(sql_text).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let started = Instant::now();
        let result = self.execute_command(&engine, &requester, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    /// Load a reservation and make sure the requester may touch it.
    async fn owned_reservation(
        &self,
        engine: &Engine,
        requester: &Requester,
        id: &ulid::Ulid,
        label: &'static str,
    ) -> PgWireResult<Reservation> {
        let reservation = engine.get_reservation(id).await.map_err(engine_err)?;
        requester
            .check_owner(&reservation)
            .map_err(|e| denied(requester, label, e))?;
        Ok(reservation)
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        requester: &Requester,
        cmd: Command,
    ) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        requester
            .authorize(&cmd)
            .map_err(|e| denied(requester, label, e))?;

        match cmd {
            Command::InsertRoom {
                number,
                capacity,
                rate,
            } => {
                engine
                    .create_room(number, capacity, rate)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom {
                number,
                capacity,
                rate,
            } => {
                engine
                    .update_room(number, capacity, rate)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRoom { number } => {
                engine.delete_room(number).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms { number } => {
                let rooms = match number {
                    Some(n) => match engine.room_info(n).await {
                        Ok(info) => vec![info],
                        Err(EngineError::RoomNotFound(_)) => vec![],
                        Err(e) => return Err(engine_err(e)),
                    },
                    None => engine.list_rooms().await,
                };
                Ok(room_rows(rooms))
            }
            Command::InsertReservation {
                id,
                customer,
                start,
                nights,
                party_size,
                room,
            } => {
                let request = requester.stay_request(customer, start, nights, party_size, room);
                engine
                    .create_reservation(id, request)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateReservation { id, change } => {
                self.owned_reservation(engine, requester, &id, label).await?;
                engine
                    .update_reservation(id, change)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::PayReservation { id, price } => {
                engine.mark_paid(id, price).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::ReplaceRoom { id, old, new } => {
                self.owned_reservation(engine, requester, &id, label).await?;
                engine.replace_room(id, old, new).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                self.owned_reservation(engine, requester, &id, label).await?;
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReservations { filter } => {
                let reservations = engine.list_reservations(&requester.scope(filter)).await;
                Ok(reservation_rows(reservations))
            }
            Command::SelectAvailability { start, nights } => {
                let rooms = engine.free_rooms(start, nights).await.map_err(engine_err)?;
                Ok(room_rows(rooms))
            }
            Command::SelectRoomCandidates { id, room } => {
                self.owned_reservation(engine, requester, &id, label).await?;
                let rooms = engine
                    .replacement_candidates(&id, room)
                    .await
                    .map_err(engine_err)?;
                Ok(room_rows(rooms))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("number", Type::INT8),
        field("capacity", Type::INT8),
        field("rate", Type::INT8),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("requester", Type::VARCHAR),
        field("customer", Type::VARCHAR),
        field("start", Type::VARCHAR),
        field("nights", Type::INT8),
        field("party_size", Type::INT8),
        field("rooms", Type::VARCHAR),
        field("price", Type::INT8),
        field("paid", Type::BOOL),
        field("status", Type::VARCHAR),
    ]
}

fn money(m: Money) -> i64 {
    i64::try_from(m).unwrap_or(i64::MAX)
}

fn room_rows(rooms: Vec<RoomInfo>) -> Response {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<_>> = rooms
        .into_iter()
        .map(|room| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&i64::from(room.number))?;
            encoder.encode_field(&i64::from(room.capacity))?;
            encoder.encode_field(&money(room.rate))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let rooms = r
                .rooms
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let status = match r.status() {
                ReservationStatus::New => "new",
                ReservationStatus::Allocated => "allocated",
                ReservationStatus::Paid => "paid",
            }
            .to_string();
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.requester)?;
            encoder.encode_field(&r.customer)?;
            encoder.encode_field(&r.start().to_string())?;
            encoder.encode_field(&i64::from(r.nights()))?;
            encoder.encode_field(&i64::from(r.party_size))?;
            encoder.encode_field(&rooms)?;
            encoder.encode_field(&money(r.price))?;
            encoder.encode_field(&r.paid)?;
            encoder.encode_field(&status)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Columns a statement will return, judged from its text (parameters may
/// still be unbound at describe time).
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return vec![];
    }
    if lower.contains("reservations") {
        reservation_schema()
    } else if ["rooms", "availability", "room_candidates"]
        .iter()
        .any(|t| lower.contains(t))
    {
        room_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for LedgerHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LedgerQueryParser;

#[async_trait]
impl QueryParser for LedgerQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
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
impl ExtendedQueryHandler for LedgerHandler {
    type Statement = String;
    type QueryParser = LedgerQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql).await
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

/// Highest `$N` placeholder in the statement.
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

/// Inline bound text parameters as quoted literals in one left-to-right pass,
/// so text inside a bound value is never treated as a placeholder.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(|b| b.is_ascii_digit()).count();
        let bound = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(Some(bytes)) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LedgerFactory {
    handler: Arc<LedgerHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LedgerAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LedgerFactory {
    pub fn new(hotels: Arc<HotelManager>, policy: Arc<AccessPolicy>, password: String) -> Self {
        Self {
            handler: Arc::new(LedgerHandler::new(hotels, policy)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                LedgerAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LedgerFactory {
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
    hotels: Arc<HotelManager>,
    policy: Arc<AccessPolicy>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = LedgerFactory::new(hotels, policy, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

/// Refuse a statement on capability grounds, counting and logging the denial.
fn denied(requester: &Requester, command: &'static str, e: AccessError) -> PgWireError {
    metrics::counter!(observability::ACCESS_DENIED_TOTAL, "command" => command).increment(1);
    tracing::warn!(account = %requester.account, command, "{e}");
    access_err(e)
}

fn access_err(e: AccessError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42501".into(),
        e.to_string(),
    )))
}
