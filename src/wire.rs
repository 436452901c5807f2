use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::StartupHandler;
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
use tokio::net::TcpStream;

use crate::engine::{BookingRequest, BookingResponse, Engine, EngineError};
use crate::legacy;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::slot;
use crate::sql::{self, Command};

pub struct CoversHandler {
    engine: Arc<Engine>,
    query_parser: Arc<CoversQueryParser>,
}

impl CoversHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(CoversQueryParser),
        }
    }

    async fn execute(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::SelectAvailability { start, end } => {
                let start = engine.parse_instant(&start).map_err(engine_err)?;
                let end = engine.parse_instant(&end).map_err(engine_err)?;
                let availability = engine
                    .query_availability(start, end)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = availability
                    .slots
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot::format_instant(s.slot))?;
                        encoder.encode_field(&(s.capacity as i64))?;
                        encoder.encode_field(&(s.reserved as i64))?;
                        encoder.encode_field(&(s.available() as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::SelectAvailabilityReport { start, end } => {
                let start = engine.parse_instant(&start).map_err(engine_err)?;
                let end = engine.parse_instant(&end).map_err(engine_err)?;
                let availability = engine
                    .query_availability(start, end)
                    .await
                    .map_err(engine_err)?;
                let report = to_json(&availability.report())?;

                let schema = Arc::new(report_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&report)?;
                Ok(vec![query_response(schema, vec![Ok(encoder.take_row())])])
            }
            Command::SelectSettings => {
                let settings = engine.restaurant_config().await.map_err(engine_err)?;
                let schema = Arc::new(settings_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(settings.base_parties_per_slot as i64))?;
                encoder.encode_field(&settings.address)?;
                encoder.encode_field(&settings.configured)?;
                Ok(vec![query_response(schema, vec![Ok(encoder.take_row())])])
            }
            Command::UpsertSettings {
                base_capacity,
                address,
            } => {
                engine
                    .save_config(base_capacity, address)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertReservation {
                name,
                email,
                party_size,
                time,
            } => {
                let outcome = engine
                    .attempt_booking(BookingRequest {
                        name,
                        email,
                        party_size,
                        time,
                    })
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(booking_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                match outcome.response() {
                    BookingResponse::Booked { success, time } => {
                        encoder.encode_field(&success)?;
                        encoder.encode_field(&Some(time))?;
                        encoder.encode_field(&"[]".to_string())?;
                    }
                    BookingResponse::Rejected {
                        success,
                        suggested_times,
                    } => {
                        encoder.encode_field(&success)?;
                        encoder.encode_field(&None::<String>)?;
                        encoder.encode_field(&to_json(&suggested_times)?)?;
                    }
                }
                Ok(vec![query_response(schema, vec![Ok(encoder.take_row())])])
            }
            Command::SelectReservations { start, end } => {
                let start = engine.parse_instant(&start).map_err(engine_err)?;
                let end = engine.parse_instant(&end).map_err(engine_err)?;
                let reservations = engine
                    .list_reservations(start, end)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.name)?;
                        encoder.encode_field(&r.email)?;
                        encoder.encode_field(&(r.party_size as i64))?;
                        encoder.encode_field(&slot::format_instant(r.slot))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertOverrides { entries } => {
                let mut parsed = Vec::with_capacity(entries.len());
                for (raw, capacity) in entries {
                    parsed.push((engine.parse_instant(&raw).map_err(engine_err)?, capacity));
                }
                let written = engine.set_overrides(parsed).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(written))])
            }
            Command::DeleteOverride { slot } => {
                let t = engine.parse_instant(&slot).map_err(engine_err)?;
                let removed = engine.clear_override(t).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(removed)),
                )])
            }
            Command::SelectSchedule { day } => {
                let date = parse_day(&day)?;
                let schedule = engine.day_schedule(date).await.map_err(engine_err)?;

                let schema = Arc::new(schedule_schema());
                let rows: Vec<PgWireResult<_>> = schedule
                    .iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot::format_instant(s.slot))?;
                        encoder.encode_field(&(s.capacity as i64))?;
                        encoder.encode_field(&(s.reserved as i64))?;
                        encoder.encode_field(&(s.available() as i64))?;
                        encoder.encode_field(&s.overridden)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![query_response(schema, rows)])
            }
            Command::ImportLegacyDay { day, capacities } => {
                let date = parse_day(&day)?;
                let values = legacy::parse_day_array(&capacities)
                    .map_err(|e| engine_err(e.into()))?;
                let written = engine
                    .import_legacy_day(date, &values)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(written))])
            }
        }
    }
}

fn parse_day(raw: &str) -> PgWireResult<chrono::NaiveDate> {
    slot::parse_date(raw)
        .ok_or_else(|| engine_err(EngineError::invalid(format!("unparseable day {raw:?}"))))
}

fn to_json(value: &impl serde::Serialize) -> PgWireResult<String> {
    serde_json::to_string(value).map_err(|e| {
        tracing::error!("encoding response: {e}");
        user_error("XX000", "internal error".into())
    })
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("slot", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("reserved", Type::INT8),
        field("remaining", Type::INT8),
    ]
}

fn report_schema() -> Vec<FieldInfo> {
    vec![field("report", Type::VARCHAR)]
}

fn settings_schema() -> Vec<FieldInfo> {
    vec![
        field("base_capacity", Type::INT8),
        field("address", Type::VARCHAR),
        field("configured", Type::BOOL),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("success", Type::BOOL),
        field("time", Type::VARCHAR),
        field("suggested_times", Type::VARCHAR),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("party_size", Type::INT8),
        field("time", Type::VARCHAR),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("slot", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("reserved", Type::INT8),
        field("remaining", Type::INT8),
        field("overridden", Type::BOOL),
    ]
}

/// Row shape a statement will produce, judged from its text since
/// placeholders keep it from parsing before binding.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("INSERT") {
        return if upper.contains("RESERVATIONS") {
            booking_schema()
        } else {
            vec![]
        };
    }
    if !upper.starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY_REPORT") {
        report_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("SETTINGS") {
        settings_schema()
    } else if upper.contains("SCHEDULE") {
        schedule_schema()
    } else if upper.contains("RESERVATIONS") {
        reservations_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for CoversHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute(cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CoversQueryParser;

#[async_trait]
impl QueryParser for CoversQueryParser {
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
impl ExtendedQueryHandler for CoversHandler {
    type Statement = String;
    type QueryParser = CoversQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute(cmd).await?;
        responses
            .pop()
            .ok_or_else(|| user_error("XX000", "command produced no response".into()))
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

/// `$N` placeholders outside quoted literals and identifiers, with their
/// byte range and parameter number, left to right.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            // '' closes and reopens, so escaped quotes need no special case
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                let digits = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[digits..i].parse::<usize>()
                    && n > 0
                {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Splice text parameters into `sql` in one pass. Each value lands exactly
/// once, as a quoted literal, and is never scanned again.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut bound = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        bound.push_str(&sql[copied..range.start]);
        match params.get(n - 1) {
            Some(Some(text)) => {
                bound.push('\'');
                bound.push_str(&text.replace('\'', "''"));
                bound.push('\'');
            }
            Some(None) => bound.push_str("NULL"),
            // Left for the parser to reject
            None => bound.push_str(&sql[range.clone()]),
        }
        copied = range.end;
    }
    bound.push_str(&sql[copied..]);
    bound
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CoversFactory {
    handler: Arc<CoversHandler>,
    noop: Arc<NoopHandler>,
}

impl CoversFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(CoversHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoversFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    /// No authentication: every startup is accepted.
    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> std::io::Result<()> {
    let factory = Arc::new(CoversFactory::new(engine));
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// Client mistakes keep their message; internal failures are logged and
/// reported generically.
fn engine_err(e: EngineError) -> PgWireError {
    if !e.is_client_error() {
        tracing::error!("request failed: {e}");
        return user_error("XX000", "internal error".into());
    }
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        _ => "22023",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM settings"), 0);
        assert_eq!(
            count_params("INSERT INTO reservations (name, email, party_size, time) VALUES ($1, $2, $3, $4)"),
            4
        );
        assert_eq!(count_params("SELECT $2, $10, $1"), 10);
        assert_eq!(count_params("SELECT '$'"), 0);
        assert_eq!(count_params("SELECT 'costs $5' FROM settings"), 0);
        assert_eq!(count_params(r#"SELECT "$3" FROM settings WHERE day = $1"#), 1);
    }

    #[test]
    fn bound_values_are_never_rescanned() {
        let sql = "INSERT INTO reservations (name, email, party_size, time) VALUES ($1, $2, $3, $4)";
        let params = [
            Some("Ada".to_string()),
            Some("a$1b@example.com".to_string()),
            Some("2".to_string()),
            Some("2026-10-17T19:00:00Z".to_string()),
        ];
        assert_eq!(
            bind_params(sql, &params),
            "INSERT INTO reservations (name, email, party_size, time) \
             VALUES ('Ada', 'a$1b@example.com', '2', '2026-10-17T19:00:00Z')"
        );
        assert_eq!(
            sql::parse_sql(&bind_params(sql, &params)).unwrap(),
            Command::InsertReservation {
                name: "Ada".into(),
                email: "a$1b@example.com".into(),
                party_size: 2,
                time: "2026-10-17T19:00:00Z".into(),
            }
        );
    }

    #[test]
    fn bound_quotes_and_nulls() {
        let sql = "INSERT INTO settings (base_capacity, address) VALUES ($1, $2)";
        assert_eq!(
            bind_params(sql, &[Some("4".into()), Some("O'Hara's, $2 Main St".into())]),
            "INSERT INTO settings (base_capacity, address) VALUES ('4', 'O''Hara''s, $2 Main St')"
        );
        assert_eq!(
            bind_params(sql, &[Some("4".into()), None]),
            "INSERT INTO settings (base_capacity, address) VALUES ('4', NULL)"
        );
        assert_eq!(bind_params("SELECT $3", &[]), "SELECT $3");
    }

    #[test]
    fn schema_follows_statement_kind() {
        let names = |fields: Vec<FieldInfo>| -> Vec<String> {
            fields.iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(
            names(result_schema("INSERT INTO reservations (name, email, party_size, time) VALUES ($1, $2, $3, $4)")),
            vec!["success", "time", "suggested_times"]
        );
        assert_eq!(
            names(result_schema("select * from reservations where start >= $1 and \"end\" <= $2")),
            vec!["id", "name", "email", "party_size", "time"]
        );
        assert_eq!(
            names(result_schema("SELECT * FROM availability WHERE start >= $1 AND \"end\" <= $2")),
            vec!["slot", "capacity", "reserved", "remaining"]
        );
        assert_eq!(
            names(result_schema("SELECT report FROM availability_report WHERE start >= $1 AND \"end\" <= $2")),
            vec!["report"]
        );
        assert!(result_schema("INSERT INTO overrides (slot, capacity) VALUES ($1, $2)").is_empty());
        assert!(result_schema("DELETE FROM reservations WHERE id = $1").is_empty());
    }

    #[test]
    fn client_errors_keep_their_sqlstate() {
        let code = |e: PgWireError| match e {
            PgWireError::UserError(info) => info.code.clone(),
            other => panic!("unexpected error {other:?}"),
        };
        assert_eq!(code(engine_err(EngineError::invalid("bad"))), "22023");
        assert_eq!(code(engine_err(EngineError::NotFound(ulid::Ulid::nil()))), "P0002");
        assert_eq!(code(engine_err(EngineError::Configuration("none"))), "XX000");
        assert_eq!(code(sql_err(sql::SqlError::Empty)), "42601");
    }
}
