use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use serde::Serialize;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct ClashdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ClashdQueryParser>,
}

impl ClashdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ClashdQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement. Rows come back in `format`.
    async fn run(&self, query: &str, format: &Format) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertVenue { id, venue } => {
                let venue = engine
                    .create_venue(id.unwrap_or_else(Ulid::new), venue)
                    .await
                    .map_err(engine_err)?;
                Ok(venue_response(vec![venue], format))
            }
            Command::UpdateVenue { id, changes } => {
                let current = engine.get_venue_info(id).await.map_err(engine_err)?;
                let venue = engine
                    .update_venue(id, changes.apply(&current))
                    .await
                    .map_err(engine_err)?;
                Ok(venue_response(vec![venue], format))
            }
            Command::DeleteVenue { id } => {
                engine.delete_venue(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectVenues { id: Some(id) } => {
                let venue = engine.get_venue_info(id).await.map_err(engine_err)?;
                Ok(venue_response(vec![venue], format))
            }
            Command::SelectVenues { id: None } => {
                Ok(venue_response(engine.list_venues().await, format))
            }
            Command::InsertEvent { id, event, force } => {
                let event = engine
                    .create_event(id.unwrap_or_else(Ulid::new), event, force)
                    .await
                    .map_err(engine_err)?;
                Ok(event_response(vec![event], format))
            }
            Command::UpdateEvent { id, changes, force } => {
                let current = engine.get_event(id).await.map_err(engine_err)?;
                let event = engine
                    .update_event(id, changes.apply(&current), force)
                    .await
                    .map_err(engine_err)?;
                Ok(event_response(vec![event], format))
            }
            Command::CancelEvent { id } => {
                let event = engine.cancel_event(id).await.map_err(engine_err)?;
                Ok(event_response(vec![event], format))
            }
            Command::DeleteEvent { id } => {
                engine.delete_event(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectEvents { filter } => {
                let events = engine.list_events(&filter).await.map_err(engine_err)?;
                Ok(event_response(events, format))
            }
            Command::SelectConflicts {
                venue_id,
                start,
                end,
                exclude,
            } => {
                let events = engine
                    .find_conflicts(venue_id, start, end, exclude)
                    .await
                    .map_err(engine_err)?;
                Ok(event_response(events, format))
            }
            Command::SelectClashes { date } => {
                let clashes = engine.find_clashes_for_date(date).await;
                Ok(rows_response(clash_columns(), format, clashes, encode_clash))
            }
            Command::SelectSuggestions {
                start,
                end,
                event_id,
            } => {
                let venues = engine
                    .suggest_venues(start, end, event_id)
                    .await
                    .map_err(engine_err)?;
                Ok(venue_response(venues, format))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

type Columns = Vec<(String, Type)>;

fn column(name: &str, ty: Type) -> (String, Type) {
    (name.to_string(), ty)
}

fn venue_columns() -> Columns {
    vec![
        column("id", Type::VARCHAR),
        column("name", Type::VARCHAR),
        column("location", Type::VARCHAR),
        column("capacity", Type::INT8),
        column("created_at", Type::INT8),
    ]
}

fn event_columns() -> Columns {
    vec![
        column("id", Type::VARCHAR),
        column("venue_id", Type::VARCHAR),
        column("title", Type::VARCHAR),
        column("date", Type::VARCHAR),
        column("start_time", Type::INT8),
        column("end_time", Type::INT8),
        column("status", Type::VARCHAR),
        column("organizer", Type::VARCHAR),
        column("description", Type::VARCHAR),
        column("created_at", Type::INT8),
        column("updated_at", Type::INT8),
    ]
}

fn clash_columns() -> Columns {
    let mut columns = vec![
        column("venue_id", Type::VARCHAR),
        column("venue_name", Type::VARCHAR),
    ];
    for side in ["first", "second"] {
        columns.push(column(&format!("{side}_id"), Type::VARCHAR));
        columns.push(column(&format!("{side}_title"), Type::VARCHAR));
        columns.push(column(&format!("{side}_start_time"), Type::INT8));
        columns.push(column(&format!("{side}_end_time"), Type::INT8));
        columns.push(column(&format!("{side}_status"), Type::VARCHAR));
    }
    columns
}

/// Field descriptions in the result format the client bound (always text for simple queries).
fn fields(columns: Columns, format: &Format) -> Vec<FieldInfo> {
    columns
        .into_iter()
        .enumerate()
        .map(|(i, (name, ty))| FieldInfo::new(name, None, None, ty, format.format_for(i)))
        .collect()
}

fn encode_venue(encoder: &mut DataRowEncoder, venue: &Venue) -> PgWireResult<()> {
    encoder.encode_field(&venue.id.to_string())?;
    encoder.encode_field(&venue.name)?;
    encoder.encode_field(&venue.location)?;
    encoder.encode_field(&venue.capacity.map(i64::from))?;
    encoder.encode_field(&venue.created_at)?;
    Ok(())
}

fn encode_event(encoder: &mut DataRowEncoder, event: &Event) -> PgWireResult<()> {
    encoder.encode_field(&event.id.to_string())?;
    encoder.encode_field(&event.venue_id.to_string())?;
    encoder.encode_field(&event.title)?;
    encoder.encode_field(&event.date.to_string())?;
    encoder.encode_field(&event.span.start)?;
    encoder.encode_field(&event.span.end)?;
    encoder.encode_field(&event.status.to_string())?;
    encoder.encode_field(&event.organizer)?;
    encoder.encode_field(&event.description)?;
    encoder.encode_field(&event.created_at)?;
    encoder.encode_field(&event.updated_at)?;
    Ok(())
}

fn encode_clash(encoder: &mut DataRowEncoder, clash: &Clash) -> PgWireResult<()> {
    encoder.encode_field(&clash.venue.id.to_string())?;
    encoder.encode_field(&clash.venue.name)?;
    for event in [&clash.first, &clash.second] {
        encoder.encode_field(&event.id.to_string())?;
        encoder.encode_field(&event.title)?;
        encoder.encode_field(&event.span.start)?;
        encoder.encode_field(&event.span.end)?;
        encoder.encode_field(&event.status.to_string())?;
    }
    Ok(())
}

fn rows_response<T>(
    columns: Columns,
    format: &Format,
    items: Vec<T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(fields(columns, format));
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn venue_response(venues: Vec<Venue>, format: &Format) -> Response {
    rows_response(venue_columns(), format, venues, encode_venue)
}

fn event_response(events: Vec<Event>, format: &Format) -> Response {
    rows_response(event_columns(), format, events, encode_event)
}

/// Result columns a statement will produce, from its verb and table alone.
/// Used by Describe, where parameters are still unbound.
fn columns_for_sql(sql: &str) -> Columns {
    let tokens: Vec<String> = sql
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';' || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('"').to_lowercase())
        .collect();
    let after = |keyword: &str| {
        tokens
            .iter()
            .position(|t| t == keyword)
            .and_then(|i| tokens.get(i + 1))
            .map(String::as_str)
    };
    let table = match tokens.first().map(String::as_str) {
        Some("select") => after("from"),
        Some("insert") => after("into"),
        Some("update") => tokens.get(1).map(String::as_str),
        _ => None,
    };
    match table {
        Some("venues") | Some("suggestions") => venue_columns(),
        Some("events") | Some("conflicts") => event_columns(),
        Some("clashes") => clash_columns(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ClashdHandler {
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
        Ok(vec![self.run(query, &Format::UnifiedText).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ClashdQueryParser;

#[async_trait]
impl QueryParser for ClashdQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(fields(
            columns_for_sql(stmt),
            column_format.unwrap_or(&Format::UnifiedText),
        ))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ClashdHandler {
    type Statement = String;
    type QueryParser = ClashdQueryParser;

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
        self.run(&sql, &portal.result_column_format).await
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
            fields(columns_for_sql(&target.statement), &Format::UnifiedText),
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
        Ok(DescribePortalResponse::new(fields(
            columns_for_sql(&target.statement.statement),
            &target.result_column_format,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as (byte range, N).
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote closes and reopens, which reads the same.
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
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

/// Splice bound values into the statement as quoted literals in one left-to-right pass.
/// Inserted text is never rescanned, so a value containing `$1` or `'` stays data.
fn bind_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(text) => {
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

/// Bound parameters are declared VARCHAR, so text and binary formats carry the same UTF-8 bytes.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

/// Cleartext auth against the one configured password; user and database names are ignored.
#[derive(Debug)]
struct SharedPassword(String);

#[async_trait]
impl AuthSource for SharedPassword {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.0.as_bytes().to_vec()))
    }
}

pub struct ClashdFactory {
    handler: Arc<ClashdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ClashdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(ClashdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPassword(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ClashdFactory {
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
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ClashdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// Body of a 23P01 error: the clash report a client needs to decide on a forced retry.
#[derive(Serialize)]
struct ConflictReport<'a> {
    message: String,
    clashes: &'a [Event],
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) | EngineError::VenueNameNotFound(_) => "P0002",
        EngineError::Conflict { .. } => "23P01",
        EngineError::DuplicateName(_) | EngineError::AlreadyExists(_) => "23505",
        EngineError::VenueInUse(_) => "23503",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

/// SQLSTATE and message text for an engine failure.
fn engine_error_parts(e: &EngineError) -> (&'static str, String) {
    let message = match e {
        EngineError::Conflict { clashes } => {
            let report = ConflictReport {
                message: e.to_string(),
                clashes,
            };
            serde_json::to_string(&report).unwrap_or_else(|_| e.to_string())
        }
        _ => e.to_string(),
    };
    (engine_sqlstate(e), message)
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(_) = e {
        tracing::error!("storage failure: {e}");
    }
    let (code, message) = engine_error_parts(&e);
    user_error(code, message)
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(_) => "42703",
        SqlError::Unsupported(_) => "0A000",
        SqlError::TooLong(_) => "54000",
        SqlError::Parse(_)
        | SqlError::Empty
        | SqlError::WrongArity(..)
        | SqlError::MissingColumn(_)
        | SqlError::MissingFilter(_) => "42601",
    };
    user_error(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(columns: &Columns) -> Vec<&str> {
        columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn columns_follow_table() {
        assert_eq!(columns_for_sql("SELECT * FROM venues"), venue_columns());
        assert_eq!(
            columns_for_sql("select * from suggestions where start_time = $1"),
            venue_columns()
        );
        assert_eq!(
            columns_for_sql("INSERT INTO events(title, venue_name) VALUES ($1, $2)"),
            event_columns()
        );
        assert_eq!(
            columns_for_sql("UPDATE \"events\" SET title = $1 WHERE id = $2"),
            event_columns()
        );
        assert_eq!(
            columns_for_sql("SELECT * FROM clashes WHERE date = $1;"),
            clash_columns()
        );
        assert!(columns_for_sql("DELETE FROM events WHERE id = $1").is_empty());
    }

    #[test]
    fn clash_columns_have_both_sides() {
        let columns = clash_columns();
        let cols = names(&columns);
        assert_eq!(cols.len(), 12);
        assert_eq!(cols[2], "first_id");
        assert_eq!(cols[7], "second_id");
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM venues"), 0);
        assert_eq!(count_params("UPDATE events SET title = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("SELECT $10, $3"), 10);
    }

    #[test]
    fn count_params_ignores_quoted_text() {
        assert_eq!(count_params("SELECT * FROM events WHERE title = 'costs $5'"), 0);
        assert_eq!(count_params("SELECT \"$9\" FROM events WHERE id = $1"), 1);
        assert_eq!(count_params("SELECT 'it''s $4' , $2"), 2);
    }

    fn bound(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn bind_leaves_dollar_text_in_values_alone() {
        let sql = bind_params(
            "INSERT INTO events (title, description) VALUES ($1, $2)",
            &bound(&["Gala", "tickets $1 each"]),
        );
        assert_eq!(
            sql,
            "INSERT INTO events (title, description) VALUES ('Gala', 'tickets $1 each')"
        );
    }

    #[test]
    fn bind_escapes_quotes() {
        let sql = bind_params("SELECT * FROM venues WHERE id = $1", &bound(&["x' OR '1'='1"]));
        assert_eq!(sql, "SELECT * FROM venues WHERE id = 'x'' OR ''1''=''1'");
        let cmd = sql::parse_sql(&bind_params(
            "INSERT INTO venues (name) VALUES ($1)",
            &bound(&["O'Brien's $1 Hall"]),
        ))
        .unwrap();
        match cmd {
            Command::InsertVenue { venue, .. } => assert_eq!(venue.name, "O'Brien's $1 Hall"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn bind_handles_nulls_and_double_digit_indexes() {
        let mut params = bound(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]);
        params[1] = None;
        let sql = bind_params("SELECT $10, $1, $2", &params);
        assert_eq!(sql, "SELECT 'j', 'a', NULL");
    }

    #[test]
    fn bind_keeps_placeholders_inside_literals_and_unbound_ones() {
        let sql = bind_params("SELECT '$1', $1, $3", &bound(&["x"]));
        assert_eq!(sql, "SELECT '$1', 'x', $3");
    }

    #[test]
    fn sqlstates_are_distinct_per_outcome() {
        let id = Ulid::new();
        assert_eq!(engine_sqlstate(&EngineError::validation("x")), "22023");
        assert_eq!(engine_sqlstate(&EngineError::NotFound(id)), "P0002");
        assert_eq!(engine_sqlstate(&EngineError::Conflict { clashes: vec![] }), "23P01");
        assert_eq!(engine_sqlstate(&EngineError::DuplicateName("Hall".into())), "23505");
        assert_eq!(engine_sqlstate(&EngineError::VenueInUse(id)), "23503");
    }

    #[test]
    fn conflict_error_carries_json_report() {
        let event = Event {
            id: Ulid::new(),
            venue_id: Ulid::new(),
            title: "Keynote".into(),
            date: chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            span: Span::new(1_748_854_800_000, 1_748_858_400_000),
            organizer: None,
            description: None,
            status: EventStatus::Scheduled,
            created_at: 0,
            updated_at: 0,
        };
        let (code, message) =
            engine_error_parts(&EngineError::Conflict { clashes: vec![event.clone()] });
        assert_eq!(code, "23P01");
        let report: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert!(report["message"].as_str().unwrap().contains("clash"));
        assert_eq!(report["clashes"][0]["id"], event.id.to_string());
        assert_eq!(report["clashes"][0]["date"], "2025-06-02");
        assert_eq!(report["clashes"][0]["status"], "scheduled");
    }
}
