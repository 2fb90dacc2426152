//! Persistent WARN/ERROR log for post-mortem lookups by session or thread.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS log_events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        logged_at   TEXT NOT NULL,
        level       TEXT NOT NULL,
        target      TEXT NOT NULL,
        message     TEXT NOT NULL,
        fields      TEXT,
        session_id  TEXT,
        thread_id   TEXT
    );
    CREATE INDEX IF NOT EXISTS log_events_session ON log_events(session_id);
    CREATE INDEX IF NOT EXISTS log_events_thread ON log_events(thread_id);
";

const DEFAULT_QUERY_LIMIT: u32 = 100;

/// A persisted event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub logged_at: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Remaining structured fields as a JSON object.
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Filters for [`SqliteLogSink::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Case-insensitive (`"warn"` or `"WARN"`).
    pub level: Option<String>,
    /// Substring of the event target.
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub thread_id: Option<String>,
    pub limit: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(dir) = db_path.parent() {
            // A missing directory surfaces as an open error below.
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write(&self, event: &CapturedEvent) -> Result<(), rusqlite::Error> {
        self.conn.lock().execute(
            "INSERT INTO log_events (logged_at, level, target, message, fields, session_id, thread_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Utc::now().to_rfc3339(),
                event.level.as_str().to_uppercase(),
                event.target,
                event.message,
                event.fields_json(),
                event.session_id,
                event.thread_id,
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, logged_at, level, target, message, fields, session_id, thread_id
             FROM log_events
             WHERE (?1 IS NULL OR level = ?1)
               AND (?2 IS NULL OR instr(target, ?2) > 0)
               AND (?3 IS NULL OR session_id = ?3)
               AND (?4 IS NULL OR thread_id = ?4)
             ORDER BY id DESC
             LIMIT ?5",
        )?;
        let level = q.level.as_deref().map(str::to_uppercase);
        let rows = stmt.query_map(
            params![
                level,
                q.target,
                q.session_id,
                q.thread_id,
                q.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
            ],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    logged_at: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    fields: row.get(5)?,
                    session_id: row.get(6)?,
                    thread_id: row.get(7)?,
                })
            },
        )?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM log_events", [], |row| row.get(0))
    }

    /// Most recent event logged under `session_id`, if any.
    pub fn last_for_session(&self, session_id: &str) -> Result<Option<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, logged_at, level, target, message, fields, session_id, thread_id
             FROM log_events WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
            [session_id],
            |row| {
                Ok(LogRecord {
                    id: row.get(0)?,
                    logged_at: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    fields: row.get(5)?,
                    session_id: row.get(6)?,
                    thread_id: row.get(7)?,
                })
            },
        )
        .optional()
    }
}

/// Fields pulled off an event or span.
#[derive(Default)]
struct CapturedFields {
    message: Option<String>,
    session_id: Option<String>,
    thread_id: Option<String>,
    rest: Map<String, Value>,
}

impl CapturedFields {
    fn put(&mut self, name: &str, value: Value) {
        let slot = match name {
            "message" => &mut self.message,
            "session_id" => &mut self.session_id,
            "thread_id" => &mut self.thread_id,
            _ => {
                self.rest.insert(name.to_owned(), value);
                return;
            }
        };
        *slot = Some(match value {
            Value::String(s) => s,
            other => other.to_string(),
        });
    }

    fn has_ids(&self) -> bool {
        self.session_id.is_some() || self.thread_id.is_some()
    }
}

impl Visit for CapturedFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `%value` fields arrive here already formatted; strip Debug quoting.
        let text = format!("{value:?}");
        let text = match field.name() {
            "message" => text,
            _ => text.trim_matches('"').to_owned(),
        };
        self.put(field.name(), Value::String(text));
    }
}

struct CapturedEvent {
    level: Level,
    target: String,
    message: String,
    session_id: Option<String>,
    thread_id: Option<String>,
    rest: Map<String, Value>,
}

impl CapturedEvent {
    fn fields_json(&self) -> Option<String> {
        if self.rest.is_empty() {
            None
        } else {
            serde_json::to_string(&self.rest).ok()
        }
    }
}

/// Ids declared on a span, stored in its extensions so events inside it
/// inherit them.
struct SpanIds {
    session_id: Option<String>,
    thread_id: Option<String>,
}

/// Layer writing WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = CapturedFields::default();
        attrs.record(&mut fields);
        if !fields.has_ids() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanIds {
                session_id: fields.session_id,
                thread_id: fields.thread_id,
            });
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut fields = CapturedFields::default();
        event.record(&mut fields);

        // Innermost span first, so the closest id wins.
        for span in ctx.event_scope(event).into_iter().flatten() {
            if fields.session_id.is_some() && fields.thread_id.is_some() {
                break;
            }
            if let Some(ids) = span.extensions().get::<SpanIds>() {
                fields.session_id = fields.session_id.take().or_else(|| ids.session_id.clone());
                fields.thread_id = fields.thread_id.take().or_else(|| ids.thread_id.clone());
            }
        }

        let captured = CapturedEvent {
            level,
            target: event.metadata().target().to_owned(),
            message: fields.message.unwrap_or_default(),
            session_id: fields.session_id,
            thread_id: fields.thread_id,
            rest: fields.rest,
        };
        if let Err(e) = self.sink.write(&captured) {
            // Logging through tracing here would re-enter this layer.
            eprintln!("murmur-telemetry: failed to persist log event: {e}");
        }
    }
}
