//! Where finalized request metrics go.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use super::TelemetryError;
use super::record::MetricsRow;
use crate::providers::supabase::SupabaseClient;
use crate::stage::Channel;

/// Persists and reads back metrics rows.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Insert one row.
    async fn insert(&self, row: &MetricsRow) -> Result<(), TelemetryError>;

    /// Most recent rows first, at most `limit`, optionally not older than `since`.
    async fn recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MetricsRow>, TelemetryError>;
}

/// Discards every row.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetryStore;

#[async_trait]
impl TelemetryStore for NoopTelemetryStore {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn insert(&self, _row: &MetricsRow) -> Result<(), TelemetryError> {
        Ok(())
    }

    async fn recent(
        &self,
        _since: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<MetricsRow>, TelemetryError> {
        Ok(Vec::new())
    }
}

/// Rows in a Supabase table through PostgREST.
#[derive(Debug, Clone)]
pub struct SupabaseTelemetryStore {
    client: SupabaseClient,
    table: String,
}

impl SupabaseTelemetryStore {
    pub fn new(client: SupabaseClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl TelemetryStore for SupabaseTelemetryStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn insert(&self, row: &MetricsRow) -> Result<(), TelemetryError> {
        self.client.insert(&self.table, std::slice::from_ref(row)).await?;
        Ok(())
    }

    async fn recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MetricsRow>, TelemetryError> {
        let mut params = vec![
            ("select", "*".to_string()),
            ("order", "timestamp.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            params.push(("timestamp", format!("gte.{}", since.to_rfc3339())));
        }
        Ok(self.client.select(&self.table, &params).await?)
    }
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS voice_metrics (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id             TEXT NOT NULL,
    timestamp              TEXT NOT NULL,      -- RFC 3339, UTC
    user_id                TEXT,
    channel                TEXT NOT NULL,
    stt_duration           INTEGER NOT NULL DEFAULT 0,
    rag_search_duration    INTEGER NOT NULL DEFAULT 0,
    rag_rerank_duration    INTEGER NOT NULL DEFAULT 0,
    llm_duration           INTEGER NOT NULL DEFAULT 0,
    normalization_duration INTEGER NOT NULL DEFAULT 0,
    tts_duration           INTEGER NOT NULL DEFAULT 0,
    total_duration         INTEGER NOT NULL DEFAULT 0,
    transcription_length   INTEGER NOT NULL DEFAULT 0,
    transcription_text     TEXT,
    response_length        INTEGER NOT NULL DEFAULT 0,
    response_text          TEXT,
    normalized_text        TEXT,
    response_sentences     INTEGER NOT NULL DEFAULT 0,
    citations_removed      INTEGER NOT NULL DEFAULT 0,
    markdown_removed       INTEGER NOT NULL DEFAULT 0,
    fillers_added          INTEGER NOT NULL DEFAULT 0,
    documents_found        INTEGER NOT NULL DEFAULT 0,
    documents_used         INTEGER NOT NULL DEFAULT 0,
    avg_similarity         REAL NOT NULL DEFAULT 0,
    cost_stt               REAL NOT NULL DEFAULT 0,
    cost_tts               REAL NOT NULL DEFAULT 0,
    cost_llm               REAL NOT NULL DEFAULT 0,
    cost_total             REAL NOT NULL DEFAULT 0,
    has_error              INTEGER NOT NULL DEFAULT 0,
    error_stage            TEXT,
    error_message          TEXT
);

CREATE INDEX IF NOT EXISTS idx_voice_metrics_timestamp ON voice_metrics(timestamp);
"#;

const COLUMNS: &str = "session_id, timestamp, user_id, channel, stt_duration, \
    rag_search_duration, rag_rerank_duration, llm_duration, normalization_duration, \
    tts_duration, total_duration, transcription_length, transcription_text, \
    response_length, response_text, normalized_text, response_sentences, \
    citations_removed, markdown_removed, fillers_added, documents_found, \
    documents_used, avg_similarity, cost_stt, cost_tts, cost_llm, cost_total, \
    has_error, error_stage, error_message";

/// Local SQLite file, for development and single-host deployments.
///
/// Thread-safe via an internal `Mutex<Connection>`; queries run on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteTelemetryStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteTelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTelemetryStore").finish_non_exhaustive()
    }
}

impl SqliteTelemetryStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, TelemetryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| TelemetryError::Store(format!("create {}: {e}", parent.display())))?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> Result<Self, TelemetryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, TelemetryError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, TelemetryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, TelemetryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| TelemetryError::Store(format!("lock poisoned: {e}")))?;
            op(&guard)
        })
        .await
        .map_err(|e| TelemetryError::Store(format!("blocking task failed: {e}")))?
    }
}

/// Fixed-width RFC 3339 in UTC, so string order is time order.
fn sortable_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn insert_row(conn: &Connection, row: &MetricsRow) -> rusqlite::Result<usize> {
    let sql = format!(
        "INSERT INTO voice_metrics ({COLUMNS}) VALUES \
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, \
          ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)"
    );
    conn.execute(
        &sql,
        params![
            row.session_id,
            sortable_timestamp(&row.timestamp),
            row.user_id,
            row.channel.as_str(),
            row.stt_duration as i64,
            row.rag_search_duration as i64,
            row.rag_rerank_duration as i64,
            row.llm_duration as i64,
            row.normalization_duration as i64,
            row.tts_duration as i64,
            row.total_duration as i64,
            row.transcription_length as i64,
            row.transcription_text,
            row.response_length as i64,
            row.response_text,
            row.normalized_text,
            row.response_sentences as i64,
            row.citations_removed as i64,
            row.markdown_removed as i64,
            row.fillers_added as i64,
            row.documents_found as i64,
            row.documents_used as i64,
            row.avg_similarity,
            row.cost_stt,
            row.cost_tts,
            row.cost_llm,
            row.cost_total,
            row.has_error,
            row.error_stage,
            row.error_message,
        ],
    )
}

fn read_u64(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}

fn row_to_metrics(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricsRow> {
    let timestamp: String = row.get(1)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let channel: String = row.get(3)?;
    let channel = if channel == Channel::Text.as_str() {
        Channel::Text
    } else {
        Channel::Voice
    };

    Ok(MetricsRow {
        session_id: row.get(0)?,
        timestamp,
        user_id: row.get(2)?,
        channel,
        stt_duration: read_u64(row, 4)?,
        rag_search_duration: read_u64(row, 5)?,
        rag_rerank_duration: read_u64(row, 6)?,
        llm_duration: read_u64(row, 7)?,
        normalization_duration: read_u64(row, 8)?,
        tts_duration: read_u64(row, 9)?,
        total_duration: read_u64(row, 10)?,
        transcription_length: read_u64(row, 11)?,
        transcription_text: row.get(12)?,
        response_length: read_u64(row, 13)?,
        response_text: row.get(14)?,
        normalized_text: row.get(15)?,
        response_sentences: read_u64(row, 16)?,
        citations_removed: read_u64(row, 17)?,
        markdown_removed: read_u64(row, 18)?,
        fillers_added: read_u64(row, 19)?,
        documents_found: read_u64(row, 20)?,
        documents_used: read_u64(row, 21)?,
        avg_similarity: row.get(22)?,
        cost_stt: row.get(23)?,
        cost_tts: row.get(24)?,
        cost_llm: row.get(25)?,
        cost_total: row.get(26)?,
        has_error: row.get(27)?,
        error_stage: row.get(28)?,
        error_message: row.get(29)?,
    })
}

#[async_trait]
impl TelemetryStore for SqliteTelemetryStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, row: &MetricsRow) -> Result<(), TelemetryError> {
        let row = row.clone();
        self.with_conn(move |conn| {
            insert_row(conn, &row)?;
            Ok(())
        })
        .await
    }

    async fn recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MetricsRow>, TelemetryError> {
        let since = since.map(|t| sortable_timestamp(&t)).unwrap_or_default();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM voice_metrics WHERE timestamp >= ?1 \
                 ORDER BY timestamp DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![since, limit], row_to_metrics)?;

            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }
}
