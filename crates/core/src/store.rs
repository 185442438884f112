use std::collections::HashSet;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::error::RubberduckError;
use crate::failure::{FailureConfig, FailureType};
use crate::metrics::WindowEntry;
use crate::model::{CacheEntry, NewProxy, Proxy, ProxyStatus, ProxyUpdate};
use crate::request_log::{LogEntry, LogQuery};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    provider TEXT NOT NULL,
    port INTEGER NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'stopped',
    description TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',
    failure_config TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entries (
    proxy_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (proxy_id, key)
);

CREATE TABLE IF NOT EXISTS log_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    proxy_id INTEGER NOT NULL,
    client_ip TEXT NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    cache_hit INTEGER NOT NULL DEFAULT 0,
    prompt_hash TEXT,
    upstream_bytes INTEGER NOT NULL DEFAULT 0,
    failure_type TEXT NOT NULL DEFAULT 'none',
    response_delay_ms INTEGER NOT NULL DEFAULT 0,
    token_usage INTEGER,
    cost REAL
);

CREATE INDEX IF NOT EXISTS idx_log_proxy_ts ON log_entries (proxy_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_log_ts ON log_entries (timestamp);
"#;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation)
}

/// Store failure policy: anything beyond conflict/not-found (disk errors,
/// corruption, undecodable rows) aborts the process. The only exceptions
/// are boot-time `open` and the health probe `ping`, whose errors the
/// caller reports.
fn fatal(e: impl std::fmt::Display) -> ! {
    tracing::error!("fatal store failure, aborting: {e}");
    std::process::exit(70);
}

/// Durable record of proxies, failure configs, cache entries, and log
/// entries, backed by a single SQLite database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &str) -> Result<Self, RubberduckError> {
        let options = if let Some(rest) = path.strip_prefix("sqlite:") {
            SqliteConnectOptions::new()
                .filename(rest)
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same database.
    pub async fn open_in_memory() -> Result<Self, RubberduckError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with("sqlite::memory:".parse::<SqliteConnectOptions>()?)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), RubberduckError> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }
        tracing::debug!("database schema applied");
        Ok(())
    }

    /// Liveness check used by the health endpoint. Unlike every other
    /// operation, a failure here is reported, not fatal.
    pub async fn ping(&self) -> Result<(), RubberduckError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ─── Proxies ───────────────────────────────────────────────────────────

    pub async fn create_proxy(
        &self,
        owner_id: &str,
        new: &NewProxy,
    ) -> Result<Proxy, RubberduckError> {
        let port = match new.port {
            Some(port) => {
                if self.get_proxy_by_port(port).await.is_some() {
                    return Err(RubberduckError::Conflict(format!(
                        "port {port} is already assigned to another proxy"
                    )));
                }
                port
            }
            None => self.first_free_port().await?,
        };

        let config = FailureConfig::default();
        let created_at = now_ms();
        let result = sqlx::query(
            "INSERT INTO proxies (owner_id, name, provider, port, status, description, tags, failure_config, created_at) \
             VALUES (?, ?, ?, ?, 'stopped', ?, ?, ?, ?)",
        )
        .bind(owner_id)
        .bind(&new.name)
        .bind(new.provider.as_str())
        .bind(i64::from(port))
        .bind(&new.description)
        .bind(encode_json(&new.tags))
        .bind(encode_json(&config))
        .bind(created_at)
        .execute(&self.pool)
        .await;

        let result = match result {
            // Backstop for two racing creates on the same port
            Err(e) if is_unique_violation(&e) => {
                return Err(RubberduckError::Conflict(format!(
                    "port {port} is already assigned to another proxy"
                )));
            }
            Err(e) => fatal(e),
            Ok(result) => result,
        };

        self.get_proxy(result.last_insert_rowid()).await
    }

    /// First unassigned port in the automatic range 8001-9999.
    async fn first_free_port(&self) -> Result<u16, RubberduckError> {
        let rows = sqlx::query("SELECT port FROM proxies")
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e));
        let taken: HashSet<i64> = rows.iter().map(|r| r.get::<i64, _>("port")).collect();
        (8001..=9999)
            .find(|p| !taken.contains(&i64::from(*p)))
            .ok_or_else(|| {
                RubberduckError::Conflict("no free port available in 8001-9999".to_string())
            })
    }

    pub async fn get_proxy(&self, id: i64) -> Result<Proxy, RubberduckError> {
        sqlx::query("SELECT * FROM proxies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .map(|r| row_to_proxy(&r))
            .ok_or_else(|| RubberduckError::NotFound(format!("proxy {id}")))
    }

    pub async fn get_proxy_by_port(&self, port: u16) -> Option<Proxy> {
        sqlx::query("SELECT * FROM proxies WHERE port = ?")
            .bind(i64::from(port))
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .map(|r| row_to_proxy(&r))
    }

    pub async fn list_proxies(&self, owner_id: &str) -> Vec<Proxy> {
        sqlx::query("SELECT * FROM proxies WHERE owner_id = ? ORDER BY id")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .iter()
            .map(row_to_proxy)
            .collect()
    }

    pub async fn list_proxies_with_status(&self, status: ProxyStatus) -> Vec<Proxy> {
        sqlx::query("SELECT * FROM proxies WHERE status = ? ORDER BY id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .iter()
            .map(row_to_proxy)
            .collect()
    }

    pub async fn update_proxy(
        &self,
        id: i64,
        update: &ProxyUpdate,
    ) -> Result<Proxy, RubberduckError> {
        let current = self.get_proxy(id).await?;

        if let Some(port) = update.port
            && port != current.port
        {
            if current.status == ProxyStatus::Running {
                return Err(RubberduckError::Conflict(
                    "stop the proxy before changing its port".to_string(),
                ));
            }
            if self.get_proxy_by_port(port).await.is_some() {
                return Err(RubberduckError::Conflict(format!(
                    "port {port} is already assigned to another proxy"
                )));
            }
        }

        let name = update.name.clone().unwrap_or(current.name);
        let description = update.description.clone().unwrap_or(current.description);
        let tags = update.tags.clone().unwrap_or(current.tags);
        let port = update.port.unwrap_or(current.port);

        sqlx::query("UPDATE proxies SET name = ?, description = ?, tags = ?, port = ? WHERE id = ?")
            .bind(&name)
            .bind(&description)
            .bind(encode_json(&tags))
            .bind(i64::from(port))
            .bind(id)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e));

        self.get_proxy(id).await
    }

    pub async fn set_proxy_status(
        &self,
        id: i64,
        status: ProxyStatus,
    ) -> Result<(), RubberduckError> {
        let result = sqlx::query("UPDATE proxies SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e));
        if result.rows_affected() == 0 {
            return Err(RubberduckError::NotFound(format!("proxy {id}")));
        }
        Ok(())
    }

    pub async fn set_failure_config(
        &self,
        id: i64,
        config: &FailureConfig,
    ) -> Result<(), RubberduckError> {
        let result = sqlx::query("UPDATE proxies SET failure_config = ? WHERE id = ?")
            .bind(encode_json(config))
            .bind(id)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e));
        if result.rows_affected() == 0 {
            return Err(RubberduckError::NotFound(format!("proxy {id}")));
        }
        Ok(())
    }

    /// Delete a stopped proxy together with its cache entries.
    pub async fn delete_proxy(&self, id: i64) -> Result<(), RubberduckError> {
        let proxy = self.get_proxy(id).await?;
        if proxy.status == ProxyStatus::Running {
            return Err(RubberduckError::Conflict(
                "stop the proxy before deleting it".to_string(),
            ));
        }
        let mut tx = self.pool.begin().await.unwrap_or_else(|e| fatal(e));
        sqlx::query("DELETE FROM cache_entries WHERE proxy_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .unwrap_or_else(|e| fatal(e));
        sqlx::query("DELETE FROM proxies WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .unwrap_or_else(|e| fatal(e));
        tx.commit().await.unwrap_or_else(|e| fatal(e));
        Ok(())
    }

    // ─── Cache entries ─────────────────────────────────────────────────────

    /// Insert or overwrite the entry at `(proxy_id, key)`. Concurrent
    /// writers resolve to one row, last writer wins.
    pub async fn upsert_cache_entry(
        &self,
        proxy_id: i64,
        key: &str,
        status_code: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) {
        sqlx::query(
            "INSERT INTO cache_entries (proxy_id, key, status_code, headers, body, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (proxy_id, key) DO UPDATE SET \
             status_code = excluded.status_code, headers = excluded.headers, \
             body = excluded.body, created_at = excluded.created_at",
        )
        .bind(proxy_id)
        .bind(key)
        .bind(i64::from(status_code))
        .bind(encode_json(&headers))
        .bind(body)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .unwrap_or_else(|e| fatal(e));
    }

    pub async fn get_cache_entry(&self, proxy_id: i64, key: &str) -> Option<CacheEntry> {
        sqlx::query("SELECT * FROM cache_entries WHERE proxy_id = ? AND key = ?")
            .bind(proxy_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .map(|r| row_to_cache_entry(&r))
    }

    pub async fn delete_cache_entries(&self, proxy_id: i64) -> u64 {
        sqlx::query("DELETE FROM cache_entries WHERE proxy_id = ?")
            .bind(proxy_id)
            .execute(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .rows_affected()
    }

    pub async fn delete_all_cache_entries(&self) -> u64 {
        sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .rows_affected()
    }

    /// Entry count and total body bytes for one proxy's cache.
    pub async fn cache_stats(&self, proxy_id: i64) -> (i64, i64) {
        let row = sqlx::query(
            "SELECT COUNT(*) AS entries, COALESCE(SUM(LENGTH(body)), 0) AS bytes \
             FROM cache_entries WHERE proxy_id = ?",
        )
        .bind(proxy_id)
        .fetch_one(&self.pool)
        .await
        .unwrap_or_else(|e| fatal(e));
        (row.get("entries"), row.get("bytes"))
    }

    // ─── Log entries ───────────────────────────────────────────────────────

    /// Append one audit record; returns the assigned id.
    pub async fn append_log(&self, entry: &LogEntry) -> i64 {
        sqlx::query(
            "INSERT INTO log_entries (timestamp, proxy_id, client_ip, method, path, status_code, \
             latency_ms, cache_hit, prompt_hash, upstream_bytes, failure_type, response_delay_ms, \
             token_usage, cost) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.timestamp)
        .bind(entry.proxy_id)
        .bind(&entry.client_ip)
        .bind(&entry.method)
        .bind(&entry.path)
        .bind(i64::from(entry.status_code))
        .bind(entry.latency_ms)
        .bind(entry.cache_hit)
        .bind(&entry.prompt_hash)
        .bind(entry.upstream_bytes)
        .bind(entry.failure_type.render())
        .bind(entry.response_delay_ms)
        .bind(entry.token_usage)
        .bind(entry.cost)
        .execute(&self.pool)
        .await
        .unwrap_or_else(|e| fatal(e))
        .last_insert_rowid()
    }

    fn push_log_filters(qb: &mut QueryBuilder<'_, Sqlite>, query: &LogQuery) {
        if let Some(proxy_id) = query.proxy_id {
            qb.push(" AND proxy_id = ").push_bind(proxy_id);
        }
        match query.status_code.as_deref() {
            Some("2xx") => {
                qb.push(" AND status_code BETWEEN 200 AND 299");
            }
            Some("4xx") => {
                qb.push(" AND status_code BETWEEN 400 AND 499");
            }
            Some("5xx") => {
                qb.push(" AND status_code BETWEEN 500 AND 599");
            }
            Some(exact) => {
                if let Ok(code) = exact.parse::<u16>() {
                    qb.push(" AND status_code = ").push_bind(i64::from(code));
                }
            }
            None => {}
        }
        if let Some(hit) = query.cache_hit {
            qb.push(" AND cache_hit = ").push_bind(hit);
        }
        if let Some(from) = query.from {
            qb.push(" AND timestamp >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            qb.push(" AND timestamp <= ").push_bind(to);
        }
    }

    /// Filtered range scan, newest first, plus the unpaginated total.
    pub async fn query_logs(&self, query: &LogQuery) -> (Vec<LogEntry>, i64) {
        let mut count_qb =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM log_entries WHERE 1=1");
        Self::push_log_filters(&mut count_qb, query);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .get("total");

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM log_entries WHERE 1=1");
        Self::push_log_filters(&mut qb, query);
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(i64::from(query.limit()))
            .push(" OFFSET ")
            .push_bind(i64::from(query.offset()));

        let entries = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .iter()
            .map(row_to_log_entry)
            .collect();
        (entries, total)
    }

    /// The aggregation slice of every entry at or after `since_ms`,
    /// optionally scoped to one proxy.
    pub async fn window_entries(&self, proxy_id: Option<i64>, since_ms: i64) -> Vec<WindowEntry> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT status_code, latency_ms, cache_hit, failure_type FROM log_entries WHERE timestamp >= ",
        );
        qb.push_bind(since_ms);
        if let Some(proxy_id) = proxy_id {
            qb.push(" AND proxy_id = ").push_bind(proxy_id);
        }
        qb.build()
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .iter()
            .map(|r| WindowEntry {
                status_code: r.get::<i64, _>("status_code") as u16,
                latency_ms: r.get("latency_ms"),
                cache_hit: r.get("cache_hit"),
                failure_type: parse_failure_type(r.get("failure_type")),
            })
            .collect()
    }

    /// Cache hit rate over the last 60 minutes, if the proxy saw traffic.
    pub async fn cache_hit_rate_60m(&self, proxy_id: i64) -> Option<f64> {
        let since = now_ms() - 60 * 60 * 1000;
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(SUM(cache_hit), 0) AS hits \
             FROM log_entries WHERE proxy_id = ? AND timestamp >= ?",
        )
        .bind(proxy_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .unwrap_or_else(|e| fatal(e));
        let total: i64 = row.get("total");
        let hits: i64 = row.get("hits");
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }

    /// Newest entries across all proxies, for the dashboard activity feed.
    pub async fn recent_logs(&self, limit: u32) -> Vec<LogEntry> {
        sqlx::query("SELECT * FROM log_entries ORDER BY timestamp DESC, id DESC LIMIT ?")
            .bind(i64::from(limit.clamp(1, 500)))
            .fetch_all(&self.pool)
            .await
            .unwrap_or_else(|e| fatal(e))
            .iter()
            .map(row_to_log_entry)
            .collect()
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| fatal(e))
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_else(|e| fatal(e))
}

fn parse_failure_type(raw: String) -> FailureType {
    raw.parse().unwrap_or_else(|e: String| fatal(e))
}

fn row_to_proxy(row: &SqliteRow) -> Proxy {
    let provider: String = row.get("provider");
    let status: String = row.get("status");
    let tags: String = row.get("tags");
    let failure_config: String = row.get("failure_config");
    Proxy {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        provider: provider.parse().unwrap_or_else(|e: String| fatal(e)),
        port: row.get::<i64, _>("port") as u16,
        status: status.parse().unwrap_or_else(|e: String| fatal(e)),
        description: row.get("description"),
        tags: decode_json(&tags),
        failure_config: decode_json(&failure_config),
        created_at: row.get("created_at"),
    }
}

fn row_to_cache_entry(row: &SqliteRow) -> CacheEntry {
    let headers: String = row.get("headers");
    CacheEntry {
        proxy_id: row.get("proxy_id"),
        key: row.get("key"),
        status_code: row.get::<i64, _>("status_code") as u16,
        headers: decode_json(&headers),
        body: row.get("body"),
        created_at: row.get("created_at"),
    }
}

fn row_to_log_entry(row: &SqliteRow) -> LogEntry {
    LogEntry {
        id: row.get("id"),
        timestamp: row.get("timestamp"),
        proxy_id: row.get("proxy_id"),
        client_ip: row.get("client_ip"),
        method: row.get("method"),
        path: row.get("path"),
        status_code: row.get::<i64, _>("status_code") as u16,
        latency_ms: row.get("latency_ms"),
        cache_hit: row.get("cache_hit"),
        prompt_hash: row.get("prompt_hash"),
        upstream_bytes: row.get("upstream_bytes"),
        failure_type: parse_failure_type(row.get("failure_type")),
        response_delay_ms: row.get("response_delay_ms"),
        token_usage: row.get("token_usage"),
        cost: row.get("cost"),
    }
}
