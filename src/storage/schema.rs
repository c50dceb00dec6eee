//! Schema migrations, applied in order and tracked through
//! `PRAGMA user_version`. Each migration is a multi-statement script run
//! inside one transaction.

use sqlx::{Row, SqlitePool};

use crate::errors::TxResult;

const MIGRATIONS: &[&str] = &[V1_BASE];

/// Bring the database up to the latest schema version.
pub async fn migrate(pool: &SqlitePool) -> TxResult<()> {
    let row = sqlx::query("PRAGMA user_version").fetch_one(pool).await?;
    let current: i64 = row.try_get(0)?;
    for (idx, script) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as i64;
        if current < version {
            let mut tx = pool.begin().await?;
            sqlx::raw_sql(script).execute(&mut *tx).await?;
            sqlx::raw_sql(&format!("PRAGMA user_version = {version}"))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "applied schema migration");
        }
    }
    Ok(())
}

const V1_BASE: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL CHECK (length(title) > 0),
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'backlog',
    score INTEGER NOT NULL DEFAULT 500 CHECK (score BETWEEN 0 AND 1000),
    parent_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    completed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_tasks_status_score ON tasks(status, score DESC, id ASC);
CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id);

CREATE TABLE IF NOT EXISTS task_deps (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    blocker_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (task_id, blocker_id)
);
CREATE INDEX IF NOT EXISTS idx_task_deps_blocker ON task_deps(blocker_id);

CREATE TABLE IF NOT EXISTS workers (
    id TEXT PRIMARY KEY,
    hostname TEXT NOT NULL DEFAULT '',
    pid INTEGER NOT NULL DEFAULT 0,
    capabilities TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'starting',
    registered_at INTEGER NOT NULL,
    last_heartbeat_at INTEGER NOT NULL,
    current_task_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS claims (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    worker_id TEXT NOT NULL REFERENCES workers(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'active',
    claimed_at INTEGER NOT NULL,
    released_at INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_claims_active_task
    ON claims(task_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_claims_worker ON claims(worker_id, status);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    agent TEXT NOT NULL,
    task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
    pid INTEGER,
    transcript_path TEXT,
    stdout_bytes INTEGER NOT NULL DEFAULT 0,
    stderr_bytes INTEGER NOT NULL DEFAULT 0,
    transcript_bytes INTEGER NOT NULL DEFAULT 0,
    last_activity_at INTEGER NOT NULL,
    last_check_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'running',
    exit_code INTEGER,
    summary TEXT,
    error_message TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
CREATE INDEX IF NOT EXISTS idx_runs_task ON runs(task_id);
CREATE INDEX IF NOT EXISTS idx_runs_agent ON runs(agent);

CREATE TABLE IF NOT EXISTS learnings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL CHECK (length(content) > 0),
    source_type TEXT NOT NULL DEFAULT 'manual',
    source_ref TEXT,
    keywords TEXT NOT NULL DEFAULT '[]',
    category TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    last_used_at INTEGER,
    outcome_score REAL CHECK (outcome_score IS NULL OR (outcome_score BETWEEN 0.0 AND 1.0)),
    embedding BLOB,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_learnings_category ON learnings(category);
CREATE INDEX IF NOT EXISTS idx_learnings_source ON learnings(source_type, source_ref);
CREATE INDEX IF NOT EXISTS idx_learnings_created ON learnings(created_at DESC);

CREATE VIRTUAL TABLE IF NOT EXISTS learnings_fts USING fts5(content, keywords);

CREATE TABLE IF NOT EXISTS anchors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    learning_id INTEGER NOT NULL REFERENCES learnings(id) ON DELETE CASCADE,
    anchor_type TEXT NOT NULL,
    file_path TEXT NOT NULL,
    anchor_value TEXT NOT NULL,
    content_hash TEXT,
    content_preview TEXT,
    symbol_name TEXT,
    line_start INTEGER,
    line_end INTEGER,
    status TEXT NOT NULL DEFAULT 'valid',
    pinned INTEGER NOT NULL DEFAULT 0,
    verified_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_anchors_learning ON anchors(learning_id);
CREATE INDEX IF NOT EXISTS idx_anchors_path ON anchors(file_path);
CREATE INDEX IF NOT EXISTS idx_anchors_status ON anchors(status);

CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    src_type TEXT NOT NULL,
    src_id TEXT NOT NULL,
    dst_type TEXT NOT NULL,
    dst_id TEXT NOT NULL,
    edge_type TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    invalidated_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src_type, src_id, edge_type);
CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst_type, dst_id, edge_type);

CREATE TABLE IF NOT EXISTS anchor_invalidations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    anchor_id INTEGER NOT NULL REFERENCES anchors(id) ON DELETE CASCADE,
    old_status TEXT NOT NULL,
    new_status TEXT NOT NULL,
    reason TEXT NOT NULL,
    detected_by TEXT NOT NULL,
    old_content_hash TEXT,
    new_content_hash TEXT,
    similarity_score REAL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_anchor_inval_anchor
    ON anchor_invalidations(anchor_id, id DESC);
"#;
