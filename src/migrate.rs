//! Idempotent schema creation for the SQLite backend.
//!
//! Every statement is `IF NOT EXISTS`, so running migrations on each
//! startup is safe. Child tables cascade from `repositories`, which makes
//! repository removal a single `DELETE`.

use anyhow::Result;
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS repositories (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        owner TEXT NOT NULL,
        name TEXT NOT NULL,
        reference TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        last_error TEXT,
        current_generation TEXT,
        sync_generation TEXT,
        sync_started_at INTEGER,
        created_at INTEGER NOT NULL,
        synced_at INTEGER,
        analyzed_at INTEGER,
        UNIQUE(user_id, owner, name, reference)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        repository_id TEXT NOT NULL,
        generation TEXT NOT NULL,
        path TEXT NOT NULL,
        name TEXT NOT NULL,
        directory TEXT NOT NULL,
        extension TEXT,
        language TEXT,
        size INTEGER NOT NULL,
        content TEXT,
        content_hash TEXT,
        UNIQUE(repository_id, generation, path),
        FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS symbols (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        explanation TEXT,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_analyses (
        file_id TEXT PRIMARY KEY,
        repository_id TEXT NOT NULL,
        path TEXT NOT NULL,
        purpose TEXT NOT NULL,
        layer TEXT NOT NULL,
        summary TEXT NOT NULL,
        exports_json TEXT NOT NULL DEFAULT '[]',
        imports_json TEXT NOT NULL DEFAULT '[]',
        key_functions_json TEXT NOT NULL DEFAULT '[]',
        generated_at INTEGER NOT NULL,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS repository_analyses (
        repository_id TEXT PRIMARY KEY,
        summary TEXT NOT NULL,
        architecture TEXT NOT NULL,
        patterns_json TEXT NOT NULL DEFAULT '[]',
        frameworks_json TEXT NOT NULL DEFAULT '[]',
        build_system TEXT NOT NULL,
        entry_points_json TEXT NOT NULL DEFAULT '[]',
        layers_json TEXT NOT NULL DEFAULT '[]',
        generated_at INTEGER NOT NULL,
        FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
    )
    "#,
    // context_path is '' for repository scope so the UNIQUE key holds
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        repository_id TEXT NOT NULL,
        context_type TEXT NOT NULL,
        context_path TEXT NOT NULL DEFAULT '',
        schema_version INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(user_id, repository_id, context_type, context_path),
        FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversation_messages (
        conversation_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (conversation_id, seq),
        FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_repositories_user ON repositories(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_files_generation ON files(repository_id, generation)",
    "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id, start_line)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(statements = SCHEMA.len(), "schema up to date");
    Ok(())
}
