//! SQLite-backed [`Store`] implementation.
//!
//! Multi-statement operations run inside one transaction, and each such
//! transaction starts with a write so SQLite takes the write lock before
//! reading anything. That keeps the conditional sync update, generation
//! commit and message-sequence allocation race-free across connections.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use repolens_core::models::{
    content_hash, ContextScope, Conversation, ConversationKey, ConversationMessage,
    FileAnalysis, FileNode, RepoRef, RepoStatus, Repository, RepositoryAnalysis, Role, Symbol,
    SymbolKind, CONVERSATION_SCHEMA_VERSION,
};
use repolens_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const REPOSITORY_COLUMNS: &str = "id, user_id, owner, name, reference, status, last_error, \
     current_generation, sync_generation, sync_started_at, created_at, synced_at, analyzed_at";

const FILE_COLUMNS: &str = "f.id, f.repository_id, f.generation, f.path, f.name, f.directory, \
     f.extension, f.language, f.size, f.content, f.content_hash";

fn repository_from_row(row: &SqliteRow) -> Result<Repository> {
    let status: String = row.get("status");
    Ok(Repository {
        id: row.get("id"),
        user_id: row.get("user_id"),
        owner: row.get("owner"),
        name: row.get("name"),
        reference: row.get("reference"),
        status: RepoStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown repository status in database: {}", status))?,
        last_error: row.get("last_error"),
        current_generation: row.get("current_generation"),
        sync_generation: row.get("sync_generation"),
        sync_started_at: row.get("sync_started_at"),
        created_at: row.get("created_at"),
        synced_at: row.get("synced_at"),
        analyzed_at: row.get("analyzed_at"),
    })
}

fn file_from_row(row: &SqliteRow) -> FileNode {
    let size: i64 = row.get("size");
    FileNode {
        id: row.get("id"),
        repository_id: row.get("repository_id"),
        generation: row.get("generation"),
        path: row.get("path"),
        name: row.get("name"),
        directory: row.get("directory"),
        extension: row.get("extension"),
        language: row.get("language"),
        size: size.max(0) as u64,
        content: row.get("content"),
        content_hash: row.get("content_hash"),
    }
}

fn symbol_from_row(row: &SqliteRow) -> Result<Symbol> {
    let kind: String = row.get("kind");
    let start_line: i64 = row.get("start_line");
    let end_line: i64 = row.get("end_line");
    Ok(Symbol {
        id: row.get("id"),
        file_id: row.get("file_id"),
        name: row.get("name"),
        kind: SymbolKind::parse(&kind)
            .ok_or_else(|| anyhow!("unknown symbol kind in database: {}", kind))?,
        start_line: start_line as u32,
        end_line: end_line as u32,
        explanation: row.get("explanation"),
    })
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.get(column);
    serde_json::from_str(&raw).map_err(|e| anyhow!("corrupt {} column: {}", column, e))
}

async fn insert_symbol(tx: &mut Transaction<'_, Sqlite>, symbol: &Symbol) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO symbols (id, file_id, name, kind, start_line, end_line, explanation)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&symbol.id)
    .bind(&symbol.file_id)
    .bind(&symbol.name)
    .bind(symbol.kind.as_str())
    .bind(symbol.start_line as i64)
    .bind(symbol.end_line as i64)
    .bind(&symbol.explanation)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Repository scope is stored with an empty path.
fn scope_path(scope: &ContextScope) -> &str {
    scope.path.as_deref().unwrap_or("")
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_repository(&self, repo: &Repository) -> Result<Repository> {
        sqlx::query(
            r#"
            INSERT INTO repositories (id, user_id, owner, name, reference, status, last_error,
                                      current_generation, created_at, synced_at, analyzed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, owner, name, reference) DO NOTHING
            "#,
        )
        .bind(&repo.id)
        .bind(&repo.user_id)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.reference)
        .bind(repo.status.as_str())
        .bind(&repo.last_error)
        .bind(&repo.current_generation)
        .bind(repo.created_at)
        .bind(repo.synced_at)
        .bind(repo.analyzed_at)
        .execute(&self.pool)
        .await?;

        self.find_repository(&repo.user_id, &repo.repo_ref())
            .await?
            .ok_or_else(|| anyhow!("repository {} vanished after insert", repo.full_name()))
    }

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM repositories WHERE id = ?",
            REPOSITORY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(repository_from_row).transpose()
    }

    async fn find_repository(&self, user_id: &str, repo: &RepoRef) -> Result<Option<Repository>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM repositories \
             WHERE user_id = ? AND owner = ? AND name = ? AND reference = ?",
            REPOSITORY_COLUMNS
        ))
        .bind(user_id)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(repository_from_row).transpose()
    }

    async fn list_repositories(&self, user_id: &str) -> Result<Vec<Repository>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM repositories WHERE user_id = ? ORDER BY created_at, rowid",
            REPOSITORY_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(repository_from_row).collect()
    }

    async fn delete_repository(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_begin_sync(
        &self,
        id: &str,
        generation: &str,
        started_at: i64,
        stale_before: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET status = 'syncing', sync_generation = ?, sync_started_at = ?
            WHERE id = ?
              AND (status != 'syncing' OR sync_started_at IS NULL OR sync_started_at < ?)
            "#,
        )
        .bind(generation)
        .bind(started_at)
        .bind(id)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_sync(&self, id: &str, generation: &str, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE repositories
            SET status = 'error', last_error = ?, sync_generation = NULL, sync_started_at = NULL
            WHERE id = ? AND status = 'syncing' AND sync_generation = ?
            "#,
        )
        .bind(reason)
        .bind(id)
        .bind(generation)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn stage_files(&self, files: &[FileNode], symbols: &[Symbol]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for file in files {
            sqlx::query(
                r#"
                INSERT INTO files (id, repository_id, generation, path, name, directory,
                                   extension, language, size, content, content_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&file.id)
            .bind(&file.repository_id)
            .bind(&file.generation)
            .bind(&file.path)
            .bind(&file.name)
            .bind(&file.directory)
            .bind(&file.extension)
            .bind(&file.language)
            .bind(file.size as i64)
            .bind(&file.content)
            .bind(&file.content_hash)
            .execute(&mut *tx)
            .await?;
        }

        for symbol in symbols {
            insert_symbol(&mut tx, symbol).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn commit_generation(
        &self,
        repository_id: &str,
        generation: &str,
        synced_at: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE repositories
            SET current_generation = ?, status = 'ready', synced_at = ?, last_error = NULL,
                sync_generation = NULL, sync_started_at = NULL
            WHERE id = ? AND status = 'syncing' AND sync_generation = ?
            "#,
        )
        .bind(generation)
        .bind(synced_at)
        .bind(repository_id)
        .bind(generation)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // symbols and file analyses cascade
        sqlx::query("DELETE FROM files WHERE repository_id = ? AND generation != ?")
            .bind(repository_id)
            .bind(generation)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn discard_generation(&self, repository_id: &str, generation: &str) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE repository_id = ? AND generation = ?")
            .bind(repository_id)
            .bind(generation)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_files(&self, repository_id: &str) -> Result<Vec<FileNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM files f \
             JOIN repositories r ON r.id = f.repository_id AND r.current_generation = f.generation \
             WHERE f.repository_id = ? ORDER BY f.path",
            FILE_COLUMNS
        ))
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(file_from_row).collect())
    }

    async fn get_file(&self, repository_id: &str, path: &str) -> Result<Option<FileNode>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM files f \
             JOIN repositories r ON r.id = f.repository_id AND r.current_generation = f.generation \
             WHERE f.repository_id = ? AND f.path = ?",
            FILE_COLUMNS
        ))
        .bind(repository_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    async fn set_file_content(
        &self,
        file_id: &str,
        content: &str,
        symbols: &[Symbol],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE files SET content = ?, content_hash = ? WHERE id = ?")
            .bind(content)
            .bind(content_hash(content))
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            bail!("file {} no longer exists", file_id);
        }

        sqlx::query("DELETE FROM symbols WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        for symbol in symbols {
            insert_symbol(&mut tx, symbol).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_symbols(&self, file_id: &str) -> Result<Vec<Symbol>> {
        let rows = sqlx::query(
            r#"
            SELECT id, file_id, name, kind, start_line, end_line, explanation
            FROM symbols WHERE file_id = ?
            ORDER BY start_line, end_line
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(symbol_from_row).collect()
    }

    async fn set_symbol_explanation(&self, symbol_id: &str, explanation: &str) -> Result<()> {
        sqlx::query("UPDATE symbols SET explanation = ? WHERE id = ?")
            .bind(explanation)
            .bind(symbol_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_file_analysis(&self, analysis: &FileAnalysis) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_analyses (file_id, repository_id, path, purpose, layer, summary,
                                       exports_json, imports_json, key_functions_json, generated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_id) DO UPDATE SET
                purpose = excluded.purpose,
                layer = excluded.layer,
                summary = excluded.summary,
                exports_json = excluded.exports_json,
                imports_json = excluded.imports_json,
                key_functions_json = excluded.key_functions_json,
                generated_at = excluded.generated_at
            "#,
        )
        .bind(&analysis.file_id)
        .bind(&analysis.repository_id)
        .bind(&analysis.path)
        .bind(&analysis.purpose)
        .bind(&analysis.layer)
        .bind(&analysis.summary)
        .bind(serde_json::to_string(&analysis.exports)?)
        .bind(serde_json::to_string(&analysis.imports)?)
        .bind(serde_json::to_string(&analysis.key_functions)?)
        .bind(analysis.generated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_file_analysis(&self, file_id: &str) -> Result<Option<FileAnalysis>> {
        let row = sqlx::query("SELECT * FROM file_analyses WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(FileAnalysis {
            file_id: row.get("file_id"),
            repository_id: row.get("repository_id"),
            path: row.get("path"),
            purpose: row.get("purpose"),
            layer: row.get("layer"),
            summary: row.get("summary"),
            exports: json_column(&row, "exports_json")?,
            imports: json_column(&row, "imports_json")?,
            key_functions: json_column(&row, "key_functions_json")?,
            generated_at: row.get("generated_at"),
        }))
    }

    async fn upsert_repository_analysis(&self, analysis: &RepositoryAnalysis) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO repository_analyses (repository_id, summary, architecture, patterns_json,
                                             frameworks_json, build_system, entry_points_json,
                                             layers_json, generated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repository_id) DO UPDATE SET
                summary = excluded.summary,
                architecture = excluded.architecture,
                patterns_json = excluded.patterns_json,
                frameworks_json = excluded.frameworks_json,
                build_system = excluded.build_system,
                entry_points_json = excluded.entry_points_json,
                layers_json = excluded.layers_json,
                generated_at = excluded.generated_at
            "#,
        )
        .bind(&analysis.repository_id)
        .bind(&analysis.summary)
        .bind(&analysis.architecture)
        .bind(serde_json::to_string(&analysis.patterns)?)
        .bind(serde_json::to_string(&analysis.frameworks)?)
        .bind(&analysis.build_system)
        .bind(serde_json::to_string(&analysis.entry_points)?)
        .bind(serde_json::to_string(&analysis.layers)?)
        .bind(analysis.generated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE repositories SET analyzed_at = ? WHERE id = ?")
            .bind(analysis.generated_at)
            .bind(&analysis.repository_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_repository_analysis(
        &self,
        repository_id: &str,
    ) -> Result<Option<RepositoryAnalysis>> {
        let row = sqlx::query("SELECT * FROM repository_analyses WHERE repository_id = ?")
            .bind(repository_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(RepositoryAnalysis {
            repository_id: row.get("repository_id"),
            summary: row.get("summary"),
            architecture: row.get("architecture"),
            patterns: json_column(&row, "patterns_json")?,
            frameworks: json_column(&row, "frameworks_json")?,
            build_system: row.get("build_system"),
            entry_points: json_column(&row, "entry_points_json")?,
            layers: json_column(&row, "layers_json")?,
            generated_at: row.get("generated_at"),
        }))
    }

    async fn get_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT id, schema_version, created_at, updated_at FROM conversations
            WHERE user_id = ? AND repository_id = ? AND context_type = ? AND context_path = ?
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.repository_id)
        .bind(key.scope.context_type.as_str())
        .bind(scope_path(&key.scope))
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.get("id");
        let schema_version: i64 = row.get("schema_version");
        if schema_version as u32 != CONVERSATION_SCHEMA_VERSION {
            bail!(
                "conversation {} has schema version {}, expected {}",
                id,
                schema_version,
                CONVERSATION_SCHEMA_VERSION
            );
        }

        let message_rows = sqlx::query(
            "SELECT role, content, created_at FROM conversation_messages \
             WHERE conversation_id = ? ORDER BY seq",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;
        let mut messages = Vec::with_capacity(message_rows.len());
        for row in &message_rows {
            let role: String = row.get("role");
            messages.push(ConversationMessage {
                role: Role::parse(&role).ok_or_else(|| anyhow!("unknown message role: {}", role))?,
                content: row.get("content"),
                created_at: row.get("created_at"),
            });
        }

        Ok(Some(Conversation {
            id,
            key: key.clone(),
            schema_version: CONVERSATION_SCHEMA_VERSION,
            messages,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: &[ConversationMessage],
    ) -> Result<Conversation> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, repository_id, context_type, context_path,
                                       schema_version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, repository_id, context_type, context_path)
            DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&key.user_id)
        .bind(&key.repository_id)
        .bind(key.scope.context_type.as_str())
        .bind(scope_path(&key.scope))
        .bind(CONVERSATION_SCHEMA_VERSION as i64)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let conversation_id: String = sqlx::query_scalar(
            r#"
            SELECT id FROM conversations
            WHERE user_id = ? AND repository_id = ? AND context_type = ? AND context_path = ?
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.repository_id)
        .bind(key.scope.context_type.as_str())
        .bind(scope_path(&key.scope))
        .fetch_one(&mut *tx)
        .await?;

        let last_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), -1) FROM conversation_messages WHERE conversation_id = ?",
        )
        .bind(&conversation_id)
        .fetch_one(&mut *tx)
        .await?;

        for (offset, message) in messages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_messages (conversation_id, seq, role, content, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&conversation_id)
            .bind(last_seq + 1 + offset as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_conversation(key)
            .await?
            .ok_or_else(|| anyhow!("conversation vanished after append"))
    }
}
