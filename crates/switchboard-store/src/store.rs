use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, ToSql};
use tracing::{debug, info, instrument};

use switchboard_core::types::{new_id, AssistantType, EnvStatus, PlatformType};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{
    Codebase, CommandEntry, CommandTemplate, Conversation, EnvWithAge, IsolationEnvironment,
    NewIsolationEnv, Session,
};

/// Attempts for statements that hit SQLITE_BUSY before we give up.
const TRANSIENT_RETRIES: u32 = 3;
const TRANSIENT_BACKOFF_MS: u64 = 50;

/// Partial update for a conversation row.
///
/// The outer `Option` means "touch this column"; the inner one carries the
/// new value, so `Some(None)` clears a nullable column.
#[derive(Debug, Default, Clone)]
pub struct ConversationPatch {
    pub codebase_id: Option<Option<String>>,
    pub cwd: Option<Option<String>>,
    pub isolation_env_id: Option<Option<String>>,
}

impl ConversationPatch {
    pub fn is_empty(&self) -> bool {
        self.codebase_id.is_none() && self.cwd.is_none() && self.isolation_env_id.is_none()
    }
}

/// Thread-safe typed gateway over the broker's SQLite database.
///
/// Wraps a single connection in a `Mutex`; every public method takes the
/// lock for the duration of one statement or one small transaction.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and the E2E harness.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Run `op`, retrying a bounded number of times on SQLITE_BUSY.
    fn retrying<T>(&self, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let mut backoff = TRANSIENT_BACKOFF_MS;
        for attempt in 0..=TRANSIENT_RETRIES {
            let result = {
                let conn = self.db.lock().unwrap();
                op(&conn)
            };
            match result {
                Err(e) if e.is_transient() && attempt < TRANSIENT_RETRIES => {
                    debug!(attempt, "transient database error, backing off");
                    std::thread::sleep(Duration::from_millis(backoff));
                    backoff *= 2;
                }
                other => return other,
            }
        }
        unreachable!("retry loop always returns")
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Return the conversation for `(platform, external_id)`, inserting it if
    /// absent. The assistant type is inherited from `codebase_hint` when
    /// given, otherwise from the configured default — and is never changed
    /// again for the lifetime of the row.
    #[instrument(skip(self, codebase_hint))]
    pub fn get_or_create_conversation(
        &self,
        platform: PlatformType,
        external_id: &str,
        codebase_hint: Option<&Codebase>,
        default_assistant: AssistantType,
    ) -> Result<Conversation> {
        self.retrying(|conn| {
            let assistant = codebase_hint
                .map(|c| c.ai_assistant_type)
                .unwrap_or(default_assistant);
            let now = chrono::Utc::now().to_rfc3339();

            conn.execute(
                "INSERT OR IGNORE INTO conversations
                 (id, platform_type, platform_conversation_id, codebase_id, cwd,
                  ai_assistant_type, last_activity_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)",
                rusqlite::params![
                    new_id(),
                    platform.as_str(),
                    external_id,
                    codebase_hint.map(|c| c.id.as_str()),
                    codebase_hint.map(|c| c.default_cwd.as_str()),
                    assistant.as_str(),
                    now,
                ],
            )?;

            // Read back — covers the race where two tasks insert simultaneously.
            let conv = conn.query_row(
                "SELECT id, platform_type, platform_conversation_id, codebase_id, cwd,
                        isolation_env_id, ai_assistant_type, last_activity_at,
                        created_at, updated_at
                 FROM conversations
                 WHERE platform_type = ?1 AND platform_conversation_id = ?2",
                rusqlite::params![platform.as_str(), external_id],
                row_to_conversation,
            )?;
            Ok(conv)
        })
    }

    /// Lookup without creating — used by close events for conversations the
    /// broker may never have seen.
    pub fn find_conversation(
        &self,
        platform: PlatformType,
        external_id: &str,
    ) -> Result<Option<Conversation>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, platform_type, platform_conversation_id, codebase_id, cwd,
                        isolation_env_id, ai_assistant_type, last_activity_at,
                        created_at, updated_at
                 FROM conversations
                 WHERE platform_type = ?1 AND platform_conversation_id = ?2",
                rusqlite::params![platform.as_str(), external_id],
                row_to_conversation,
            )
            .optional()?)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, platform_type, platform_conversation_id, codebase_id, cwd,
                        isolation_env_id, ai_assistant_type, last_activity_at,
                        created_at, updated_at
                 FROM conversations WHERE id = ?1",
                [id],
                row_to_conversation,
            )
            .optional()?)
    }

    /// Dynamic UPDATE over the patched columns; `updated_at` always bumps.
    #[instrument(skip(self, patch))]
    pub fn update_conversation(&self, id: &str, patch: &ConversationPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        self.retrying(|conn| {
            let now = chrono::Utc::now().to_rfc3339();
            let mut sets: Vec<&'static str> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(ref v) = patch.codebase_id {
                sets.push("codebase_id = ?");
                values.push(Box::new(v.clone()));
            }
            if let Some(ref v) = patch.cwd {
                sets.push("cwd = ?");
                values.push(Box::new(v.clone()));
            }
            if let Some(ref v) = patch.isolation_env_id {
                sets.push("isolation_env_id = ?");
                values.push(Box::new(v.clone()));
            }
            sets.push("updated_at = ?");
            values.push(Box::new(now));
            values.push(Box::new(id.to_string()));

            let sql = format!(
                "UPDATE conversations SET {} WHERE id = ?",
                sets.join(", ")
            );
            let params: Vec<&dyn ToSql> = values.iter().map(|b| b.as_ref()).collect();
            let n = conn.execute(&sql, &params[..])?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    what: "conversation",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Stamp `last_activity_at` for an inbound message.
    pub fn touch_conversation(&self, id: &str) -> Result<()> {
        self.retrying(|conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "UPDATE conversations SET last_activity_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
            Ok(())
        })
    }

    /// Reverse index used for reference counting before an env is destroyed.
    pub fn conversations_using_env(&self, env_id: &str) -> Result<Vec<Conversation>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, platform_type, platform_conversation_id, codebase_id, cwd,
                    isolation_env_id, ai_assistant_type, last_activity_at,
                    created_at, updated_at
             FROM conversations WHERE isolation_env_id = ?1",
        )?;
        let rows = stmt.query_map([env_id], row_to_conversation)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // -----------------------------------------------------------------------
    // Codebases
    // -----------------------------------------------------------------------

    #[instrument(skip(self))]
    pub fn create_codebase(
        &self,
        name: &str,
        repository_url: Option<&str>,
        default_cwd: &str,
        assistant: AssistantType,
    ) -> Result<Codebase> {
        self.retrying(|conn| {
            let id = new_id();
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO codebases
                 (id, name, repository_url, default_cwd, ai_assistant_type,
                  commands, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?6)",
                rusqlite::params![id, name, repository_url, default_cwd, assistant.as_str(), now],
            )?;
            info!(codebase_id = %id, %name, "codebase created");
            conn.query_row(
                "SELECT id, name, repository_url, default_cwd, ai_assistant_type,
                        commands, created_at, updated_at
                 FROM codebases WHERE id = ?1",
                [&id],
                row_to_codebase,
            )
            .map_err(StoreError::from)
        })
    }

    pub fn get_codebase(&self, id: &str) -> Result<Option<Codebase>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, name, repository_url, default_cwd, ai_assistant_type,
                        commands, created_at, updated_at
                 FROM codebases WHERE id = ?1",
                [id],
                row_to_codebase,
            )
            .optional()?)
    }

    pub fn find_codebase_by_repository_url(&self, url: &str) -> Result<Option<Codebase>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, name, repository_url, default_cwd, ai_assistant_type,
                        commands, created_at, updated_at
                 FROM codebases WHERE repository_url = ?1",
                [url],
                row_to_codebase,
            )
            .optional()?)
    }

    pub fn find_codebase_by_default_cwd(&self, cwd: &str) -> Result<Option<Codebase>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, name, repository_url, default_cwd, ai_assistant_type,
                        commands, created_at, updated_at
                 FROM codebases WHERE default_cwd = ?1",
                [cwd],
                row_to_codebase,
            )
            .optional()?)
    }

    /// All codebases ordered by name — drives `/repos` numbering.
    pub fn list_codebases(&self) -> Result<Vec<Codebase>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, repository_url, default_cwd, ai_assistant_type,
                    commands, created_at, updated_at
             FROM codebases ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_codebase)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self, commands))]
    pub fn update_codebase_commands(
        &self,
        id: &str,
        commands: &BTreeMap<String, CommandEntry>,
    ) -> Result<()> {
        let json = serde_json::to_string(commands)?;
        self.retrying(|conn| {
            let now = chrono::Utc::now().to_rfc3339();
            let n = conn.execute(
                "UPDATE codebases SET commands = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![json, now, id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    what: "codebase",
                    id: id.to_string(),
                });
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Insert a fresh active session. Fails with `Conflict` if the
    /// conversation already has an active one (partial unique index).
    #[instrument(skip(self))]
    pub fn create_session(
        &self,
        conversation_id: &str,
        codebase_id: Option<&str>,
        assistant: AssistantType,
    ) -> Result<Session> {
        self.retrying(|conn| {
            let id = new_id();
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions
                 (id, conversation_id, codebase_id, ai_assistant_type, active, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, '{}', ?5)",
                rusqlite::params![id, conversation_id, codebase_id, assistant.as_str(), now],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!(
                        "conversation {conversation_id} already has an active session"
                    ))
                }
                other => StoreError::Database(other),
            })?;
            conn.query_row(
                "SELECT id, conversation_id, codebase_id, assistant_session_id,
                        ai_assistant_type, active, metadata, created_at
                 FROM sessions WHERE id = ?1",
                [&id],
                row_to_session,
            )
            .map_err(StoreError::from)
        })
    }

    pub fn get_active_session(&self, conversation_id: &str) -> Result<Option<Session>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, conversation_id, codebase_id, assistant_session_id,
                        ai_assistant_type, active, metadata, created_at
                 FROM sessions WHERE conversation_id = ?1 AND active = 1",
                [conversation_id],
                row_to_session,
            )
            .optional()?)
    }

    pub fn deactivate_session(&self, session_id: &str) -> Result<()> {
        self.retrying(|conn| {
            conn.execute("UPDATE sessions SET active = 0 WHERE id = ?1", [session_id])?;
            Ok(())
        })
    }

    /// Deactivate whatever session is active for the conversation.
    /// Returns true when one was.
    pub fn deactivate_active_session(&self, conversation_id: &str) -> Result<bool> {
        self.retrying(|conn| {
            let n = conn.execute(
                "UPDATE sessions SET active = 0 WHERE conversation_id = ?1 AND active = 1",
                [conversation_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Persist the opaque session id the assistant returned in its result chunk.
    pub fn update_session_assistant_id(
        &self,
        session_id: &str,
        assistant_session_id: &str,
    ) -> Result<()> {
        self.retrying(|conn| {
            let n = conn.execute(
                "UPDATE sessions SET assistant_session_id = ?1 WHERE id = ?2",
                rusqlite::params![assistant_session_id, session_id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    what: "session",
                    id: session_id.to_string(),
                });
            }
            Ok(())
        })
    }

    pub fn update_session_metadata(
        &self,
        session_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let json = serde_json::to_string(metadata)?;
        self.retrying(|conn| {
            let n = conn.execute(
                "UPDATE sessions SET metadata = ?1 WHERE id = ?2",
                rusqlite::params![json, session_id],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound {
                    what: "session",
                    id: session_id.to_string(),
                });
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Isolation environments
    // -----------------------------------------------------------------------

    /// Insert a new active environment. `Conflict` when another active env
    /// already holds `(codebase_id, branch_name)`.
    #[instrument(skip(self, new))]
    pub fn create_isolation_env(&self, new: &NewIsolationEnv) -> Result<IsolationEnvironment> {
        let metadata = serde_json::to_string(&new.metadata)?;
        self.retrying(|conn| {
            let id = uuid::Uuid::new_v4().to_string();
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO isolation_environments
                 (id, codebase_id, provider, working_path, branch_name, workflow_type,
                  identifier, status, created_by_platform, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, ?9, ?10)",
                rusqlite::params![
                    id,
                    new.codebase_id,
                    new.provider.as_str(),
                    new.working_path,
                    new.branch_name,
                    new.workflow_type.as_str(),
                    new.identifier,
                    new.created_by_platform.as_str(),
                    metadata,
                    now,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!(
                        "branch {} already has an active environment",
                        new.branch_name
                    ))
                }
                other => StoreError::Database(other),
            })?;
            info!(env_id = %id, branch = %new.branch_name, "isolation environment recorded");
            conn.query_row(
                "SELECT id, codebase_id, provider, working_path, branch_name, workflow_type,
                        identifier, status, created_by_platform, metadata, created_at
                 FROM isolation_environments WHERE id = ?1",
                [&id],
                row_to_env,
            )
            .map_err(StoreError::from)
        })
    }

    pub fn get_isolation_env(&self, id: &str) -> Result<Option<IsolationEnvironment>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, codebase_id, provider, working_path, branch_name, workflow_type,
                        identifier, status, created_by_platform, metadata, created_at
                 FROM isolation_environments WHERE id = ?1",
                [id],
                row_to_env,
            )
            .optional()?)
    }

    pub fn find_active_env_by_path(&self, working_path: &str) -> Result<Option<IsolationEnvironment>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, codebase_id, provider, working_path, branch_name, workflow_type,
                        identifier, status, created_by_platform, metadata, created_at
                 FROM isolation_environments
                 WHERE working_path = ?1 AND status = 'active'",
                [working_path],
                row_to_env,
            )
            .optional()?)
    }

    pub fn find_active_env_by_branch(
        &self,
        codebase_id: &str,
        branch_name: &str,
    ) -> Result<Option<IsolationEnvironment>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, codebase_id, provider, working_path, branch_name, workflow_type,
                        identifier, status, created_by_platform, metadata, created_at
                 FROM isolation_environments
                 WHERE codebase_id = ?1 AND branch_name = ?2 AND status = 'active'",
                rusqlite::params![codebase_id, branch_name],
                row_to_env,
            )
            .optional()?)
    }

    /// Active environments for a codebase, oldest first.
    pub fn list_envs_by_codebase(&self, codebase_id: &str) -> Result<Vec<IsolationEnvironment>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, codebase_id, provider, working_path, branch_name, workflow_type,
                    identifier, status, created_by_platform, metadata, created_at
             FROM isolation_environments
             WHERE codebase_id = ?1 AND status = 'active'
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map([codebase_id], row_to_env)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Active environments annotated with `days_since_activity`:
    /// `GREATEST(now - created_at, now - MAX(referencing last_activity_at))`.
    pub fn list_envs_by_codebase_with_age(&self, codebase_id: &str) -> Result<Vec<EnvWithAge>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.id, e.codebase_id, e.provider, e.working_path, e.branch_name,
                    e.workflow_type, e.identifier, e.status, e.created_by_platform,
                    e.metadata, e.created_at,
                    CAST(MAX(julianday('now') - julianday(e.created_at),
                             COALESCE(julianday('now') - julianday(
                                 (SELECT MAX(c.last_activity_at)
                                  FROM conversations c
                                  WHERE c.isolation_env_id = e.id)), 0.0)) AS INTEGER)
             FROM isolation_environments e
             WHERE e.codebase_id = ?1 AND e.status = 'active'
             ORDER BY e.created_at",
        )?;
        let rows = stmt.query_map([codebase_id], |row| {
            let env = row_to_env(row)?;
            let days: i64 = row.get(11)?;
            Ok(EnvWithAge {
                env,
                days_since_activity: days,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_active_envs(&self, codebase_id: &str) -> Result<u32> {
        let conn = self.db.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM isolation_environments
             WHERE codebase_id = ?1 AND status = 'active'",
            [codebase_id],
            |r| r.get(0),
        )?;
        Ok(n as u32)
    }

    /// Transition to `destroyed`. A second call (or a call for an unknown id)
    /// is a no-op success — destruction is idempotent end to end.
    pub fn mark_env_destroyed(&self, id: &str) -> Result<()> {
        self.retrying(|conn| {
            conn.execute(
                "UPDATE isolation_environments SET status = 'destroyed' WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Command templates
    // -----------------------------------------------------------------------

    /// Insert or replace by name, preserving `created_at` on replace.
    pub fn upsert_template(
        &self,
        name: &str,
        description: Option<&str>,
        content: &str,
    ) -> Result<()> {
        self.retrying(|conn| {
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO command_templates (name, description, content, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                     description = excluded.description,
                     content = excluded.content,
                     updated_at = excluded.updated_at",
                rusqlite::params![name, description, content, now],
            )?;
            Ok(())
        })
    }

    pub fn get_template(&self, name: &str) -> Result<Option<CommandTemplate>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT name, description, content, created_at, updated_at
                 FROM command_templates WHERE name = ?1",
                [name],
                row_to_template,
            )
            .optional()?)
    }

    pub fn list_templates(&self) -> Result<Vec<CommandTemplate>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, description, content, created_at, updated_at
             FROM command_templates ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_template)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Returns true when a template was actually removed.
    pub fn delete_template(&self, name: &str) -> Result<bool> {
        self.retrying(|conn| {
            let n = conn.execute("DELETE FROM command_templates WHERE name = ?1", [name])?;
            Ok(n > 0)
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BadColumn(String);

impl std::fmt::Display for BadColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BadColumn {}

fn parse_enum<T>(idx: usize, s: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    s.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(BadColumn(e)))
    })
}

fn parse_json(idx: usize, s: String) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(BadColumn(e.to_string())),
        )
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        platform_type: parse_enum(1, row.get::<_, String>(1)?)?,
        platform_conversation_id: row.get(2)?,
        codebase_id: row.get(3)?,
        cwd: row.get(4)?,
        isolation_env_id: row.get(5)?,
        ai_assistant_type: parse_enum(6, row.get::<_, String>(6)?)?,
        last_activity_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_codebase(row: &rusqlite::Row<'_>) -> rusqlite::Result<Codebase> {
    let commands_json: String = row.get(5)?;
    let commands: BTreeMap<String, CommandEntry> =
        serde_json::from_str(&commands_json).unwrap_or_default();
    Ok(Codebase {
        id: row.get(0)?,
        name: row.get(1)?,
        repository_url: row.get(2)?,
        default_cwd: row.get(3)?,
        ai_assistant_type: parse_enum(4, row.get::<_, String>(4)?)?,
        commands,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        codebase_id: row.get(2)?,
        assistant_session_id: row.get(3)?,
        ai_assistant_type: parse_enum(4, row.get::<_, String>(4)?)?,
        active: row.get::<_, i64>(5)? != 0,
        metadata: parse_json(6, row.get::<_, String>(6)?)?,
        created_at: row.get(7)?,
    })
}

fn row_to_env(row: &rusqlite::Row<'_>) -> rusqlite::Result<IsolationEnvironment> {
    Ok(IsolationEnvironment {
        id: row.get(0)?,
        codebase_id: row.get(1)?,
        provider: parse_enum(2, row.get::<_, String>(2)?)?,
        working_path: row.get(3)?,
        branch_name: row.get(4)?,
        workflow_type: parse_enum(5, row.get::<_, String>(5)?)?,
        identifier: row.get(6)?,
        status: parse_enum(7, row.get::<_, String>(7)?)?,
        created_by_platform: parse_enum(8, row.get::<_, String>(8)?)?,
        metadata: parse_json(9, row.get::<_, String>(9)?)?,
        created_at: row.get(10)?,
    })
}

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommandTemplate> {
    Ok(CommandTemplate {
        name: row.get(0)?,
        description: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::types::{ProviderKind, WorkflowType};

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn seed_codebase(s: &Store) -> Codebase {
        s.create_codebase(
            "lib",
            Some("https://github.com/acme/lib"),
            "/workspace/lib",
            AssistantType::Claude,
        )
        .unwrap()
    }

    fn new_env(codebase_id: &str, branch: &str) -> NewIsolationEnv {
        NewIsolationEnv {
            codebase_id: codebase_id.to_string(),
            provider: ProviderKind::Worktree,
            working_path: format!("/worktrees/lib/{branch}"),
            branch_name: branch.to_string(),
            workflow_type: WorkflowType::Task,
            identifier: branch.to_string(),
            created_by_platform: PlatformType::Test,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn conversation_get_or_create_is_stable() {
        let s = store();
        let a = s
            .get_or_create_conversation(PlatformType::Test, "t1", None, AssistantType::Claude)
            .unwrap();
        let b = s
            .get_or_create_conversation(PlatformType::Test, "t1", None, AssistantType::Codex)
            .unwrap();
        // Second call must not rewrite the write-once assistant type.
        assert_eq!(a.id, b.id);
        assert_eq!(b.ai_assistant_type, AssistantType::Claude);
    }

    #[test]
    fn conversation_inherits_assistant_from_codebase_hint() {
        let s = store();
        let cb = s
            .create_codebase("x", None, "/workspace/x", AssistantType::Codex)
            .unwrap();
        let conv = s
            .get_or_create_conversation(PlatformType::Slack, "C1:1.2", Some(&cb), AssistantType::Claude)
            .unwrap();
        assert_eq!(conv.ai_assistant_type, AssistantType::Codex);
        assert_eq!(conv.codebase_id.as_deref(), Some(cb.id.as_str()));
        assert_eq!(conv.cwd.as_deref(), Some("/workspace/x"));
    }

    #[test]
    fn patch_clears_isolation_ref() {
        let s = store();
        let cb = seed_codebase(&s);
        let conv = s
            .get_or_create_conversation(PlatformType::Test, "t2", Some(&cb), AssistantType::Claude)
            .unwrap();
        let env = s.create_isolation_env(&new_env(&cb.id, "task-a")).unwrap();

        s.update_conversation(
            &conv.id,
            &ConversationPatch {
                isolation_env_id: Some(Some(env.id.clone())),
                cwd: Some(Some(env.working_path.clone())),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            s.get_conversation(&conv.id).unwrap().unwrap().isolation_env_id,
            Some(env.id.clone())
        );

        s.update_conversation(
            &conv.id,
            &ConversationPatch {
                isolation_env_id: Some(None),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            s.get_conversation(&conv.id).unwrap().unwrap().isolation_env_id,
            None
        );
    }

    #[test]
    fn at_most_one_active_session() {
        let s = store();
        let conv = s
            .get_or_create_conversation(PlatformType::Test, "t3", None, AssistantType::Claude)
            .unwrap();
        let first = s.create_session(&conv.id, None, AssistantType::Claude).unwrap();
        assert!(matches!(
            s.create_session(&conv.id, None, AssistantType::Claude),
            Err(StoreError::Conflict(_))
        ));

        s.deactivate_session(&first.id).unwrap();
        let second = s.create_session(&conv.id, None, AssistantType::Claude).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(
            s.get_active_session(&conv.id).unwrap().unwrap().id,
            second.id
        );
    }

    #[test]
    fn session_metadata_roundtrip() {
        let s = store();
        let conv = s
            .get_or_create_conversation(PlatformType::Test, "t4", None, AssistantType::Claude)
            .unwrap();
        let sess = s.create_session(&conv.id, None, AssistantType::Claude).unwrap();
        s.update_session_metadata(&sess.id, &serde_json::json!({"lastCommand": "plan"}))
            .unwrap();
        let loaded = s.get_active_session(&conv.id).unwrap().unwrap();
        assert_eq!(loaded.last_command(), Some("plan"));
    }

    #[test]
    fn env_branch_uniqueness_among_active() {
        let s = store();
        let cb = seed_codebase(&s);
        s.create_isolation_env(&new_env(&cb.id, "issue-42")).unwrap();
        assert!(matches!(
            s.create_isolation_env(&new_env(&cb.id, "issue-42")),
            Err(StoreError::Conflict(_))
        ));

        // Destroyed envs free the branch name.
        let all = s.list_envs_by_codebase(&cb.id).unwrap();
        s.mark_env_destroyed(&all[0].id).unwrap();
        s.create_isolation_env(&new_env(&cb.id, "issue-42")).unwrap();
    }

    #[test]
    fn destroy_is_idempotent() {
        let s = store();
        let cb = seed_codebase(&s);
        let env = s.create_isolation_env(&new_env(&cb.id, "task-b")).unwrap();
        s.mark_env_destroyed(&env.id).unwrap();
        s.mark_env_destroyed(&env.id).unwrap();
        s.mark_env_destroyed("no-such-env").unwrap();
    }

    #[test]
    fn count_and_age_listing() {
        let s = store();
        let cb = seed_codebase(&s);
        s.create_isolation_env(&new_env(&cb.id, "task-a")).unwrap();
        s.create_isolation_env(&new_env(&cb.id, "task-b")).unwrap();
        assert_eq!(s.count_active_envs(&cb.id).unwrap(), 2);

        let aged = s.list_envs_by_codebase_with_age(&cb.id).unwrap();
        assert_eq!(aged.len(), 2);
        // Fresh rows have had no time to age.
        assert!(aged.iter().all(|e| e.days_since_activity == 0));
    }

    #[test]
    fn template_upsert_is_idempotent() {
        let s = store();
        s.upsert_template("plan", Some("plan it"), "Plan: $1").unwrap();
        s.upsert_template("plan", Some("plan it"), "Plan: $1").unwrap();
        let all = s.list_templates().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "Plan: $1");

        assert!(s.delete_template("plan").unwrap());
        assert!(!s.delete_template("plan").unwrap());
    }

    #[test]
    fn reverse_env_lookup() {
        let s = store();
        let cb = seed_codebase(&s);
        let env = s.create_isolation_env(&new_env(&cb.id, "pr-7")).unwrap();
        let conv = s
            .get_or_create_conversation(PlatformType::Github, "acme/lib#7", Some(&cb), AssistantType::Claude)
            .unwrap();
        s.update_conversation(
            &conv.id,
            &ConversationPatch {
                isolation_env_id: Some(Some(env.id.clone())),
                ..Default::default()
            },
        )
        .unwrap();

        let users = s.conversations_using_env(&env.id).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, conv.id);
    }
}
