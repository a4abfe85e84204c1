use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// Ordered, idempotent migrations. Applied steps are recorded in
/// `schema_migrations` so re-running on every startup is safe; each step is
/// additionally written to tolerate partially-applied state (`IF NOT EXISTS`).
///
/// The final schema carries a single isolation reference on conversations
/// (`isolation_env_id`) — there are no legacy `worktree_path` /
/// `isolation_provider` text columns anywhere.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_codebases",
        "CREATE TABLE IF NOT EXISTS codebases (
            id                TEXT PRIMARY KEY,
            name              TEXT NOT NULL,
            repository_url    TEXT,
            default_cwd       TEXT NOT NULL,
            ai_assistant_type TEXT NOT NULL,
            commands          TEXT NOT NULL DEFAULT '{}',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_codebases_repo_url
            ON codebases(repository_url);",
    ),
    (
        "002_conversations",
        "CREATE TABLE IF NOT EXISTS conversations (
            id                       TEXT PRIMARY KEY,
            platform_type            TEXT NOT NULL,
            platform_conversation_id TEXT NOT NULL,
            codebase_id              TEXT REFERENCES codebases(id),
            cwd                      TEXT,
            isolation_env_id         TEXT,
            ai_assistant_type        TEXT NOT NULL,
            last_activity_at         TEXT NOT NULL,
            created_at               TEXT NOT NULL,
            updated_at               TEXT NOT NULL,
            UNIQUE(platform_type, platform_conversation_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_env
            ON conversations(isolation_env_id);",
    ),
    (
        "003_sessions",
        "CREATE TABLE IF NOT EXISTS sessions (
            id                   TEXT PRIMARY KEY,
            conversation_id      TEXT NOT NULL REFERENCES conversations(id),
            codebase_id          TEXT,
            assistant_session_id TEXT,
            ai_assistant_type    TEXT NOT NULL,
            active               INTEGER NOT NULL DEFAULT 1,
            metadata             TEXT NOT NULL DEFAULT '{}',
            created_at           TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
            ON sessions(conversation_id) WHERE active = 1;",
    ),
    (
        "004_isolation_environments",
        "CREATE TABLE IF NOT EXISTS isolation_environments (
            id                  TEXT PRIMARY KEY,
            codebase_id         TEXT NOT NULL REFERENCES codebases(id),
            provider            TEXT NOT NULL,
            working_path        TEXT NOT NULL,
            branch_name         TEXT NOT NULL,
            workflow_type       TEXT NOT NULL,
            identifier          TEXT NOT NULL,
            status              TEXT NOT NULL,
            created_by_platform TEXT NOT NULL,
            metadata            TEXT NOT NULL DEFAULT '{}',
            created_at          TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_envs_active_branch
            ON isolation_environments(codebase_id, branch_name)
            WHERE status = 'active';
        CREATE INDEX IF NOT EXISTS idx_envs_working_path
            ON isolation_environments(working_path);",
    ),
    (
        "005_command_templates",
        "CREATE TABLE IF NOT EXISTS command_templates (
            name        TEXT PRIMARY KEY,
            description TEXT,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    ),
];

/// Initialise the schema, applying any migration not yet recorded.
///
/// Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS schema_migrations (
             name       TEXT PRIMARY KEY,
             applied_at TEXT NOT NULL
         );",
    )?;

    for (name, sql) in MIGRATIONS {
        let applied: bool = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE name = ?1",
                [name],
                |_| Ok(true),
            )
            .unwrap_or(false);
        if applied {
            continue;
        }

        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![name, chrono::Utc::now().to_rfc3339()],
        )?;
        info!(migration = %name, "applied schema migration");
    }

    Ok(())
}
