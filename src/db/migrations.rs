use anyhow::{bail, Context, Result};
use rusqlite::Connection;

/// Schema steps in order; entry `n` takes `user_version` from `n` to `n + 1`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("schema_v1.sql", include_str!("schemas/schema_v1.sql")),
    ("schema_v2.sql", include_str!("schemas/schema_v2.sql")),
];

const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Brings the database up to `CURRENT_SCHEMA_VERSION` in one transaction.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read schema version")?;

    if found > CURRENT_SCHEMA_VERSION {
        bail!("database schema v{found} is newer than this build (v{CURRENT_SCHEMA_VERSION})");
    }
    if found == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to begin schema upgrade")?;
    for (name, sql) in MIGRATIONS.iter().skip(found.max(0) as usize) {
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply {name}"))?;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to record schema version")?;
    tx.commit().context("failed to commit schema upgrade")?;

    log::info!("Scan database upgraded from v{found} to v{CURRENT_SCHEMA_VERSION}");
    Ok(())
}
