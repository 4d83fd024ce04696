//! The migration driver: three sequential passes, one destination commit per table.
//!
//! There is no row-level isolation. The first failure aborts the run. Tables
//! committed before it stay committed, and the failing table's transaction is
//! left uncommitted.

use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, trace};

use crate::records::{GuildUserStats, UserStats};
use crate::store::{DestinationStore, LegacyStore};

/// Number of legacy rows carried over, per destination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub user_stats: usize,
    pub guild_user_stats: usize,
    pub users: usize,
}

/// Runs all three passes, writing progress lines to `out`.
///
/// `clock` is sampled once per migrated user to stamp `users.last_seen`.
pub fn run_migration<L, D, C, W>(
    legacy: &mut L,
    destination: &mut D,
    clock: C,
    out: &mut W,
) -> anyhow::Result<MigrationReport>
where
    L: LegacyStore + ?Sized,
    D: DestinationStore + ?Sized,
    C: Fn() -> DateTime<Utc>,
    W: Write,
{
    let user_stats = migrate_user_stats(legacy, destination, out)?;
    let guild_user_stats = migrate_guild_user_stats(legacy, destination, out)?;
    let users = migrate_users(legacy, destination, &clock, out)?;

    progress(out, "✅ Migration complete!")?;

    Ok(MigrationReport {
        user_stats,
        guild_user_stats,
        users,
    })
}

fn migrate_user_stats<L, D, W>(
    legacy: &mut L,
    destination: &mut D,
    out: &mut W,
) -> anyhow::Result<usize>
where
    L: LegacyStore + ?Sized,
    D: DestinationStore + ?Sized,
    W: Write,
{
    progress(out, "[1] Migrating user_stats...")?;
    let rows = legacy
        .user_stats()
        .context("failed to read legacy user_stats")?;

    destination
        .begin()
        .context("failed to open user_stats transaction")?;
    for row in &rows {
        let row = UserStats::from(*row);
        destination
            .upsert_user_stats(&row)
            .with_context(|| format!("failed to upsert user_stats row (user {})", row.user_id))?;
        trace!(user_id = %row.user_id, "user_stats row upserted");
    }
    destination
        .commit()
        .context("failed to commit user_stats")?;

    info!(table = "user_stats", rows = rows.len(), "table migrated");
    progress(out, &format!("  → Migrated {} user_stats rows", rows.len()))?;
    Ok(rows.len())
}

fn migrate_guild_user_stats<L, D, W>(
    legacy: &mut L,
    destination: &mut D,
    out: &mut W,
) -> anyhow::Result<usize>
where
    L: LegacyStore + ?Sized,
    D: DestinationStore + ?Sized,
    W: Write,
{
    progress(out, "[2] Migrating guild_user_stats...")?;
    let rows = legacy
        .guild_user_stats()
        .context("failed to read legacy guild_user_stats")?;

    destination
        .begin()
        .context("failed to open guild_user_stats transaction")?;
    for row in &rows {
        let row = GuildUserStats::from(*row);
        destination.upsert_guild_user_stats(&row).with_context(|| {
            format!(
                "failed to upsert guild_user_stats row (user {}, guild {})",
                row.user_id, row.guild_id
            )
        })?;
        trace!(user_id = %row.user_id, guild_id = %row.guild_id, "guild_user_stats row upserted");
    }
    destination
        .commit()
        .context("failed to commit guild_user_stats")?;

    info!(table = "guild_user_stats", rows = rows.len(), "table migrated");
    progress(
        out,
        &format!("  → Migrated {} guild_user_stats rows", rows.len()),
    )?;
    Ok(rows.len())
}

fn migrate_users<L, D, C, W>(
    legacy: &mut L,
    destination: &mut D,
    clock: &C,
    out: &mut W,
) -> anyhow::Result<usize>
where
    L: LegacyStore + ?Sized,
    D: DestinationStore + ?Sized,
    C: Fn() -> DateTime<Utc>,
    W: Write,
{
    progress(out, "[3] Migrating user_settings → users...")?;
    let rows = legacy
        .user_settings()
        .context("failed to read legacy user_settings")?;

    destination
        .begin()
        .context("failed to open users transaction")?;
    for row in &rows {
        let user = row.into_user(clock());
        destination
            .upsert_user(&user)
            .with_context(|| format!("failed to upsert users row (id {})", user.id))?;
        trace!(id = %user.id, "users row upserted");
    }
    destination.commit().context("failed to commit users")?;

    info!(table = "users", rows = rows.len(), "table migrated");
    progress(out, &format!("  → Migrated {} users", rows.len()))?;
    Ok(rows.len())
}

fn progress<W: Write>(out: &mut W, line: &str) -> anyhow::Result<()> {
    writeln!(out, "{line}").context("failed to write progress")?;
    out.flush().context("failed to flush progress")
}
