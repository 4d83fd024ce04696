//! Destination stores for the new schema.
//!
//! All three backends upsert on the same natural keys:
//! `user_stats(user_id)`, `guild_user_stats(user_id, guild_id)` and `users(id)`.
//! None of them create tables.

use anyhow::{Context, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder};
use rusqlite::{Connection, OpenFlags, params};
use tokio::runtime::Runtime;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::config::{Backend, Endpoint};
use crate::records::{GuildUserStats, User, UserStats};
use crate::store::DestinationStore;

/// Connects to the destination described by `endpoint`.
pub fn open_destination(endpoint: &Endpoint) -> anyhow::Result<Box<dyn DestinationStore>> {
    let store: Box<dyn DestinationStore> = match endpoint.backend {
        Backend::Mysql => Box::new(MysqlDestination::connect(endpoint)?),
        Backend::Postgres => Box::new(PgDestination::connect(endpoint)?),
        Backend::Sqlite => {
            Box::new(SqliteDestination::open(endpoint.sqlite_path("destination")?)?)
        }
    };
    info!(endpoint = %endpoint.describe(), "destination connected");
    Ok(store)
}

// ---------------------------------------------------------------------------
// MySQL
// ---------------------------------------------------------------------------

/// Opens a single MySQL connection. Shared with the legacy reader.
pub fn connect_mysql(endpoint: &Endpoint) -> anyhow::Result<Conn> {
    let opts = OptsBuilder::new()
        .ip_or_hostname(Some(endpoint.host.as_str()))
        .tcp_port(endpoint.effective_port().unwrap_or(3306))
        .user(Some(endpoint.user.as_str()))
        .pass(Some(endpoint.password.as_str()))
        .db_name(Some(endpoint.database.as_str()));

    Conn::new(opts).with_context(|| format!("failed to connect to {}", endpoint.describe()))
}

/// `DATETIME(6)` literal in UTC.
fn mysql_datetime(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

pub struct MysqlDestination {
    conn: Conn,
}

impl MysqlDestination {
    pub fn connect(endpoint: &Endpoint) -> anyhow::Result<Self> {
        Ok(Self {
            conn: connect_mysql(endpoint)?,
        })
    }
}

impl DestinationStore for MysqlDestination {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.conn
            .query_drop("START TRANSACTION")
            .context("START TRANSACTION")
    }

    fn upsert_user_stats(&mut self, row: &UserStats) -> anyhow::Result<()> {
        self.conn
            .exec_drop(
                "\
                INSERT INTO user_stats (user_id, messages_sent, commands_ran)
                VALUES (?, ?, ?)
                ON DUPLICATE KEY UPDATE
                  messages_sent = VALUES(messages_sent),
                  commands_ran = VALUES(commands_ran)
                ",
                (row.user_id.as_str(), row.messages_sent, row.commands_ran),
            )
            .context("upsert_user_stats")
    }

    fn upsert_guild_user_stats(&mut self, row: &GuildUserStats) -> anyhow::Result<()> {
        self.conn
            .exec_drop(
                "\
                INSERT INTO guild_user_stats
                  (user_id, guild_id, messages_sent, commands_ran, last_announced_level)
                VALUES (?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                  messages_sent = VALUES(messages_sent),
                  commands_ran = VALUES(commands_ran)
                ",
                (
                    row.user_id.as_str(),
                    row.guild_id.as_str(),
                    row.messages_sent,
                    row.commands_ran,
                    row.last_announced_level,
                ),
            )
            .context("upsert_guild_user_stats")
    }

    fn upsert_user(&mut self, row: &User) -> anyhow::Result<()> {
        self.conn
            .exec_drop(
                "\
                INSERT INTO users (id, last_seen)
                VALUES (?, ?)
                ON DUPLICATE KEY UPDATE last_seen = VALUES(last_seen)
                ",
                (row.id.as_str(), mysql_datetime(&row.last_seen)),
            )
            .context("upsert_user")
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        self.conn.query_drop("COMMIT").context("COMMIT")
    }

    fn close(self: Box<Self>) -> anyhow::Result<()> {
        drop(self.conn);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// Postgres destination driven by a private current-thread runtime, so the
/// migration stays single-threaded and blocking.
pub struct PgDestination {
    runtime: Runtime,
    client: Client,
}

impl PgDestination {
    pub fn connect(endpoint: &Endpoint) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build postgres runtime")?;
        let client = runtime.block_on(connect_postgres(endpoint))?;
        Ok(Self { runtime, client })
    }

    fn execute(
        &self,
        label: &'static str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> anyhow::Result<()> {
        self.runtime
            .block_on(self.client.execute(sql, params))
            .context(label)?;
        Ok(())
    }

    fn batch(&self, sql: &'static str) -> anyhow::Result<()> {
        self.runtime
            .block_on(self.client.batch_execute(sql))
            .context(sql)
    }
}

async fn connect_postgres(endpoint: &Endpoint) -> anyhow::Result<Client> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&endpoint.host)
        .port(endpoint.effective_port().unwrap_or(5432))
        .user(&endpoint.user)
        .password(&endpoint.password)
        .dbname(&endpoint.database);

    let (client, connection) = config
        .connect(NoTls)
        .await
        .with_context(|| format!("failed to connect to {}", endpoint.describe()))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(err = %err, "postgres connection error");
        }
    });
    Ok(client)
}

fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl DestinationStore for PgDestination {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.batch("BEGIN")
    }

    fn upsert_user_stats(&mut self, row: &UserStats) -> anyhow::Result<()> {
        self.execute(
            "upsert_user_stats",
            "\
            INSERT INTO user_stats (user_id, messages_sent, commands_ran)
            VALUES ($1::text, $2::int8, $3::int8)
            ON CONFLICT (user_id) DO UPDATE SET
              messages_sent = EXCLUDED.messages_sent,
              commands_ran = EXCLUDED.commands_ran
            ",
            &[&row.user_id, &row.messages_sent, &row.commands_ran],
        )
    }

    fn upsert_guild_user_stats(&mut self, row: &GuildUserStats) -> anyhow::Result<()> {
        self.execute(
            "upsert_guild_user_stats",
            "\
            INSERT INTO guild_user_stats
              (user_id, guild_id, messages_sent, commands_ran, last_announced_level)
            VALUES ($1::text, $2::text, $3::int8, $4::int8, $5::int8)
            ON CONFLICT (user_id, guild_id) DO UPDATE SET
              messages_sent = EXCLUDED.messages_sent,
              commands_ran = EXCLUDED.commands_ran
            ",
            &[
                &row.user_id,
                &row.guild_id,
                &row.messages_sent,
                &row.commands_ran,
                &row.last_announced_level,
            ],
        )
    }

    fn upsert_user(&mut self, row: &User) -> anyhow::Result<()> {
        let last_seen = iso_timestamp(&row.last_seen);
        self.execute(
            "upsert_user",
            "\
            INSERT INTO users (id, last_seen)
            VALUES ($1::text, $2::text::timestamptz)
            ON CONFLICT (id) DO UPDATE SET last_seen = EXCLUDED.last_seen
            ",
            &[&row.id, &last_seen],
        )
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        self.batch("COMMIT")
    }

    fn close(self: Box<Self>) -> anyhow::Result<()> {
        let PgDestination { runtime, client } = *self;
        drop(client);
        // Let the connection task observe the closed client before shutdown.
        runtime.block_on(tokio::task::yield_now());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct SqliteDestination {
    conn: Connection,
}

impl SqliteDestination {
    /// Opens an existing database file. A missing file is an error, never a
    /// fresh empty database.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("failed to open sqlite database: {path}"))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }
}

impl DestinationStore for SqliteDestination {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.conn.execute_batch("BEGIN").context("BEGIN")
    }

    fn upsert_user_stats(&mut self, row: &UserStats) -> anyhow::Result<()> {
        self.conn
            .execute(
                "\
                INSERT INTO user_stats (user_id, messages_sent, commands_ran)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (user_id) DO UPDATE SET
                  messages_sent = excluded.messages_sent,
                  commands_ran = excluded.commands_ran
                ",
                params![row.user_id, row.messages_sent, row.commands_ran],
            )
            .context("upsert_user_stats")?;
        Ok(())
    }

    fn upsert_guild_user_stats(&mut self, row: &GuildUserStats) -> anyhow::Result<()> {
        self.conn
            .execute(
                "\
                INSERT INTO guild_user_stats
                  (user_id, guild_id, messages_sent, commands_ran, last_announced_level)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (user_id, guild_id) DO UPDATE SET
                  messages_sent = excluded.messages_sent,
                  commands_ran = excluded.commands_ran
                ",
                params![
                    row.user_id,
                    row.guild_id,
                    row.messages_sent,
                    row.commands_ran,
                    row.last_announced_level
                ],
            )
            .context("upsert_guild_user_stats")?;
        Ok(())
    }

    fn upsert_user(&mut self, row: &User) -> anyhow::Result<()> {
        self.conn
            .execute(
                "\
                INSERT INTO users (id, last_seen)
                VALUES (?1, ?2)
                ON CONFLICT (id) DO UPDATE SET last_seen = excluded.last_seen
                ",
                params![row.id, iso_timestamp(&row.last_seen)],
            )
            .context("upsert_user")?;
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        self.conn.execute_batch("COMMIT").context("COMMIT")
    }

    fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| anyhow!(err))
            .context("failed to close sqlite destination")
    }
}
