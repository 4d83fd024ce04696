use agb_core::records::RecordError;
use agb_core::{
    Backend, ConfigError, Endpoint, LegacyGuildUserStats, LegacyStore, LegacyTable,
    LegacyUserSetting, LegacyUserStats, connect_mysql,
};
use anyhow::{Context, anyhow};
use mysql::prelude::{FromValue, Queryable};
use mysql::{Conn, FromValueError, Row, Value};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// MySQL `ER_NO_SUCH_TABLE`.
const MYSQL_NO_SUCH_TABLE: u16 = 1146;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySnapshot {
    pub user_stats: u64,
    pub guild_user_stats: u64,
    pub user_settings: u64,
}

/// Connects to the legacy store described by `endpoint`.
pub fn open_legacy(endpoint: &Endpoint) -> anyhow::Result<Box<dyn LegacyStore>> {
    let store: Box<dyn LegacyStore> = match endpoint.backend {
        Backend::Mysql => Box::new(MysqlLegacy::connect(endpoint)?),
        Backend::Sqlite => Box::new(SqliteLegacy::open(endpoint.sqlite_path("legacy")?)?),
        Backend::Postgres => {
            return Err(ConfigError::UnsupportedLegacyBackend {
                backend: Backend::Postgres.as_str(),
            }
            .into());
        }
    };
    info!(endpoint = %endpoint.describe(), "legacy store connected");
    Ok(store)
}

pub fn inspect_legacy<L>(store: &mut L) -> anyhow::Result<LegacySnapshot>
where
    L: LegacyStore + ?Sized,
{
    Ok(LegacySnapshot {
        user_stats: store.count_rows(LegacyTable::UserStats)?,
        guild_user_stats: store.count_rows(LegacyTable::GuildUserStats)?,
        user_settings: store.count_rows(LegacyTable::UserSettings)?,
    })
}

/// A table that does not exist yet counts as empty; any other failure is
/// reported against the table.
fn count_or_zero<E>(
    table: &str,
    result: Result<u64, E>,
    is_missing_table: impl Fn(&E) -> bool,
) -> anyhow::Result<u64>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(count) => Ok(count),
        Err(err) if is_missing_table(&err) => {
            debug!(table, "legacy table missing, counted as empty");
            Ok(0)
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to execute count query for table `{table}`"))
        }
    }
}

fn is_missing_mysql_table(err: &mysql::Error) -> bool {
    matches!(err, mysql::Error::MySqlError(err) if err.code == MYSQL_NO_SUCH_TABLE)
}

fn is_missing_sqlite_table(err: &rusqlite::Error) -> bool {
    err.to_string().contains("no such table")
}

// ---------------------------------------------------------------------------
// MySQL
// ---------------------------------------------------------------------------

pub struct MysqlLegacy {
    conn: Conn,
}

impl MysqlLegacy {
    pub fn connect(endpoint: &Endpoint) -> anyhow::Result<Self> {
        Ok(Self {
            conn: connect_mysql(endpoint)?,
        })
    }

    fn select<T, const N: usize>(
        &mut self,
        table: &'static str,
        columns: [&'static str; N],
        convert: fn([Option<i64>; N]) -> Result<T, RecordError>,
    ) -> anyhow::Result<Vec<T>> {
        let sql = format!("SELECT {} FROM {table}", columns.join(", "));
        let rows: Vec<Row> = self
            .conn
            .query(sql.as_str())
            .with_context(|| format!("failed to select {table}"))?;
        rows.into_iter()
            .map(|row| -> anyhow::Result<T> {
                Ok(convert(mysql_ints(table, columns, row.unwrap_raw())?)?)
            })
            .collect()
    }
}

/// Reads every column of a raw MySQL row as a nullable integer. Drivers hand
/// integers back as `Int`, `UInt` or text depending on the protocol, so the
/// conversion goes through `FromValue` rather than a typed row tuple.
fn mysql_ints<const N: usize>(
    table: &'static str,
    columns: [&'static str; N],
    values: Vec<Option<Value>>,
) -> Result<[Option<i64>; N], RecordError> {
    if values.len() != N {
        return Err(RecordError::ColumnCount {
            table,
            expected: N,
            found: values.len(),
        });
    }
    let mut ints: [Option<i64>; N] = [None; N];
    for ((slot, column), value) in ints.iter_mut().zip(columns).zip(values) {
        *slot = Option::<i64>::from_value_opt(value.unwrap_or(Value::NULL)).map_err(
            |FromValueError(value)| RecordError::NotAnInteger {
                table,
                column,
                value: format!("{value:?}"),
            },
        )?;
    }
    Ok(ints)
}

impl LegacyStore for MysqlLegacy {
    fn user_stats(&mut self) -> anyhow::Result<Vec<LegacyUserStats>> {
        self.select(
            "user_stats",
            LegacyUserStats::COLUMNS,
            LegacyUserStats::from_columns,
        )
    }

    fn guild_user_stats(&mut self) -> anyhow::Result<Vec<LegacyGuildUserStats>> {
        self.select(
            "guild_user_stats",
            LegacyGuildUserStats::COLUMNS,
            LegacyGuildUserStats::from_columns,
        )
    }

    fn user_settings(&mut self) -> anyhow::Result<Vec<LegacyUserSetting>> {
        self.select(
            "user_settings",
            LegacyUserSetting::COLUMNS,
            LegacyUserSetting::from_columns,
        )
    }

    fn count_rows(&mut self, table: LegacyTable) -> anyhow::Result<u64> {
        let table = table.as_str();
        let result = self
            .conn
            .query_first::<u64, _>(format!("SELECT COUNT(*) FROM {table}"))
            .map(|count| count.unwrap_or(0));
        count_or_zero(table, result, is_missing_mysql_table)
    }

    fn close(self: Box<Self>) -> anyhow::Result<()> {
        drop(self.conn);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

pub struct SqliteLegacy {
    conn: Connection,
}

impl SqliteLegacy {
    /// Opens an existing database file read-only.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("failed to open sqlite database: {path}"))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn select<T, const N: usize>(
        &self,
        table: &'static str,
        columns: [&'static str; N],
        convert: fn([Option<i64>; N]) -> Result<T, RecordError>,
    ) -> anyhow::Result<Vec<T>> {
        let sql = format!("SELECT {} FROM {table}", columns.join(", "));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("failed to prepare `{sql}`"))?;
        let rows = stmt
            .query_map([], |row| {
                let mut values: [Option<i64>; N] = [None; N];
                for (idx, value) in values.iter_mut().enumerate() {
                    *value = row.get(idx)?;
                }
                Ok(values)
            })
            .with_context(|| format!("failed to execute `{sql}`"))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("failed to read rows of `{sql}`"))?;
        rows.into_iter()
            .map(|values| -> anyhow::Result<T> { Ok(convert(values)?) })
            .collect()
    }
}

impl LegacyStore for SqliteLegacy {
    fn user_stats(&mut self) -> anyhow::Result<Vec<LegacyUserStats>> {
        self.select(
            "user_stats",
            LegacyUserStats::COLUMNS,
            LegacyUserStats::from_columns,
        )
    }

    fn guild_user_stats(&mut self) -> anyhow::Result<Vec<LegacyGuildUserStats>> {
        self.select(
            "guild_user_stats",
            LegacyGuildUserStats::COLUMNS,
            LegacyGuildUserStats::from_columns,
        )
    }

    fn user_settings(&mut self) -> anyhow::Result<Vec<LegacyUserSetting>> {
        self.select(
            "user_settings",
            LegacyUserSetting::COLUMNS,
            LegacyUserSetting::from_columns,
        )
    }

    fn count_rows(&mut self, table: LegacyTable) -> anyhow::Result<u64> {
        let table = table.as_str();
        let result = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| u64::try_from(count).unwrap_or(0));
        count_or_zero(table, result, is_missing_sqlite_table)
    }

    fn close(self: Box<Self>) -> anyhow::Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| anyhow!(err))
            .context("failed to close sqlite legacy store")
    }
}
