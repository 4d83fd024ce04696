//! Row shapes on both sides of the migration and the mapping between them.
//!
//! Legacy rows carry Discord snowflakes as integers. The new schema stores
//! every identifier as text, so the conversion is a plain decimal cast.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `guild_user_stats.last_announced_level` for rows that never existed in
/// the new schema before.
pub const INITIAL_ANNOUNCED_LEVEL: i64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{table}.{column} holds {value}, which is not a valid snowflake")]
    InvalidId {
        table: &'static str,
        column: &'static str,
        value: i64,
    },
    #[error("{table}.{column} is NULL")]
    NullId {
        table: &'static str,
        column: &'static str,
    },
    #[error("{table}.{column} holds {value}, which is not an integer")]
    NotAnInteger {
        table: &'static str,
        column: &'static str,
        value: String,
    },
    #[error("{table} row has {found} columns, expected {expected}")]
    ColumnCount {
        table: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Converts a nullable signed integer column into a snowflake.
pub fn snowflake(
    table: &'static str,
    column: &'static str,
    value: Option<i64>,
) -> Result<u64, RecordError> {
    let value = value.ok_or(RecordError::NullId { table, column })?;
    u64::try_from(value).map_err(|_| RecordError::InvalidId {
        table,
        column,
        value,
    })
}

/// NULL counters in the legacy schema mean nothing was counted yet.
pub fn counter(value: Option<i64>) -> i64 {
    value.unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyUserStats {
    pub userid: u64,
    pub messages_sent: i64,
    pub commands_ran: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyGuildUserStats {
    pub userid: u64,
    pub guildid: u64,
    pub messages_sent: i64,
    pub commands_ran: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyUserSetting {
    pub userid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub messages_sent: i64,
    pub commands_ran: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildUserStats {
    pub user_id: String,
    pub guild_id: String,
    pub messages_sent: i64,
    pub commands_ran: i64,
    pub last_announced_level: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub last_seen: DateTime<Utc>,
}

impl LegacyUserStats {
    pub const COLUMNS: [&'static str; 3] = ["userid", "messages_sent", "commands_ran"];

    pub fn from_columns(
        [userid, messages_sent, commands_ran]: [Option<i64>; 3],
    ) -> Result<Self, RecordError> {
        Ok(Self {
            userid: snowflake("user_stats", "userid", userid)?,
            messages_sent: counter(messages_sent),
            commands_ran: counter(commands_ran),
        })
    }
}

impl LegacyGuildUserStats {
    pub const COLUMNS: [&'static str; 4] = ["userid", "guildid", "messages_sent", "commands_ran"];

    pub fn from_columns(
        [userid, guildid, messages_sent, commands_ran]: [Option<i64>; 4],
    ) -> Result<Self, RecordError> {
        Ok(Self {
            userid: snowflake("guild_user_stats", "userid", userid)?,
            guildid: snowflake("guild_user_stats", "guildid", guildid)?,
            messages_sent: counter(messages_sent),
            commands_ran: counter(commands_ran),
        })
    }
}

impl LegacyUserSetting {
    pub const COLUMNS: [&'static str; 1] = ["userid"];

    pub fn from_columns([userid]: [Option<i64>; 1]) -> Result<Self, RecordError> {
        Ok(Self {
            userid: snowflake("user_settings", "userid", userid)?,
        })
    }
}

impl From<LegacyUserStats> for UserStats {
    fn from(row: LegacyUserStats) -> Self {
        Self {
            user_id: row.userid.to_string(),
            messages_sent: row.messages_sent,
            commands_ran: row.commands_ran,
        }
    }
}

impl From<LegacyGuildUserStats> for GuildUserStats {
    fn from(row: LegacyGuildUserStats) -> Self {
        Self {
            user_id: row.userid.to_string(),
            guild_id: row.guildid.to_string(),
            messages_sent: row.messages_sent,
            commands_ran: row.commands_ran,
            last_announced_level: INITIAL_ANNOUNCED_LEVEL,
        }
    }
}

impl LegacyUserSetting {
    /// The legacy settings table has no activity timestamp, so the user is
    /// stamped with the time it was migrated.
    pub fn into_user(self, last_seen: DateTime<Utc>) -> User {
        User {
            id: self.userid.to_string(),
            last_seen,
        }
    }
}
