use serde::{Deserialize, Serialize};

use crate::records::{
    GuildUserStats, LegacyGuildUserStats, LegacyUserSetting, LegacyUserStats, User, UserStats,
};

/// Tables read from the legacy schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyTable {
    UserStats,
    GuildUserStats,
    UserSettings,
}

impl LegacyTable {
    pub const ALL: [LegacyTable; 3] = [
        LegacyTable::UserStats,
        LegacyTable::GuildUserStats,
        LegacyTable::UserSettings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LegacyTable::UserStats => "user_stats",
            LegacyTable::GuildUserStats => "guild_user_stats",
            LegacyTable::UserSettings => "user_settings",
        }
    }
}

/// Read side. Every fetch returns the whole table.
pub trait LegacyStore {
    fn user_stats(&mut self) -> anyhow::Result<Vec<LegacyUserStats>>;
    fn guild_user_stats(&mut self) -> anyhow::Result<Vec<LegacyGuildUserStats>>;
    fn user_settings(&mut self) -> anyhow::Result<Vec<LegacyUserSetting>>;

    /// Row count for `table`, or 0 when the table does not exist.
    fn count_rows(&mut self, table: LegacyTable) -> anyhow::Result<u64>;

    fn close(self: Box<Self>) -> anyhow::Result<()>;
}

/// Write side. Upserts between `begin` and `commit` land together.
pub trait DestinationStore {
    fn begin(&mut self) -> anyhow::Result<()>;
    fn upsert_user_stats(&mut self, row: &UserStats) -> anyhow::Result<()>;
    fn upsert_guild_user_stats(&mut self, row: &GuildUserStats) -> anyhow::Result<()>;
    fn upsert_user(&mut self, row: &User) -> anyhow::Result<()>;
    fn commit(&mut self) -> anyhow::Result<()>;

    fn close(self: Box<Self>) -> anyhow::Result<()>;
}
