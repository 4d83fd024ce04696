pub mod config;
pub mod destination;
pub mod migrate;
pub mod records;
pub mod store;

pub use config::{Backend, ConfigError, Endpoint, MigrateConfig, load_config};
pub use destination::{
    MysqlDestination, PgDestination, SqliteDestination, connect_mysql, open_destination,
};
pub use migrate::{MigrationReport, run_migration};
pub use records::{
    GuildUserStats, LegacyGuildUserStats, LegacyUserSetting, LegacyUserStats, RecordError, User,
    UserStats,
};
pub use store::{DestinationStore, LegacyStore, LegacyTable};
