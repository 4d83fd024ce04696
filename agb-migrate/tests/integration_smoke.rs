//! Smoke integration tests for agb-migrate.
//!
//! These run the compiled binary against SQLite files on both sides, so no
//! MySQL or Postgres server is needed.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use tempfile::TempDir;

const LEGACY_SCHEMA: &str = "\
    CREATE TABLE user_stats (userid INTEGER PRIMARY KEY, \
        messages_sent INTEGER, commands_ran INTEGER);\
    CREATE TABLE guild_user_stats (userid INTEGER, guildid INTEGER, \
        messages_sent INTEGER, commands_ran INTEGER);\
    CREATE TABLE user_settings (userid INTEGER PRIMARY KEY, theme TEXT);\
    INSERT INTO user_stats VALUES (10, 120, 4);\
    INSERT INTO user_stats VALUES (11, 7, 0);\
    INSERT INTO user_stats VALUES (12, 0, 9);\
    INSERT INTO guild_user_stats VALUES (1, 2, 5, 3);\
    INSERT INTO user_settings VALUES (10, 'dark');\
    INSERT INTO user_settings VALUES (12, 'light');\
    ";

const NEW_SCHEMA: &str = "\
    CREATE TABLE user_stats (user_id TEXT PRIMARY KEY, \
        messages_sent INTEGER NOT NULL, commands_ran INTEGER NOT NULL);\
    CREATE TABLE guild_user_stats (user_id TEXT NOT NULL, guild_id TEXT NOT NULL, \
        messages_sent INTEGER NOT NULL, commands_ran INTEGER NOT NULL, \
        last_announced_level INTEGER NOT NULL, UNIQUE (user_id, guild_id));\
    CREATE TABLE users (id TEXT PRIMARY KEY, last_seen TEXT);\
    ";

struct Fixture {
    dir: TempDir,
    legacy: PathBuf,
    destination: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("create tempdir");
        let legacy = dir.path().join("legacy.db");
        let destination = dir.path().join("new.db");

        Connection::open(&legacy)
            .expect("open legacy")
            .execute_batch(LEGACY_SCHEMA)
            .expect("seed legacy");
        Connection::open(&destination)
            .expect("open destination")
            .execute_batch(NEW_SCHEMA)
            .expect("create destination schema");

        Self {
            dir,
            legacy,
            destination,
        }
    }

    /// Write a sqlite-to-sqlite config and return its path.
    fn write_config(&self, destination: &Path) -> PathBuf {
        let config_path = self.dir.path().join("migrate.toml");
        let toml = format!(
            r#"
[legacy]
backend = "sqlite"
path = "{}"

[destination]
backend = "sqlite"
path = "{}"
"#,
            self.legacy.display(),
            destination.display()
        );
        std::fs::write(&config_path, toml).expect("write test config");
        config_path
    }
}

fn run(config: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_agb-migrate"));
    for (key, _) in std::env::vars() {
        if key.starts_with("AGB_") {
            command.env_remove(key);
        }
    }
    command
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn agb-migrate")
}

#[test]
fn default_command_migrates_every_table() {
    let fixture = Fixture::new();
    let config = fixture.write_config(&fixture.destination);

    let output = run(&config, &[]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "migration failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout.contains("  → Migrated 3 user_stats rows"), "{stdout}");
    assert!(stdout.contains("  → Migrated 1 guild_user_stats rows"), "{stdout}");
    assert!(stdout.contains("  → Migrated 2 users"), "{stdout}");
    assert!(stdout.trim_end().ends_with("✅ Migration complete!"), "{stdout}");

    let conn = Connection::open(&fixture.destination).expect("reopen destination");
    let stats: (i64, i64) = conn
        .query_row(
            "SELECT messages_sent, commands_ran FROM user_stats WHERE user_id = '10'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("read user_stats");
    assert_eq!(stats, (120, 4));

    let level: i64 = conn
        .query_row(
            "SELECT last_announced_level FROM guild_user_stats \
             WHERE user_id = '1' AND guild_id = '2'",
            [],
            |r| r.get(0),
        )
        .expect("read guild_user_stats");
    assert_eq!(level, 0);

    let users: i64 = conn
        .query_row("SELECT COUNT(*) FROM users WHERE last_seen IS NOT NULL", [], |r| r.get(0))
        .expect("count users");
    assert_eq!(users, 2);
}

#[test]
fn unreachable_destination_fails_before_reading_legacy() {
    let fixture = Fixture::new();
    let missing = fixture.dir.path().join("no-such-dir").join("new.db");
    let config = fixture.write_config(&missing);

    let output = run(&config, &["migrate"]);
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("Migrating"), "{stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to connect to destination store"),
        "{stderr}"
    );
}

#[test]
fn absent_destination_file_fails_before_reading_legacy() {
    let fixture = Fixture::new();
    let typo = fixture.dir.path().join("typo.db");
    let config = fixture.write_config(&typo);

    let output = run(&config, &["migrate"]);
    assert!(!output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("Migrating"), "{stdout}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to connect to destination store"),
        "{stderr}"
    );
    assert!(!typo.exists(), "a missing destination must not be created");
}

#[test]
fn inspect_legacy_prints_row_counts() {
    let fixture = Fixture::new();
    let config = fixture.write_config(&fixture.destination);

    let output = run(&config, &["inspect-legacy"]);
    assert!(output.status.success());

    let body: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("inspect output is json");
    assert_eq!(body["snapshot"]["user_stats"], 3);
    assert_eq!(body["snapshot"]["guild_user_stats"], 1);
    assert_eq!(body["snapshot"]["user_settings"], 2);
}

#[test]
fn print_config_redacts_passwords() {
    let fixture = Fixture::new();
    let config = fixture.write_config(&fixture.destination);

    let mut command = Command::new(env!("CARGO_BIN_EXE_agb-migrate"));
    let output = command
        .args(["print-config", "--config"])
        .arg(&config)
        .env("AGB_DESTINATION_PASSWORD", "hunter2")
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn agb-migrate");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("hunter2"), "{stdout}");
    let body: serde_json::Value = serde_json::from_str(&stdout).expect("config output is json");
    assert_eq!(body["destination"]["password"], "***");
    assert_eq!(body["legacy"]["backend"], "sqlite");
}
