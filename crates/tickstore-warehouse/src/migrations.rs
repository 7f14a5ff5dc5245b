use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// `observations.instrument_id` is checked inside the upsert transaction rather
// than by a FOREIGN KEY: DuckDB refuses UPDATEs on a referenced parent row.
// No secondary index on `instruments.sector`: registry refreshes update it, and
// DuckDB rewrites indexed-column updates as delete plus insert.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_registry_and_observations",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS instruments_id_seq START 1;
CREATE TABLE IF NOT EXISTS instruments (
    id BIGINT PRIMARY KEY DEFAULT nextval('instruments_id_seq'),
    symbol TEXT NOT NULL UNIQUE,
    name TEXT,
    exchange TEXT,
    sector TEXT,
    industry TEXT,
    country TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE SEQUENCE IF NOT EXISTS observations_id_seq START 1;
CREATE TABLE IF NOT EXISTS observations (
    id BIGINT NOT NULL DEFAULT nextval('observations_id_seq'),
    instrument_id BIGINT NOT NULL,
    date DATE NOT NULL,
    source_kind TEXT NOT NULL
        CHECK (source_kind IN ('profile', 'historical-bar', 'financial-statement')),
    raw_payload TEXT NOT NULL,
    processed_payload TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (instrument_id, date, source_kind)
);
"#,
    },
    Migration {
        version: "0002_ingest_log",
        sql: r#"
CREATE TABLE IF NOT EXISTS ingest_log (
    run_id TEXT NOT NULL,
    pipeline TEXT NOT NULL,
    symbol TEXT NOT NULL,
    status TEXT NOT NULL,
    records BIGINT NOT NULL,
    error TEXT,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_ingest_log_run ON ingest_log(run_id);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
        }
    }

    Ok(())
}

pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}
