//! Writes log records into a per-run table.
//!
//! Every host gets its own database inside the configured namespace. A
//! counter stored in that database numbers the runs; each run writes into
//! table `_{n}`.

use gol_client::{at, ClientResult, Connection, Datetime, NoVars, Value};
use serde::Serialize;

use crate::output::OutData;

const SETUP_QUERY: &str = "
DEFINE DATABASE IF NOT EXISTS ⟨{db}⟩; -- 0
USE DB ⟨{db}⟩; -- 1
DEFINE TABLE IF NOT EXISTS catalog_counter SCHEMAFULL TYPE NORMAL; -- 2
DEFINE FIELD IF NOT EXISTS value ON catalog_counter TYPE int; -- 3
UPSERT ONLY catalog_counter:main SET value += 1 RETURN VALUE value - 1; -- 4";

/// Statement of [`SETUP_QUERY`] that returns the run number.
const SETUP_COUNTER_INDEX: usize = 4;

const DEFINE_TABLE_QUERY: &str = "
DEFINE TABLE ⟨{tb}⟩ SCHEMAFULL TYPE NORMAL; -- 0
DEFINE FIELD err  ON ⟨{tb}⟩ TYPE bool; -- 1
DEFINE FIELD msg  ON ⟨{tb}⟩ TYPE string; -- 2
DEFINE FIELD time ON ⟨{tb}⟩ TYPE option<datetime>; -- 3";

const CREATE_LOG_QUERY: &str = "
CREATE ⟨{tb}⟩ SET err = $err, msg = $msg, time = $time RETURN NONE; -- 0";

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    err: bool,
    msg: &'a str,
    time: Option<Datetime>,
}

pub struct LogSink<'c> {
    conn: &'c Connection,
    table: String,
}

impl<'c> LogSink<'c> {
    /// Prepare the host's database and a fresh table for this run.
    ///
    /// The connection must already have a namespace and be signed in.
    pub async fn open(conn: &'c Connection, database: &str) -> ClientResult<Self> {
        let run = setup_database(conn, database).await?;
        let table = format!("_{}", run);

        conn.use_database(database).await?;
        conn.query(&DEFINE_TABLE_QUERY.replace("{tb}", &table), NoVars {})
            .await?;
        tracing::info!("Logging to {}.{}", database, table);

        Ok(Self { conn, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn stdout(&self, data: &OutData) -> ClientResult<()> {
        self.create(data, false).await
    }

    pub async fn stderr(&self, data: &OutData) -> ClientResult<()> {
        self.create(data, true).await
    }

    async fn create(&self, data: &OutData, err: bool) -> ClientResult<()> {
        let vars = LogRecord {
            err,
            msg: &data.message,
            time: data.time,
        };
        let results = self
            .conn
            .query(&CREATE_LOG_QUERY.replace("{tb}", &self.table), vars)
            .await?;
        at::<Value>(&results, 0).map(|_| ())
    }
}

/// Define the database and bump its run counter, returning the previous
/// value.
pub async fn setup_database(conn: &Connection, database: &str) -> ClientResult<i64> {
    let results = conn
        .query(&SETUP_QUERY.replace("{db}", database), NoVars {})
        .await?;
    at::<i64>(&results, SETUP_COUNTER_INDEX)
}
