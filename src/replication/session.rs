//! Replication Session (C3): publication/slot provisioning, the keepalive
//! loop, and reconnection-with-backoff against upstream.
//!
//! Grounded on the teacher's `server::ReplicationServer` — connection
//! lifecycle, `identify_system`, `replication_loop`, `send_feedback`,
//! `perform_graceful_shutdown` — generalized so the slot/publication are
//! created when absent (the teacher only checks and errors) and wrapped so
//! it can sit behind the `postgres` connector rather than own the process.

use crate::errors::{ReplicationError, ReplicationResult};
use crate::event::Event;
use crate::pg_connection::PgConnection;
use crate::protocol::{BufferReader, KeepaliveMessage, StandbyStatusUpdateMessage, XLogDataMessage};
use crate::replication::parser::MessageProcessor;
use crate::utils::system_time_to_postgres_timestamp;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const POLL_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Configuration for one replication session, equivalent to one `postgres`
/// source peer's connector config.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connection_string: String,
    pub publication_name: String,
    pub slot_name: String,
    pub output_plugin: String,
    /// Table tokens for publication creation: `*`, `*.*`, `schema.*`, or
    /// fully-qualified `schema.table` entries.
    pub tables: Vec<String>,
    pub operations: Option<Vec<String>>,
    pub partition_root: bool,
    pub standby_interval: Duration,
    /// Logical server name stamped into every emitted event's `source.name`.
    pub server_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            publication_name: "pgo_logrepl".to_string(),
            slot_name: "pgo_logrepl".to_string(),
            output_plugin: "pgoutput".to_string(),
            tables: vec!["*".to_string()],
            operations: None,
            partition_root: false,
            standby_interval: Duration::from_secs(10),
            server_name: "postgresql".to_string(),
        }
    }
}

struct IdentifySystemInfo {
    #[allow(dead_code)]
    system_id: String,
    #[allow(dead_code)]
    timeline: i32,
    xlogpos: u64,
    dbname: String,
}

/// A live replication session: the connection, the relation cache/message
/// processor, and the client's acknowledged LSN.
pub struct ReplicationSession {
    connection: PgConnection,
    config: SessionConfig,
    processor: MessageProcessor,
    client_lsn: u64,
    db_name: String,
}

impl ReplicationSession {
    /// Connect and run the full startup algorithm: ensure publication,
    /// identify system, ensure slot, start replication. Returns a session
    /// ready for `run`.
    pub fn establish(config: SessionConfig) -> ReplicationResult<Self> {
        let connection = PgConnection::connect(&replication_conninfo(&config.connection_string))?;
        info!(slot = %config.slot_name, publication = %config.publication_name, "connected to upstream for replication");

        ensure_publication(&connection, &config)?;
        let identity = identify_system(&connection)?;
        ensure_slot(&connection, &config)?;

        let mut session = Self {
            connection,
            config,
            processor: MessageProcessor::new(),
            client_lsn: identity.xlogpos,
            db_name: identity.dbname,
        };
        session.start_replication(identity.xlogpos)?;
        Ok(session)
    }

    pub fn client_lsn(&self) -> u64 {
        self.client_lsn
    }

    fn start_replication(&mut self, start_lsn: u64) -> ReplicationResult<()> {
        let proto_version = if self
            .config
            .tables
            .iter()
            .any(|t| t.ends_with(".*") && t != "*.*")
        {
            "4"
        } else {
            "2"
        };

        let lsn_hi = (start_lsn >> 32) as u32;
        let lsn_lo = start_lsn as u32;
        let sql = format!(
            "START_REPLICATION SLOT \"{}\" LOGICAL {:X}/{:X} (proto_version '{}', publication_names '{}', messages 'true', streaming 'true');",
            self.config.slot_name, lsn_hi, lsn_lo, proto_version, self.config.publication_name
        );

        info!("starting replication: {}", sql);
        let result = self.connection.exec(&sql)?;
        if result.status() != libpq_sys::ExecStatusType::PGRES_COPY_BOTH {
            return Err(ReplicationError::protocol(format!(
                "START_REPLICATION did not enter copy-both mode: {:?}",
                result.status()
            )));
        }
        self.client_lsn = start_lsn;
        Ok(())
    }

    /// Reconnect with linear backoff (1s, 2s, 3s, 4s, 5s), resuming
    /// replication at the last acknowledged LSN. Returns a fatal session
    /// error if every attempt fails.
    fn reconnect(&mut self) -> ReplicationResult<()> {
        let mut last_err = None;
        for attempt in 1..=RECONNECT_ATTEMPTS {
            let delay = RECONNECT_BASE_DELAY * attempt;
            warn!(attempt, delay_secs = delay.as_secs(), "reconnecting after transport drop");
            std::thread::sleep(delay);

            match PgConnection::connect(&replication_conninfo(&self.config.connection_string)) {
                Ok(connection) => {
                    self.connection = connection;
                    match self.start_replication(self.client_lsn) {
                        Ok(()) => {
                            info!("reconnected and resumed replication at lsn {:x}", self.client_lsn);
                            return Ok(());
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(ReplicationError::connection(format!(
            "exhausted {} reconnect attempts: {}",
            RECONNECT_ATTEMPTS,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Drive the keepalive loop: poll for COPY data, dispatch
    /// keepalive/XLogData messages, emit decoded events on `event_tx`, and
    /// observe `shutdown_rx` for cancellation. Blocking — the caller must
    /// run this inside `spawn_blocking`.
    pub fn run(
        &mut self,
        event_tx: mpsc::Sender<Event>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> ReplicationResult<()> {
        let mut next_standby = Instant::now() + self.config.standby_interval;

        loop {
            if *shutdown_rx.borrow() {
                info!("shutdown observed, performing graceful shutdown of replication session");
                self.send_feedback()?;
                let _ = self.connection.flush();
                return Ok(());
            }

            if Instant::now() >= next_standby {
                self.send_feedback()?;
                next_standby = Instant::now() + self.config.standby_interval;
            }

            match self.connection.get_copy_data() {
                Ok(None) => {
                    warn!("replication stream ended unexpectedly, attempting reconnect");
                    self.reconnect()?;
                    next_standby = Instant::now() + self.config.standby_interval;
                    continue;
                }
                Ok(Some(data)) => {
                    if data.is_empty() {
                        continue;
                    }
                    match data[0] as char {
                        'k' => {
                            if self.process_keepalive(&data)? {
                                next_standby = Instant::now();
                            }
                        }
                        'w' => {
                            let events = self.process_xlog_data(&data)?;
                            for event in events {
                                if event_tx.blocking_send(event).is_err() {
                                    info!("event channel closed, stopping replication session");
                                    return Ok(());
                                }
                            }
                        }
                        other => warn!("unknown COPY data message type: {}", other),
                    }
                }
                Err(e) => {
                    if e.is_fatal() {
                        error!("fatal replication protocol error: {}", e);
                        return Err(e);
                    }
                    warn!("transient replication error, attempting reconnect: {}", e);
                    self.reconnect()?;
                    next_standby = Instant::now() + self.config.standby_interval;
                }
            }

            std::thread::sleep(POLL_IDLE_SLEEP);
        }
    }

    /// Returns whether the server requested an immediate reply.
    fn process_keepalive(&mut self, data: &[u8]) -> ReplicationResult<bool> {
        let reader = BufferReader::new(data);
        let keepalive: KeepaliveMessage = reader.try_into()?;

        if keepalive.wal_end > self.client_lsn {
            self.client_lsn = keepalive.wal_end;
        }
        if keepalive.reply_requested {
            debug!("server requested immediate feedback");
            self.send_feedback()?;
            self.connection.flush()?;
        }
        Ok(keepalive.reply_requested)
    }

    fn process_xlog_data(&mut self, data: &[u8]) -> ReplicationResult<Vec<Event>> {
        let reader = BufferReader::new(data);
        let xlog: XLogDataMessage = reader.try_into()?;

        if xlog.data_start > self.client_lsn {
            self.client_lsn = xlog.data_start;
        }

        let ts_ms = crate::utils::now_millis();
        // Feedback for the LSN this message advances to is sent once the
        // resulting events have been produced to `event_tx` in `run()`, not
        // here — acknowledging before that would let the slot advance past
        // events the process never actually handed downstream.
        self.processor.process(
            &xlog.data,
            xlog.data_start,
            &self.config.server_name,
            &self.db_name,
            ts_ms,
        )
    }

    fn send_feedback(&mut self) -> ReplicationResult<()> {
        let timestamp = system_time_to_postgres_timestamp(SystemTime::now());
        let status = StandbyStatusUpdateMessage::acknowledging(self.client_lsn, timestamp as u64, false);
        self.connection.put_copy_data(&status.to_bytes()?)?;
        debug!("sent standby status update at lsn {:x}", self.client_lsn);
        Ok(())
    }
}

fn replication_conninfo(connection_string: &str) -> String {
    if connection_string.contains("replication=") {
        connection_string.to_string()
    } else if connection_string.contains('?') {
        format!("{connection_string}&replication=database")
    } else if connection_string.starts_with("postgres://") || connection_string.starts_with("postgresql://") {
        format!("{connection_string}?replication=database")
    } else {
        format!("{connection_string} replication=database")
    }
}

fn identify_system(connection: &PgConnection) -> ReplicationResult<IdentifySystemInfo> {
    let result = connection.exec("IDENTIFY_SYSTEM;")?;
    if !result.is_ok() {
        return Err(ReplicationError::protocol(format!(
            "IDENTIFY_SYSTEM failed: {:?}",
            result.status()
        )));
    }

    let system_id = result.getvalue(0, 0).unwrap_or_default();
    let timeline = result
        .getvalue(0, 1)
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(1);
    let xlogpos_str = result.getvalue(0, 2).unwrap_or_default();
    let xlogpos = parse_lsn(&xlogpos_str)?;
    let dbname = result.getvalue(0, 3).unwrap_or_default();

    Ok(IdentifySystemInfo {
        system_id,
        timeline,
        xlogpos,
        dbname,
    })
}

/// Parse a textual LSN of the form `"16/B374D848"` into its 64-bit value.
fn parse_lsn(text: &str) -> ReplicationResult<u64> {
    let (hi, lo) = text
        .split_once('/')
        .ok_or_else(|| ReplicationError::parse(format!("malformed LSN: {text}")))?;
    let hi = u32::from_str_radix(hi, 16)
        .map_err(|e| ReplicationError::parse(format!("malformed LSN high word: {e}")))?;
    let lo = u32::from_str_radix(lo, 16)
        .map_err(|e| ReplicationError::parse(format!("malformed LSN low word: {e}")))?;
    Ok(((hi as u64) << 32) | lo as u64)
}

fn ensure_publication(connection: &PgConnection, config: &SessionConfig) -> ReplicationResult<()> {
    let check_sql = format!(
        "SELECT pubname FROM pg_publication WHERE pubname = '{}';",
        config.publication_name
    );
    let result = connection.exec(&check_sql)?;
    if !result.is_ok() {
        return Err(ReplicationError::protocol(format!(
            "failed to check existing publications: {:?}",
            result.status()
        )));
    }
    if result.ntuples() > 0 {
        debug!(publication = %config.publication_name, "publication already exists");
        return Ok(());
    }

    let mut options = Vec::new();
    if let Some(ops) = &config.operations {
        options.push(format!("publish = '{}'", ops.join(", ")));
    }
    if config.partition_root {
        options.push("publish_via_partition_root = true".to_string());
    }
    let options_clause = if options.is_empty() {
        String::new()
    } else {
        format!(" WITH ({})", options.join(", "))
    };

    let create_sql = if config.tables.iter().any(|t| t == "*" || t == "*.*") {
        format!(
            "CREATE PUBLICATION \"{}\" FOR ALL TABLES{};",
            config.publication_name, options_clause
        )
    } else {
        let mut table_clauses = Vec::new();
        for table in &config.tables {
            if let Some(schema) = table.strip_suffix(".*") {
                table_clauses.push(format!("TABLES IN SCHEMA {schema}"));
            } else {
                table_clauses.push(format!("TABLE {table}"));
            }
        }
        format!(
            "CREATE PUBLICATION \"{}\" FOR {}{};",
            config.publication_name,
            table_clauses.join(", "),
            options_clause
        )
    };

    info!("creating publication: {}", create_sql);
    let result = connection.exec(&create_sql)?;
    if !result.is_ok() {
        return Err(ReplicationError::protocol(format!(
            "failed to create publication '{}': {:?}",
            config.publication_name,
            result.status()
        )));
    }

    add_tables_legacy(connection, config)
}

/// Legacy-compatible path: add tables one by one via `ALTER PUBLICATION ...
/// ADD TABLE`, ignoring "already a member" errors — used when a publication
/// already exists but a newer table entry needs to join it.
fn add_tables_legacy(connection: &PgConnection, config: &SessionConfig) -> ReplicationResult<()> {
    for table in &config.tables {
        if table == "*" || table == "*.*" || table.ends_with(".*") {
            continue;
        }
        let sql = format!(
            "ALTER PUBLICATION \"{}\" ADD TABLE {};",
            config.publication_name, table
        );
        let result = connection.exec(&sql)?;
        if !result.is_ok() {
            let message = connection
                .error_message()
                .unwrap_or_else(|| "unknown error".to_string());
            if message.to_lowercase().contains("already") {
                debug!(table = %table, "table already a publication member, ignoring");
                continue;
            }
            return Err(ReplicationError::protocol(format!(
                "failed to add table '{table}' to publication: {message}"
            )));
        }
    }
    Ok(())
}

fn ensure_slot(connection: &PgConnection, config: &SessionConfig) -> ReplicationResult<()> {
    let check_sql = format!(
        "SELECT slot_name FROM pg_replication_slots WHERE slot_name = '{}';",
        config.slot_name
    );
    let result = connection.exec(&check_sql)?;
    if !result.is_ok() {
        return Err(ReplicationError::protocol(format!(
            "failed to check existing replication slots: {:?}",
            result.status()
        )));
    }
    if result.ntuples() > 0 {
        debug!(slot = %config.slot_name, "replication slot already exists");
        return Ok(());
    }

    let create_sql = format!(
        "CREATE_REPLICATION_SLOT \"{}\" LOGICAL \"{}\" NOEXPORT_SNAPSHOT;",
        config.slot_name, config.output_plugin
    );
    info!("creating replication slot: {}", create_sql);
    let result = connection.exec(&create_sql)?;
    if !result.is_ok() {
        return Err(ReplicationError::protocol(format!(
            "failed to create replication slot '{}': {:?}",
            config.slot_name,
            result.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lsn_hex_pair() {
        assert_eq!(parse_lsn("16/B374D848").unwrap(), 0x16_0000_0000 + 0xB374D848);
        assert_eq!(parse_lsn("0/0").unwrap(), 0);
    }

    #[test]
    fn rejects_malformed_lsn() {
        assert!(parse_lsn("not-an-lsn").is_err());
    }

    #[test]
    fn appends_replication_param_to_uri() {
        let conninfo = replication_conninfo("postgres://localhost/db");
        assert!(conninfo.contains("replication=database"));
    }

    #[test]
    fn appends_replication_param_to_keyword_string() {
        let conninfo = replication_conninfo("host=localhost dbname=db");
        assert_eq!(conninfo, "host=localhost dbname=db replication=database");
    }
}
