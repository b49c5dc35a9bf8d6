// =============================================================================
// CSV Signal Bus — durable, crash-safe exchange of signal/response rows
// =============================================================================
//
// Producers (this core) never modify a file in place. Full rewrites — schema
// migration only — write a `.tmp` sibling, fsync it, then atomically rename
// it over the target, mirroring the load/save discipline in `config.rs`.
// Normal appends take an advisory exclusive lock on the target, append one
// newline-terminated row, fsync, and release.
//
// Consumers (`ResponseTail`) track a durable byte offset in a sidecar file
// so a restarted process resumes exactly where it left off; partial
// trailing lines are never consumed.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::EngineError;

pub const SCHEMA_VERSION: &str = "3.0";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Compute the canonical-JSON SHA-256 used for payload integrity checks.
/// "Canonical" here means `serde_json`'s native map ordering (insertion
/// order for structs — the only ordering this bus ever produces), matched
/// identically on the read side by re-hashing the same serialization.
pub fn canonical_sha256(payload: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(payload).expect("Value serialization cannot fail");
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

/// Outbound action carried on `trading_signals.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    UpdateParams,
    TradeSignal,
    CancelPending,
    Heartbeat,
}

impl SignalAction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateParams => "UPDATE_PARAMS",
            Self::TradeSignal => "TRADE_SIGNAL",
            Self::CancelPending => "CANCEL_PENDING",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the outbound `trading_signals.csv` stream (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRow {
    pub version: String,
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
    pub symbol: String,
    pub combination_id: String,
    pub action: String,
    pub parameter_set_id: String,
    pub json_payload_sha256: String,
    pub json_payload: String,
}

impl SignalRow {
    /// Build a row, computing the payload hash from `payload`.
    pub fn new(
        symbol: impl Into<String>,
        combination_id: impl Into<String>,
        action: SignalAction,
        parameter_set_id: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            timestamp_utc: chrono::Utc::now(),
            symbol: symbol.into(),
            combination_id: combination_id.into(),
            action: action.as_str().to_string(),
            parameter_set_id: parameter_set_id.into(),
            json_payload: payload.to_string(),
            json_payload_sha256: canonical_sha256(payload),
        }
    }

    /// Recompute and verify the payload hash against `json_payload_sha256`.
    pub fn verify_integrity(&self) -> Result<(), EngineError> {
        let payload: serde_json::Value = serde_json::from_str(&self.json_payload)?;
        let recomputed = canonical_sha256(&payload);
        if recomputed != self.json_payload_sha256 {
            return Err(EngineError::BusFatal(format!(
                "payload integrity check failed for {}/{}: expected {}, got {}",
                self.symbol, self.combination_id, self.json_payload_sha256, recomputed
            )));
        }
        Ok(())
    }
}

/// One row of the inbound `trade_responses.csv` stream (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRow {
    pub version: String,
    pub timestamp_utc: chrono::DateTime<chrono::Utc>,
    pub symbol: String,
    pub combination_id: String,
    pub action: String,
    pub status: String,
    #[serde(default)]
    pub ea_code: String,
    #[serde(default)]
    pub detail_json: Option<String>,
}

const SIGNAL_HEADER: [&str; 8] = [
    "version",
    "timestamp_utc",
    "symbol",
    "combination_id",
    "action",
    "parameter_set_id",
    "json_payload_sha256",
    "json_payload",
];

/// Appends rows to an outbound CSV file with advisory locking, fsync, and
/// bounded contention backoff.
pub struct CsvSignalBus {
    path: PathBuf,
    lock_timeout: Duration,
}

impl CsvSignalBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Append `row` to the signal file. Blocks (polling) up to
    /// `lock_timeout` to acquire the advisory lock; on timeout returns
    /// `BusContention` so the orchestrator can retry with backoff.
    pub fn emit(&self, row: &SignalRow) -> Result<(), EngineError> {
        if row.version != SCHEMA_VERSION {
            return Err(EngineError::UnsupportedVersion(row.version.clone()));
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let write_header = !self.path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)?;

        self.acquire_lock(&file)?;

        let result = (|| -> Result<(), EngineError> {
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&file);
            if write_header {
                wtr.write_record(SIGNAL_HEADER)?;
            }
            wtr.serialize(row)?;
            wtr.flush()?;
            file.sync_all()?;
            Ok(())
        })();

        FileExt::unlock(&file)?;
        result?;
        debug!(
            symbol = %row.symbol,
            combination_id = %row.combination_id,
            path = %self.path.display(),
            "signal row appended"
        );
        Ok(())
    }

    fn acquire_lock(&self, file: &File) -> Result<(), EngineError> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(()),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(_) => {
                    return Err(EngineError::BusContention {
                        path: self.path.display().to_string(),
                        timeout_ms: self.lock_timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    /// Rewrite the entire file (schema migration only) via write-tmp,
    /// fsync, atomic rename. Never used for normal appends.
    pub fn rewrite_all(&self, rows: &[SignalRow]) -> Result<(), EngineError> {
        let tmp_path = self.path.with_extension("csv.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&file);
            wtr.write_record(SIGNAL_HEADER)?;
            for row in rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Tracks a durable read offset for a response stream, persisted alongside
/// the tailed file as `<name>.<ext>.offset`.
pub struct ResponseTail {
    path: PathBuf,
    offset_path: PathBuf,
}

impl ResponseTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let offset_path = path.with_extension(format!(
            "{}.offset",
            path.extension().and_then(|e| e.to_str()).unwrap_or("csv")
        ));
        Self { path, offset_path }
    }

    fn read_offset(&self) -> u64 {
        std::fs::read_to_string(&self.offset_path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn persist_offset(&self, offset: u64) -> Result<(), EngineError> {
        let tmp_path = self.offset_path.with_extension("offset.tmp");
        std::fs::write(&tmp_path, offset.to_string())?;
        std::fs::rename(&tmp_path, &self.offset_path)?;
        Ok(())
    }

    /// Read every complete new line since the last persisted offset and
    /// parse it as a `ResponseRow`. A trailing partial line (no terminating
    /// newline yet) is left unread; the offset only advances past complete
    /// lines. Rows whose `version` does not match are rejected individually
    /// with `UNSUPPORTED_VERSION` rather than aborting the whole tail.
    pub fn poll(&self) -> Result<Vec<Result<ResponseRow, EngineError>>, EngineError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path)?;
        let start_offset = self.read_offset();
        file.seek(SeekFrom::Start(start_offset))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let last_newline = match buf.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx,
            None => return Ok(Vec::new()),
        };
        let complete = &buf[..=last_newline];
        let new_offset = start_offset + complete.len() as u64;

        let is_first_read = start_offset == 0;
        let mut reader = BufReader::new(complete);
        let mut rows = Vec::new();

        if is_first_read {
            let mut header = String::new();
            reader.read_line(&mut header)?;
        }

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(self.parse_response_line(&line));
        }

        self.persist_offset(new_offset)?;
        Ok(rows)
    }

    fn parse_response_line(&self, line: &str) -> Result<ResponseRow, EngineError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let row: ResponseRow = reader
            .deserialize()
            .next()
            .ok_or_else(|| EngineError::BusTransient("empty response line".to_string()))??;
        if row.version != SCHEMA_VERSION {
            return Err(EngineError::UnsupportedVersion(row.version));
        }
        Ok(row)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn payload() -> serde_json::Value {
        serde_json::json!({ "lots": 1.23, "symbol": "EURUSD" })
    }

    #[test]
    fn canonical_hash_is_idempotent() {
        let p = payload();
        let h1 = canonical_sha256(&p);
        let reparsed: serde_json::Value = serde_json::from_str(&p.to_string()).unwrap();
        let h2 = canonical_sha256(&reparsed);
        assert_eq!(h1, h2);
    }

    #[test]
    fn signal_row_integrity_round_trips() {
        let row = SignalRow::new(
            "EURUSD",
            "O:ECO_HIGH:FLASH:SHORT:WIN",
            SignalAction::TradeSignal,
            "PS-base",
            &payload(),
        );
        assert!(row.verify_integrity().is_ok());
    }

    #[test]
    fn tampered_payload_fails_integrity_check() {
        let mut row = SignalRow::new(
            "EURUSD",
            "O:ECO_HIGH:FLASH:SHORT:WIN",
            SignalAction::TradeSignal,
            "PS-base",
            &payload(),
        );
        row.json_payload = serde_json::json!({ "lots": 9.99 }).to_string();
        assert!(row.verify_integrity().is_err());
    }

    #[test]
    fn emit_rejects_mismatched_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let bus = CsvSignalBus::new(dir.path().join("signals.csv"));
        let mut row = SignalRow::new(
            "EURUSD",
            "O:ECO_HIGH:FLASH:SHORT:WIN",
            SignalAction::TradeSignal,
            "PS-base",
            &payload(),
        );
        row.version = "2.0".to_string();
        assert!(matches!(
            bus.emit(&row),
            Err(EngineError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn emit_then_read_round_trips_row_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.csv");
        let bus = CsvSignalBus::new(&path);
        let row = SignalRow::new(
            "EURUSD",
            "O:ECO_HIGH:FLASH:SHORT:WIN",
            SignalAction::TradeSignal,
            "PS-base",
            &payload(),
        );
        bus.emit(&row).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .unwrap();
        let read_back: SignalRow = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(read_back.symbol, row.symbol);
        assert_eq!(read_back.json_payload_sha256, row.json_payload_sha256);
    }

    #[test]
    fn tail_ignores_partial_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.csv");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(
                f,
                "version,timestamp_utc,symbol,combination_id,action,status,ea_code,detail_json"
            )
            .unwrap();
            writeln!(
                f,
                "3.0,2026-01-01T00:00:00Z,EURUSD,O:ECO_HIGH:FLASH:SHORT:WIN,ACK_TRADE,OK,0,"
            )
            .unwrap();
            write!(
                f,
                "3.0,2026-01-01T00:01:00Z,EURUSD,O:ECO_HIGH:FLASH:SHORT:WIN,ACK_TRADE,OK,0,"
            )
            .unwrap(); // no trailing newline
        }
        let tail = ResponseTail::new(&path);
        let rows = tail.poll().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].as_ref().unwrap().action, "ACK_TRADE");

        // A second poll before the partial line is completed yields nothing new.
        let rows = tail.poll().unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn tail_resumes_from_persisted_offset_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.csv");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(
                f,
                "version,timestamp_utc,symbol,combination_id,action,status,ea_code,detail_json"
            )
            .unwrap();
            writeln!(
                f,
                "3.0,2026-01-01T00:00:00Z,EURUSD,O:ECO_HIGH:FLASH:SHORT:WIN,ACK_TRADE,OK,0,"
            )
            .unwrap();
        }
        let first = ResponseTail::new(&path);
        assert_eq!(first.poll().unwrap().len(), 1);

        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(
                f,
                "3.0,2026-01-01T00:02:00Z,EURUSD,R1:ECO_HIGH:FLASH:SHORT:LOSS,ACK_TRADE,OK,0,"
            )
            .unwrap();
        }
        let second = ResponseTail::new(&path);
        let rows = second.poll().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].as_ref().unwrap().combination_id,
            "R1:ECO_HIGH:FLASH:SHORT:LOSS"
        );
    }
}
