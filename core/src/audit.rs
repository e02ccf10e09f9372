//! Append-only, HMAC-signed audit log.
//!
//! Each record's signature is `HMAC-SHA-256(previousSignature ∥ 0x1E ∥
//! canonicalRecord)`, hex-encoded, chaining every record to the one before
//! it. `verify()` walks the chain and fails fast at the first mismatch,
//! returning the offending index.

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::BufRead;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use hmac::Hmac;
use hmac::Mac;
use masterclaw_protocol::CorrelationId;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::safe::mask_sensitive;
use crate::store::LockGuard;

type HmacSha256 = Hmac<Sha256>;

const RECORD_SEPARATOR: u8 = 0x1E;
const GENESIS_SIGNATURE: &str = "0000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000";
const KEY_FILENAME: &str = "audit.key";
const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Auth,
    SecurityViolation,
    ConfigChange,
    SecretOp,
    CommandExec,
    RateLimitDenied,
    BackupOp,
    RestoreOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    #[serde(rename = "correlationID")]
    pub correlation_id: String,
    pub user_identity: String,
    pub event_type: EventType,
    pub subject_ref: String,
    pub details: Value,
    pub signature: String,
}

/// A record before it has been chained and signed.
pub struct PendingRecord {
    pub correlation_id: CorrelationId,
    pub user_identity: String,
    pub event_type: EventType,
    pub subject_ref: String,
    pub details: Value,
}

#[derive(Serialize)]
struct SignableRecord<'a> {
    timestamp: &'a str,
    #[serde(rename = "correlationID")]
    correlation_id: &'a str,
    user_identity: &'a str,
    event_type: EventType,
    subject_ref: &'a str,
    details: &'a Value,
}

pub struct AuditLog {
    path: PathBuf,
    dir: PathBuf,
    key: Vec<u8>,
}

impl AuditLog {
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let key = load_or_bootstrap_key(dir)?;
        Ok(Self {
            path: dir.join("audit.log"),
            dir: dir.to_path_buf(),
            key,
        })
    }

    /// Append one record to the chain, masking sensitive detail fields
    /// before they are hashed or written.
    pub fn append(&self, record: PendingRecord) -> io::Result<AuditRecord> {
        let _lock = LockGuard::acquire(&self.dir, "audit")?;

        let previous_signature = self.last_signature_locked()?;
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
        let masked_details = mask_sensitive(&record.details);

        let signable = SignableRecord {
            timestamp: &timestamp,
            correlation_id: record.correlation_id.as_str(),
            user_identity: &record.user_identity,
            event_type: record.event_type,
            subject_ref: &record.subject_ref,
            details: &masked_details,
        };
        let canonical = serde_json::to_vec(&signable).map_err(io::Error::other)?;

        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(io::Error::other)?;
        mac.update(previous_signature.as_bytes());
        mac.update(&[RECORD_SEPARATOR]);
        mac.update(&canonical);
        let signature = hex_encode(&mac.finalize().into_bytes());

        let full = AuditRecord {
            timestamp,
            correlation_id: record.correlation_id.as_str().to_string(),
            user_identity: record.user_identity,
            event_type: record.event_type,
            subject_ref: record.subject_ref,
            details: masked_details,
            signature,
        };

        let mut line = serde_json::to_vec(&full).map_err(io::Error::other)?;
        line.push(b'\n');

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;

        Ok(full)
    }

    fn last_signature_locked(&self) -> io::Result<String> {
        match fs::File::open(&self.path) {
            Ok(file) => {
                let reader = io::BufReader::new(file);
                let mut last = GENESIS_SIGNATURE.to_string();
                for line in reader.lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Ok(record) = serde_json::from_str::<AuditRecord>(&line) {
                        last = record.signature;
                    }
                }
                Ok(last)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(GENESIS_SIGNATURE.to_string()),
            Err(e) => Err(e),
        }
    }

    /// Walk the chain from the start, recomputing each signature. Returns
    /// `Ok(())` if every record matches, or `Err(index)` of the first
    /// record whose signature does not match its recomputed value.
    pub fn verify(&self) -> io::Result<Result<(), usize>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Ok(())),
            Err(e) => return Err(e),
        };
        let reader = io::BufReader::new(file);

        let mut previous_signature = GENESIS_SIGNATURE.to_string();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(_) => return Ok(Err(index)),
            };

            let signable = SignableRecord {
                timestamp: &record.timestamp,
                correlation_id: &record.correlation_id,
                user_identity: &record.user_identity,
                event_type: record.event_type,
                subject_ref: &record.subject_ref,
                details: &record.details,
            };
            let canonical = serde_json::to_vec(&signable).map_err(io::Error::other)?;
            let mut mac = match HmacSha256::new_from_slice(&self.key) {
                Ok(m) => m,
                Err(e) => return Err(io::Error::other(e)),
            };
            mac.update(previous_signature.as_bytes());
            mac.update(&[RECORD_SEPARATOR]);
            mac.update(&canonical);
            let expected = hex_encode(&mac.finalize().into_bytes());

            if expected != record.signature {
                return Ok(Err(index));
            }
            previous_signature = record.signature;
        }
        Ok(Ok(()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Bootstrap a 32-byte operator-held HMAC key once, stored owner-only
/// Log rotation is out of scope for this design.
fn load_or_bootstrap_key(dir: &Path) -> io::Result<Vec<u8>> {
    let key_path = dir.join(KEY_FILENAME);
    match fs::read(&key_path) {
        Ok(bytes) if bytes.len() == KEY_LEN => Ok(bytes),
        _ => {
            use rand::RngCore;
            let mut key = vec![0u8; KEY_LEN];
            rand::rng().fill_bytes(&mut key);

            let mut options = OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&key_path)?;
            file.write_all(&key)?;
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(correlation: &str, subject: &str) -> PendingRecord {
        PendingRecord {
            correlation_id: CorrelationId::parse(correlation).unwrap(),
            user_identity: "user-hash".to_string(),
            event_type: EventType::CommandExec,
            subject_ref: subject.to_string(),
            details: serde_json::json!({ "token": "abcdefghijklmnop" }),
        }
    }

    #[test]
    fn verify_succeeds_on_untampered_log() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        log.append(sample("corr-1", "exec")).unwrap();
        log.append(sample("corr-2", "heal")).unwrap();
        log.append(sample("corr-3", "prune")).unwrap();
        assert_eq!(log.verify().unwrap(), Ok(()));
    }

    #[test]
    fn tampering_with_a_record_flips_verification_at_that_index() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        log.append(sample("corr-1", "exec")).unwrap();
        log.append(sample("corr-2", "heal")).unwrap();
        log.append(sample("corr-3", "prune")).unwrap();

        let path = dir.path().join("audit.log");
        let contents = fs::read_to_string(&path).unwrap();
        let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
        let mut record: AuditRecord = serde_json::from_str(&lines[1]).unwrap();
        record.subject_ref = "tampered".to_string();
        lines[1] = serde_json::to_string(&record).unwrap();
        fs::write(&path, lines.join("\n") + "\n").unwrap();

        assert_eq!(log.verify().unwrap(), Err(1));
    }

    #[test]
    fn sensitive_details_are_masked_before_signing() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path()).unwrap();
        let record = log.append(sample("corr-1", "exec")).unwrap();
        assert_ne!(record.details["token"], "abcdefghijklmnop");
    }

    #[test]
    fn key_is_bootstrapped_once_and_reused() {
        let dir = tempdir().unwrap();
        let log1 = AuditLog::open(dir.path()).unwrap();
        log1.append(sample("corr-1", "exec")).unwrap();
        drop(log1);

        let log2 = AuditLog::open(dir.path()).unwrap();
        assert_eq!(log2.verify().unwrap(), Ok(()));
    }
}
