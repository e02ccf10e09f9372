//! Persistent store: atomic read/update/write of small
//! owner-only JSON state files. Every reader observes either the previous
//! complete file or the new complete file, never a partial write; a failed
//! `transform` leaves prior state untouched.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;

use fs2::FileExt;
use masterclaw_protocol::McError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::safe::find_dangerous_keys;
use crate::safe::strip_dangerous_keys_pub;

/// Generous but bounded: a 10 MiB/64-deep cap so a
/// corrupted or hostile state file cannot exhaust memory or blow the stack
/// during parsing.
const MAX_STATE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_JSON_DEPTH: usize = 64;

/// Locks older than this are assumed abandoned by a crashed process and are
/// broken rather than waited on forever.
const STALE_LOCK_AGE: Duration = Duration::from_secs(5 * 60);

/// Resolves `$MC_STATE_DIR` (default `~/.masterclaw`), creating it with
/// owner-only access (`0o700`) if it does not exist.
#[derive(Debug, Clone)]
pub struct StateDir(PathBuf);

impl StateDir {
    pub fn resolve() -> io::Result<Self> {
        let base = match std::env::var_os("MC_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| io::Error::other("could not resolve home directory"))?
                .join(".masterclaw"),
        };
        fs::create_dir_all(&base)?;
        set_owner_only_dir(&base)?;
        Ok(Self(base))
    }

    /// Build a `StateDir` directly over an already-existing directory,
    /// bypassing `$MC_STATE_DIR` resolution. Used by tests that need an
    /// isolated scratch directory per case rather than sharing one process's
    /// environment variable.
    pub fn at(dir: PathBuf) -> Self {
        Self(dir)
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.0.join(filename)
    }

    pub fn root(&self) -> &Path {
        &self.0
    }
}

#[cfg(unix)]
fn set_owner_only_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(dir)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(dir, perms)
}

#[cfg(not(unix))]
fn set_owner_only_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_file(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_owner_only_file(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn mode_is_owner_only(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode() & 0o777;
    Ok(mode == 0o600)
}

#[cfg(not(unix))]
fn mode_is_owner_only(_path: &Path) -> io::Result<bool> {
    Ok(true)
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Read, parse, and validate a JSON state file. Returns `default()` when the
/// file is absent, oversized, too deeply nested, structurally corrupt, or
/// fails the supplied `validator`. Corruption never panics or propagates
/// past this function — callers (L8's admission check, L2's config loader)
/// decide whether the reset itself is audit-worthy.
pub fn load_state<T, F>(path: &Path, validator: F) -> T
where
    T: DeserializeOwned + Default,
    F: Fn(&Value) -> Result<(), McError>,
{
    match try_load_state(path, &validator) {
        Ok(value) => value,
        Err(reason) => {
            tracing::warn!(
                event = "security",
                path = %path.display(),
                reason = %reason,
                "state file failed validation; falling back to default"
            );
            T::default()
        }
    }
}

fn try_load_state<T, F>(path: &Path, validator: &F) -> Result<T, String>
where
    T: DeserializeOwned + Default,
    F: Fn(&Value) -> Result<(), McError>,
{
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(format!("stat failed: {e}")),
    };
    if metadata.len() > MAX_STATE_BYTES {
        return Err("state file exceeds maximum size".to_string());
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("read failed: {e}"))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| format!("invalid json: {e}"))?;
    if json_depth(&value) > MAX_JSON_DEPTH {
        return Err("state file exceeds maximum nesting depth".to_string());
    }

    validator(&value).map_err(|e| e.message)?;

    let sanitized = strip_dangerous_keys_pub(&value);
    serde_json::from_value(sanitized).map_err(|e| format!("does not match schema: {e}"))
}

/// Write `value` to `path` atomically: serialize to a temp file in the same
/// directory, fsync, rename over the destination, then verify the final
/// mode is `0o600`.
pub fn save_state<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("state path has no parent directory"))?;
    fs::create_dir_all(parent)?;
    set_owner_only_dir(parent)?;

    let json = serde_json::to_value(value).map_err(io::Error::other)?;
    let sanitized = strip_dangerous_keys_pub(&json);
    let serialized = serde_json::to_vec_pretty(&sanitized).map_err(io::Error::other)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        std::process::id()
    ));

    {
        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&tmp_path)?;
        use io::Write;
        file.write_all(&serialized)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    set_owner_only_file(path)?;

    if !mode_is_owner_only(path)? {
        tracing::warn!(
            event = "security",
            path = %path.display(),
            "state file permission is not owner-only after write"
        );
    }
    Ok(())
}

/// Advisory lock over an entire state directory, covering a single
/// `atomic_update`. Stale locks ([`STALE_LOCK_AGE`] old) are broken rather
/// than waited on.
pub struct LockGuard {
    _file: File,
    lock_path: PathBuf,
}

impl LockGuard {
    pub fn acquire(dir: &Path, name: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let lock_path = dir.join(format!(".{name}.lock"));

        if let Ok(metadata) = fs::metadata(&lock_path) {
            if let Ok(modified) = metadata.modified() {
                if SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default()
                    > STALE_LOCK_AGE
                {
                    tracing::warn!(
                        event = "security",
                        lock = %lock_path.display(),
                        "breaking stale advisory lock"
                    );
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file, lock_path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._file);
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// `load -> transform (pure) -> save`, serialized per-directory by an
/// advisory lock so concurrent invocations of the same command never race
/// each other's read-modify-write cycle.
pub fn atomic_update<T, F, V, U>(
    dir: &Path,
    lock_name: &str,
    path: &Path,
    validator: V,
    transform: U,
) -> Result<T, McError>
where
    T: Serialize + DeserializeOwned + Default + Clone,
    V: Fn(&Value) -> Result<(), McError>,
    U: FnOnce(T) -> Result<T, McError>,
{
    let _lock = LockGuard::acquire(dir, lock_name)
        .map_err(|e| McError::concurrency(format!("failed to acquire state lock: {e}")))?;

    let current: T = load_state(path, validator);
    let updated = transform(current)?;
    save_state(path, &updated).map_err(|e| McError::generic(format!("failed to persist state: {e}")))?;
    Ok(updated)
}

/// Reports which dangerous keys, if any, were present in a raw value before
/// sanitization — used by config loading to decide whether a
/// prototype-pollution-attempt audit record is warranted.
pub fn dangerous_keys_in(value: &Value) -> std::collections::BTreeSet<String> {
    find_dangerous_keys(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Default, Clone, Serialize, serde::Deserialize, PartialEq)]
    struct Sample {
        count: u32,
    }

    fn no_op_validator(_: &Value) -> Result<(), McError> {
        Ok(())
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let value = Sample { count: 7 };
        save_state(&path, &value).unwrap();
        let loaded: Sample = load_state(&path, no_op_validator);
        assert_eq!(loaded, value);
    }

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Sample = load_state(&path, no_op_validator);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn load_corrupt_json_returns_default_without_panicking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not valid json").unwrap();
        let loaded: Sample = load_state(&path, no_op_validator);
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    #[cfg(unix)]
    fn save_state_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &Sample { count: 1 }).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn atomic_update_persists_transform_result() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let result: Sample = atomic_update(dir.path(), "sample", &path, no_op_validator, |mut s: Sample| {
            s.count += 1;
            Ok(s)
        })
        .unwrap();
        assert_eq!(result.count, 1);
        let result2: Sample = atomic_update(dir.path(), "sample", &path, no_op_validator, |mut s: Sample| {
            s.count += 1;
            Ok(s)
        })
        .unwrap();
        assert_eq!(result2.count, 2);
    }

    #[test]
    fn atomic_update_leaves_prior_state_on_failed_transform() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let _: Sample = atomic_update(dir.path(), "sample", &path, no_op_validator, |mut s: Sample| {
            s.count = 5;
            Ok(s)
        })
        .unwrap();

        let err = atomic_update::<Sample, _, _, _>(dir.path(), "sample", &path, no_op_validator, |_| {
            Err(McError::validation("boom"))
        });
        assert!(err.is_err());

        let after: Sample = load_state(&path, no_op_validator);
        assert_eq!(after.count, 5);
    }

    #[test]
    fn stale_lock_is_broken_rather_than_awaited() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join(".sample.lock");
        fs::write(&lock_path, b"").unwrap();
        let old = SystemTime::now() - Duration::from_secs(10 * 60);
        let old_filetime = filetime_from_system_time(old);
        filetime_set(&lock_path, old_filetime);

        let guard = LockGuard::acquire(dir.path(), "sample");
        assert!(guard.is_ok());
    }

    fn filetime_from_system_time(t: SystemTime) -> SystemTime {
        t
    }

    fn filetime_set(path: &Path, time: SystemTime) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        let _ = file.set_modified(time);
    }
}
