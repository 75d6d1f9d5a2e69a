//! Run directory shared between a foreground `start` and later CLI calls.
//!
//! Every server a foreground supervisor holds gets a JSON record
//! `<run>/<stem>.json`. Another process asks for a stop by creating
//! `<run>/<stem>.stop`; the supervisor consumes the marker, stops the server
//! and removes the record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a running supervisor publishes about one of its servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: String,
    pub instance_id: Uuid,
    pub pid: Option<u32>,
    /// Process holding the server; a dead supervisor means a stale record.
    pub supervisor_pid: u32,
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct RunDir {
    root: PathBuf,
}

impl RunDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<home>/run`, where home is `home_override` when non-empty, else
    /// `$HOME/.mcp-supervisor`, else `./.mcp-supervisor`.
    pub fn resolve(home_override: &str) -> Self {
        let home = if !home_override.is_empty() {
            PathBuf::from(home_override)
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".mcp-supervisor")
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".mcp-supervisor")
        };
        Self::new(home.join("run"))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn write_record(&self, record: &ServerRecord) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
        // Write then rename so readers never see a half-written record.
        let path = self.record_path(&record.name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)
    }

    /// `Ok(None)` when no supervisor has published `name`.
    pub fn read_record(&self, name: &str) -> io::Result<Option<ServerRecord>> {
        read_json(&self.record_path(name))
    }

    pub fn remove_record(&self, name: &str) -> io::Result<()> {
        remove_if_exists(&self.record_path(name))
    }

    /// All published records, sorted by server name. Unreadable entries are skipped.
    pub fn records(&self) -> io::Result<Vec<ServerRecord>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<ServerRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => tracing::debug!("skipping {}: {err}", path.display()),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    pub fn request_stop(&self, name: &str) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.stop_path(name), b"")
    }

    /// Consume a pending stop request for `name`.
    pub fn take_stop_request(&self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.stop_path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn clear_stop_request(&self, name: &str) -> io::Result<()> {
        remove_if_exists(&self.stop_path(name))
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(name)))
    }

    fn stop_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.stop", file_stem(name)))
    }
}

/// Whether a process with `pid` exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Server names are arbitrary strings; keep `[A-Za-z0-9-]` and hex-escape
/// everything else so distinct names never share a file.
fn file_stem(name: &str) -> String {
    let mut stem = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02x}"));
        }
    }
    stem
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str) -> ServerRecord {
        ServerRecord {
            name: name.to_string(),
            instance_id: Uuid::new_v4(),
            pid: Some(4242),
            supervisor_pid: std::process::id(),
            command: "uvx mcp-server-fetch".to_string(),
        }
    }

    #[test]
    fn resolve_uses_override_home() {
        let run = RunDir::resolve("/srv/mcp");
        assert_eq!(run.path(), Path::new("/srv/mcp/run"));
    }

    #[test]
    fn records_round_trip_and_list_sorted() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path().join("run"));
        assert!(run.records().unwrap().is_empty());

        let fetch = record("fetch");
        run.write_record(&fetch).unwrap();
        run.write_record(&record("brave search")).unwrap();

        assert_eq!(run.read_record("fetch").unwrap(), Some(fetch));
        let names: Vec<_> = run.records().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["brave search", "fetch"]);

        run.remove_record("fetch").unwrap();
        run.remove_record("fetch").unwrap();
        assert_eq!(run.read_record("fetch").unwrap(), None);
    }

    #[test]
    fn corrupt_records_are_invalid_data_and_skipped_in_listing() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path());
        fs::write(tmp.path().join("fetch.json"), "{not json").unwrap();

        let err = run.read_record("fetch").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(run.records().unwrap().is_empty());
    }

    #[test]
    fn stop_requests_are_consumed_once() {
        let tmp = TempDir::new().unwrap();
        let run = RunDir::new(tmp.path());
        assert!(!run.take_stop_request("fetch").unwrap());
        run.request_stop("fetch").unwrap();
        assert!(run.take_stop_request("fetch").unwrap());
        assert!(!run.take_stop_request("fetch").unwrap());
    }

    #[test]
    fn file_stems_do_not_collide() {
        assert_eq!(file_stem("fetch"), "fetch");
        assert_eq!(file_stem("a/b"), "a_2fb");
        assert_ne!(file_stem("a b"), file_stem("a_b"));
    }

    #[cfg(unix)]
    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }
}
