//! Session archive - appends evicted closed sessions to a JSONL file
//!
//! One JSON object per line, with the site id attached. Written by the
//! retention task after `prune_closed`, never by the engine itself.

use crate::domain::session::ParkingSession;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

pub struct SessionArchive {
    file_path: String,
    site_id: String,
}

impl SessionArchive {
    pub fn new(file_path: &str, site_id: &str) -> Self {
        info!(file_path = %file_path, "session_archive_initialized");
        Self { file_path: file_path.to_string(), site_id: site_id.to_string() }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Append one session. Returns true if it was written.
    pub fn write_session(&self, session: &ParkingSession) -> bool {
        let json = session.to_json_with_site(&self.site_id);

        match self.append_line(&json) {
            Ok(()) => {
                debug!(session_id = %session.id, plate = %session.license_plate, "session_archived");
                true
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "session_archive_failed");
                false
            }
        }
    }

    /// Append a batch. Sessions that could not be written are handed back
    /// so the caller can retry them.
    pub fn write_sessions(&self, sessions: Vec<ParkingSession>) -> Vec<ParkingSession> {
        sessions.into_iter().filter(|s| !self.write_session(s)).collect()
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::Charge;
    use crate::domain::types::{FloorId, VehicleType};
    use chrono::{Duration, TimeZone, Utc};
    use std::fs;
    use tempfile::tempdir;

    fn closed_session(plate: &str) -> ParkingSession {
        let entry = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        let mut s = ParkingSession::new(plate, VehicleType::Car, FloorId(1), 3, entry);
        s.close(
            entry + Duration::minutes(90),
            Charge { duration_minutes: 90, billable_hours: 2, fee: 20_000 },
            None,
        );
        s
    }

    #[test]
    fn test_write_session() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sessions.jsonl");
        let archive = SessionArchive::new(file_path.to_str().unwrap(), "site-a");

        let session = closed_session("51F-12345");
        assert!(archive.write_session(&session));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["site"], "site-a");
        assert_eq!(parsed["license_plate"], "51F-12345");
        assert_eq!(parsed["state"], "closed");
        assert_eq!(parsed["fee"], 20_000);
    }

    #[test]
    fn test_archived_line_deserializes_back() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sessions.jsonl");
        let archive = SessionArchive::new(file_path.to_str().unwrap(), "site-a");
        let session = closed_session("A");
        archive.write_session(&session);

        let content = fs::read_to_string(&file_path).unwrap();
        let restored: ParkingSession = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_write_sessions_batch_appends() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sessions.jsonl");
        fs::write(&file_path, "{\"existing\":\"data\"}\n").unwrap();

        let archive = SessionArchive::new(file_path.to_str().unwrap(), "site-a");
        let sessions: Vec<ParkingSession> =
            ["A", "B", "C"].iter().map(|p| closed_session(p)).collect();
        assert!(archive.write_sessions(sessions).is_empty());

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("existing"));
    }

    #[test]
    fn test_failed_writes_are_handed_back() {
        let dir = tempdir().unwrap();
        // A regular file where a directory is expected makes every append fail
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let archive = SessionArchive::new(blocker.join("sessions.jsonl").to_str().unwrap(), "site-a");

        let sessions = vec![closed_session("A"), closed_session("B")];
        let pending = archive.write_sessions(sessions.clone());
        assert_eq!(pending, sessions);

        let retry = SessionArchive::new(dir.path().join("sessions.jsonl").to_str().unwrap(), "site-a");
        assert!(retry.write_sessions(pending).is_empty());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("sessions.jsonl");
        let archive = SessionArchive::new(nested.to_str().unwrap(), "site-a");

        assert!(archive.write_session(&closed_session("A")));
        assert!(nested.exists());
    }
}
