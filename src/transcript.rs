use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL log of one shell session
pub struct Transcript {
    pub path: PathBuf,
    session_id: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    session_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Transcript {
    pub fn new(path: &Path, session_id: &str) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            session_id: session_id.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            session_id: &self.session_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn session_start(
        &mut self,
        backend_url: &str,
        socket_url: &str,
        user: Option<&str>,
    ) -> Result<()> {
        self.log(
            "session_start",
            json!({
                "backend_url": backend_url,
                "socket_url": socket_url,
                "user": user,
            }),
        )
    }

    pub fn login(&mut self, identifier: &str, ok: bool, error: Option<&str>) -> Result<()> {
        self.log(
            "login",
            json!({ "identifier": identifier, "ok": ok, "error": error }),
        )
    }

    pub fn logout(&mut self, ok: bool, error: Option<&str>) -> Result<()> {
        self.log("logout", json!({ "ok": ok, "error": error }))
    }

    /// Log an incoming request count fetch
    pub fn request_count(
        &mut self,
        user: &str,
        count: Option<usize>,
        error: Option<&str>,
    ) -> Result<()> {
        self.log(
            "request_count",
            json!({ "user": user, "count": count, "error": error }),
        )
    }

    pub fn search(&mut self, query: &str, outcome: &str, results: usize) -> Result<()> {
        self.log(
            "search",
            json!({ "query": query, "outcome": outcome, "results": results }),
        )
    }

    pub fn socket_state(&mut self, state: &str) -> Result<()> {
        self.log("socket_state", json!({ "state": state }))
    }

    /// Log an event surfaced by the realtime channel
    pub fn socket_event(&mut self, kind: &str, detail: &str) -> Result<()> {
        self.log("socket_event", json!({ "kind": kind, "detail": detail }))
    }

    pub fn diagnostic(&mut self, source: &str, message: &str) -> Result<()> {
        self.log(
            "diagnostic",
            json!({ "source": source, "message": message }),
        )
    }
}
