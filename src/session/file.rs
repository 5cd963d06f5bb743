//! Append-only session log on disk
//!
//! One JSON record per line. Each append is a single `write_all` of a full
//! line on a file opened in append mode, followed by `sync_data`, so readers
//! see either the whole line or nothing. A crash can still leave a
//! half-written tail; replay skips it, and the next append starts on a new
//! line so the good record is not glued onto the damaged one. Lines that are
//! not valid UTF-8 or JSON are skipped one at a time, never the rest of the log.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use super::{attach, LoadSummary, Session, SessionStore};
use crate::registry::{is_skippable, DeviceRegistry, Eui64};

#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    current: HashMap<Eui64, Session>,
    /// The log does not end in a newline (torn final write). `None` until
    /// the tail has been inspected.
    torn_tail: Option<bool>,
}

impl FileSessionStore {
    /// Open a store at `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: HashMap::new(),
            torn_tail: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ends_without_newline(file: &mut File) -> std::io::Result<bool> {
        let len = file.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] != b'\n')
    }

    /// Whether the next append must first terminate a torn line.
    fn tail_is_torn(&mut self) -> anyhow::Result<bool> {
        if let Some(torn) = self.torn_tail {
            return Ok(torn);
        }
        let torn = match File::open(&self.path) {
            Ok(mut file) => Self::ends_without_newline(&mut file)
                .with_context(|| format!("failed to inspect session log {:?}", self.path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open session log {:?}", self.path))
            }
        };
        self.torn_tail = Some(torn);
        Ok(torn)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&mut self, registry: &DeviceRegistry) -> anyhow::Result<LoadSummary> {
        let mut summary = LoadSummary::default();
        self.current.clear();

        if !self.path.exists() {
            info!("No session log at {:?}, starting without sessions", self.path);
            self.torn_tail = Some(false);
            return Ok(summary);
        }

        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open session log {:?}", self.path))?;
        self.torn_tail = Some(
            Self::ends_without_newline(&mut file)
                .with_context(|| format!("failed to inspect session log {:?}", self.path))?,
        );
        file.seek(SeekFrom::Start(0))?;

        for (idx, raw) in BufReader::new(file).split(b'\n').enumerate() {
            let raw = raw.with_context(|| format!("failed to read session log {:?}", self.path))?;
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!("Skipping undecodable session record on line {}: {}", idx + 1, e);
                    summary.skipped += 1;
                    continue;
                }
            };
            if is_skippable(line) {
                continue;
            }

            match serde_json::from_str::<Session>(line) {
                Ok(session) => attach(&mut self.current, registry, session, &mut summary),
                Err(e) => {
                    warn!("Skipping bad session record on line {}: {}", idx + 1, e);
                    summary.skipped += 1;
                }
            }
        }

        info!(
            "Replayed session log {:?}: {} attached, {} orphaned, {} skipped",
            self.path, summary.attached, summary.orphaned, summary.skipped
        );
        Ok(summary)
    }

    fn append(&mut self, session: &Session) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(session).context("failed to encode session record")?;
        line.push('\n');
        if self.tail_is_torn()? {
            line.insert(0, '\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open session log {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to session log {:?}", self.path))?;
        file.sync_data()
            .with_context(|| format!("failed to sync session log {:?}", self.path))?;

        self.torn_tail = Some(false);
        self.current.insert(session.dev_eui, session.clone());
        Ok(())
    }

    fn lookup(&self, dev_eui: &Eui64) -> Option<&Session> {
        self.current.get(dev_eui)
    }
}
