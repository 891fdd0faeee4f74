use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::event::{Event, EventId};
use crate::settings::ReminderSettings;

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub events_path: PathBuf,
    pub settings_path: PathBuf,
    pub alerts_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let events_path = data_dir.join("events.data");
        let settings_path = data_dir.join("settings.json");
        let alerts_path = data_dir.join("alerts.data");

        if !events_path.exists() {
            fs::write(&events_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            events = %events_path.display(),
            settings = %settings_path.display(),
            alerts = %alerts_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            events_path,
            settings_path,
            alerts_path,
        })
    }

    /// Every readable event. A line that does not parse is logged and left
    /// out; the next save drops it from the file.
    #[tracing::instrument(skip(self))]
    pub fn load_events(&self) -> anyhow::Result<Vec<Event>> {
        load_jsonl(&self.events_path).context("failed to load events.data")
    }

    #[tracing::instrument(skip(self, events))]
    pub fn save_events(&self, events: &[Event]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.events_path, events).context("failed to save events.data")
    }

    #[tracing::instrument(skip(self, events, event), fields(id = %event.id))]
    pub fn add_event(&self, mut events: Vec<Event>, event: Event) -> anyhow::Result<Vec<Event>> {
        events.push(event);
        events.sort_by_key(|e| e.created);
        self.save_events(&events)?;
        Ok(events)
    }

    /// Finds the single event whose id starts with `prefix` (hyphens ignored).
    pub fn find_event<'a>(&self, events: &'a [Event], prefix: &str) -> anyhow::Result<&'a Event> {
        let wanted = prefix.trim().replace('-', "").to_ascii_lowercase();
        if wanted.is_empty() {
            return Err(anyhow!("event id prefix cannot be empty"));
        }

        let mut matches = events
            .iter()
            .filter(|e| e.id.simple().to_string().starts_with(&wanted));
        let first = matches
            .next()
            .ok_or_else(|| anyhow!("no event matches id {prefix}"))?;
        if matches.next().is_some() {
            return Err(anyhow!("event id {prefix} is ambiguous; use more characters"));
        }
        Ok(first)
    }

    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn remove_event(&self, id: EventId) -> anyhow::Result<Event> {
        let mut events = self.load_events()?;
        let idx = events
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| anyhow!("event not found: {id}"))?;
        let removed = events.remove(idx);
        self.save_events(&events)?;
        Ok(removed)
    }

    /// Stored settings, or `fallback` when none have been saved yet.
    #[tracing::instrument(skip(self, fallback))]
    pub fn load_settings(&self, fallback: ReminderSettings) -> anyhow::Result<ReminderSettings> {
        if !self.settings_path.exists() {
            debug!("no stored settings; using configured defaults");
            return Ok(fallback);
        }
        let raw = fs::read_to_string(&self.settings_path)
            .with_context(|| format!("failed reading {}", self.settings_path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing {}", self.settings_path.display()))
    }

    #[tracing::instrument(skip(self, settings))]
    pub fn save_settings(&self, settings: &ReminderSettings) -> anyhow::Result<()> {
        let dir = self.settings_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, settings)?;
        writeln!(temp)?;
        temp.flush()?;
        temp.persist(&self.settings_path).map_err(|err| {
            anyhow!(
                "failed to persist {}: {}",
                self.settings_path.display(),
                err
            )
        })?;
        Ok(())
    }
}

#[tracing::instrument(skip(path))]
pub(crate) fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    if !path.exists() {
        return Ok(vec![]);
    }
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    let mut skipped = 0_usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(trimmed) {
            Ok(item) => out.push(item),
            Err(err) => {
                warn!(
                    file = %path.display(),
                    line = idx + 1,
                    error = %err,
                    "skipping unreadable record"
                );
                skipped += 1;
            }
        }
    }

    debug!(count = out.len(), skipped, "loaded records from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, items))]
pub(crate) fn save_jsonl_atomic<T: Serialize>(path: &Path, items: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = items.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for item in items {
        let serialized = serde_json::to_string(item)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}
