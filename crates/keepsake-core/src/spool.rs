use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::delivery::{
    DeliveryCapability, DeliveryError, PendingAlert, check_capacity, sorted_by_fire_time,
};

/// File-backed pending-alert store (`alerts.data`, one JSON alert per line).
///
/// Every mutation rewrites the file atomically, so a crash mid-run leaves
/// either the previous or the next schedule, never a torn one.
#[derive(Debug)]
pub struct SpoolDelivery {
    path: PathBuf,
    alerts: BTreeMap<String, PendingAlert>,
    capacity: Option<usize>,
}

impl SpoolDelivery {
    /// Pending-notification cap of the mobile platforms this mirrors.
    pub const DEFAULT_CAPACITY: usize = 64;

    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn open(path: &Path, capacity: Option<usize>) -> Result<Self, DeliveryError> {
        let mut alerts = BTreeMap::new();
        if path.exists() {
            let reader = BufReader::new(fs::File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let alert: PendingAlert = serde_json::from_str(trimmed)?;
                alerts.insert(alert.identifier.clone(), alert);
            }
        }
        debug!(count = alerts.len(), ?capacity, "opened alert spool");

        Ok(Self {
            path: path.to_path_buf(),
            alerts,
            capacity,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), DeliveryError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        for alert in sorted_by_fire_time(&self.alerts) {
            let serialized = serde_json::to_string(&alert)?;
            writeln!(temp, "{serialized}")?;
        }
        temp.flush()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl DeliveryCapability for SpoolDelivery {
    fn clear_all(&mut self) -> Result<(), DeliveryError> {
        info!(removed = self.alerts.len(), "clearing alert spool");
        self.alerts.clear();
        self.persist()
    }

    fn schedule(&mut self, alert: PendingAlert) -> Result<(), DeliveryError> {
        check_capacity(self.capacity, &self.alerts, &alert.identifier)?;
        let identifier = alert.identifier.clone();
        let previous = self.alerts.insert(identifier.clone(), alert);
        if let Err(err) = self.persist() {
            match previous {
                Some(old) => self.alerts.insert(identifier, old),
                None => self.alerts.remove(&identifier),
            };
            return Err(err);
        }
        Ok(())
    }

    fn pending(&self) -> Result<Vec<PendingAlert>, DeliveryError> {
        Ok(sorted_by_fire_time(&self.alerts))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::SpoolDelivery;
    use crate::delivery::{DeliveryCapability, DeliveryError, PendingAlert};

    fn alert(identifier: &str) -> PendingAlert {
        PendingAlert {
            identifier: identifier.to_string(),
            fire_at: Utc
                .with_ymd_and_hms(2025, 3, 8, 9, 0, 0)
                .single()
                .expect("valid instant"),
            title: "Mum's birthday is coming up".to_string(),
            body: "It's in 7 days.".to_string(),
        }
    }

    #[test]
    fn spool_survives_reopen_and_clear() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("alerts.data");

        let mut spool = SpoolDelivery::open(&path, None).expect("open spool");
        spool.schedule(alert("a-7d")).expect("schedule");
        spool.schedule(alert("b-7d")).expect("schedule");

        let reopened = SpoolDelivery::open(&path, None).expect("reopen spool");
        assert_eq!(reopened.pending().expect("pending").len(), 2);

        let mut reopened = reopened;
        reopened.clear_all().expect("clear");
        let after = SpoolDelivery::open(&path, None).expect("reopen after clear");
        assert!(after.pending().expect("pending").is_empty());
    }

    #[test]
    fn spool_enforces_capacity() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("alerts.data");
        let mut spool = SpoolDelivery::open(&path, Some(1)).expect("open spool");
        spool.schedule(alert("a-7d")).expect("first fits");
        let err = spool.schedule(alert("b-7d")).expect_err("over the cap");
        assert!(matches!(err, DeliveryError::CapacityExceeded { limit: 1 }));
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("spool");
        std::fs::create_dir(&dir).expect("spool dir");
        let path = dir.join("alerts.data");

        let mut spool = SpoolDelivery::open(&path, None).expect("open spool");
        spool.schedule(alert("a-7d")).expect("schedule");
        std::fs::remove_dir_all(&dir).expect("remove spool dir");

        let err = spool.schedule(alert("b-7d")).expect_err("no directory to write");
        assert!(matches!(err, DeliveryError::Io(_)));
        let pending = spool.pending().expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identifier, "a-7d");
    }
}
