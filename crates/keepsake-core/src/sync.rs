use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::delivery::{DeliveryCapability, PendingAlert};
use crate::event::Event;
use crate::planner::{SchedulingDirective, plan};
use crate::settings::ReminderSettings;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub cleared: bool,
    pub scheduled: usize,
    pub skipped_elapsed: usize,
    /// `(identifier, error message)` per alert the delivery side refused.
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.cleared && self.failed.is_empty()
    }
}

/// Replaces the live schedule with `directives`.
///
/// Always clears first, then registers each directive whose fire time is
/// still after `now`. Individual registration failures are logged and
/// counted; they never abort the batch.
#[instrument(skip(directives, delivery), fields(directives = directives.len()))]
pub fn sync<D>(
    directives: &[SchedulingDirective],
    delivery: &mut D,
    now: DateTime<Utc>,
) -> SyncReport
where
    D: DeliveryCapability + ?Sized,
{
    let mut report = SyncReport::default();

    match delivery.clear_all() {
        Ok(()) => report.cleared = true,
        Err(err) => {
            warn!(error = %err, "failed to clear pending alerts; refilling over them");
        }
    }

    if directives.is_empty() {
        debug!("nothing to schedule");
        return report;
    }

    for directive in directives {
        if directive.fire_at <= now {
            debug!(
                identifier = %directive.identifier,
                fire_at = %directive.fire_at,
                "directive elapsed before sync; skipping"
            );
            report.skipped_elapsed += 1;
            continue;
        }

        match delivery.schedule(PendingAlert::from(directive)) {
            Ok(()) => report.scheduled += 1,
            Err(err) => {
                warn!(
                    identifier = %directive.identifier,
                    error = %err,
                    "failed to schedule alert"
                );
                report
                    .failed
                    .push((directive.identifier.clone(), err.to_string()));
            }
        }
    }

    info!(
        scheduled = report.scheduled,
        skipped_elapsed = report.skipped_elapsed,
        failed = report.failed.len(),
        "synchronized alerts"
    );
    report
}

/// Owns a delivery capability and runs full plan + sync cycles against it.
///
/// Each cycle holds the lock from clear to the last fill, so overlapping
/// triggers run one after another instead of interleaving.
#[derive(Debug)]
pub struct Rescheduler<D> {
    delivery: Mutex<D>,
    tz: Tz,
}

impl<D: DeliveryCapability> Rescheduler<D> {
    pub fn new(delivery: D, tz: Tz) -> Self {
        Self {
            delivery: Mutex::new(delivery),
            tz,
        }
    }

    pub fn timezone(&self) -> &Tz {
        &self.tz
    }

    #[instrument(skip(self, events, settings), fields(events = events.len()))]
    pub fn reschedule(
        &self,
        events: &[Event],
        settings: &ReminderSettings,
        now: DateTime<Utc>,
    ) -> SyncReport {
        let mut delivery = self.lock();
        let directives = plan(events, settings, now, &self.tz);
        sync(&directives, &mut *delivery, now)
    }

    /// Runs `f` against the delivery capability between cycles.
    pub fn with_delivery<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let mut delivery = self.lock();
        f(&mut *delivery)
    }

    pub fn into_inner(self) -> D {
        self.delivery
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, D> {
        // The next cycle fully replaces whatever a panicked cycle left.
        self.delivery.lock().unwrap_or_else(|poisoned| {
            warn!("previous reschedule panicked; recovering delivery lock");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{Rescheduler, sync};
    use crate::delivery::{DeliveryCapability, DeliveryError, MemoryDelivery, PendingAlert};
    use crate::event::Event;
    use crate::planner::plan;
    use crate::settings::{ReminderOffset, ReminderSettings};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid instant")
    }

    fn settings() -> ReminderSettings {
        ReminderSettings {
            enabled: true,
            offsets: BTreeSet::from([
                ReminderOffset::SEVEN_DAYS,
                ReminderOffset::ONE_DAY,
                ReminderOffset::DAY_OF,
            ]),
            quiet_hours: None,
        }
    }

    fn events() -> Vec<Event> {
        let created = at(2025, 1, 1, 0, 0);
        vec![
            Event::new("Mum", at(1960, 3, 15, 0, 0), true, created),
            Event::new("Dad", at(1958, 4, 2, 0, 0), true, created),
        ]
    }

    /// Accepts alerts but refuses to clear them.
    struct StuckDelivery {
        inner: MemoryDelivery,
    }

    impl DeliveryCapability for StuckDelivery {
        fn clear_all(&mut self) -> Result<(), DeliveryError> {
            Err(DeliveryError::NotAuthorized)
        }

        fn schedule(&mut self, alert: PendingAlert) -> Result<(), DeliveryError> {
            self.inner.schedule(alert)
        }

        fn pending(&self) -> Result<Vec<PendingAlert>, DeliveryError> {
            self.inner.pending()
        }
    }

    #[test]
    fn failed_clear_still_fills() {
        let now = at(2025, 3, 1, 0, 0);
        let mut delivery = StuckDelivery {
            inner: MemoryDelivery::new(),
        };
        let directives = plan(&events(), &settings(), now, &chrono_tz::UTC);
        let report = sync(&directives, &mut delivery, now);

        assert!(!report.cleared);
        assert!(!report.is_clean());
        assert!(report.failed.is_empty());
        assert_eq!(report.scheduled, directives.len());
        for directive in &directives {
            assert!(delivery.inner.get(&directive.identifier).is_some());
        }
    }

    #[test]
    fn sync_clears_before_filling() {
        let now = at(2025, 3, 1, 0, 0);
        let mut delivery = MemoryDelivery::new();
        delivery
            .schedule(PendingAlert {
                identifier: "stale-7d".to_string(),
                fire_at: at(2025, 5, 1, 9, 0),
                title: "old".to_string(),
                body: "old".to_string(),
            })
            .expect("seed stale alert");

        let directives = plan(&events(), &settings(), now, &chrono_tz::UTC);
        let report = sync(&directives, &mut delivery, now);

        assert!(report.is_clean());
        assert_eq!(report.scheduled, 6);
        assert!(delivery.get("stale-7d").is_none());
        assert_eq!(delivery.len(), 6);
    }

    #[test]
    fn empty_directives_still_clear() {
        let mut delivery = MemoryDelivery::new();
        let directives = plan(&events(), &settings(), at(2025, 3, 1, 0, 0), &chrono_tz::UTC);
        sync(&directives, &mut delivery, at(2025, 3, 1, 0, 0));
        assert_eq!(delivery.len(), 6);

        let mut disabled = settings();
        disabled.enabled = false;
        let none = plan(&events(), &disabled, at(2025, 3, 1, 0, 0), &chrono_tz::UTC);
        let report = sync(&none, &mut delivery, at(2025, 3, 1, 0, 0));
        assert!(report.cleared);
        assert!(delivery.is_empty());
    }

    #[test]
    fn failures_do_not_abort_the_batch() {
        let now = at(2025, 3, 1, 0, 0);
        let mut delivery = MemoryDelivery::new().with_capacity(4);
        let directives = plan(&events(), &settings(), now, &chrono_tz::UTC);
        let report = sync(&directives, &mut delivery, now);

        assert_eq!(report.scheduled, 4);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.is_clean());
        assert_eq!(delivery.len(), 4);
    }

    #[test]
    fn directives_elapsed_by_sync_time_are_skipped() {
        let planned_at = at(2025, 3, 1, 0, 0);
        let directives = plan(&events(), &settings(), planned_at, &chrono_tz::UTC);
        let mut delivery = MemoryDelivery::new();
        let report = sync(&directives, &mut delivery, at(2025, 3, 10, 0, 0));
        assert_eq!(report.skipped_elapsed, 1);
        assert_eq!(report.scheduled, 5);
    }

    #[test]
    fn rescheduling_twice_is_idempotent() {
        let now = at(2025, 3, 1, 0, 0);
        let events = events();
        let rescheduler = Rescheduler::new(MemoryDelivery::new(), chrono_tz::UTC);

        rescheduler.reschedule(&events, &settings(), now);
        let first = rescheduler.with_delivery(|d| d.pending().expect("pending"));
        rescheduler.reschedule(&events, &settings(), now);
        let second = rescheduler.with_delivery(|d| d.pending().expect("pending"));

        assert_eq!(first, second);
        assert_eq!(rescheduler.into_inner().clear_count(), 2);
    }

    #[test]
    fn concurrent_triggers_serialize() {
        let now = at(2025, 3, 1, 0, 0);
        let events = Arc::new(events());
        let rescheduler = Arc::new(Rescheduler::new(MemoryDelivery::new(), chrono_tz::UTC));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rescheduler = Arc::clone(&rescheduler);
                let events = Arc::clone(&events);
                thread::spawn(move || rescheduler.reschedule(&events, &settings(), now))
            })
            .collect();
        for handle in handles {
            let report = handle.join().expect("reschedule thread");
            assert_eq!(report.scheduled, 6);
        }

        let pending = rescheduler.with_delivery(|d| d.pending().expect("pending"));
        assert_eq!(pending.len(), 6);
    }
}
