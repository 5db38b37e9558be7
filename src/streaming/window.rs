use crate::config::StreamingConfig;
use crate::metrics::StreamingMetrics;
use crate::types::{ActiveUserWindow, ActivityEvent};
use chrono::{DateTime, NaiveDateTime, TimeDelta};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// What happened to one observed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Assigned to an open window; `new_user` when the user was not yet
    /// counted in that window
    Accepted { new_user: bool },
    /// Its window had already closed; the event was dropped
    Late,
}

/// Distinct users per tumbling window, closed by a watermark.
///
/// Windows are aligned to the Unix epoch. The watermark is the latest event
/// time seen minus the allowed lateness, and only moves forward. A window is
/// closed once `end <= watermark`; closed windows are emitted once and
/// forgotten, so only windows at or after the watermark stay in memory.
#[derive(Debug)]
pub struct ActiveUserCounter {
    size_us: i64,
    lateness: TimeDelta,
    windows: BTreeMap<i64, HashSet<String>>,
    watermark: Option<NaiveDateTime>,
    accepted: u64,
    late: u64,
    emitted: u64,
}

fn to_micros(t: NaiveDateTime) -> i64 {
    t.and_utc().timestamp_micros()
}

fn from_micros(us: i64) -> NaiveDateTime {
    DateTime::from_timestamp_micros(us)
        .map(|d| d.naive_utc())
        .unwrap_or(NaiveDateTime::MIN)
}

impl ActiveUserCounter {
    pub fn new(window: Duration, allowed_lateness: Duration) -> Self {
        let size_us = i64::try_from(window.as_micros()).unwrap_or(i64::MAX).max(1);
        Self {
            size_us,
            lateness: TimeDelta::from_std(allowed_lateness).unwrap_or(TimeDelta::MAX),
            windows: BTreeMap::new(),
            watermark: None,
            accepted: 0,
            late: 0,
            emitted: 0,
        }
    }

    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(
            Duration::from_secs(config.window_seconds),
            Duration::from_secs(config.allowed_lateness_seconds),
        )
    }

    fn window_start(&self, t: NaiveDateTime) -> i64 {
        let us = to_micros(t);
        us - us.rem_euclid(self.size_us)
    }

    fn window_end(&self, start: i64) -> i64 {
        start.saturating_add(self.size_us)
    }

    fn is_closed(&self, start: i64) -> bool {
        self.watermark
            .is_some_and(|w| self.window_end(start) <= to_micros(w))
    }

    /// Assign one event to its window and move the watermark.
    pub fn observe(&mut self, event: ActivityEvent) -> Observation {
        let start = self.window_start(event.event_time);
        if self.is_closed(start) {
            self.late += 1;
            StreamingMetrics::record_event_late();
            warn!(
                user_id = %event.user_id,
                event_time = %event.event_time,
                watermark = ?self.watermark,
                "Dropping late event for closed window"
            );
            return Observation::Late;
        }

        let event_time = event.event_time;
        let new_user = self.windows.entry(start).or_default().insert(event.user_id);
        self.accepted += 1;
        StreamingMetrics::record_event_accepted();

        if let Some(candidate) = event_time.checked_sub_signed(self.lateness) {
            self.advance_to(candidate);
        }
        Observation::Accepted { new_user }
    }

    /// Move the watermark forward to `t`; earlier values are ignored.
    pub fn advance_to(&mut self, t: NaiveDateTime) {
        if self.watermark.map_or(true, |w| t > w) {
            self.watermark = Some(t);
        }
    }

    /// Move the watermark to a wall-clock reading, keeping the allowed lateness
    pub fn advance_clock(&mut self, now: NaiveDateTime) {
        if let Some(candidate) = now.checked_sub_signed(self.lateness) {
            self.advance_to(candidate);
        }
    }

    /// Emit and evict every closed window, oldest first.
    pub fn drain_closed(&mut self) -> Vec<ActiveUserWindow> {
        let Some(watermark) = self.watermark else {
            return Vec::new();
        };
        // Windows starting after watermark - size are still open
        let first_open = to_micros(watermark).saturating_sub(self.size_us).saturating_add(1);
        let open = self.windows.split_off(&first_open);
        let closed = std::mem::replace(&mut self.windows, open);
        self.emit(closed)
    }

    /// Emit and evict every open window regardless of the watermark.
    pub fn flush(&mut self) -> Vec<ActiveUserWindow> {
        let all = std::mem::take(&mut self.windows);
        if !all.is_empty() {
            debug!("Flushing {} open window(s)", all.len());
        }
        self.emit(all)
    }

    fn emit(&mut self, windows: BTreeMap<i64, HashSet<String>>) -> Vec<ActiveUserWindow> {
        let emitted: Vec<ActiveUserWindow> = windows
            .into_iter()
            .map(|(start, users)| ActiveUserWindow {
                window_start: from_micros(start),
                window_end: from_micros(self.window_end(start)),
                active_users: users.len() as u64,
            })
            .collect();
        for w in &emitted {
            StreamingMetrics::record_window_emitted(w.active_users);
        }
        self.emitted += emitted.len() as u64;
        StreamingMetrics::record_open_windows(self.windows.len());
        emitted
    }

    pub fn watermark(&self) -> Option<NaiveDateTime> {
        self.watermark
    }

    pub fn open_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn accepted_events(&self) -> u64 {
        self.accepted
    }

    pub fn late_events(&self) -> u64 {
        self.late
    }

    pub fn emitted_windows(&self) -> u64 {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    fn ev(user: &str, t: NaiveDateTime) -> ActivityEvent {
        ActivityEvent {
            user_id: user.to_string(),
            event_time: t,
        }
    }

    fn minute_counter() -> ActiveUserCounter {
        ActiveUserCounter::new(Duration::from_secs(60), Duration::ZERO)
    }

    #[test]
    fn test_distinct_users_per_minute() {
        let mut counter = minute_counter();
        let mut emitted = Vec::new();

        assert_eq!(
            counter.observe(ev("u1", at(0, 0, 10))),
            Observation::Accepted { new_user: true }
        );
        emitted.extend(counter.drain_closed());
        assert_eq!(
            counter.observe(ev("u1", at(0, 0, 50))),
            Observation::Accepted { new_user: false }
        );
        emitted.extend(counter.drain_closed());
        counter.observe(ev("u2", at(0, 1, 5)));
        emitted.extend(counter.drain_closed());

        // The first window closes as soon as 00:01:05 is seen
        assert_eq!(
            emitted,
            vec![ActiveUserWindow {
                window_start: at(0, 0, 0),
                window_end: at(0, 1, 0),
                active_users: 1,
            }]
        );

        emitted.extend(counter.flush());
        assert_eq!(
            emitted[1],
            ActiveUserWindow {
                window_start: at(0, 1, 0),
                window_end: at(0, 2, 0),
                active_users: 1,
            }
        );
        assert_eq!(counter.open_windows(), 0);
    }

    #[test]
    fn test_late_event_dropped() {
        let mut counter = minute_counter();
        counter.observe(ev("u1", at(0, 1, 5)));
        assert!(counter.drain_closed().is_empty());
        assert_eq!(counter.observe(ev("u9", at(0, 0, 30))), Observation::Late);
        assert_eq!(counter.late_events(), 1);

        let flushed = counter.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].active_users, 1);
    }

    #[test]
    fn test_allowed_lateness_keeps_window_open() {
        let mut counter = ActiveUserCounter::new(Duration::from_secs(60), Duration::from_secs(30));
        counter.observe(ev("u1", at(0, 0, 10)));
        counter.observe(ev("u2", at(0, 1, 20)));
        assert!(counter.drain_closed().is_empty());

        // Watermark is 00:00:50, the first window is still open
        assert_eq!(
            counter.observe(ev("u3", at(0, 0, 59))),
            Observation::Accepted { new_user: true }
        );
        counter.observe(ev("u2", at(0, 1, 31)));
        let closed = counter.drain_closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].active_users, 2);
    }

    #[test]
    fn test_window_boundary_belongs_to_next_window() {
        let mut counter = minute_counter();
        counter.observe(ev("u1", at(0, 0, 59)));
        counter.observe(ev("u2", at(0, 1, 0)));
        let closed = counter.drain_closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].window_end, at(0, 1, 0));
        assert_eq!(closed[0].active_users, 1);
    }

    #[test]
    fn test_clock_closes_windows_without_events() {
        let mut counter = minute_counter();
        counter.observe(ev("u1", at(0, 0, 10)));
        counter.observe(ev("u2", at(0, 0, 20)));
        assert!(counter.drain_closed().is_empty());

        counter.advance_clock(at(0, 5, 0));
        let closed = counter.drain_closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].active_users, 2);

        // The watermark never moves backwards
        counter.advance_to(at(0, 0, 0));
        assert_eq!(counter.watermark(), Some(at(0, 5, 0)));
    }

    #[test]
    fn test_working_set_stays_bounded() {
        let mut counter = minute_counter();
        for minute in 0..600u32 {
            let t = at(minute / 60, minute % 60, 30);
            counter.observe(ev("u", t));
            counter.drain_closed();
            assert!(counter.open_windows() <= 1);
        }
        assert_eq!(counter.emitted_windows(), 599);
    }

    #[test]
    fn test_flush_emits_in_window_order() {
        let mut counter = ActiveUserCounter::new(Duration::from_secs(60), Duration::from_secs(3600));
        counter.observe(ev("a", at(0, 3, 0)));
        counter.observe(ev("b", at(0, 1, 0)));
        counter.observe(ev("c", at(0, 2, 0)));
        let starts: Vec<_> = counter.flush().into_iter().map(|w| w.window_start).collect();
        assert_eq!(starts, vec![at(0, 1, 0), at(0, 2, 0), at(0, 3, 0)]);
    }
}
