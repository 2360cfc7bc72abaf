//! Recurrence expansion.
//!
//! Expands a structured recurrence rule from an anchor start/end pair into a
//! lazy, ascending sequence of occurrences. The sequence is a pure function
//! of its inputs: constructing a new iterator restarts it, and repeated runs
//! yield identical results.
//!
//! Exceptions, EXDATEs and window filtering are layered on top by the
//! instance resolver; this module only produces the raw candidate set.

use std::collections::VecDeque;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};

use crate::error::{SchedError, SchedResult};
use crate::event::{ByDay, EventTime, Frequency, RecurrenceRule};

/// Default safety cap on candidate iterations. A guard against malformed
/// rules, not a feature: hitting it surfaces [`SchedError::RecurrenceLimitExceeded`].
pub const DEFAULT_RECURRENCE_CAP: u32 = 100_000;

/// One concrete occurrence of a recurring event, carrying the anchor's
/// duration unless an exception later overrides it.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub start: EventTime,
    pub end: EventTime,
}

/// Lazy iterator over the occurrences of a recurrence rule.
///
/// Yields `Ok(Occurrence)` in ascending order; terminates after `count`
/// occurrences or once `until` is exceeded. If the safety cap is hit first,
/// the final item is `Err(RecurrenceLimitExceeded)` so callers can keep the
/// partial sequence while reporting the truncation.
pub struct RecurrenceIter {
    freq: Frequency,
    interval: i64,
    count: Option<u32>,
    until: Option<chrono::DateTime<chrono::Utc>>,
    by_day: Vec<ByDay>,
    by_month_day: Vec<i8>,
    by_month: Vec<u8>,

    anchor_date: NaiveDate,
    anchor_time: Option<NaiveTime>,
    /// Day span between anchor start and end dates (all-day events).
    day_span: i64,
    /// Instant duration of the anchor (timed events).
    duration: Duration,

    period: i64,
    pending: VecDeque<NaiveDate>,
    emitted: u32,
    iterations: u32,
    cap: u32,
    done: bool,
}

impl RecurrenceIter {
    pub fn new(
        rule: &RecurrenceRule,
        anchor_start: &EventTime,
        anchor_end: &EventTime,
        cap: u32,
    ) -> SchedResult<Self> {
        rule.validate()?;

        Ok(RecurrenceIter {
            freq: rule.freq,
            interval: rule.interval as i64,
            count: rule.count,
            until: rule.until.as_ref().map(|u| u.to_utc_end()),
            by_day: rule.by_day.clone(),
            by_month_day: rule.by_month_day.clone(),
            by_month: rule.by_month.clone(),
            anchor_date: anchor_start.date(),
            anchor_time: anchor_start.time(),
            day_span: (anchor_end.date() - anchor_start.date()).num_days(),
            duration: anchor_end.to_utc() - anchor_start.to_utc(),
            period: 0,
            pending: VecDeque::new(),
            emitted: 0,
            iterations: 0,
            cap,
            done: false,
        })
    }

    fn start_on(&self, date: NaiveDate) -> EventTime {
        match self.anchor_time {
            Some(time) => EventTime::DateTime(date.and_time(time).and_utc()),
            None => EventTime::Date(date),
        }
    }

    fn end_for(&self, start: &EventTime) -> EventTime {
        match start {
            EventTime::DateTime(dt) => EventTime::DateTime(*dt + self.duration),
            EventTime::Date(d) => EventTime::Date(*d + Duration::days(self.day_span)),
        }
    }

    /// Fill `pending` with this period's candidate dates, ascending.
    fn fill_period(&mut self) {
        let k = self.period;
        self.period += 1;

        match self.freq {
            Frequency::Daily => {
                self.pending
                    .push_back(self.anchor_date + Duration::days(k * self.interval));
            }
            Frequency::Weekly => {
                let anchor_offset = self.anchor_date.weekday().num_days_from_monday() as i64;
                let week_start =
                    self.anchor_date - Duration::days(anchor_offset) + Duration::weeks(k * self.interval);
                if self.by_day.is_empty() {
                    self.pending.push_back(week_start + Duration::days(anchor_offset));
                } else {
                    let mut offsets: Vec<i64> = self
                        .by_day
                        .iter()
                        .map(|b| b.weekday.num_days_from_monday() as i64)
                        .collect();
                    offsets.sort_unstable();
                    offsets.dedup();
                    for off in offsets {
                        self.pending.push_back(week_start + Duration::days(off));
                    }
                }
            }
            Frequency::Monthly => {
                let (year, month) =
                    add_months(self.anchor_date.year(), self.anchor_date.month(), k * self.interval);
                self.fill_month(year, month);
            }
            Frequency::Yearly => {
                let year = self.anchor_date.year() + (k * self.interval) as i32;
                let months: Vec<u32> = if self.by_month.is_empty() {
                    vec![self.anchor_date.month()]
                } else {
                    let mut m: Vec<u32> = self.by_month.iter().map(|m| *m as u32).collect();
                    m.sort_unstable();
                    m.dedup();
                    m
                };
                for month in months {
                    self.fill_month(year, month);
                }
            }
        }
    }

    /// Candidate dates within one month, honoring by-month-day and by-day
    /// selectors, falling back to the anchor's day-of-month.
    fn fill_month(&mut self, year: i32, month: u32) {
        let mut dates: Vec<NaiveDate> = Vec::new();

        if !self.by_month_day.is_empty() {
            for md in &self.by_month_day {
                if let Some(d) = month_day(year, month, *md) {
                    dates.push(d);
                }
            }
        } else if !self.by_day.is_empty() {
            for sel in &self.by_day {
                match sel.ordinal {
                    Some(n) => {
                        if let Some(d) = nth_weekday_of_month(year, month, n, sel.weekday) {
                            dates.push(d);
                        }
                    }
                    None => dates.extend(weekdays_of_month(year, month, sel.weekday)),
                }
            }
        } else if let Some(d) = NaiveDate::from_ymd_opt(year, month, self.anchor_date.day()) {
            // Months lacking the anchor's day (e.g. the 31st) are skipped.
            dates.push(d);
        }

        dates.sort_unstable();
        dates.dedup();
        self.pending.extend(dates);
    }

    /// Whether a candidate passes the limiting by-rules for this frequency.
    fn passes_filters(&self, date: NaiveDate) -> bool {
        match self.freq {
            // BYMONTH limits daily and weekly expansion.
            Frequency::Daily | Frequency::Weekly => {
                self.by_month.is_empty() || self.by_month.contains(&(date.month() as u8))
            }
            Frequency::Monthly | Frequency::Yearly => true,
        }
    }
}

impl Iterator for RecurrenceIter {
    type Item = SchedResult<Occurrence>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(count) = self.count {
            if self.emitted >= count {
                self.done = true;
                return None;
            }
        }

        loop {
            if self.iterations >= self.cap {
                self.done = true;
                return Some(Err(SchedError::RecurrenceLimitExceeded(self.cap)));
            }
            self.iterations += 1;

            let date = match self.pending.pop_front() {
                Some(d) => d,
                None => {
                    self.fill_period();
                    continue;
                }
            };

            if date < self.anchor_date || !self.passes_filters(date) {
                continue;
            }

            let start = self.start_on(date);
            if let Some(until) = self.until {
                if start.to_utc() > until {
                    self.done = true;
                    return None;
                }
            }

            self.emitted += 1;
            let end = self.end_for(&start);
            return Some(Ok(Occurrence { start, end }));
        }
    }
}

/// Shift a (year, month) pair by a signed number of months.
fn add_months(year: i32, month: u32, delta: i64) -> (i32, u32) {
    let index = year as i64 * 12 + (month as i64 - 1) + delta;
    ((index.div_euclid(12)) as i32, (index.rem_euclid(12) + 1) as u32)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = add_months(year, month, 1);
    let first_next = NaiveDate::from_ymd_opt(ny, nm, 1).unwrap();
    first_next.pred_opt().unwrap().day()
}

/// Resolve a by-month-day value (negative counts from the month's end).
fn month_day(year: i32, month: u32, day: i8) -> Option<NaiveDate> {
    if day > 0 {
        NaiveDate::from_ymd_opt(year, month, day as u32)
    } else {
        let last = days_in_month(year, month) as i32;
        let resolved = last + 1 + day as i32;
        if resolved < 1 {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month, resolved as u32)
    }
}

/// The nth weekday of a month; n may be negative to count from the end.
fn nth_weekday_of_month(year: i32, month: u32, n: i8, weekday: Weekday) -> Option<NaiveDate> {
    if n > 0 {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let offset = (weekday.num_days_from_monday() + 7 - first.weekday().num_days_from_monday()) % 7;
        let date = first + Duration::days(offset as i64 + (n as i64 - 1) * 7);
        (date.month() == month).then_some(date)
    } else {
        let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
        let offset = (last.weekday().num_days_from_monday() + 7 - weekday.num_days_from_monday()) % 7;
        let date = last - Duration::days(offset as i64 + (-n as i64 - 1) * 7);
        (date.month() == month).then_some(date)
    }
}

fn weekdays_of_month(year: i32, month: u32, weekday: Weekday) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut n = 1;
    while let Some(d) = nth_weekday_of_month(year, month, n, weekday) {
        out.push(d);
        n += 1;
    }
    out
}
