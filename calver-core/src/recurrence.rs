//! Expansion of recurrence rules into concrete occurrence instants.
//!
//! Occurrence `n` is always computed from the anchor (the event's start),
//! never from occurrence `n - 1`. Monthly and yearly steps keep the anchor's
//! day of month and clamp to the last day when that day does not exist, so
//! a rule anchored on Jan 31 yields Feb 29 (or 28), Mar 31, Apr 30, ... and a
//! Feb 29 yearly rule yields Feb 28 in common years.

use chrono::{DateTime, Datelike, Duration, Months, Utc};

use crate::date_range::DateRange;
use crate::event::{Frequency, RecurrencePattern, Snapshot};

/// Lazy, finite sequence of occurrence start instants inside a window.
///
/// Iteration stops at the first of: `until` passed, `count` reached, or the
/// window end reached. Instants before the window start are skipped but still
/// count towards `count`. The iterator is `Clone`, so a sequence can be
/// replayed without touching the source.
#[derive(Debug, Clone)]
pub struct Occurrences {
    anchor: DateTime<Utc>,
    pattern: Option<RecurrencePattern>,
    window: DateRange,
    index: u32,
    done: bool,
}

/// Expand `pattern` anchored at `anchor` over `window`. Without a pattern
/// the anchor is the only occurrence.
pub fn occurrences(
    anchor: DateTime<Utc>,
    pattern: Option<&RecurrencePattern>,
    window: DateRange,
) -> Occurrences {
    let mut occurrences = Occurrences {
        anchor,
        pattern: pattern.cloned(),
        window,
        index: 0,
        done: pattern.is_some_and(|p| p.interval == 0),
    };
    occurrences.seek_window_start();
    occurrences
}

impl Snapshot {
    pub fn occurrences(&self, window: DateRange) -> Occurrences {
        occurrences(self.start, self.recurrence.as_ref(), window)
    }
}

impl Occurrences {
    fn limit(&self) -> Option<u32> {
        match &self.pattern {
            Some(pattern) => pattern.count,
            None => Some(1),
        }
    }

    /// Instant of occurrence `n`, `None` on calendar overflow.
    fn occurrence_at(&self, n: u32) -> Option<DateTime<Utc>> {
        let Some(pattern) = &self.pattern else {
            return (n == 0).then_some(self.anchor);
        };
        let steps = i64::from(n).checked_mul(i64::from(pattern.interval))?;
        match pattern.frequency {
            Frequency::Daily => self.anchor.checked_add_signed(Duration::try_days(steps)?),
            Frequency::Weekly => self.anchor.checked_add_signed(Duration::try_weeks(steps)?),
            Frequency::Monthly => {
                let months = u32::try_from(steps).ok()?;
                self.anchor.checked_add_months(Months::new(months))
            }
            Frequency::Yearly => {
                let months = u32::try_from(steps.checked_mul(12)?).ok()?;
                self.anchor.checked_add_months(Months::new(months))
            }
        }
    }

    /// Jump over occurrences that certainly fall before the window start.
    /// Skipped occurrences are still counted through `index`.
    fn seek_window_start(&mut self) {
        let (Some(pattern), Some(from)) = (&self.pattern, self.window.from) else {
            return;
        };
        if from <= self.anchor || pattern.interval == 0 {
            return;
        }
        let interval = i64::from(pattern.interval);
        let skip = match pattern.frequency {
            Frequency::Daily => (from - self.anchor).num_days() / interval,
            Frequency::Weekly => (from - self.anchor).num_weeks() / interval,
            Frequency::Monthly | Frequency::Yearly => {
                let months = i64::from(from.year() - self.anchor.year()) * 12
                    + i64::from(from.month()) - i64::from(self.anchor.month());
                let per_step = if pattern.frequency == Frequency::Yearly {
                    interval * 12
                } else {
                    interval
                };
                // Stay one step short: clamping can move the target day.
                months / per_step - 1
            }
        };
        if skip <= 0 {
            return;
        }
        let skip = u32::try_from(skip).unwrap_or(u32::MAX);
        self.index = match self.limit() {
            Some(limit) => skip.min(limit),
            None => skip,
        };
    }
}

impl Iterator for Occurrences {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.limit().is_some_and(|limit| self.index >= limit) {
                self.done = true;
                break;
            }
            let Some(candidate) = self.occurrence_at(self.index) else {
                self.done = true;
                break;
            };
            self.index += 1;

            let past_until = self
                .pattern
                .as_ref()
                .and_then(|p| p.until)
                .is_some_and(|until| candidate > until);
            let past_window = self.window.to.is_some_and(|to| candidate >= to);
            if past_until || past_window {
                self.done = true;
                break;
            }
            if self.window.from.is_some_and(|from| candidate < from) {
                continue;
            }
            return Some(candidate);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn march_2024() -> DateRange {
        DateRange::new(at(2024, 3, 1, 0, 0), at(2024, 4, 1, 0, 0)).unwrap()
    }

    #[test]
    fn test_weekly_until_excludes_later_occurrences() {
        let pattern = RecurrencePattern::new(Frequency::Weekly, 1).until(at(2024, 3, 29, 0, 0));
        let got: Vec<_> = occurrences(at(2024, 3, 15, 14, 30), Some(&pattern), march_2024()).collect();
        assert_eq!(got, vec![at(2024, 3, 15, 14, 30), at(2024, 3, 22, 14, 30)]);
    }

    #[test]
    fn test_single_event_outside_window_is_empty() {
        let got: Vec<_> = occurrences(at(2024, 5, 1, 9, 0), None, march_2024()).collect();
        assert!(got.is_empty());

        let got: Vec<_> = occurrences(at(2024, 3, 5, 9, 0), None, march_2024()).collect();
        assert_eq!(got, vec![at(2024, 3, 5, 9, 0)]);
    }

    #[test]
    fn test_monthly_clamps_to_month_end_without_drifting() {
        let pattern = RecurrencePattern::new(Frequency::Monthly, 1).count(4);
        let got: Vec<_> =
            occurrences(at(2024, 1, 31, 10, 0), Some(&pattern), DateRange::unbounded()).collect();
        assert_eq!(
            got,
            vec![
                at(2024, 1, 31, 10, 0),
                at(2024, 2, 29, 10, 0),
                at(2024, 3, 31, 10, 0),
                at(2024, 4, 30, 10, 0),
            ]
        );
    }

    #[test]
    fn test_yearly_leap_day_clamps_in_common_years() {
        let pattern = RecurrencePattern::new(Frequency::Yearly, 1).count(3);
        let got: Vec<_> =
            occurrences(at(2024, 2, 29, 8, 0), Some(&pattern), DateRange::unbounded()).collect();
        assert_eq!(
            got,
            vec![at(2024, 2, 29, 8, 0), at(2025, 2, 28, 8, 0), at(2026, 2, 28, 8, 0)]
        );
    }

    #[test]
    fn test_skipped_occurrences_count_against_count() {
        // Daily from Feb 27, five occurrences: Feb 27..Mar 2. Only the
        // ones on or after Mar 1 are in the window.
        let pattern = RecurrencePattern::new(Frequency::Daily, 1).count(5);
        let got: Vec<_> = occurrences(at(2024, 2, 27, 7, 0), Some(&pattern), march_2024()).collect();
        assert_eq!(got, vec![at(2024, 3, 1, 7, 0), at(2024, 3, 2, 7, 0)]);
    }

    #[test]
    fn test_seek_matches_stepwise_expansion() {
        let window = DateRange::new(at(2030, 6, 1, 0, 0), at(2030, 9, 1, 0, 0)).unwrap();
        for frequency in [Frequency::Daily, Frequency::Weekly, Frequency::Monthly, Frequency::Yearly] {
            let pattern = RecurrencePattern::new(frequency, 2);
            let anchor = at(2024, 1, 31, 18, 0);
            let sought: Vec<_> = occurrences(anchor, Some(&pattern), window).collect();
            let stepwise: Vec<_> = occurrences(anchor, Some(&pattern), DateRange::unbounded())
                .take_while(|dt| *dt < at(2030, 9, 1, 0, 0))
                .filter(|dt| window.contains(*dt))
                .collect();
            assert_eq!(sought, stepwise, "{frequency}");
        }
    }

    #[test]
    fn test_iterator_nth_follows_window_order() {
        let pattern = RecurrencePattern::new(Frequency::Monthly, 1).count(6);
        let mut occ = occurrences(at(2024, 1, 31, 10, 0), Some(&pattern), march_2024());
        // Only Mar 31 is in the window, so the second item does not exist.
        assert_eq!(occ.clone().nth(0), Some(at(2024, 3, 31, 10, 0)));
        assert_eq!(occ.nth(1), None);

        let all = occurrences(at(2024, 1, 31, 10, 0), Some(&pattern), DateRange::unbounded());
        assert_eq!(all.clone().nth(4), Some(at(2024, 5, 31, 10, 0)));
        assert_eq!(all.last(), Some(at(2024, 6, 30, 10, 0)));
    }

    #[test]
    fn test_sequence_is_restartable() {
        let pattern = RecurrencePattern::new(Frequency::Weekly, 2);
        let occ = occurrences(at(2024, 3, 1, 9, 0), Some(&pattern), march_2024());
        let first: Vec<_> = occ.clone().collect();
        let second: Vec<_> = occ.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
