use chrono::{NaiveDate, NaiveDateTime};

use crate::limits::MAX_WINDOW_DAYS;
use crate::model::{Ms, RateType, TimeWindow};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

pub(crate) fn now_naive() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Calendar date of an epoch-ms timestamp, in local time.
pub(crate) fn date_of_ms(ms: Ms) -> NaiveDate {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&chrono::Local).date_naive())
        .unwrap_or_else(today)
}

/// Whether two booking windows conflict, at the granularity of the
/// candidate's rate category.
///
/// Hourly: full date+time precision, half-open — back-to-back bookings
/// (one ending exactly when the next starts) do not conflict.
///
/// Daily/monthly: date granularity, inclusive on both ends — same-day
/// turnover conflicts. This is deliberately stricter than the hourly rule.
///
/// Callers filter cancelled bookings before invoking this.
pub fn overlaps(a: &TimeWindow, b: &TimeWindow, rate: RateType) -> bool {
    match rate {
        RateType::Hourly => {
            a.start_instant() < b.end_instant() && a.end_instant() > b.start_instant()
        }
        RateType::Daily | RateType::Monthly => {
            a.entry_date <= b.exit_date && a.exit_date >= b.entry_date
        }
    }
}

pub(crate) fn validate_window(window: &TimeWindow, rate: RateType) -> Result<(), EngineError> {
    if window.exit_date < window.entry_date {
        return Err(EngineError::Validation("exit date before entry date"));
    }
    if (window.exit_date - window.entry_date).num_days() > MAX_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("booking window too wide"));
    }
    match rate {
        RateType::Hourly => {
            if window.entry_time.is_none() || window.exit_time.is_none() {
                return Err(EngineError::Validation("hourly booking requires entry and exit times"));
            }
            if window.end_instant() <= window.start_instant() {
                return Err(EngineError::Validation("hourly window is empty or inverted"));
            }
        }
        RateType::Daily | RateType::Monthly => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn t(h: u32, min: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, min, 0).unwrap()
    }

    fn hourly(day: u32, sh: u32, sm: u32, eh: u32, em: u32) -> TimeWindow {
        TimeWindow::hourly(d(day), t(sh, sm), d(day), t(eh, em))
    }

    #[test]
    fn hourly_overlap_is_symmetric() {
        let a = hourly(10, 9, 0, 11, 0);
        let b = hourly(10, 10, 0, 12, 0);
        assert!(overlaps(&a, &b, RateType::Hourly));
        assert!(overlaps(&b, &a, RateType::Hourly));
    }

    #[test]
    fn hourly_self_overlap() {
        let a = hourly(10, 9, 0, 11, 0);
        assert!(overlaps(&a, &a, RateType::Hourly));
    }

    #[test]
    fn hourly_back_to_back_no_conflict() {
        let a = hourly(10, 9, 0, 11, 0);
        let b = hourly(10, 11, 0, 13, 0);
        assert!(!overlaps(&a, &b, RateType::Hourly));
        assert!(!overlaps(&b, &a, RateType::Hourly));
    }

    #[test]
    fn hourly_disjoint_days() {
        let a = hourly(10, 9, 0, 11, 0);
        let b = hourly(11, 9, 0, 11, 0);
        assert!(!overlaps(&a, &b, RateType::Hourly));
    }

    #[test]
    fn dated_same_day_turnover_conflicts() {
        // A exits 2024-06-10, B enters 2024-06-10: inclusive rule, conflict
        let a = TimeWindow::dated(d(8), d(10));
        let b = TimeWindow::dated(d(10), d(12));
        assert!(overlaps(&a, &b, RateType::Daily));
        assert!(overlaps(&b, &a, RateType::Daily));
        assert!(overlaps(&a, &b, RateType::Monthly));
    }

    #[test]
    fn dated_disjoint_no_conflict() {
        let a = TimeWindow::dated(d(8), d(10));
        let b = TimeWindow::dated(d(11), d(12));
        assert!(!overlaps(&a, &b, RateType::Daily));
    }

    #[test]
    fn dated_ignores_time_of_day() {
        // Same dates with times set — daily comparison stays date-granular
        let a = TimeWindow::hourly(d(8), t(23, 0), d(10), t(1, 0));
        let b = TimeWindow::hourly(d(10), t(8, 0), d(12), t(9, 0));
        assert!(overlaps(&a, &b, RateType::Daily));
    }

    #[test]
    fn validate_rejects_inverted_window() {
        let w = TimeWindow::dated(d(12), d(10));
        assert!(matches!(
            validate_window(&w, RateType::Daily),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_hourly_without_times() {
        let w = TimeWindow::dated(d(10), d(10));
        assert!(matches!(
            validate_window(&w, RateType::Hourly),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_hourly_window() {
        let w = hourly(10, 11, 0, 11, 0);
        assert!(matches!(
            validate_window(&w, RateType::Hourly),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn validate_accepts_single_day_dated_window() {
        let w = TimeWindow::dated(d(10), d(10));
        assert!(validate_window(&w, RateType::Daily).is_ok());
    }

    #[test]
    fn validate_rejects_oversized_window() {
        let w = TimeWindow::dated(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        assert!(matches!(
            validate_window(&w, RateType::Monthly),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
