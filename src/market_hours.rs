// =============================================================================
// Market hours — regular-session gate and expiry-date helpers
// =============================================================================
//
// Regular trading hours are 09:30-16:00 US/Eastern, Monday-Friday. Eastern
// offset is derived from the US daylight-saving rule (second Sunday of March
// through first Sunday of November) so the gate stays correct year-round
// without a timezone database.
// =============================================================================

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};

/// UTC offset (hours) for US/Eastern on the given date: -4 during DST, -5
/// otherwise.
pub fn eastern_offset_hours(date: NaiveDate) -> i64 {
    let year = date.year();
    let dst_start = nth_weekday(year, 3, Weekday::Sun, 2);
    let dst_end = nth_weekday(year, 11, Weekday::Sun, 1);
    if date >= dst_start && date < dst_end {
        -4
    } else {
        -5
    }
}

/// The `n`-th given weekday of a month (1-based).
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let offset = (7 + weekday.num_days_from_monday() as i64
        - first.weekday().num_days_from_monday() as i64)
        % 7;
    first + Duration::days(offset + 7 * (n as i64 - 1))
}

/// The Eastern trading date for a UTC instant.
pub fn session_date(now: DateTime<Utc>) -> NaiveDate {
    let offset = eastern_offset_hours(now.date_naive());
    (now + Duration::hours(offset)).date_naive()
}

/// Whether the regular session is open at the given UTC instant.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let offset = eastern_offset_hours(now.date_naive());
    let eastern = now + Duration::hours(offset);
    let date = eastern.date_naive();

    if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let t = eastern.time();
    let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
    t >= open && t < close
}

/// Target Friday for a weekly-expiry request.
///
/// `weeks_out = 0` means "this week's Friday": when today already is a
/// Friday, today is returned. Each additional week adds exactly seven days.
pub fn next_friday(today: NaiveDate, weeks_out: u32) -> NaiveDate {
    let days_ahead = (7 + Weekday::Fri.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        % 7;
    today + Duration::days(days_ahead + 7 * weeks_out as i64)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dst_boundaries_2026() {
        // DST 2026: March 8 through November 1.
        assert_eq!(eastern_offset_hours(date(2026, 3, 7)), -5);
        assert_eq!(eastern_offset_hours(date(2026, 3, 8)), -4);
        assert_eq!(eastern_offset_hours(date(2026, 7, 1)), -4);
        assert_eq!(eastern_offset_hours(date(2026, 10, 31)), -4);
        assert_eq!(eastern_offset_hours(date(2026, 11, 1)), -5);
    }

    #[test]
    fn session_gate_summer() {
        // 2026-07-06 is a Monday; DST offset -4, so open is 13:30 UTC.
        let open = Utc.with_ymd_and_hms(2026, 7, 6, 13, 30, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2026, 7, 6, 13, 29, 0).unwrap();
        let close = Utc.with_ymd_and_hms(2026, 7, 6, 20, 0, 0).unwrap();
        assert!(is_market_open(open));
        assert!(!is_market_open(before));
        assert!(!is_market_open(close));
    }

    #[test]
    fn session_gate_weekend() {
        // 2026-07-04 is a Saturday.
        let mid_day = Utc.with_ymd_and_hms(2026, 7, 4, 15, 0, 0).unwrap();
        assert!(!is_market_open(mid_day));
    }

    #[test]
    fn friday_formula_zero_weeks_on_friday_is_today() {
        // 2026-03-20 is a Friday.
        let friday = date(2026, 3, 20);
        assert_eq!(next_friday(friday, 0), friday);
    }

    #[test]
    fn friday_formula_always_returns_a_friday() {
        let mut d = date(2026, 3, 16); // Monday
        for _ in 0..14 {
            let target = next_friday(d, 0);
            assert_eq!(target.weekday(), Weekday::Fri, "from {d}");
            assert!(target >= d);
            d += Duration::days(1);
        }
    }

    #[test]
    fn friday_formula_week_spacing() {
        let monday = date(2026, 3, 16);
        let this_week = next_friday(monday, 0);
        let next_week = next_friday(monday, 1);
        assert_eq!(this_week, date(2026, 3, 20));
        assert_eq!((next_week - this_week).num_days(), 7);
    }
}
