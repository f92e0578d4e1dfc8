//! Calendar helpers for the two evaluation windows.

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};

/// Midnight at the start of `now`'s calendar day, in `now`'s time zone.
///
/// Falls back to `now` when midnight does not exist locally (a DST gap).
pub fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    now.timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| now.clone())
}

/// Flow-record staleness cutoff: local midnight `check_days` days before
/// `now`.
pub fn flow_cutoff<Tz: TimeZone>(now: &DateTime<Tz>, check_days: u32) -> DateTime<Utc> {
    let then = now
        .clone()
        .checked_sub_days(Days::new(u64::from(check_days)))
        .unwrap_or_else(|| now.clone());
    start_of_day(&then).with_timezone(&Utc)
}
