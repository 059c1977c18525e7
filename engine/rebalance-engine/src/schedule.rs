use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

/// Next occurrence of `weekday` at `time` (UTC) strictly after `now`
pub fn next_weekly_run(now: DateTime<Utc>, weekday: Weekday, time: NaiveTime) -> DateTime<Utc> {
    let days_ahead = (weekday.num_days_from_monday() as i64
        - now.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);

    let candidate = (now.date_naive() + Duration::days(days_ahead)).and_time(time).and_utc();

    if candidate <= now {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}
