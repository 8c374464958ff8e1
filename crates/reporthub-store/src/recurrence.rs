//! Pure next-occurrence calculator.
//!
//! All arithmetic happens in the schedule's own IANA timezone on naive
//! dates, then converts to an absolute UTC instant at the end. The only
//! inputs are the recurrence spec and the explicit `anchor` — no ambient
//! "now" — so the function is deterministic and trivially unit-testable.
//!
//! DST policy (deterministic, documented):
//! - an *ambiguous* local time (clocks fell back) resolves to the **later**
//!   of the two instants, i.e. the second wall-clock pass;
//! - a *nonexistent* local time (clocks sprang forward) rolls forward in
//!   15-minute steps until a valid local time is found.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::types::{Frequency, Recurrence, TimeOfDay};

/// Upper bound on nonexistent-local-time roll-forward (16 × 15 min = 4 h,
/// far beyond any real DST gap).
const MAX_GAP_STEPS: u32 = 16;

/// Compute the next due instant for `rec` strictly after `anchor`.
///
/// Returns `None` only for specs that slipped past validation (e.g. a
/// weekly recurrence without a weekday) — callers treat that as "schedule
/// has no next run", never as a crash.
pub fn next_due(rec: &Recurrence, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz = rec.timezone;
    let local_anchor = anchor.with_timezone(&tz);
    let anchor_date = local_anchor.date_naive();

    let due = match rec.frequency {
        Frequency::Daily => {
            // Today qualifies when its local fire time has not yet passed.
            let today = resolve_local(tz, anchor_date, rec.at)?;
            if today > anchor {
                today
            } else {
                resolve_local(tz, anchor_date + Duration::days(1), rec.at)?
            }
        }

        Frequency::Weekly => {
            // 0 = Sunday … 6 = Saturday, matching num_days_from_sunday.
            let target = i64::from(rec.day_of_week?);
            let current = i64::from(local_anchor.weekday().num_days_from_sunday());
            let ahead = (target - current).rem_euclid(7);
            let candidate_date = anchor_date + Duration::days(ahead);
            let candidate = resolve_local(tz, candidate_date, rec.at)?;
            if candidate > anchor {
                candidate
            } else {
                resolve_local(tz, candidate_date + Duration::days(7), rec.at)?
            }
        }

        Frequency::Monthly | Frequency::Quarterly | Frequency::SemiAnnually | Frequency::Annually => {
            // The requested day-of-month is re-derived (and re-clamped) for
            // every occurrence, so a 31st never drifts down permanently
            // after passing through a short month.
            let dom = rec.day_of_month?;
            let step = rec.frequency.month_step()?;
            let mut year = anchor_date.year();
            let mut month = anchor_date.month();
            let mut candidate = resolve_local(tz, clamped_date(year, month, dom)?, rec.at)?;
            while candidate <= anchor {
                (year, month) = add_months(year, month, step);
                candidate = resolve_local(tz, clamped_date(year, month, dom)?, rec.at)?;
            }
            candidate
        }
    };

    if due <= anchor {
        // Construction above guarantees strict progress; guard anyway so a
        // timezone-database surprise can never produce a same-instant loop.
        warn!(anchor = %anchor, computed = %due, "next_due did not advance past anchor");
        return None;
    }
    Some(due)
}

/// Map a local date + time-of-day in `tz` to a UTC instant, applying the
/// DST policy described in the module docs.
fn resolve_local(tz: Tz, date: NaiveDate, at: TimeOfDay) -> Option<DateTime<Utc>> {
    let mut naive = date.and_hms_opt(u32::from(at.hour), u32::from(at.minute), 0)?;
    for _ in 0..MAX_GAP_STEPS {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            // Fall-back overlap: take the second wall-clock pass.
            LocalResult::Ambiguous(_, latest) => return Some(latest.with_timezone(&Utc)),
            // Spring-forward gap: roll to the first valid local time.
            LocalResult::None => naive += Duration::minutes(15),
        }
    }
    None
}

/// Date at `dom` within (year, month), clamped to the month's last day.
fn clamped_date(year: i32, month: u32, dom: u8) -> Option<NaiveDate> {
    let last = days_in_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, u32::from(dom).min(last))
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;
    Some(first_of_next.pred_opt()?.day())
}

/// Advance (year, month) by `step` months.
fn add_months(year: i32, month: u32, step: u32) -> (i32, u32) {
    let total = i64::from(year) * 12 + i64::from(month) - 1 + i64::from(step);
    ((total.div_euclid(12)) as i32, (total.rem_euclid(12) + 1) as u32)
}
