// libs/appointment-cell/src/services/stats.rs
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{Appointment, AppointmentStatus, DailyStats, TimeInterval};

/// Per-status counts for the appointments starting on `date`, plus the
/// earliest one still ahead of `now`.
///
/// Records outside the day are ignored, so callers may pass a wider listing.
pub fn aggregate_daily_stats(date: NaiveDate, appointments: &[Appointment], now: DateTime<Utc>) -> DailyStats {
    let day = TimeInterval::for_day(date);
    let mut stats = DailyStats::empty(date);

    for appointment in appointments.iter().filter(|a| day.contains(a.start_time)) {
        stats.total += 1;
        match appointment.status {
            AppointmentStatus::Pending => stats.pending += 1,
            AppointmentStatus::Confirmed => stats.confirmed += 1,
            AppointmentStatus::InProgress => stats.in_progress += 1,
            AppointmentStatus::Completed => stats.completed += 1,
            AppointmentStatus::Cancelled => stats.cancelled += 1,
            AppointmentStatus::NoShow => stats.no_show += 1,
        }
    }

    stats.next_upcoming = appointments
        .iter()
        .filter(|a| day.contains(a.start_time) && a.start_time > now)
        .min_by_key(|a| (a.start_time, a.id))
        .cloned();

    stats
}
