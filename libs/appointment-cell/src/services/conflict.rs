// libs/appointment-cell/src/services/conflict.rs
use chrono::Duration;
use tracing::debug;

use crate::models::{Appointment, AvailabilityResult, TimeInterval};

/// Check a candidate interval against a provider's agenda snapshot.
///
/// The caller narrows `active` to one tenant and provider and to a bounded
/// window around the candidate. Records that are no longer active are
/// skipped, so a cancelled slot is free again. When several records overlap
/// (only possible transiently, before the store's constraint fires) the
/// earliest-starting one is reported.
pub fn check_availability(active: &[Appointment], candidate: &TimeInterval) -> AvailabilityResult {
    let conflict = active
        .iter()
        .filter(|appointment| appointment.is_active())
        .filter(|appointment| appointment.interval().overlaps(candidate))
        .min_by_key(|appointment| (appointment.start_time, appointment.id))
        .cloned();

    if let Some(existing) = &conflict {
        debug!("Candidate {} - {} overlaps appointment {}",
               candidate.start(), candidate.end(), existing.id);
    }

    AvailabilityResult {
        free: conflict.is_none(),
        conflict,
    }
}

/// Walk `search` in `step_minutes` increments and collect up to `limit`
/// intervals of `duration_minutes` that collide with nothing in `active`.
pub fn suggest_free_slots(
    active: &[Appointment],
    search: &TimeInterval,
    duration_minutes: i32,
    step_minutes: i32,
    limit: usize,
) -> Vec<TimeInterval> {
    let mut suggestions = Vec::new();
    if duration_minutes <= 0 || step_minutes <= 0 {
        return suggestions;
    }

    let duration = Duration::minutes(duration_minutes as i64);
    let step = Duration::minutes(step_minutes as i64);
    let mut current = search.start();

    while suggestions.len() < limit {
        match current.checked_add_signed(duration) {
            Some(end) if end <= search.end() => {}
            _ => break,
        }
        if let Ok(candidate) = TimeInterval::from_duration(current, duration_minutes) {
            if check_availability(active, &candidate).free {
                suggestions.push(candidate);
            }
        }
        current = match current.checked_add_signed(step) {
            Some(next) => next,
            None => break,
        };
    }

    suggestions
}
