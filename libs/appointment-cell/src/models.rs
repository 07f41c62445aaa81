// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::fmt;

use shared_config::AppConfig;
use shared_models::DatabaseError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    pub location: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Present if and only if `status` is `Cancelled`.
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Appointment {
    /// Derived from start and duration; never stored as a source of truth.
    /// Saturates at `DateTime::<Utc>::MAX_UTC`.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time
            .checked_add_signed(Duration::minutes(self.duration_minutes as i64))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            start: self.start_time,
            end: self.end_time(),
        }
    }

    /// Whether this record counts against the provider's no-overlap rule.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The record as it looks after `update` commits.
    pub fn apply(&self, update: &AppointmentUpdate) -> Appointment {
        let mut next = self.clone();
        match &update.change {
            AppointmentChange::Reschedule { start_time, duration_minutes } => {
                next.start_time = *start_time;
                next.duration_minutes = *duration_minutes;
            }
            AppointmentChange::Status { status, cancellation } => {
                next.status = *status;
                next.cancellation = cancellation.clone();
            }
        }
        next.updated_at = update.updated_at;
        next.version = self.version + 1;
        next
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 6] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn is_active(&self) -> bool {
        matches!(self,
            AppointmentStatus::Pending |
            AppointmentStatus::Confirmed |
            AppointmentStatus::InProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Informational category; has no effect on scheduling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    #[serde(alias = "general", alias = "consultation")]
    GeneralConsultation,
    #[serde(alias = "specialist")]
    SpecialistConsultation,
    #[serde(alias = "occupational")]
    OccupationalExam,
    #[serde(alias = "followup")]
    FollowUp,
    Emergency,
    Vaccination,
    Other,
}

impl Default for AppointmentType {
    fn default() -> Self {
        AppointmentType::GeneralConsultation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub cancelled_by: Uuid,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

// ==============================================================================
// TIME INTERVALS
// ==============================================================================

/// Half-open `[start, end)` interval with `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterval")]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AppointmentError> {
        if end <= start {
            return Err(AppointmentError::ValidationError(format!(
                "interval end {} must be after start {}", end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn from_duration(start: DateTime<Utc>, duration_minutes: i32) -> Result<Self, AppointmentError> {
        if duration_minutes <= 0 {
            return Err(AppointmentError::ValidationError(format!(
                "duration must be positive, got {} minutes", duration_minutes
            )));
        }
        let end = start
            .checked_add_signed(Duration::minutes(duration_minutes as i64))
            .ok_or_else(|| AppointmentError::ValidationError(format!(
                "start {} plus {} minutes is out of range", start, duration_minutes
            )))?;
        Ok(Self { start, end })
    }

    /// `[date 00:00, date+1 00:00)` in the tenant's local frame. The end
    /// saturates on the last representable day.
    pub fn for_day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::default()).and_utc();
        Self {
            start,
            end: start
                .checked_add_signed(Duration::days(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// `a.start < b.end && b.start < a.end`; touching intervals do not overlap.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// The interval widened by `padding` on both sides.
    pub fn padded(&self, padding: Duration) -> Result<TimeInterval, AppointmentError> {
        let out_of_range = || AppointmentError::ValidationError(format!(
            "interval {} - {} padded by {} is out of range", self.start, self.end, padding
        ));
        Ok(TimeInterval {
            start: self.start.checked_sub_signed(padding).ok_or_else(out_of_range)?,
            end: self.end.checked_add_signed(padding).ok_or_else(out_of_range)?,
        })
    }
}

#[derive(Deserialize)]
struct RawInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawInterval> for TimeInterval {
    type Error = AppointmentError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        TimeInterval::new(raw.start, raw.end)
    }
}

// ==============================================================================
// REQUEST / QUERY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub provider_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    pub location: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl BookAppointmentRequest {
    pub fn new(provider_id: Uuid, patient_id: Uuid, start_time: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            provider_id,
            patient_id,
            start_time,
            duration_minutes,
            appointment_type: AppointmentType::default(),
            location: None,
            reason: None,
            notes: None,
        }
    }

    pub fn with_type(mut self, appointment_type: AppointmentType) -> Self {
        self.appointment_type = appointment_type;
        self
    }
}

/// Appointments starting in `[from, to)`, optionally narrowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub provider_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn between(range: TimeInterval) -> Self {
        Self {
            from: range.start(),
            to: range.end(),
            provider_id: None,
            patient_id: None,
            status: None,
        }
    }

    pub fn for_day(date: NaiveDate) -> Self {
        Self::between(TimeInterval::for_day(date))
    }

    pub fn provider(mut self, provider_id: Uuid) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn patient(mut self, patient_id: Uuid) -> Self {
        self.patient_id = Some(patient_id);
        self
    }

    pub fn status(mut self, status: AppointmentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        appointment.start_time >= self.from
            && appointment.start_time < self.to
            && self.provider_id.map_or(true, |id| appointment.provider_id == id)
            && self.patient_id.map_or(true, |id| appointment.patient_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
    }
}

/// A compare-and-swap mutation: applied only while the stored version still
/// equals `expected_version`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentUpdate {
    pub expected_version: i64,
    pub updated_at: DateTime<Utc>,
    pub change: AppointmentChange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppointmentChange {
    Reschedule {
        start_time: DateTime<Utc>,
        duration_minutes: i32,
    },
    Status {
        status: AppointmentStatus,
        cancellation: Option<Cancellation>,
    },
}

// ==============================================================================
// AVAILABILITY AND STATISTICS MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub free: bool,
    pub conflict: Option<Appointment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedSlot {
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total: u32,
    pub pending: u32,
    pub confirmed: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub cancelled: u32,
    pub no_show: u32,
    pub next_upcoming: Option<Appointment>,
}

impl DailyStats {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total: 0,
            pending: 0,
            confirmed: 0,
            in_progress: 0,
            completed: 0,
            cancelled: 0,
            no_show: 0,
            next_upcoming: None,
        }
    }

    pub fn count_for(&self, status: AppointmentStatus) -> u32 {
        match status {
            AppointmentStatus::Pending => self.pending,
            AppointmentStatus::Confirmed => self.confirmed,
            AppointmentStatus::InProgress => self.in_progress,
            AppointmentStatus::Completed => self.completed,
            AppointmentStatus::Cancelled => self.cancelled,
            AppointmentStatus::NoShow => self.no_show,
        }
    }
}

// ==============================================================================
// ENGINE SETTINGS
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingSettings {
    /// Padding around a candidate interval when loading the provider's agenda.
    pub lookup_window: Duration,
    pub max_duration_minutes: i32,
    pub max_storage_retries: u32,
    pub retry_backoff: std::time::Duration,
    pub slot_step_minutes: i32,
    pub day_start_hour: u32,
    pub day_end_hour: u32,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            lookup_window: Duration::hours(24),
            max_duration_minutes: 480,
            max_storage_retries: 3,
            retry_backoff: std::time::Duration::from_millis(100),
            slot_step_minutes: 15,
            day_start_hour: 8,
            day_end_hour: 20,
        }
    }
}

impl SchedulingSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lookup_window: Duration::hours(config.scheduling_lookup_window_hours.max(0)),
            max_duration_minutes: config.scheduling_max_duration_minutes,
            max_storage_retries: config.scheduling_max_storage_retries,
            retry_backoff: std::time::Duration::from_millis(config.scheduling_retry_backoff_ms),
            slot_step_minutes: config.scheduling_slot_step_minutes,
            day_start_hour: config.scheduling_day_start_hour,
            day_end_hour: config.scheduling_day_end_hour,
        }
    }

    /// Bookable hours on `date`, used when suggesting free slots.
    pub fn working_window(&self, date: NaiveDate) -> Result<TimeInterval, AppointmentError> {
        let hour_at = |hour: u32| {
            NaiveTime::from_hms_opt(hour.min(23), 0, 0)
                .map(|time| date.and_time(time).and_utc())
                .ok_or_else(|| AppointmentError::ValidationError(format!("invalid working hour {}", hour)))
        };
        let start = hour_at(self.day_start_hour)?;
        let end = if self.day_end_hour >= 24 {
            TimeInterval::for_day(date).end()
        } else {
            hour_at(self.day_end_hour)?
        };
        TimeInterval::new(start, end)
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Another active appointment already holds part of the interval.
    Overlap,
    /// The record changed since it was read.
    StaleVersion,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::Overlap => write!(f, "overlaps an existing booking"),
            ConflictReason::StaleVersion => write!(f, "modified concurrently"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Scheduling conflict: {reason} (appointment {appointment_id:?})")]
    Conflict {
        appointment_id: Option<Uuid>,
        reason: ConflictReason,
    },

    #[error("Illegal status transition from {from} to {to}")]
    IllegalTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] DatabaseError),
}

impl AppointmentError {
    pub fn overlap(conflicting_id: Uuid) -> Self {
        AppointmentError::Conflict {
            appointment_id: Some(conflicting_id),
            reason: ConflictReason::Overlap,
        }
    }

    pub fn stale(appointment_id: Uuid) -> Self {
        AppointmentError::Conflict {
            appointment_id: Some(appointment_id),
            reason: ConflictReason::StaleVersion,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppointmentError::Conflict { .. })
    }

    /// Only transport failures are retried; a retried booking is a new
    /// business decision, not a transient fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppointmentError::StorageFailure(e) if e.is_transient())
    }
}
