// libs/appointment-cell/src/services/lifecycle.rs
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::RequestContext;

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentStatus, AppointmentUpdate,
    BookAppointmentRequest, Cancellation,
};

/// Guards the appointment state machine.
///
/// ```text
/// pending ──► confirmed ──► in_progress ──► completed
///    │            │              │
///    ├────────────┴──────────────┴─► cancelled
///    ├────────────┴─► no_show
///    └────────────┴─► completed (direct completion is allowed)
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct AppointmentLifecycleService;

impl AppointmentLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: AppointmentStatus) -> &'static [AppointmentStatus] {
        match current_status {
            AppointmentStatus::Pending => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Completed,
            ],
            AppointmentStatus::Confirmed => &[
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Completed,
            ],
            AppointmentStatus::InProgress => &[
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
            ],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed => &[],
            AppointmentStatus::Cancelled => &[],
            AppointmentStatus::NoShow => &[],
        }
    }

    /// Validate that a status transition is allowed
    pub fn validate_status_transition(
        &self,
        current_status: AppointmentStatus,
        new_status: AppointmentStatus,
    ) -> Result<(), AppointmentError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if !self.get_valid_transitions(current_status).contains(&new_status) {
            warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
            return Err(AppointmentError::IllegalTransition {
                from: current_status,
                to: new_status,
            });
        }

        Ok(())
    }

    /// Only appointments still holding their slot can move.
    pub fn can_reschedule(&self, current_status: AppointmentStatus) -> bool {
        current_status.is_active()
    }

    pub fn validate_duration(&self, duration_minutes: i32, max_duration_minutes: i32) -> Result<(), AppointmentError> {
        if duration_minutes <= 0 {
            return Err(AppointmentError::ValidationError(format!(
                "duration must be positive, got {} minutes", duration_minutes
            )));
        }
        if duration_minutes > max_duration_minutes {
            return Err(AppointmentError::ValidationError(format!(
                "duration {} exceeds the maximum of {} minutes", duration_minutes, max_duration_minutes
            )));
        }
        Ok(())
    }

    pub fn validate_booking_request(
        &self,
        request: &BookAppointmentRequest,
        max_duration_minutes: i32,
    ) -> Result<(), AppointmentError> {
        self.validate_duration(request.duration_minutes, max_duration_minutes)?;

        if request.provider_id.is_nil() {
            return Err(AppointmentError::ValidationError("provider_id is required".to_string()));
        }
        if request.patient_id.is_nil() {
            return Err(AppointmentError::ValidationError("patient_id is required".to_string()));
        }

        Ok(())
    }

    /// Returns the trimmed reason; cancelling without one is rejected.
    pub fn validate_cancel_reason(&self, reason: &str) -> Result<String, AppointmentError> {
        let trimmed = reason.trim();
        if trimmed.is_empty() {
            return Err(AppointmentError::ValidationError(
                "a cancellation reason is required".to_string()
            ));
        }
        Ok(trimmed.to_string())
    }

    /// Stamp a fresh booking in the initial state.
    pub fn new_pending(
        &self,
        ctx: &RequestContext,
        request: &BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            patient_id: request.patient_id,
            provider_id: request.provider_id,
            start_time: request.start_time,
            duration_minutes: request.duration_minutes,
            appointment_type: request.appointment_type,
            status: AppointmentStatus::Pending,
            location: request.location.clone(),
            reason: request.reason.clone(),
            notes: request.notes.clone(),
            cancellation: None,
            created_at: now,
            created_by: ctx.actor_id,
            updated_at: now,
            version: 1,
        }
    }

    /// Build the compare-and-swap update moving `current` to `new_status`.
    ///
    /// Cancelling records who cancelled, why and when; every other target
    /// clears cancellation metadata.
    pub fn prepare_transition(
        &self,
        current: &Appointment,
        new_status: AppointmentStatus,
        actor_id: Uuid,
        cancel_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AppointmentUpdate, AppointmentError> {
        self.validate_status_transition(current.status, new_status)?;

        let cancellation = match new_status {
            AppointmentStatus::Cancelled => {
                let reason = self.validate_cancel_reason(cancel_reason.unwrap_or_default())?;
                Some(Cancellation {
                    cancelled_by: actor_id,
                    reason,
                    cancelled_at: now,
                })
            }
            _ => None,
        };

        Ok(AppointmentUpdate {
            expected_version: current.version,
            updated_at: now,
            change: AppointmentChange::Status {
                status: new_status,
                cancellation,
            },
        })
    }

    pub fn prepare_reschedule(
        &self,
        current: &Appointment,
        new_start_time: DateTime<Utc>,
        new_duration_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<AppointmentUpdate, AppointmentError> {
        if !self.can_reschedule(current.status) {
            warn!("Attempt to reschedule appointment {} in terminal status {}", current.id, current.status);
            return Err(AppointmentError::IllegalTransition {
                from: current.status,
                to: current.status,
            });
        }

        Ok(AppointmentUpdate {
            expected_version: current.version,
            updated_at: now,
            change: AppointmentChange::Reschedule {
                start_time: new_start_time,
                duration_minutes: new_duration_minutes,
            },
        })
    }
}
