// libs/appointment-cell/src/services/scheduling.rs
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{Clock, RequestContext, SystemClock};

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, AvailabilityResult,
    BookAppointmentRequest, DailyStats, SchedulingSettings, SuggestedSlot, TimeInterval,
};
use crate::services::conflict::{check_availability, suggest_free_slots};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notifier::{
    AppointmentEvent, AppointmentNotifier, LoggingNotifier, NotifierError, RedisReminderNotifier,
};
use crate::services::stats::aggregate_daily_stats;
use crate::store::{AppointmentStore, SupabaseAppointmentStore};

/// Entry point for every scheduling operation.
///
/// Each mutation reads the current state, validates it, and commits through
/// the store, which has the final say on overlaps and versions. Transient
/// storage failures re-run the whole read-validate-commit unit.
pub struct SchedulingService {
    store: Arc<dyn AppointmentStore>,
    notifier: Arc<dyn AppointmentNotifier>,
    clock: Arc<dyn Clock>,
    lifecycle_service: AppointmentLifecycleService,
    settings: SchedulingSettings,
}

impl SchedulingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        notifier: Arc<dyn AppointmentNotifier>,
        clock: Arc<dyn Clock>,
        settings: SchedulingSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            lifecycle_service: AppointmentLifecycleService::new(),
            settings,
        }
    }

    /// Supabase-backed service; reminders go to Redis when `REDIS_URL` is
    /// set and to the log otherwise.
    pub fn from_config(config: &AppConfig) -> Result<Self, NotifierError> {
        let store = Arc::new(SupabaseAppointmentStore::from_config(config));
        let notifier: Arc<dyn AppointmentNotifier> = match RedisReminderNotifier::from_config(config)? {
            Some(redis) => Arc::new(redis),
            None => {
                warn!("REDIS_URL not set, appointment reminders will only be logged");
                Arc::new(LoggingNotifier)
            }
        };

        Ok(Self::new(
            store,
            notifier,
            Arc::new(SystemClock),
            SchedulingSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &SchedulingSettings {
        &self.settings
    }

    // ==========================================================================
    // BOOKING AND RESCHEDULING
    // ==========================================================================

    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id, provider_id = %request.provider_id))]
    pub async fn book(
        &self,
        ctx: &RequestContext,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        info!("Booking appointment for patient {} at {} ({} min)",
              request.patient_id, request.start_time, request.duration_minutes);

        self.lifecycle_service.validate_booking_request(&request, self.settings.max_duration_minutes)?;

        let request = &request;
        let appointment = self
            .retry_storage("book", move || self.try_book(ctx, request))
            .await?;

        info!("Appointment {} booked with provider {}", appointment.id, appointment.provider_id);
        self.dispatch(AppointmentEvent::Booked(appointment.clone()));
        Ok(appointment)
    }

    async fn try_book(
        &self,
        ctx: &RequestContext,
        request: &BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let candidate = TimeInterval::from_duration(request.start_time, request.duration_minutes)?;
        let active = self
            .store
            .list_active(ctx.tenant_id, request.provider_id, candidate.padded(self.settings.lookup_window)?)
            .await?;

        if let Some(existing) = check_availability(&active, &candidate).conflict {
            warn!("Booking conflict for provider {}: overlaps appointment {}",
                  request.provider_id, existing.id);
            return Err(AppointmentError::overlap(existing.id));
        }

        let appointment = self.lifecycle_service.new_pending(ctx, request, self.clock.now());
        self.store.insert(appointment).await
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn reschedule(
        &self,
        ctx: &RequestContext,
        appointment_id: Uuid,
        new_start_time: DateTime<Utc>,
        new_duration_minutes: i32,
    ) -> Result<Appointment, AppointmentError> {
        info!("Rescheduling appointment {} to {}", appointment_id, new_start_time);

        self.lifecycle_service
            .validate_duration(new_duration_minutes, self.settings.max_duration_minutes)?;

        let (appointment, previous_start) = self
            .retry_storage("reschedule", move || {
                self.try_reschedule(ctx, appointment_id, new_start_time, new_duration_minutes)
            })
            .await?;

        info!("Appointment {} moved from {} to {}", appointment.id, previous_start, appointment.start_time);
        self.dispatch(AppointmentEvent::Rescheduled {
            appointment: appointment.clone(),
            previous_start,
        });
        Ok(appointment)
    }

    async fn try_reschedule(
        &self,
        ctx: &RequestContext,
        appointment_id: Uuid,
        new_start_time: DateTime<Utc>,
        new_duration_minutes: i32,
    ) -> Result<(Appointment, DateTime<Utc>), AppointmentError> {
        let current = self.fetch(ctx, appointment_id).await?;
        let update = self.lifecycle_service.prepare_reschedule(
            &current,
            new_start_time,
            new_duration_minutes,
            self.clock.now(),
        )?;

        let candidate = TimeInterval::from_duration(new_start_time, new_duration_minutes)?;
        let others: Vec<Appointment> = self
            .store
            .list_active(ctx.tenant_id, current.provider_id, candidate.padded(self.settings.lookup_window)?)
            .await?
            .into_iter()
            .filter(|a| a.id != appointment_id)
            .collect();

        if let Some(existing) = check_availability(&others, &candidate).conflict {
            warn!("Reschedule of {} conflicts with appointment {}", appointment_id, existing.id);
            return Err(AppointmentError::overlap(existing.id));
        }

        let updated = self.store.update(ctx.tenant_id, appointment_id, update).await?;
        Ok((updated, current.start_time))
    }

    // ==========================================================================
    // STATUS TRANSITIONS
    // ==========================================================================

    pub async fn confirm(&self, ctx: &RequestContext, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, appointment_id, AppointmentStatus::Confirmed, None).await
    }

    pub async fn start(&self, ctx: &RequestContext, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, appointment_id, AppointmentStatus::InProgress, None).await
    }

    pub async fn complete(&self, ctx: &RequestContext, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, appointment_id, AppointmentStatus::Completed, None).await
    }

    pub async fn mark_no_show(&self, ctx: &RequestContext, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, appointment_id, AppointmentStatus::NoShow, None).await
    }

    pub async fn cancel(
        &self,
        ctx: &RequestContext,
        appointment_id: Uuid,
        reason: &str,
    ) -> Result<Appointment, AppointmentError> {
        let reason = self.lifecycle_service.validate_cancel_reason(reason)?;
        let cancelled = self
            .transition(ctx, appointment_id, AppointmentStatus::Cancelled, Some(reason.as_str()))
            .await?;

        self.dispatch(AppointmentEvent::Cancelled(cancelled.clone()));
        Ok(cancelled)
    }

    #[instrument(skip(self, ctx, reason), fields(tenant_id = %ctx.tenant_id))]
    async fn transition(
        &self,
        ctx: &RequestContext,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        reason: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        let updated = self
            .retry_storage("transition", move || {
                self.try_transition(ctx, appointment_id, new_status, reason)
            })
            .await?;

        info!("Appointment {} is now {}", appointment_id, updated.status);
        Ok(updated)
    }

    async fn try_transition(
        &self,
        ctx: &RequestContext,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        reason: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.fetch(ctx, appointment_id).await?;
        let update = self.lifecycle_service.prepare_transition(
            &current,
            new_status,
            ctx.actor_id,
            reason,
            self.clock.now(),
        )?;

        self.store.update(ctx.tenant_id, appointment_id, update).await
    }

    // ==========================================================================
    // QUERIES
    // ==========================================================================

    pub async fn get(&self, ctx: &RequestContext, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.retry_storage("get", move || self.fetch(ctx, appointment_id)).await
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.retry_storage("list", move || self.store.list_by_date_range(ctx.tenant_id, filter))
            .await
    }

    /// Read-only probe; nothing is reserved.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn check_availability(
        &self,
        ctx: &RequestContext,
        provider_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<AvailabilityResult, AppointmentError> {
        self.lifecycle_service
            .validate_duration(duration_minutes, self.settings.max_duration_minutes)?;
        let candidate = TimeInterval::from_duration(start_time, duration_minutes)?;
        let window = candidate.padded(self.settings.lookup_window)?;

        let active = self
            .retry_storage("check_availability", move || {
                self.store.list_active(ctx.tenant_id, provider_id, window)
            })
            .await?;

        Ok(check_availability(&active, &candidate))
    }

    /// Free slots within the working hours of `date` that start after now.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn suggest_slots(
        &self,
        ctx: &RequestContext,
        provider_id: Uuid,
        date: NaiveDate,
        duration_minutes: i32,
        limit: usize,
    ) -> Result<Vec<SuggestedSlot>, AppointmentError> {
        self.lifecycle_service
            .validate_duration(duration_minutes, self.settings.max_duration_minutes)?;
        let working_hours = self.settings.working_window(date)?;

        let Some(search) = self.upcoming_part(working_hours) else {
            debug!("No remaining working hours on {}", date);
            return Ok(Vec::new());
        };

        let active = self
            .retry_storage("suggest_slots", move || {
                self.store.list_active(ctx.tenant_id, provider_id, working_hours)
            })
            .await?;

        let slots = suggest_free_slots(&active, &search, duration_minutes, self.settings.slot_step_minutes, limit)
            .into_iter()
            .map(|slot| SuggestedSlot {
                provider_id,
                start_time: slot.start(),
                end_time: slot.end(),
            })
            .collect::<Vec<_>>();

        debug!("Found {} free slots for provider {} on {}", slots.len(), provider_id, date);
        Ok(slots)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id))]
    pub async fn daily_stats(&self, ctx: &RequestContext, date: NaiveDate) -> Result<DailyStats, AppointmentError> {
        let filter = AppointmentFilter::for_day(date);
        let filter = &filter;
        let appointments = self
            .retry_storage("daily_stats", move || self.store.list_by_date_range(ctx.tenant_id, filter))
            .await?;

        Ok(aggregate_daily_stats(date, &appointments, self.clock.now()))
    }

    // ==========================================================================
    // HELPERS
    // ==========================================================================

    async fn fetch(&self, ctx: &RequestContext, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .get(ctx.tenant_id, appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound(appointment_id))
    }

    /// The part of `window` left after now, with its start snapped forward
    /// to the slot grid.
    fn upcoming_part(&self, window: TimeInterval) -> Option<TimeInterval> {
        let now = self.clock.now();
        if now <= window.start() {
            return Some(window);
        }

        let step_seconds = (self.settings.slot_step_minutes.max(1) as i64) * 60;
        let elapsed = (now - window.start()).num_seconds();
        let steps = (elapsed + step_seconds - 1) / step_seconds;
        let start = window.start().checked_add_signed(Duration::seconds(steps * step_seconds))?;

        TimeInterval::new(start, window.end()).ok()
    }

    async fn retry_storage<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, AppointmentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppointmentError>>,
    {
        let mut retries = 0u32;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && retries < self.settings.max_storage_retries => {
                    retries += 1;
                    warn!("Storage failure during {}, retrying {}/{}: {}",
                          operation, retries, self.settings.max_storage_retries, e);
                    tokio::time::sleep(self.settings.retry_backoff * retries).await;
                }
                result => return result,
            }
        }
    }

    /// Deliver `event` on a detached task; the change is already committed.
    fn dispatch(&self, event: AppointmentEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let appointment_id = event.appointment().id;
            let kind = event.kind();
            if let Err(e) = notifier.notify(event).await {
                warn!("Failed to deliver {:?} notification for appointment {}: {}", kind, appointment_id, e);
            }
        });
    }
}
