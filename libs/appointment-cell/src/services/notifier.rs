// libs/appointment-cell/src/services/notifier.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::Appointment;

/// Committed state changes other systems may react to.
#[derive(Debug, Clone, PartialEq)]
pub enum AppointmentEvent {
    Booked(Appointment),
    Rescheduled {
        appointment: Appointment,
        previous_start: DateTime<Utc>,
    },
    Cancelled(Appointment),
}

impl AppointmentEvent {
    pub fn appointment(&self) -> &Appointment {
        match self {
            AppointmentEvent::Booked(appointment) => appointment,
            AppointmentEvent::Rescheduled { appointment, .. } => appointment,
            AppointmentEvent::Cancelled(appointment) => appointment,
        }
    }

    pub fn kind(&self) -> ReminderKind {
        match self {
            AppointmentEvent::Booked(_) => ReminderKind::Booked,
            AppointmentEvent::Rescheduled { .. } => ReminderKind::Rescheduled,
            AppointmentEvent::Cancelled(_) => ReminderKind::Cancelled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound channel for [`AppointmentEvent`]s.
///
/// Called only after the change has committed; a failure here never undoes it.
#[async_trait]
pub trait AppointmentNotifier: Send + Sync {
    async fn notify(&self, event: AppointmentEvent) -> Result<(), NotifierError>;
}

/// Used when no reminder queue is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl AppointmentNotifier for LoggingNotifier {
    async fn notify(&self, event: AppointmentEvent) -> Result<(), NotifierError> {
        let appointment = event.appointment();
        info!("Appointment {} {:?} for provider {} at {}",
              appointment.id, event.kind(), appointment.provider_id, appointment.start_time);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    Booked,
    Rescheduled,
    Cancelled,
}

/// Payload pushed onto the reminder queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderJob {
    pub job_id: Uuid,
    pub kind: ReminderKind,
    pub appointment_id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub previous_start: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl ReminderJob {
    pub fn from_event(event: &AppointmentEvent) -> Self {
        let appointment = event.appointment();
        let previous_start = match event {
            AppointmentEvent::Rescheduled { previous_start, .. } => Some(*previous_start),
            _ => None,
        };

        Self {
            job_id: Uuid::new_v4(),
            kind: event.kind(),
            appointment_id: appointment.id,
            tenant_id: appointment.tenant_id,
            patient_id: appointment.patient_id,
            provider_id: appointment.provider_id,
            start_time: appointment.start_time,
            previous_start,
            cancel_reason: appointment.cancellation.as_ref().map(|c| c.reason.clone()),
            version: appointment.version,
            created_at: appointment.updated_at,
        }
    }
}

/// Pushes a [`ReminderJob`] per event onto a Redis list for the reminder
/// workers to pop.
pub struct RedisReminderNotifier {
    pool: Pool,
    queue_key: String,
}

impl RedisReminderNotifier {
    pub fn new(pool: Pool, queue_key: impl Into<String>) -> Self {
        Self {
            pool,
            queue_key: queue_key.into(),
        }
    }

    /// `Ok(None)` when no Redis URL is configured. Connections are opened
    /// lazily, so this does not touch the network.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, NotifierError> {
        let redis_url = match config.redis_url.clone() {
            Some(url) if config.is_reminder_queue_configured() => url,
            _ => return Ok(None),
        };

        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| NotifierError::Pool(format!("Pool creation error: {}", e)))?;

        info!("Reminder queue configured on key {}", config.reminder_queue_key);
        Ok(Some(Self::new(pool, config.reminder_queue_key.clone())))
    }

    async fn get_connection(&self) -> Result<Connection, NotifierError> {
        self.pool.get().await.map_err(|e| NotifierError::Pool(e.to_string()))
    }
}

#[async_trait]
impl AppointmentNotifier for RedisReminderNotifier {
    async fn notify(&self, event: AppointmentEvent) -> Result<(), NotifierError> {
        let job = ReminderJob::from_event(&event);
        let payload = serde_json::to_string(&job)?;

        let mut conn = self.get_connection().await?;
        let _: () = conn.lpush(&self.queue_key, payload).await?;

        debug!("Reminder job {} queued for appointment {}", job.job_id, job.appointment_id);
        Ok(())
    }
}
