// libs/appointment-cell/src/store/supabase.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;
use shared_models::DatabaseError;

use crate::models::{
    Appointment, AppointmentChange, AppointmentError, AppointmentFilter, AppointmentStatus,
    AppointmentType, AppointmentUpdate, Cancellation, ConflictReason, TimeInterval,
};

use super::AppointmentStore;

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
const ACTIVE_STATUSES: &str = "(pending,confirmed,in_progress)";

/// PostgREST-backed store.
///
/// Overlap exclusion is enforced by the `appointments_no_overlap` exclusion
/// constraint, and compare-and-swap by filtering every PATCH on `version`.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(Arc::new(SupabaseClient::new(config)))
    }

    async fn fetch_rows(&self, query: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("{}?{}", APPOINTMENTS_PATH, query);
        let rows: Vec<AppointmentRow> = self.supabase.request(Method::GET, &path, None, None).await?;

        rows.into_iter()
            .map(|row| Appointment::try_from(row).map_err(AppointmentError::from))
            .collect()
    }

    /// Translate an exclusion violation into a conflict naming the colliding
    /// record, when it can still be found.
    async fn overlap_conflict(
        &self,
        tenant_id: Uuid,
        provider_id: Uuid,
        interval: TimeInterval,
        own_id: Uuid,
    ) -> AppointmentError {
        let conflicting = match self.list_active(tenant_id, provider_id, interval).await {
            Ok(active) => active.into_iter().find(|a| a.id != own_id).map(|a| a.id),
            Err(e) => {
                warn!("Could not look up conflicting appointment: {}", e);
                None
            }
        };

        AppointmentError::Conflict {
            appointment_id: conflicting,
            reason: ConflictReason::Overlap,
        }
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        debug!("Inserting appointment {} for provider {}", appointment.id, appointment.provider_id);

        let body = serde_json::to_value(AppointmentRow::from(&appointment))
            .map_err(|e| DatabaseError::Decode(e.to_string()))?;

        let result: Result<Vec<AppointmentRow>, DatabaseError> = self.supabase
            .request_returning(Method::POST, APPOINTMENTS_PATH, None, Some(body))
            .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if e.is_exclusion_violation() => {
                info!("Insert of appointment {} rejected by overlap constraint", appointment.id);
                return Err(self
                    .overlap_conflict(appointment.tenant_id, appointment.provider_id, appointment.interval(), appointment.id)
                    .await);
            }
            Err(e) => return Err(e.into()),
        };

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::Decode("insert returned no rows".to_string()))?;
        Ok(Appointment::try_from(row)?)
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!(
            "{}?id=eq.{}&tenant_id=eq.{}&version=eq.{}",
            APPOINTMENTS_PATH, appointment_id, tenant_id, update.expected_version
        );

        let mut body = json!({
            "version": update.expected_version + 1,
            "updated_at": update.updated_at,
        });
        match &update.change {
            AppointmentChange::Reschedule { start_time, duration_minutes } => {
                body["start_time"] = json!(start_time);
                body["duration_minutes"] = json!(duration_minutes);
            }
            AppointmentChange::Status { status, cancellation } => {
                body["status"] = json!(status);
                body["cancelled_by"] = json!(cancellation.as_ref().map(|c| c.cancelled_by));
                body["cancel_reason"] = json!(cancellation.as_ref().map(|c| c.reason.clone()));
                body["cancelled_at"] = json!(cancellation.as_ref().map(|c| c.cancelled_at));
            }
        }

        let result: Result<Vec<AppointmentRow>, DatabaseError> = self.supabase
            .request_returning(Method::PATCH, &path, None, Some(body))
            .await;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) if e.is_exclusion_violation() => {
                let AppointmentChange::Reschedule { start_time, duration_minutes } = update.change else {
                    return Err(e.into());
                };
                let current = self.get(tenant_id, appointment_id).await?
                    .ok_or(AppointmentError::NotFound(appointment_id))?;
                let interval = TimeInterval::from_duration(start_time, duration_minutes)?;
                return Err(self
                    .overlap_conflict(tenant_id, current.provider_id, interval, appointment_id)
                    .await);
            }
            Err(e) => return Err(e.into()),
        };

        match rows.into_iter().next() {
            Some(row) => Ok(Appointment::try_from(row)?),
            // No row matched: either it does not exist for this tenant or
            // the version moved on.
            None => match self.get(tenant_id, appointment_id).await? {
                Some(current) => {
                    warn!("Stale update of appointment {}: expected version {}, found {}",
                          appointment_id, update.expected_version, current.version);
                    Err(AppointmentError::stale(appointment_id))
                }
                None => Err(AppointmentError::NotFound(appointment_id)),
            },
        }
    }

    async fn get(&self, tenant_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let query = format!("id=eq.{}&tenant_id=eq.{}&limit=1", appointment_id, tenant_id);
        Ok(self.fetch_rows(&query).await?.into_iter().next())
    }

    async fn list_active(
        &self,
        tenant_id: Uuid,
        provider_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let query = format!(
            "tenant_id=eq.{}&provider_id=eq.{}&status=in.{}&start_time=lt.{}&end_time=gt.{}&order=start_time.asc,id.asc",
            tenant_id, provider_id, ACTIVE_STATUSES,
            timestamp(window.end()), timestamp(window.start())
        );
        self.fetch_rows(&query).await
    }

    async fn list_by_date_range(
        &self,
        tenant_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("tenant_id=eq.{}", tenant_id),
            format!("start_time=gte.{}", timestamp(filter.from)),
            format!("start_time=lt.{}", timestamp(filter.to)),
        ];

        if let Some(provider_id) = filter.provider_id {
            query_parts.push(format!("provider_id=eq.{}", provider_id));
        }
        if let Some(patient_id) = filter.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(status) = filter.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        query_parts.push("order=start_time.asc,id.asc".to_string());

        self.fetch_rows(&query_parts.join("&")).await
    }
}

/// `Z`-suffixed so the value needs no escaping inside a query string.
fn timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Column layout of the `appointments` table. The trigger-maintained
/// `end_time` column is ignored on read and never written.
#[derive(Debug, Serialize, Deserialize)]
struct AppointmentRow {
    id: Uuid,
    tenant_id: Uuid,
    patient_id: Uuid,
    provider_id: Uuid,
    start_time: DateTime<Utc>,
    duration_minutes: i32,
    appointment_type: AppointmentType,
    status: AppointmentStatus,
    location: Option<String>,
    reason: Option<String>,
    notes: Option<String>,
    cancelled_by: Option<Uuid>,
    cancel_reason: Option<String>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    created_by: Uuid,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl From<&Appointment> for AppointmentRow {
    fn from(appointment: &Appointment) -> Self {
        let cancellation = appointment.cancellation.as_ref();
        Self {
            id: appointment.id,
            tenant_id: appointment.tenant_id,
            patient_id: appointment.patient_id,
            provider_id: appointment.provider_id,
            start_time: appointment.start_time,
            duration_minutes: appointment.duration_minutes,
            appointment_type: appointment.appointment_type,
            status: appointment.status,
            location: appointment.location.clone(),
            reason: appointment.reason.clone(),
            notes: appointment.notes.clone(),
            cancelled_by: cancellation.map(|c| c.cancelled_by),
            cancel_reason: cancellation.map(|c| c.reason.clone()),
            cancelled_at: cancellation.map(|c| c.cancelled_at),
            created_at: appointment.created_at,
            created_by: appointment.created_by,
            updated_at: appointment.updated_at,
            version: appointment.version,
        }
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DatabaseError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let cancellation = match (row.status, row.cancelled_by, row.cancel_reason, row.cancelled_at) {
            (AppointmentStatus::Cancelled, Some(cancelled_by), Some(reason), Some(cancelled_at)) => {
                Some(Cancellation { cancelled_by, reason, cancelled_at })
            }
            (AppointmentStatus::Cancelled, ..) => {
                return Err(DatabaseError::Decode(format!(
                    "cancelled appointment {} is missing cancellation metadata", row.id
                )));
            }
            (_, None, None, None) => None,
            (status, ..) => {
                return Err(DatabaseError::Decode(format!(
                    "appointment {} in status {} carries cancellation metadata", row.id, status
                )));
            }
        };

        Ok(Appointment {
            id: row.id,
            tenant_id: row.tenant_id,
            patient_id: row.patient_id,
            provider_id: row.provider_id,
            start_time: row.start_time,
            duration_minutes: row.duration_minutes,
            appointment_type: row.appointment_type,
            status: row.status,
            location: row.location,
            reason: row.reason,
            notes: row.notes,
            cancellation,
            created_at: row.created_at,
            created_by: row.created_by,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn row_json(status: &str) -> Value {
        json!({
            "id": Uuid::new_v4(),
            "tenant_id": Uuid::new_v4(),
            "patient_id": Uuid::new_v4(),
            "provider_id": Uuid::new_v4(),
            "start_time": "2026-03-02T09:00:00+00:00",
            "end_time": "2026-03-02T09:30:00+00:00",
            "duration_minutes": 30,
            "appointment_type": "follow_up",
            "status": status,
            "location": null,
            "reason": null,
            "notes": null,
            "cancelled_by": null,
            "cancel_reason": null,
            "cancelled_at": null,
            "created_at": "2026-03-01T12:00:00+00:00",
            "created_by": Uuid::new_v4(),
            "updated_at": "2026-03-01T12:00:00+00:00",
            "version": 1
        })
    }

    #[test]
    fn test_row_conversion_ignores_end_time() {
        let row: AppointmentRow = serde_json::from_value(row_json("confirmed")).unwrap();
        let appointment = Appointment::try_from(row).unwrap();

        assert_eq!(appointment.status, AppointmentStatus::Confirmed);
        assert_eq!(appointment.appointment_type, AppointmentType::FollowUp);
        assert_eq!(appointment.end_time().to_rfc3339(), "2026-03-02T09:30:00+00:00");
    }

    #[test]
    fn test_cancelled_row_requires_metadata() {
        let row: AppointmentRow = serde_json::from_value(row_json("cancelled")).unwrap();
        assert!(matches!(Appointment::try_from(row), Err(DatabaseError::Decode(_))));

        let mut json = row_json("cancelled");
        json["cancelled_by"] = json!(Uuid::new_v4());
        json["cancel_reason"] = json!("sick");
        json["cancelled_at"] = json!("2026-03-02T08:00:00+00:00");
        let row: AppointmentRow = serde_json::from_value(json).unwrap();
        let appointment = Appointment::try_from(row).unwrap();
        assert_eq!(appointment.cancellation.unwrap().reason, "sick");
    }

    #[test]
    fn test_active_row_rejects_stray_metadata() {
        let mut json = row_json("pending");
        json["cancel_reason"] = json!("leftover");
        let row: AppointmentRow = serde_json::from_value(json).unwrap();
        assert!(Appointment::try_from(row).is_err());
    }

    #[test]
    fn test_timestamp_has_no_plus_sign() {
        let instant = DateTime::parse_from_rfc3339("2026-03-02T09:00:00+00:00").unwrap().with_timezone(&Utc);
        assert_eq!(timestamp(instant), "2026-03-02T09:00:00.000000Z");
    }
}
