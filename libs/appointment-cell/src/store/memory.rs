// libs/appointment-cell/src/store/memory.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::DatabaseError;

use crate::models::{Appointment, AppointmentError, AppointmentFilter, AppointmentUpdate, TimeInterval};
use crate::services::conflict::check_availability;

use super::AppointmentStore;

/// `(tenant_id, provider_id)`
type CalendarKey = (Uuid, Uuid);
type Calendar = Arc<Mutex<Vec<Appointment>>>;

/// Process-local store.
///
/// Each provider's calendar sits behind its own mutex; the overlap check and
/// the write happen while holding it, which serialises writers per provider
/// and leaves other providers unaffected.
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    calendars: RwLock<HashMap<CalendarKey, Calendar>>,
    /// `(tenant_id, appointment_id)` -> provider whose calendar holds it.
    locations: RwLock<HashMap<(Uuid, Uuid), Uuid>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn calendar(&self, key: CalendarKey) -> Option<Calendar> {
        self.calendars.read().await.get(&key).cloned()
    }

    async fn calendar_or_create(&self, key: CalendarKey) -> Calendar {
        if let Some(calendar) = self.calendar(key).await {
            return calendar;
        }
        let mut calendars = self.calendars.write().await;
        calendars.entry(key).or_default().clone()
    }

    async fn tenant_calendars(&self, tenant_id: Uuid, provider_id: Option<Uuid>) -> Vec<Calendar> {
        self.calendars
            .read()
            .await
            .iter()
            .filter(|((tenant, provider), _)| {
                *tenant == tenant_id && provider_id.map_or(true, |id| id == *provider)
            })
            .map(|(_, calendar)| calendar.clone())
            .collect()
    }
}

fn duplicate_id(appointment_id: Uuid) -> AppointmentError {
    AppointmentError::StorageFailure(DatabaseError::ConstraintViolation {
        code: "23505".to_string(),
        message: format!("appointment {} already exists", appointment_id),
    })
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let calendar = self
            .calendar_or_create((appointment.tenant_id, appointment.provider_id))
            .await;
        let mut entries = calendar.lock().await;
        let location_key = (appointment.tenant_id, appointment.id);
        if self.locations.read().await.contains_key(&location_key) {
            return Err(duplicate_id(appointment.id));
        }

        // Only the provider's own mutex is held during the scan.
        if appointment.is_active() {
            if let Some(existing) = check_availability(&entries, &appointment.interval()).conflict {
                debug!("Rejecting appointment {}: overlaps {}", appointment.id, existing.id);
                return Err(AppointmentError::overlap(existing.id));
            }
        }

        {
            let mut locations = self.locations.write().await;
            if locations.contains_key(&location_key) {
                return Err(duplicate_id(appointment.id));
            }
            locations.insert(location_key, appointment.provider_id);
        }
        entries.push(appointment.clone());
        Ok(appointment)
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        appointment_id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, AppointmentError> {
        let provider_id = self
            .locations
            .read()
            .await
            .get(&(tenant_id, appointment_id))
            .copied()
            .ok_or(AppointmentError::NotFound(appointment_id))?;
        let calendar = self
            .calendar((tenant_id, provider_id))
            .await
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        let mut entries = calendar.lock().await;
        let index = entries
            .iter()
            .position(|a| a.id == appointment_id)
            .ok_or(AppointmentError::NotFound(appointment_id))?;

        let current = &entries[index];
        if current.version != update.expected_version {
            warn!("Stale update of appointment {}: expected version {}, found {}",
                  appointment_id, update.expected_version, current.version);
            return Err(AppointmentError::stale(appointment_id));
        }

        let next = current.apply(&update);
        if next.is_active() {
            let others: Vec<Appointment> = entries
                .iter()
                .filter(|a| a.id != appointment_id)
                .cloned()
                .collect();
            if let Some(existing) = check_availability(&others, &next.interval()).conflict {
                return Err(AppointmentError::overlap(existing.id));
            }
        }

        entries[index] = next.clone();
        Ok(next)
    }

    async fn get(&self, tenant_id: Uuid, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let provider_id = match self.locations.read().await.get(&(tenant_id, appointment_id)) {
            Some(provider_id) => *provider_id,
            None => return Ok(None),
        };
        let Some(calendar) = self.calendar((tenant_id, provider_id)).await else {
            return Ok(None);
        };

        let entries = calendar.lock().await;
        Ok(entries.iter().find(|a| a.id == appointment_id).cloned())
    }

    async fn list_active(
        &self,
        tenant_id: Uuid,
        provider_id: Uuid,
        window: TimeInterval,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let Some(calendar) = self.calendar((tenant_id, provider_id)).await else {
            return Ok(Vec::new());
        };

        let entries = calendar.lock().await;
        let mut active: Vec<Appointment> = entries
            .iter()
            .filter(|a| a.is_active() && a.interval().overlaps(&window))
            .cloned()
            .collect();
        active.sort_by_key(|a| (a.start_time, a.id));
        Ok(active)
    }

    async fn list_by_date_range(
        &self,
        tenant_id: Uuid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut matching = Vec::new();
        for calendar in self.tenant_calendars(tenant_id, filter.provider_id).await {
            let entries = calendar.lock().await;
            matching.extend(entries.iter().filter(|a| filter.matches(a)).cloned());
        }
        matching.sort_by_key(|a| (a.start_time, a.id));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::{AppointmentChange, AppointmentStatus, AppointmentType, ConflictReason};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
    }

    fn appointment(tenant_id: Uuid, provider_id: Uuid, start: DateTime<Utc>, minutes: i32) -> Appointment {
        Appointment {
            id: Uuid::new_v4(),
            tenant_id,
            patient_id: Uuid::new_v4(),
            provider_id,
            start_time: start,
            duration_minutes: minutes,
            appointment_type: AppointmentType::GeneralConsultation,
            status: AppointmentStatus::Pending,
            location: None,
            reason: None,
            notes: None,
            cancellation: None,
            created_at: at(7, 0),
            created_by: Uuid::new_v4(),
            updated_at: at(7, 0),
            version: 1,
        }
    }

    fn reschedule(version: i64, start: DateTime<Utc>, minutes: i32) -> AppointmentUpdate {
        AppointmentUpdate {
            expected_version: version,
            updated_at: at(7, 30),
            change: AppointmentChange::Reschedule { start_time: start, duration_minutes: minutes },
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_overlap() {
        let store = InMemoryAppointmentStore::new();
        let (tenant, provider) = (Uuid::new_v4(), Uuid::new_v4());

        let first = store.insert(appointment(tenant, provider, at(9, 0), 30)).await.unwrap();
        let result = store.insert(appointment(tenant, provider, at(9, 15), 30)).await;

        assert_eq!(result, Err(AppointmentError::overlap(first.id)));
        assert!(store.insert(appointment(tenant, provider, at(9, 30), 30)).await.is_ok());
    }

    #[tokio::test]
    async fn test_providers_and_tenants_do_not_interfere() {
        let store = InMemoryAppointmentStore::new();
        let (tenant, provider) = (Uuid::new_v4(), Uuid::new_v4());

        store.insert(appointment(tenant, provider, at(9, 0), 30)).await.unwrap();
        assert!(store.insert(appointment(tenant, Uuid::new_v4(), at(9, 0), 30)).await.is_ok());
        assert!(store.insert(appointment(Uuid::new_v4(), provider, at(9, 0), 30)).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_calendar_does_not_block_other_providers() {
        let store = Arc::new(InMemoryAppointmentStore::new());
        let (tenant, busy, idle) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let existing = store.insert(appointment(tenant, busy, at(8, 0), 30)).await.unwrap();

        let busy_calendar = store.calendar((tenant, busy)).await.unwrap();
        let guard = busy_calendar.lock().await;

        let parked = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.insert(appointment(tenant, busy, at(9, 0), 30)).await })
        };
        tokio::task::yield_now().await;

        let timeout = std::time::Duration::from_secs(2);
        let other = tokio::time::timeout(timeout, store.insert(appointment(tenant, idle, at(9, 0), 30)))
            .await
            .expect("insert for another provider waited on a busy calendar")
            .unwrap();
        let fetched = tokio::time::timeout(timeout, store.get(tenant, other.id))
            .await
            .expect("lookup waited on a busy calendar")
            .unwrap();
        assert_eq!(fetched, Some(other));
        assert!(!parked.is_finished());

        drop(guard);
        assert!(parked.await.unwrap().is_ok());
        assert_eq!(store.get(tenant, existing.id).await.unwrap(), Some(existing));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_a_storage_failure() {
        let store = InMemoryAppointmentStore::new();
        let original = appointment(Uuid::new_v4(), Uuid::new_v4(), at(9, 0), 30);
        store.insert(original.clone()).await.unwrap();

        let mut duplicate = original.clone();
        duplicate.start_time = at(14, 0);
        assert_matches!(
            store.insert(duplicate).await,
            Err(AppointmentError::StorageFailure(DatabaseError::ConstraintViolation { .. }))
        );
    }

    #[tokio::test]
    async fn test_update_checks_version() {
        let store = InMemoryAppointmentStore::new();
        let stored = store.insert(appointment(Uuid::new_v4(), Uuid::new_v4(), at(9, 0), 30)).await.unwrap();

        let moved = store
            .update(stored.tenant_id, stored.id, reschedule(1, at(11, 0), 30))
            .await
            .unwrap();
        assert_eq!(moved.version, 2);
        assert_eq!(moved.start_time, at(11, 0));

        assert_matches!(
            store.update(stored.tenant_id, stored.id, reschedule(1, at(12, 0), 30)).await,
            Err(AppointmentError::Conflict { reason: ConflictReason::StaleVersion, .. })
        );
    }

    #[tokio::test]
    async fn test_reschedule_may_overlap_its_own_old_slot() {
        let store = InMemoryAppointmentStore::new();
        let stored = store.insert(appointment(Uuid::new_v4(), Uuid::new_v4(), at(9, 0), 30)).await.unwrap();

        let moved = store
            .update(stored.tenant_id, stored.id, reschedule(1, at(9, 15), 30))
            .await
            .unwrap();
        assert_eq!(moved.end_time(), at(9, 45));
    }

    #[tokio::test]
    async fn test_reschedule_onto_other_booking_conflicts() {
        let store = InMemoryAppointmentStore::new();
        let (tenant, provider) = (Uuid::new_v4(), Uuid::new_v4());
        let blocker = store.insert(appointment(tenant, provider, at(10, 0), 60)).await.unwrap();
        let mover = store.insert(appointment(tenant, provider, at(9, 0), 30)).await.unwrap();

        let result = store.update(tenant, mover.id, reschedule(1, at(10, 30), 30)).await;
        assert_eq!(result, Err(AppointmentError::overlap(blocker.id)));

        let unchanged = store.get(tenant, mover.id).await.unwrap().unwrap();
        assert_eq!(unchanged, mover);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let store = InMemoryAppointmentStore::new();
        let stored = store.insert(appointment(Uuid::new_v4(), Uuid::new_v4(), at(9, 0), 30)).await.unwrap();
        let intruder = Uuid::new_v4();

        assert_eq!(store.get(intruder, stored.id).await.unwrap(), None);
        assert_eq!(
            store.update(intruder, stored.id, reschedule(1, at(11, 0), 30)).await,
            Err(AppointmentError::NotFound(stored.id))
        );
        let window = TimeInterval::for_day(at(9, 0).date_naive());
        assert!(store.list_active(intruder, stored.provider_id, window).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_active_skips_terminal_and_orders_by_start() {
        let store = InMemoryAppointmentStore::new();
        let (tenant, provider) = (Uuid::new_v4(), Uuid::new_v4());

        let late = store.insert(appointment(tenant, provider, at(15, 0), 30)).await.unwrap();
        let early = store.insert(appointment(tenant, provider, at(9, 0), 30)).await.unwrap();
        let mut done = appointment(tenant, provider, at(12, 0), 30);
        done.status = AppointmentStatus::Completed;
        store.insert(done).await.unwrap();

        let window = TimeInterval::for_day(at(9, 0).date_naive());
        let active = store.list_active(tenant, provider, window).await.unwrap();
        let ids: Vec<_> = active.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);

        let all = store
            .list_by_date_range(tenant, &AppointmentFilter::between(window))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }
}
