use std::sync::{Arc, Mutex};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::{Clock, RequestContext};

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub max_storage_retries: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            max_storage_retries: 3,
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_service_role_key: None,
            redis_url: None,
            reminder_queue_key: "test_appointment_reminders:pending".to_string(),
            scheduling_lookup_window_hours: 24,
            scheduling_max_storage_retries: self.max_storage_retries,
            scheduling_retry_backoff_ms: 0,
            scheduling_max_duration_minutes: 480,
            scheduling_slot_step_minutes: 15,
            scheduling_day_start_hour: 8,
            scheduling_day_end_hour: 20,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Clock frozen at a chosen instant; `advance` moves it forward.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn at(date: NaiveDate, hour: u32, minute: u32) -> Self {
        Self::new(at(date, hour, minute))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Tenant-local wall clock time on `date`.
pub fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let naive = date.and_hms_opt(hour, minute, 0).unwrap_or_default();
    Utc.from_utc_datetime(&naive)
}

pub struct TestTenant {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
}

impl Default for TestTenant {
    fn default() -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
        }
    }
}

impl TestTenant {
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.tenant_id, self.actor_id)
    }

    /// Same tenant, different acting user.
    pub fn context_for(&self, actor_id: Uuid) -> RequestContext {
        RequestContext::new(self.tenant_id, actor_id)
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    /// An `appointments` row as PostgREST returns it.
    pub fn appointment_row(
        id: Uuid,
        tenant_id: Uuid,
        provider_id: Uuid,
        start_time: DateTime<Utc>,
        duration_minutes: i32,
        status: &str,
        version: i64,
    ) -> Value {
        let end_time = start_time + Duration::minutes(duration_minutes as i64);
        json!({
            "id": id,
            "tenant_id": tenant_id,
            "patient_id": Uuid::new_v4(),
            "provider_id": provider_id,
            "start_time": start_time.to_rfc3339(),
            "end_time": end_time.to_rfc3339(),
            "duration_minutes": duration_minutes,
            "appointment_type": "general_consultation",
            "status": status,
            "location": null,
            "reason": null,
            "notes": null,
            "cancelled_by": null,
            "cancel_reason": null,
            "cancelled_at": null,
            "created_at": "2026-01-01T00:00:00+00:00",
            "created_by": Uuid::new_v4(),
            "updated_at": "2026-01-01T00:00:00+00:00",
            "version": version
        })
    }

    pub fn cancelled_row(
        id: Uuid,
        tenant_id: Uuid,
        provider_id: Uuid,
        start_time: DateTime<Utc>,
        cancelled_by: Uuid,
        reason: &str,
    ) -> Value {
        let mut row = Self::appointment_row(id, tenant_id, provider_id, start_time, 30, "cancelled", 2);
        row["cancelled_by"] = json!(cancelled_by);
        row["cancel_reason"] = json!(reason);
        row["cancelled_at"] = json!("2026-01-02T00:00:00+00:00");
        row
    }

    pub fn exclusion_violation() -> Value {
        json!({
            "code": "23P01",
            "details": "Key conflicts with existing key.",
            "hint": null,
            "message": "conflicting key value violates exclusion constraint \"appointments_no_overlap\""
        })
    }

    pub fn error_response(message: &str, code: &str) -> Value {
        json!({
            "code": code,
            "details": null,
            "hint": null,
            "message": message
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = TestConfig::default();
        let app_config = config.to_app_config();

        assert_eq!(app_config.supabase_url, "http://localhost:54321");
        assert_eq!(app_config.supabase_anon_key, "test-anon-key");
        assert_eq!(app_config.scheduling_retry_backoff_ms, 0);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let clock = FixedClock::at(day, 9, 0);
        assert_eq!(clock.now(), at(day, 9, 0));

        clock.advance(Duration::minutes(45));
        assert_eq!(clock.now(), at(day, 9, 45));
    }

    #[test]
    fn test_appointment_row_derives_end_time() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let row = MockSupabaseResponses::appointment_row(
            Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), at(day, 9, 0), 30, "pending", 1,
        );

        assert_eq!(row["end_time"], json!(at(day, 9, 30).to_rfc3339()));
        assert_eq!(row["status"], "pending");
    }
}
