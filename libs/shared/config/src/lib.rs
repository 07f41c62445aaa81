use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: Option<String>,
    pub redis_url: Option<String>,
    pub reminder_queue_key: String,
    pub scheduling_lookup_window_hours: i64,
    pub scheduling_max_storage_retries: u32,
    pub scheduling_retry_backoff_ms: u64,
    pub scheduling_max_duration_minutes: i32,
    pub scheduling_slot_step_minutes: i32,
    pub scheduling_day_start_hour: u32,
    pub scheduling_day_end_hour: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            reminder_queue_key: env::var("REMINDER_QUEUE_KEY")
                .unwrap_or_else(|_| "appointment_reminders:pending".to_string()),
            scheduling_lookup_window_hours: parse_or("SCHEDULING_LOOKUP_WINDOW_HOURS", 24),
            scheduling_max_storage_retries: parse_or("SCHEDULING_MAX_STORAGE_RETRIES", 3),
            scheduling_retry_backoff_ms: parse_or("SCHEDULING_RETRY_BACKOFF_MS", 100),
            scheduling_max_duration_minutes: parse_or("SCHEDULING_MAX_DURATION_MINUTES", 480),
            scheduling_slot_step_minutes: parse_or("SCHEDULING_SLOT_STEP_MINUTES", 15),
            scheduling_day_start_hour: parse_or("SCHEDULING_DAY_START_HOUR", 8),
            scheduling_day_end_hour: parse_or("SCHEDULING_DAY_END_HOUR", 20),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }

    pub fn is_reminder_queue_configured(&self) -> bool {
        self.redis_url.as_deref().map_or(false, |url| !url.is_empty())
    }

    /// Key sent to PostgREST; the service role key wins when present so the
    /// engine is not subject to end-user row level security.
    pub fn supabase_api_key(&self) -> &str {
        self.supabase_service_role_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .unwrap_or(&self.supabase_anon_key)
    }
}

fn parse_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys(anon: &str, service: Option<&str>) -> AppConfig {
        AppConfig {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: anon.to_string(),
            supabase_service_role_key: service.map(str::to_string),
            redis_url: None,
            reminder_queue_key: "appointment_reminders:pending".to_string(),
            scheduling_lookup_window_hours: 24,
            scheduling_max_storage_retries: 3,
            scheduling_retry_backoff_ms: 100,
            scheduling_max_duration_minutes: 480,
            scheduling_slot_step_minutes: 15,
            scheduling_day_start_hour: 8,
            scheduling_day_end_hour: 20,
        }
    }

    #[test]
    fn test_service_role_key_preferred() {
        let config = config_with_keys("anon", Some("service"));
        assert_eq!(config.supabase_api_key(), "service");

        let config = config_with_keys("anon", Some(""));
        assert_eq!(config.supabase_api_key(), "anon");

        let config = config_with_keys("anon", None);
        assert_eq!(config.supabase_api_key(), "anon");
    }

    #[test]
    fn test_reminder_queue_configured() {
        let mut config = config_with_keys("anon", None);
        assert!(!config.is_reminder_queue_configured());

        config.redis_url = Some("redis://localhost:6379".to_string());
        assert!(config.is_reminder_queue_configured());
    }

    #[test]
    fn test_parse_or_falls_back_on_missing_variable() {
        let value: i64 = parse_or("SCHEDULING_TEST_VARIABLE_THAT_IS_NEVER_SET", 42);
        assert_eq!(value, 42);
    }
}
