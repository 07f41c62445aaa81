use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::DatabaseError;

/// Ask PostgREST to echo the written rows back.
pub const RETURN_REPRESENTATION: &str = "return=representation";

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_api_key().to_string(),
        }
    }

    fn get_headers(&self, auth_token: Option<&str>, prefer: Option<&str>) -> Result<HeaderMap, DatabaseError> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", header_value(&self.api_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let bearer = auth_token.unwrap_or(&self.api_key);
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", bearer))?);

        if let Some(prefer) = prefer {
            headers.insert("Prefer", header_value(prefer)?);
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            auth_token: Option<&str>, body: Option<Value>)
                            -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.send(method, path, auth_token, body, None).await
    }

    /// Same as [`request`](Self::request) but returns the rows touched by a
    /// write, which is how callers observe compare-and-swap outcomes.
    pub async fn request_returning<T>(&self, method: Method, path: &str,
                                      auth_token: Option<&str>, body: Option<Value>)
                                      -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        self.send(method, path, auth_token, body, Some(RETURN_REPRESENTATION)).await
    }

    async fn send<T>(&self, method: Method, path: &str, auth_token: Option<&str>,
                     body: Option<Value>, prefer: Option<&str>) -> Result<T, DatabaseError>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let headers = self.get_headers(auth_token, prefer)?;

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await
            .map_err(|e| DatabaseError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await
                .map_err(|e| DatabaseError::Transport(e.to_string()))?;
            error!("API error ({}): {}", status, error_text);

            return Err(DatabaseError::from_response(status.as_u16(), &error_text));
        }

        response.json::<T>().await
            .map_err(|e| DatabaseError::Decode(e.to_string()))
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, DatabaseError> {
    HeaderValue::from_str(raw)
        .map_err(|e| DatabaseError::Api { status: 0, message: format!("invalid header value: {}", e) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wiremock::matchers::{header, method, path};

    fn config_for(url: &str) -> AppConfig {
        AppConfig {
            supabase_url: format!("{}/", url),
            supabase_anon_key: "test-anon-key".to_string(),
            supabase_service_role_key: None,
            redis_url: None,
            reminder_queue_key: "appointment_reminders:pending".to_string(),
            scheduling_lookup_window_hours: 24,
            scheduling_max_storage_retries: 3,
            scheduling_retry_backoff_ms: 0,
            scheduling_max_duration_minutes: 480,
            scheduling_slot_step_minutes: 15,
            scheduling_day_start_hour: 8,
            scheduling_day_end_hour: 20,
        }
    }

    #[tokio::test]
    async fn test_request_sends_api_key_and_prefer_header() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/appointments"))
            .and(header("apikey", "test-anon-key"))
            .and(header("Authorization", "Bearer test-anon-key"))
            .and(header("Prefer", RETURN_REPRESENTATION))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": 1 }])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = SupabaseClient::new(&config_for(&mock_server.uri()));
        let rows: Vec<Value> = client
            .request_returning(Method::POST, "/rest/v1/appointments", None, Some(json!({ "id": 1 })))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(client.get_base_url(), mock_server.uri());
    }

    #[tokio::test]
    async fn test_error_body_is_classified() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23P01",
                "message": "conflicting key value violates exclusion constraint"
            })))
            .mount(&mock_server)
            .await;

        let client = SupabaseClient::new(&config_for(&mock_server.uri()));
        let result: Result<Vec<Value>, DatabaseError> = client
            .request(Method::POST, "/rest/v1/appointments", None, Some(json!({})))
            .await;

        assert!(result.unwrap_err().is_exclusion_violation());
    }
}
