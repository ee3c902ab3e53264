//! Home Assistant REST API host
//!
//! Entity lookups, template rendering, service calls and diagnostic state
//! writes map directly onto the REST API. Change tracking polls the tracked
//! entities and compares their `last_updated` timestamps.

use super::{
    EntityState, ServiceCaller, StatePublisher, StateStore, StateTracker, Subscription,
    TemplateRenderer, TemplateVariables,
};
use crate::config::HomeAssistantConfig;
use crate::error::{BalancerError, Result};
use crate::scheduler::RefreshRequester;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Home Assistant REST API client
#[derive(Clone)]
pub struct HomeAssistantClient {
    base_url: String,
    token: String,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
    watch_interval: Duration,
}

impl HomeAssistantClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, token, Duration::from_secs(10))
    }

    fn with_timeout(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BalancerError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            watch_interval: Duration::from_secs(2),
        })
    }

    /// Create a client from configuration, falling back to the supervisor token
    pub fn from_config(config: &HomeAssistantConfig) -> Result<Self> {
        let token = config.resolve_token().ok_or_else(|| {
            BalancerError::config(
                "Home Assistant token not found in config, SUPERVISOR_TOKEN or HA_TOKEN",
            )
        })?;
        Ok(Self::with_timeout(
            config.resolve_base_url(),
            token,
            Duration::from_millis(config.request_timeout_ms),
        )?
        .with_retry_config(config.max_retries, Duration::from_millis(config.retry_delay_ms))
        .with_watch_interval(Duration::from_millis(config.state_watch_interval_ms)))
    }

    /// Set custom retry configuration
    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Set how often tracked entities are polled
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut>(&self, mut request_fn: F) -> Result<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempts = 0;
        let mut delay = self.retry_delay;

        loop {
            attempts += 1;
            match request_fn().await {
                Ok(response) => return Ok(response),
                Err(e) if attempts >= self.max_retries => {
                    error!("Request failed after {} attempts: {}", attempts, e);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempts, self.max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        self.retry_request(|| async {
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .json(body)
                .send()
                .await
        })
        .await
    }

    async fn status_error(context: &str, response: reqwest::Response) -> BalancerError {
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return BalancerError::host(format!("{}: authentication failed", context));
        }
        let text = response.text().await.unwrap_or_default();
        BalancerError::host(format!("{}: status {} {}", context, status, text))
    }

    /// Render a template and return the raw text
    async fn render_text(&self, template: &str, variables: &TemplateVariables) -> Result<String> {
        let mut body = json!({ "template": template });
        if !variables.is_empty() {
            body["variables"] = serde_json::to_value(variables)?;
        }
        let response = self.post("/api/template", &body).await?;
        match response.status() {
            StatusCode::OK => Ok(response.text().await?),
            StatusCode::BAD_REQUEST => {
                let text = response.text().await.unwrap_or_default();
                Err(BalancerError::template(format!(
                    "Template '{}' failed: {}",
                    template, text
                )))
            }
            _ => Err(Self::status_error("Template render", response).await),
        }
    }
}

/// Interpret rendered template text, keeping non-JSON output as a string
pub fn parse_rendered(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| Value::String(text.trim().to_string()))
}

#[async_trait::async_trait]
impl StateStore for HomeAssistantClient {
    async fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        trace!("Getting state for entity: {}", entity_id);

        let response = self
            .retry_request(|| async { self.client.get(&url).bearer_auth(&self.token).send().await })
            .await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<EntityState>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::status_error(entity_id, response).await),
        }
    }

    async fn device_entities(&self, device_id: &str) -> Result<Vec<String>> {
        let template = format!(
            "{{{{ device_entities('{}') | tojson }}}}",
            device_id.replace('\'', "")
        );
        let text = self.render_text(&template, &TemplateVariables::new()).await?;
        let entities: Vec<String> = serde_json::from_str(text.trim())?;
        debug!("Device {} has {} entities", device_id, entities.len());
        Ok(entities)
    }
}

#[async_trait::async_trait]
impl TemplateRenderer for HomeAssistantClient {
    async fn render(&self, template: &str, variables: &TemplateVariables) -> Result<Value> {
        Ok(parse_rendered(&self.render_text(template, variables).await?))
    }
}

#[async_trait::async_trait]
impl ServiceCaller for HomeAssistantClient {
    async fn call_service(&self, domain: &str, service: &str, data: Value) -> Result<()> {
        debug!("Calling service {}.{} with {}", domain, service, data);
        let response = self
            .post(&format!("/api/services/{}/{}", domain, service), &data)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(&format!("{}.{}", domain, service), response).await)
        }
    }
}

#[async_trait::async_trait]
impl StatePublisher for HomeAssistantClient {
    async fn publish_state(&self, entity_id: &str, state: &str, attributes: Value) -> Result<()> {
        let body = json!({ "state": state, "attributes": attributes });
        let response = self
            .post(&format!("/api/states/{}", entity_id), &body)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(entity_id, response).await)
        }
    }
}

impl StateTracker for HomeAssistantClient {
    fn track_state_changes(
        &self,
        entity_ids: &[String],
        refresh: RefreshRequester,
    ) -> Subscription {
        let client = self.clone();
        let entity_ids = entity_ids.to_vec();
        let task = tokio::spawn(async move {
            let mut seen: HashMap<String, DateTime<Utc>> = HashMap::new();
            let mut interval = tokio::time::interval(client.watch_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let mut changed = false;
                for entity_id in &entity_ids {
                    match client.get_state(entity_id).await {
                        Ok(Some(state)) => {
                            let previous = seen.insert(entity_id.clone(), state.last_updated);
                            if previous.is_some_and(|p| p != state.last_updated) {
                                changed = true;
                            }
                        }
                        Ok(None) => trace!("Tracked entity {} does not exist", entity_id),
                        Err(e) => warn!("Failed to poll tracked entity {}: {}", entity_id, e),
                    }
                }
                if changed {
                    refresh.request_refresh();
                }
            }
        });
        Subscription::new(move || task.abort())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> HomeAssistantClient {
        HomeAssistantClient::new(server.url(), "test_token")
            .unwrap()
            .with_retry_config(1, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_get_state_success_and_missing() {
        let mut server = Server::new_async().await;
        let found = server
            .mock("GET", "/api/states/sensor.l1")
            .match_header("authorization", "Bearer test_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "entity_id": "sensor.l1",
                    "state": "12.5",
                    "attributes": {"unit_of_measurement": "A"},
                    "last_changed": "2024-05-01T10:00:00Z",
                    "last_updated": "2024-05-01T10:00:00Z"
                })
                .to_string(),
            )
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/api/states/sensor.nope")
            .with_status(404)
            .create_async()
            .await;

        let client = client(&server);
        let state = client.get_state("sensor.l1").await.unwrap().unwrap();
        assert_eq!(state.state, "12.5");
        assert!(client.get_state("sensor.nope").await.unwrap().is_none());
        found.assert_async().await;
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_failure_is_host_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/states/sensor.l1")
            .with_status(401)
            .create_async()
            .await;

        let err = client(&server).get_state("sensor.l1").await.unwrap_err();
        assert!(matches!(err, BalancerError::Host { .. }));
    }

    #[tokio::test]
    async fn test_render_and_device_entities() {
        let mut server = Server::new_async().await;
        let number = server
            .mock("POST", "/api/template")
            .match_body(Matcher::PartialJson(json!({
                "template": "{{ states('sensor.l1') }}"
            })))
            .with_status(200)
            .with_body("16.0")
            .create_async()
            .await;
        let devices = server
            .mock("POST", "/api/template")
            .match_body(Matcher::PartialJson(json!({
                "template": "{{ device_entities('abc') | tojson }}"
            })))
            .with_status(200)
            .with_body(r#"["sensor.abc_status","sensor.abc_dynamic_circuit_limit"]"#)
            .create_async()
            .await;

        let client = client(&server);
        let value = client
            .render("{{ states('sensor.l1') }}", &TemplateVariables::new())
            .await
            .unwrap();
        assert_eq!(value, json!(16.0));
        let entities = client.device_entities("abc").await.unwrap();
        assert_eq!(entities.len(), 2);
        number.assert_async().await;
        devices.assert_async().await;
    }

    #[tokio::test]
    async fn test_call_service_posts_data() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/services/easee/set_circuit_dynamic_limit")
            .match_header("authorization", "Bearer test_token")
            .match_body(Matcher::Json(json!({"device_id": "abc", "current_p1": 6.0})))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        client(&server)
            .call_service(
                "easee",
                "set_circuit_dynamic_limit",
                json!({"device_id": "abc", "current_p1": 6.0}),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_state() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/states/sensor.evlb_update_age")
            .match_body(Matcher::PartialJson(json!({"state": "30"})))
            .with_status(201)
            .create_async()
            .await;

        client(&server)
            .publish_state("sensor.evlb_update_age", "30", json!({}))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_parse_rendered() {
        assert_eq!(parse_rendered("true"), json!(true));
        assert_eq!(parse_rendered(" 7 \n"), json!(7));
        assert_eq!(parse_rendered("charging"), json!("charging"));
    }
}
