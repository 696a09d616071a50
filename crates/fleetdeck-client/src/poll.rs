//! PollCoordinator: periodic and on-demand data refresh over the
//! request/response path. The three refresh_all sub-fetches run
//! concurrently with isolated failures; results are applied as a group
//! only after all have settled.

use std::sync::Arc;

use tracing::warn;

use fleetdeck_core::fleet::{
    AcknowledgeResponse, Anomaly, AnomalyListResponse, Filters, FleetSummaryResponse, Vehicle,
    VehicleListResponse,
};

use crate::config::ClientConfig;
use crate::error::RefreshError;
use crate::session::SessionContext;
use crate::transport::{ApiRequest, ApiResponse};

const SUMMARY_PATH: &str = "/fleet/summary";
const VEHICLES_PATH: &str = "/fleet/vehicles";
const ANOMALIES_PATH: &str = "/fleet/anomalies";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTarget {
    Summary,
    Vehicles,
    Anomalies,
}

impl RefreshTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTarget::Summary => "summary",
            RefreshTarget::Vehicles => "vehicles",
            RefreshTarget::Anomalies => "anomalies",
        }
    }
}

#[derive(Debug)]
pub struct RefreshFailure {
    pub target: RefreshTarget,
    pub error: RefreshError,
}

/// Outcome of a full refresh. Successful sub-fetches are present even
/// when siblings failed; `failures` enumerates what did not settle
/// cleanly.
#[derive(Debug, Default)]
pub struct FleetRefresh {
    pub summary: Option<FleetSummaryResponse>,
    pub vehicles: Option<Vec<Vehicle>>,
    pub anomalies: Option<Vec<Anomaly>>,
    pub failures: Vec<RefreshFailure>,
}

impl FleetRefresh {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct PollCoordinator {
    session: Arc<SessionContext>,
    config: ClientConfig,
}

impl PollCoordinator {
    pub fn new(session: Arc<SessionContext>, config: ClientConfig) -> Self {
        PollCoordinator { session, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch summary, vehicle roster, and anomaly roster concurrently.
    /// One failing sub-fetch never blocks the others from being applied.
    pub async fn refresh_all(&self, filters: &Filters) -> FleetRefresh {
        let (summary, vehicles, anomalies) = tokio::join!(
            self.refresh_summary(filters),
            self.refresh_vehicles(filters),
            self.refresh_anomalies(filters),
        );

        let mut refresh = FleetRefresh::default();
        match summary {
            Ok(value) => refresh.summary = Some(value),
            Err(error) => refresh.failures.push(RefreshFailure {
                target: RefreshTarget::Summary,
                error,
            }),
        }
        match vehicles {
            Ok(value) => refresh.vehicles = Some(value),
            Err(error) => refresh.failures.push(RefreshFailure {
                target: RefreshTarget::Vehicles,
                error,
            }),
        }
        match anomalies {
            Ok(value) => refresh.anomalies = Some(value),
            Err(error) => refresh.failures.push(RefreshFailure {
                target: RefreshTarget::Anomalies,
                error,
            }),
        }
        for failure in &refresh.failures {
            warn!(
                target = failure.target.as_str(),
                error = %failure.error,
                "refresh sub-fetch failed"
            );
        }
        refresh
    }

    pub async fn refresh_summary(
        &self,
        filters: &Filters,
    ) -> Result<FleetSummaryResponse, RefreshError> {
        let response = self
            .session
            .authorized_request(summary_request(filters))
            .await?;
        decode(response)
    }

    pub async fn refresh_vehicles(&self, filters: &Filters) -> Result<Vec<Vehicle>, RefreshError> {
        let response = self
            .session
            .authorized_request(vehicles_request(filters, self.config.fetch_limit))
            .await?;
        let list: VehicleListResponse = decode(response)?;
        Ok(list.vehicles)
    }

    pub async fn refresh_anomalies(&self, filters: &Filters) -> Result<Vec<Anomaly>, RefreshError> {
        let response = self
            .session
            .authorized_request(anomalies_request(filters, self.config.fetch_limit))
            .await?;
        let list: AnomalyListResponse = decode(response)?;
        Ok(list.anomalies)
    }

    /// Acknowledge one anomaly. On success the caller removes the item
    /// from local state and re-derives counts; no extra round trip.
    pub async fn acknowledge(&self, anomaly_id: &str) -> Result<AcknowledgeResponse, RefreshError> {
        let path = format!("{ANOMALIES_PATH}/{anomaly_id}/ack");
        let response = self.session.authorized_request(ApiRequest::post(path)).await?;
        decode(response)
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: ApiResponse) -> Result<T, RefreshError> {
    if !response.is_success() {
        return Err(RefreshError::Api {
            status: response.status,
        });
    }
    Ok(serde_json::from_value(response.body)?)
}

/// Scope (region/territory) is never added client-side; the server
/// derives it from the bearer token.
fn summary_request(filters: &Filters) -> ApiRequest {
    let mut request = ApiRequest::get(SUMMARY_PATH);
    if let Some(customer_id) = &filters.customer_id {
        request = request.with_query("customer_id", customer_id.clone());
    }
    if let Some(start_ts) = filters.start_ts() {
        request = request.with_query("start_ts", start_ts);
    }
    if let Some(end_ts) = filters.end_ts() {
        request = request.with_query("end_ts", end_ts);
    }
    request.with_query("granularity", filters.granularity.as_str())
}

fn vehicles_request(filters: &Filters, limit: u32) -> ApiRequest {
    let mut request = ApiRequest::get(VEHICLES_PATH);
    if let Some(customer_id) = &filters.customer_id {
        request = request.with_query("customer_id", customer_id.clone());
    }
    request.with_query("limit", limit.to_string())
}

fn anomalies_request(filters: &Filters, limit: u32) -> ApiRequest {
    let mut request = ApiRequest::get(ANOMALIES_PATH);
    if let Some(customer_id) = &filters.customer_id {
        request = request.with_query("customer_id", customer_id.clone());
    }
    if let Some(start_ts) = filters.start_ts() {
        request = request.with_query("start_ts", start_ts);
    }
    if let Some(end_ts) = filters.end_ts() {
        request = request.with_query("end_ts", end_ts);
    }
    request.with_query("limit", limit.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    use crate::error::TransportError;
    use crate::session::IdentitySelector;
    use crate::transport::ApiTransport;
    use fleetdeck_core::fleet::Granularity;

    struct ScriptedTransport {
        anomalies_status: u16,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        fn new(anomalies_status: u16) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                anomalies_status,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ApiTransport for ScriptedTransport {
        async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let body = match request.path.as_str() {
                "/auth/login" => json!({
                    "access_token": "tok-1",
                    "username": "regional_manager_1",
                    "role": "regional_manager",
                    "region_id": "WEST"
                }),
                SUMMARY_PATH => json!({
                    "summary": {
                        "total_vehicles": 42,
                        "active_vehicles": 17,
                        "avg_speed": 47.3,
                        "avg_fuel_pct": 58.0,
                        "unacknowledged_anomalies": 4
                    },
                    "timeseries": [
                        {"period": "2026-08-22", "avg_speed": 44.1, "avg_fuel": 60.2, "avg_temp": 199.0}
                    ]
                }),
                VEHICLES_PATH => json!({
                    "vehicles": [{
                        "vehicle_id": "VEH-001",
                        "make": "Ford",
                        "model": "Transit",
                        "year": 2024
                    }],
                    "total": 1
                }),
                ANOMALIES_PATH => {
                    if self.anomalies_status != 200 {
                        return Ok(ApiResponse {
                            status: self.anomalies_status,
                            body: Value::Null,
                        });
                    }
                    json!({
                        "anomalies": [{
                            "anomaly_id": "ANOM-1",
                            "vehicle_id": "VEH-001",
                            "detected_at": "2026-08-23T08:00:00",
                            "anomaly_type": "LOW_FUEL",
                            "severity": "warning",
                            "acknowledged": false
                        }],
                        "total": 1
                    })
                }
                path if path.ends_with("/ack") => json!({
                    "success": true,
                    "anomaly_id": "ANOM-1",
                    "acknowledged_by": "regional_manager_1"
                }),
                other => panic!("unexpected path: {other}"),
            };
            Ok(ApiResponse { status: 200, body })
        }
    }

    async fn coordinator(transport: Arc<ScriptedTransport>) -> PollCoordinator {
        let session = Arc::new(SessionContext::new(transport));
        session
            .authenticate(IdentitySelector {
                username: "regional_manager_1".to_string(),
                password: "regional123".to_string(),
            })
            .await
            .unwrap();
        PollCoordinator::new(session, ClientConfig::default())
    }

    fn window() -> Filters {
        Filters {
            granularity: Granularity::Day,
            customer_id: Some("CUST-7".to_string()),
            start_date: Some(NaiveDate::from_ymd_opt(2026, 8, 16).unwrap()),
            end_date: Some(NaiveDate::from_ymd_opt(2026, 8, 23).unwrap()),
        }
    }

    #[tokio::test]
    async fn refresh_all_returns_every_roster() {
        let transport = ScriptedTransport::new(200);
        let poll = coordinator(transport).await;

        let refresh = poll.refresh_all(&window()).await;
        assert!(refresh.is_complete());
        assert_eq!(refresh.summary.unwrap().summary.total_vehicles, 42);
        assert_eq!(refresh.vehicles.unwrap().len(), 1);
        assert_eq!(refresh.anomalies.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_sub_fetch_is_isolated_and_enumerated() {
        let transport = ScriptedTransport::new(500);
        let poll = coordinator(transport).await;

        let refresh = poll.refresh_all(&window()).await;
        assert!(refresh.summary.is_some());
        assert!(refresh.vehicles.is_some());
        assert!(refresh.anomalies.is_none());
        assert_eq!(refresh.failures.len(), 1);
        assert_eq!(refresh.failures[0].target, RefreshTarget::Anomalies);
        assert!(matches!(
            refresh.failures[0].error,
            RefreshError::Api { status: 500 }
        ));
    }

    #[tokio::test]
    async fn queries_carry_filters_but_never_scope() {
        let transport = ScriptedTransport::new(200);
        let poll = coordinator(transport.clone()).await;
        poll.refresh_all(&window()).await;

        let requests = transport.requests.lock().unwrap();
        let summary = requests
            .iter()
            .find(|r| r.path == SUMMARY_PATH)
            .expect("summary request issued");
        let keys: Vec<&str> = summary.query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["customer_id", "start_ts", "end_ts", "granularity"]);
        assert!(summary
            .query
            .iter()
            .any(|(k, v)| k == "start_ts" && v == "2026-08-16T00:00:00"));

        // Scoping is the server's job; the client adds no region or
        // territory parameters of its own.
        for request in requests.iter() {
            assert!(!request.query.iter().any(|(k, _)| k == "region_id"));
            assert!(!request.query.iter().any(|(k, _)| k == "territory_id"));
        }

        let vehicles = requests.iter().find(|r| r.path == VEHICLES_PATH).unwrap();
        assert!(vehicles.query.iter().any(|(k, v)| k == "limit" && v == "100"));
    }

    #[tokio::test]
    async fn acknowledge_posts_to_the_anomaly_scoped_endpoint() {
        let transport = ScriptedTransport::new(200);
        let poll = coordinator(transport.clone()).await;

        let ack = poll.acknowledge("ANOM-1").await.unwrap();
        assert!(ack.success);

        let requests = transport.requests.lock().unwrap();
        let last = requests.last().unwrap();
        assert_eq!(last.path, "/fleet/anomalies/ANOM-1/ack");
        assert!(last.body.is_none());
    }
}
