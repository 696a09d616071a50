//! Fleet data model: summary KPIs, timeseries, vehicle roster, and
//! anomaly records as returned by the backend. Snapshots are immutable
//! per refresh; each refresh replaces the prior set wholesale.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregation granularity for the summary timeseries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

/// Process-wide UI filter state. Owned by the dashboard controller;
/// every mutation triggers a full refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    pub granularity: Granularity,
    pub customer_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Default for Filters {
    fn default() -> Self {
        Filters {
            granularity: Granularity::Day,
            customer_id: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl Filters {
    /// Default dashboard window: the trailing `days` ending today.
    pub fn trailing_days(days: i64) -> Self {
        let today = Utc::now().date_naive();
        Filters {
            granularity: Granularity::Day,
            customer_id: None,
            start_date: Some(today - Duration::days(days)),
            end_date: Some(today),
        }
    }

    /// Day-granular date bounds expand to full-day timestamps on the wire.
    pub fn start_ts(&self) -> Option<String> {
        self.start_date.map(|d| format!("{d}T00:00:00"))
    }

    pub fn end_ts(&self) -> Option<String> {
        self.end_date.map(|d| format!("{d}T23:59:59"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FleetSummary {
    #[serde(default)]
    pub total_vehicles: u64,
    #[serde(default)]
    pub active_vehicles: u64,
    #[serde(default)]
    pub avg_speed: f64,
    #[serde(default)]
    pub avg_fuel_pct: f64,
    #[serde(default)]
    pub avg_engine_temp: f64,
    #[serde(default)]
    pub telemetry_count: u64,
    #[serde(default)]
    pub total_anomalies: u64,
    #[serde(default)]
    pub unacknowledged_anomalies: u64,
    #[serde(default)]
    pub critical_anomalies: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesPoint {
    pub period: String,
    #[serde(default)]
    pub avg_speed: f64,
    #[serde(default)]
    pub avg_fuel: f64,
    #[serde(default)]
    pub avg_temp: f64,
    #[serde(default)]
    pub event_count: u64,
    #[serde(default)]
    pub vehicle_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetSummaryResponse {
    pub summary: FleetSummary,
    #[serde(default)]
    pub timeseries: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    pub vehicle_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub territory_id: String,
    #[serde(default)]
    pub vin: String,
    pub make: String,
    pub model: String,
    pub year: u32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub license_plate: Option<String>,
    #[serde(default)]
    pub driver_name: Option<String>,
    #[serde(default)]
    pub last_seen_ts: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub fuel_pct: Option<f64>,
    #[serde(default)]
    pub engine_temp: Option<f64>,
    #[serde(default)]
    pub battery_v: Option<f64>,
    #[serde(default)]
    pub odometer: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleListResponse {
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// Liveness derived from time-since-last-report. A function of the wall
/// clock, not of the snapshot, so it is recomputed on every render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleStatus {
    Active,
    Idle,
    Offline,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Active => "active",
            VehicleStatus::Idle => "idle",
            VehicleStatus::Offline => "offline",
        }
    }
}

const ACTIVE_WITHIN_SECS: i64 = 60;
const IDLE_WITHIN_SECS: i64 = 300;

impl Vehicle {
    /// Derive liveness at `now`. Missing or unparsable timestamps
    /// degrade to Offline rather than failing the snapshot.
    pub fn status_at(&self, now: DateTime<Utc>) -> VehicleStatus {
        let Some(last_seen) = self.last_seen_ts.as_deref().and_then(parse_timestamp) else {
            return VehicleStatus::Offline;
        };
        let age = now.signed_duration_since(last_seen).num_seconds();
        if age < ACTIVE_WITHIN_SECS {
            VehicleStatus::Active
        } else if age < IDLE_WITHIN_SECS {
            VehicleStatus::Idle
        } else {
            VehicleStatus::Offline
        }
    }
}

/// The backend emits naive ISO timestamps; older rows may carry an
/// explicit offset. Naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub anomaly_id: String,
    pub vehicle_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub territory_id: String,
    pub detected_at: String,
    pub anomaly_type: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metric_value: Option<f64>,
    #[serde(default)]
    pub threshold_value: Option<f64>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<String>,
    #[serde(default)]
    pub make: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub license_plate: Option<String>,
    #[serde(default)]
    pub driver_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyListResponse {
    pub anomalies: Vec<Anomaly>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcknowledgeResponse {
    pub success: bool,
    pub anomaly_id: String,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
}
