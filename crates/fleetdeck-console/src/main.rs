use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use fleetdeck_client::{
    ApiTransport, ChannelStatus, ClientConfig, DashboardController, DashboardView, HttpTransport,
    IdentitySelector, InsightsClient, PollCoordinator, RealtimeChannel, RefreshFailure,
    SessionContext,
};
use fleetdeck_core::fleet::{Anomaly, Filters, FleetSummary, TimeSeriesPoint, Vehicle};
use fleetdeck_core::push::StatsUpdate;

#[derive(Parser, Debug)]
#[command(name = "fleetdeck-console")]
struct Args {
    /// Backend base URL; the push stream is derived from it.
    #[arg(long, default_value = "http://localhost:8080")]
    api_base: String,
    /// Demo identity: territory_manager_1, regional_manager_1 or demo_admin.
    #[arg(long, default_value = "demo_admin")]
    user: String,
    #[arg(long, default_value_t = 3)]
    vehicle_poll_secs: u64,
    /// Initial reporting window, counted back from today.
    #[arg(long, default_value_t = 7)]
    trailing_days: i64,
    /// One-shot insights question, answered after the dashboard starts.
    #[arg(long)]
    ask: Option<String>,
}

/// The demo accounts the backend seeds. The password never leaves the
/// login call; scope comes back in the credential.
fn demo_selector(user: &str) -> Option<IdentitySelector> {
    let password = match user {
        "territory_manager_1" => "territory123",
        "regional_manager_1" => "regional123",
        "demo_admin" => "admin123",
        _ => return None,
    };
    Some(IdentitySelector {
        username: user.to_string(),
        password: password.to_string(),
    })
}

/// Text rendition of the dashboard: every update becomes a log line.
struct ConsoleView;

impl DashboardView for ConsoleView {
    fn summary_updated(&self, summary: &FleetSummary, timeseries: &[TimeSeriesPoint]) {
        info!(
            total = summary.total_vehicles,
            active = summary.active_vehicles,
            avg_speed = summary.avg_speed,
            unacked = summary.unacknowledged_anomalies,
            points = timeseries.len(),
            "fleet summary"
        );
    }

    fn vehicles_updated(&self, vehicles: &[Vehicle]) {
        info!(count = vehicles.len(), "vehicle roster");
    }

    fn anomalies_updated(&self, anomalies: &[Anomaly]) {
        info!(count = anomalies.len(), "anomaly roster");
    }

    fn connection_status(&self, status: ChannelStatus) {
        info!(status = status.ui_text(), "realtime channel");
    }

    fn stats_hint(&self, stats: &StatsUpdate) {
        info!(
            active = stats.active_vehicles,
            events_per_5s = stats.events_per_5s,
            avg_speed = stats.avg_speed,
            max_temp = stats.max_temp,
            "live stats update"
        );
    }

    fn refresh_failed(&self, failures: &[RefreshFailure]) {
        for failure in failures {
            warn!(
                target = failure.target.as_str(),
                error = %failure.error,
                "refresh failed; keeping previous data"
            );
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let Some(selector) = demo_selector(&args.user) else {
        bail!(
            "unknown demo user {:?}; expected territory_manager_1, regional_manager_1 or demo_admin",
            args.user
        );
    };
    let api_base = Url::parse(&args.api_base).context("invalid --api-base")?;

    let mut config = ClientConfig::with_api_base(api_base.clone());
    config.vehicle_poll_interval = Duration::from_secs(args.vehicle_poll_secs);

    let transport: Arc<dyn ApiTransport> = Arc::new(HttpTransport::new(api_base));
    let session = Arc::new(SessionContext::new(transport));
    let channel = RealtimeChannel::new(session.clone(), config.clone());
    let poll = PollCoordinator::new(session.clone(), config);
    let controller = DashboardController::new(
        session.clone(),
        channel,
        poll,
        Arc::new(ConsoleView),
    );

    controller
        .start(selector)
        .await
        .with_context(|| format!("login as {} failed", args.user))?;
    if args.trailing_days != 7 {
        controller
            .set_filters(Filters::trailing_days(args.trailing_days))
            .await;
    }

    if let Some(question) = &args.ask {
        let insights = InsightsClient::new(session);
        match insights.ask(question).await {
            Ok(answer) => info!(answer = %answer.answer, "insight"),
            Err(err) => error!(error = %err, "insight request failed"),
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    info!("shutting down");
    controller.shutdown();
    Ok(())
}
