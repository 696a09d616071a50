//! DashboardController: composes the session, the realtime channel, and
//! the poll coordinator. Push events are a hint channel that accelerate
//! freshness; poll responses are the authoritative channel that
//! eventually overwrite any push-applied approximation.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use fleetdeck_core::fleet::{Anomaly, Filters, FleetSummary, TimeSeriesPoint, Vehicle};
use fleetdeck_core::push::{PushEvent, StatsUpdate};

use crate::error::SessionError;
use crate::poll::{FleetRefresh, PollCoordinator, RefreshFailure};
use crate::realtime::{ChannelStatus, RealtimeChannel, Subscription};
use crate::session::{IdentitySelector, SessionContext};

/// Rendering collaborators (tables, map, charts) sit behind this seam.
/// Implementations must not call back into the controller.
pub trait DashboardView: Send + Sync {
    fn summary_updated(&self, summary: &FleetSummary, timeseries: &[TimeSeriesPoint]);
    fn vehicles_updated(&self, vehicles: &[Vehicle]);
    fn anomalies_updated(&self, anomalies: &[Anomaly]);
    fn connection_status(&self, status: ChannelStatus);
    /// Push-driven approximation (live counters, rolling speed/temp
    /// aggregates), applied ahead of the next poll.
    fn stats_hint(&self, stats: &StatsUpdate);
    fn refresh_failed(&self, failures: &[RefreshFailure]);
}

#[derive(Debug, Clone, Default)]
pub struct DashboardSnapshot {
    pub summary: FleetSummary,
    pub timeseries: Vec<TimeSeriesPoint>,
    pub vehicles: Vec<Vehicle>,
    pub anomalies: Vec<Anomaly>,
}

struct DashboardState {
    filters: Filters,
    /// Monotone request generation; a refresh result is applied only if
    /// the generation still matches at apply time (last-request-wins).
    generation: u64,
    snapshot: DashboardSnapshot,
}

pub struct DashboardController {
    session: Arc<SessionContext>,
    channel: Arc<RealtimeChannel>,
    poll: Arc<PollCoordinator>,
    view: Arc<dyn DashboardView>,
    state: Mutex<DashboardState>,
    anomaly_refresh: Arc<Notify>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl DashboardController {
    pub fn new(
        session: Arc<SessionContext>,
        channel: Arc<RealtimeChannel>,
        poll: PollCoordinator,
        view: Arc<dyn DashboardView>,
    ) -> Arc<Self> {
        Arc::new(DashboardController {
            session,
            channel,
            poll: Arc::new(poll),
            view,
            state: Mutex::new(DashboardState {
                filters: Filters::trailing_days(7),
                generation: 0,
                snapshot: DashboardSnapshot::default(),
            }),
            anomaly_refresh: Arc::new(Notify::new()),
            tasks: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        })
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.state.lock().expect("state lock poisoned").snapshot.clone()
    }

    pub fn filters(&self) -> Filters {
        self.state.lock().expect("state lock poisoned").filters.clone()
    }

    /// Establish the identity, load the initial data set, open the push
    /// channel, and spawn the background tasks.
    pub async fn start(self: &Arc<Self>, selector: IdentitySelector) -> Result<(), SessionError> {
        self.session.authenticate(selector).await?;
        self.refresh_current().await;

        if let Err(err) = self.channel.connect() {
            warn!(error = %err, "realtime channel unavailable; polling continues");
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let subscription = self.channel.subscribe(move |event: &PushEvent| {
            let _ = event_tx.send(event.clone());
        });
        *self.subscription.lock().expect("subscription lock poisoned") = Some(subscription);

        let mut tasks = self.tasks.lock().expect("task lock poisoned");
        tasks.push(tokio::spawn(self.clone().event_pump(event_rx)));
        tasks.push(tokio::spawn(self.clone().anomaly_refresh_worker()));
        tasks.push(tokio::spawn(self.clone().vehicle_poll_loop()));
        tasks.push(tokio::spawn(self.clone().status_forwarder()));
        info!("dashboard controller started");
        Ok(())
    }

    /// Switch the demo identity. The credential watch tears the channel
    /// down and reopens it under the new token; data is fully refreshed.
    pub async fn switch_identity(
        self: &Arc<Self>,
        selector: IdentitySelector,
    ) -> Result<(), SessionError> {
        self.session.authenticate(selector).await?;
        self.refresh_current().await;
        // The channel reconnects on its own unless it had gone terminal
        // (exhausted attempts or auth-rejected close); connect() is a
        // no-op in the live cases.
        if let Err(err) = self.channel.connect() {
            warn!(error = %err, "realtime channel unavailable after identity switch");
        }
        Ok(())
    }

    /// Replace the filter set and refresh everything. A previous
    /// in-flight refresh whose filters no longer match is discarded at
    /// apply time, regardless of resolution order.
    pub async fn set_filters(&self, filters: Filters) {
        let (generation, filters) = {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.filters = filters;
            state.generation += 1;
            (state.generation, state.filters.clone())
        };
        let refresh = self.poll.refresh_all(&filters).await;
        self.apply_refresh(generation, refresh);
    }

    /// Acknowledge an anomaly and settle the local bookkeeping without
    /// waiting for the next poll.
    pub async fn acknowledge(&self, anomaly_id: &str) -> Result<(), crate::error::RefreshError> {
        self.poll.acknowledge(anomaly_id).await?;
        let (summary, timeseries, anomalies) = {
            let mut state = self.state.lock().expect("state lock poisoned");
            state
                .snapshot
                .anomalies
                .retain(|anomaly| anomaly.anomaly_id != anomaly_id);
            state.snapshot.summary.unacknowledged_anomalies = state
                .snapshot
                .summary
                .unacknowledged_anomalies
                .saturating_sub(1);
            (
                state.snapshot.summary.clone(),
                state.snapshot.timeseries.clone(),
                state.snapshot.anomalies.clone(),
            )
        };
        self.view.anomalies_updated(&anomalies);
        self.view.summary_updated(&summary, &timeseries);
        Ok(())
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().expect("task lock poisoned").drain(..) {
            task.abort();
        }
        self.subscription
            .lock()
            .expect("subscription lock poisoned")
            .take();
        self.channel.disconnect();
        info!("dashboard controller stopped");
    }

    async fn refresh_current(&self) {
        let (generation, filters) = {
            let state = self.state.lock().expect("state lock poisoned");
            (state.generation, state.filters.clone())
        };
        let refresh = self.poll.refresh_all(&filters).await;
        self.apply_refresh(generation, refresh);
    }

    /// Apply a settled refresh as a group, unless its generation went
    /// stale while it was in flight.
    fn apply_refresh(&self, generation: u64, refresh: FleetRefresh) -> bool {
        let applied = {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.generation != generation {
                debug!(
                    stale = generation,
                    current = state.generation,
                    "discarding refresh from superseded filters"
                );
                return false;
            }
            if let Some(summary) = refresh.summary {
                state.snapshot.summary = summary.summary;
                state.snapshot.timeseries = summary.timeseries;
            }
            if let Some(vehicles) = refresh.vehicles {
                state.snapshot.vehicles = vehicles;
            }
            if let Some(anomalies) = refresh.anomalies {
                state.snapshot.anomalies = anomalies;
            }
            state.snapshot.clone()
        };
        self.view.summary_updated(&applied.summary, &applied.timeseries);
        self.view.vehicles_updated(&applied.vehicles);
        self.view.anomalies_updated(&applied.anomalies);
        if !refresh.failures.is_empty() {
            self.view.refresh_failed(&refresh.failures);
        }
        true
    }

    async fn event_pump(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PushEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_push(event);
        }
    }

    fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::StatsUpdate(stats) => {
                {
                    let mut state = self.state.lock().expect("state lock poisoned");
                    state.snapshot.summary.active_vehicles = stats.active_vehicles;
                }
                self.view.stats_hint(&stats);
                if !stats.recent_anomalies.is_empty() {
                    // Coalesced: a stored permit means at most one
                    // follow-up refresh regardless of trigger count.
                    self.anomaly_refresh.notify_one();
                }
            }
            PushEvent::Error { message } => {
                warn!(message = %message, "server reported a realtime error");
            }
            PushEvent::Unknown { event_type } => {
                debug!(event_type = %event_type, "ignoring unknown push event");
            }
        }
    }

    /// Debounced anomaly re-fetch: at most one in flight; triggers that
    /// arrive mid-flight coalesce into exactly one follow-up run.
    async fn anomaly_refresh_worker(self: Arc<Self>) {
        loop {
            self.anomaly_refresh.notified().await;
            let (generation, filters) = {
                let state = self.state.lock().expect("state lock poisoned");
                (state.generation, state.filters.clone())
            };
            match self.poll.refresh_anomalies(&filters).await {
                Ok(anomalies) => {
                    let applied = {
                        let mut state = self.state.lock().expect("state lock poisoned");
                        if state.generation != generation {
                            continue;
                        }
                        state.snapshot.anomalies = anomalies;
                        state.snapshot.anomalies.clone()
                    };
                    self.view.anomalies_updated(&applied);
                }
                Err(err) => warn!(error = %err, "push-triggered anomaly refresh failed"),
            }
        }
    }

    /// Positions are polled on a fixed interval regardless of push
    /// activity; push frames carry no per-vehicle deltas, so this
    /// bounds map/table staleness even with the channel down.
    async fn vehicle_poll_loop(self: Arc<Self>) {
        let mut ticker = interval(self.poll_interval());
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            let (generation, filters) = {
                let state = self.state.lock().expect("state lock poisoned");
                (state.generation, state.filters.clone())
            };
            match self.poll.refresh_vehicles(&filters).await {
                Ok(vehicles) => {
                    let applied = {
                        let mut state = self.state.lock().expect("state lock poisoned");
                        if state.generation != generation {
                            continue;
                        }
                        state.snapshot.vehicles = vehicles;
                        state.snapshot.vehicles.clone()
                    };
                    self.view.vehicles_updated(&applied);
                }
                Err(err) => warn!(error = %err, "vehicle poll failed"),
            }
        }
    }

    fn poll_interval(&self) -> std::time::Duration {
        self.poll.config().vehicle_poll_interval
    }

    async fn status_forwarder(self: Arc<Self>) {
        let mut status = self.channel.status();
        self.view.connection_status(*status.borrow());
        while status.changed().await.is_ok() {
            let current = *status.borrow();
            self.view.connection_status(current);
        }
    }
}
