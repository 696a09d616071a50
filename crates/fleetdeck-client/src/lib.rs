//! Fleetdeck client runtime: session handling, the realtime push
//! channel with bounded-backoff reconnection, the polling coordinator,
//! and the dashboard controller that reconciles both data paths.

pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod insights;
pub mod poll;
pub mod realtime;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use controller::{DashboardController, DashboardSnapshot, DashboardView};
pub use error::{ChannelError, RefreshError, SessionError, TransportError};
pub use http::HttpTransport;
pub use insights::InsightsClient;
pub use poll::{FleetRefresh, PollCoordinator, RefreshFailure, RefreshTarget};
pub use realtime::{ChannelStatus, RealtimeChannel, Subscription};
pub use session::{IdentitySelector, SessionContext};
pub use transport::{ApiRequest, ApiResponse, ApiTransport, Method};
