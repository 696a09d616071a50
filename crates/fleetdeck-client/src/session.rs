//! SessionContext: owns the single live credential, signs outgoing
//! requests, and runs exactly one re-authentication cycle when a call
//! comes back 401.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{info, warn};

use fleetdeck_core::{Credential, Identity, LoginRequest, LoginResponse};

use crate::error::SessionError;
use crate::transport::{ApiRequest, ApiResponse, ApiTransport};

const LOGIN_PATH: &str = "/auth/login";

/// Demo-login selector. Kept after a successful login so a 401 can
/// trigger one re-login with the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySelector {
    pub username: String,
    pub password: String,
}

#[derive(Default)]
struct SessionInner {
    credential: Option<Arc<Credential>>,
    selector: Option<IdentitySelector>,
    generation: u64,
}

pub struct SessionContext {
    transport: Arc<dyn ApiTransport>,
    inner: Mutex<SessionInner>,
    changed: watch::Sender<u64>,
}

impl SessionContext {
    pub fn new(transport: Arc<dyn ApiTransport>) -> Self {
        let (changed, _) = watch::channel(0);
        SessionContext {
            transport,
            inner: Mutex::new(SessionInner::default()),
            changed,
        }
    }

    pub fn credential(&self) -> Option<Arc<Credential>> {
        self.inner.lock().expect("session lock poisoned").credential.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.credential().map(|c| c.identity.clone())
    }

    /// Credential-generation watch. Bumped on every successful login;
    /// the realtime channel treats a bump as tear-down-and-reconnect.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    /// Exchange a demo selector for a credential. On success the
    /// previous credential (if any) is replaced wholesale.
    pub async fn authenticate(
        &self,
        selector: IdentitySelector,
    ) -> Result<Arc<Credential>, SessionError> {
        let body = serde_json::to_value(LoginRequest {
            username: selector.username.clone(),
            password: selector.password.clone(),
        })
        .map_err(crate::error::TransportError::Decode)?;
        let request = ApiRequest::post(LOGIN_PATH).with_body(body);
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(SessionError::Auth(format!(
                "login for {} returned status {}",
                selector.username, response.status
            )));
        }
        let login: LoginResponse = response.json()?;
        let credential = Arc::new(Credential::from(login));
        info!(
            username = %credential.identity.username,
            role = credential.identity.role.as_str(),
            "authenticated"
        );

        let generation = {
            let mut inner = self.inner.lock().expect("session lock poisoned");
            inner.credential = Some(credential.clone());
            inner.selector = Some(selector);
            inner.generation += 1;
            inner.generation
        };
        let _ = self.changed.send(generation);
        Ok(credential)
    }

    /// Sign and issue a request with the current token. The token is
    /// captured at issue time: a concurrent re-login does not affect
    /// calls already in flight. A 401 triggers exactly one re-login
    /// with the last-used selector, after which the original call fails
    /// with `SessionExpired` regardless of the re-login outcome.
    pub async fn authorized_request(
        &self,
        mut request: ApiRequest,
    ) -> Result<ApiResponse, SessionError> {
        let Some(credential) = self.credential() else {
            return Err(SessionError::Unauthenticated);
        };
        request.bearer = Some(credential.token.clone());
        let response = self.transport.execute(request).await?;
        if response.status == 401 {
            self.reauthenticate().await;
            return Err(SessionError::SessionExpired);
        }
        Ok(response)
    }

    async fn reauthenticate(&self) {
        let selector = {
            let inner = self.inner.lock().expect("session lock poisoned");
            inner.selector.clone()
        };
        match selector {
            Some(selector) => {
                let username = selector.username.clone();
                if let Err(err) = self.authenticate(selector).await {
                    warn!(username = %username, error = %err, "re-authentication failed");
                }
            }
            None => warn!("401 received but no selector recorded; cannot re-authenticate"),
        }
    }
}
