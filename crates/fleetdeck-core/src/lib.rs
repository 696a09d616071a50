use serde::{Deserialize, Serialize};

pub mod fleet;
pub mod push;

/// Fleet roles as issued by the login endpoint. Scoping is enforced
/// server-side from the token; the client never filters by scope itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    TerritoryManager,
    RegionalManager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::TerritoryManager => "territory_manager",
            Role::RegionalManager => "regional_manager",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub territory_id: Option<String>,
}

impl Identity {
    /// Human-readable scope for status lines.
    pub fn scope_description(&self) -> String {
        match self.role {
            Role::Admin => "all regions and territories".to_string(),
            Role::RegionalManager => format!(
                "region {}",
                self.region_id.as_deref().unwrap_or("unknown")
            ),
            Role::TerritoryManager => format!(
                "territory {}",
                self.territory_id.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

/// A live bearer credential. Replaced wholesale on re-login, never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub territory_id: Option<String>,
}

impl From<LoginResponse> for Credential {
    fn from(response: LoginResponse) -> Self {
        Credential {
            token: response.access_token,
            identity: Identity {
                username: response.username,
                role: response.role,
                region_id: response.region_id,
                territory_id: response.territory_id,
            },
        }
    }
}
