//! Server configuration and user accounts.

use serde::{Deserialize, Serialize};

use crate::auth::hash_password;

/// A user allowed to drive the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    pub full_name: String,
    /// Lowercase hex SHA-256 of the password.
    pub password_hash: String,
}

impl UserAccount {
    pub fn new(username: &str, full_name: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            full_name: full_name.to_string(),
            password_hash: hash_password(password),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Idle lifetime of a session. Every authorized request restarts it.
    pub session_ttl_secs: u64,
    pub users: Vec<UserAccount>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            session_ttl_secs: 3600,
            users: vec![UserAccount::new("admin", "Administrator", "admin123")],
        }
    }
}

impl ServerConfig {
    pub fn user(&self, username: &str) -> Option<&UserAccount> {
        self.users.iter().find(|u| u.username == username)
    }
}
