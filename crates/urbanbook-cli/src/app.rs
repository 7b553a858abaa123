//! Application wiring for the urbanbook CLI.
//!
//! This module contains the `App` struct that owns the configuration, session
//! store, API client and cache, and implements each command on top of them.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use urbanbook_core::models::LoginCredentials;
use urbanbook_core::{
    ApiClient, ApiError, CacheManager, Config, FileStorage, KeyringStorage, ResolverState,
    SessionResolver, SessionState, SessionStore, TokenBackend, TokenStorage, User,
};

/// Environment variable providing the login email
const EMAIL_ENV: &str = "URBANBOOK_EMAIL";

/// Environment variable providing the login password
const PASSWORD_ENV: &str = "URBANBOOK_PASSWORD";

pub struct App {
    pub config: Config,
    pub session: SessionStore,
    pub api: ApiClient,
    cache: Arc<CacheManager>,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };

        let cache_dir = config.cache_dir()?;
        let storage: Arc<dyn TokenStorage> = match config.token_backend {
            TokenBackend::File => Arc::new(FileStorage::new(&cache_dir)),
            TokenBackend::Keyring => Arc::new(KeyringStorage::new()),
        };
        debug!(backend = ?config.token_backend, ?cache_dir, "Token storage configured");

        let cache = Arc::new(CacheManager::new(config.query_cache_dir()?)?);
        let session = SessionStore::new(storage, cache.clone());
        let api = ApiClient::from_config(&config, session.clone())?;
        debug!(base_url = api.base_url(), "API client configured");

        Ok(Self {
            config,
            session,
            api,
            cache,
        })
    }

    /// Resolve the persisted session against the backend and wait for it to settle.
    pub async fn resolve_session(&self) -> SessionState {
        let handle = SessionResolver::new(self.session.clone(), Arc::new(self.api.clone())).spawn();
        match handle.await {
            Ok(ResolverState::ResolvedAuthenticated) => {
                if let Some(user) = self.session.user() {
                    self.cache_profile(&user);
                }
            }
            Ok(state) => debug!(?state, "Session resolution finished"),
            Err(e) => error!(error = %e, "Session resolver task failed"),
        }
        self.session.resolved().await
    }

    fn cache_profile(&self, user: &User) {
        if let Err(e) = self.cache.save_profile(user) {
            warn!(error = %e, "Failed to cache profile");
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub async fn login(&mut self, email: Option<String>) -> Result<()> {
        let email = match email
            .or_else(|| std::env::var(EMAIL_ENV).ok())
            .or_else(|| self.config.last_email.clone())
        {
            Some(email) => email,
            None => Self::prompt_email()?,
        };
        let password = match std::env::var(PASSWORD_ENV) {
            Ok(p) if !p.is_empty() => p,
            _ => rpassword::prompt_password("Password: ")?,
        };

        if email.is_empty() || password.is_empty() {
            return Err(anyhow::anyhow!("Email and password required"));
        }

        let response = match self.api.login(&LoginCredentials::new(&email, password)).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Login failed");
                return Err(anyhow::anyhow!(Self::user_message(&e)));
            }
        };

        let user = response.user();
        self.session.login(&response.access_token, user.clone())?;
        self.cache_profile(&user);

        self.config.last_email = Some(email);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        info!("Login successful");
        println!("Logged in as {} <{}> ({})", user.name, user.email, user.role);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        let was_logged_in = self.session.token().is_some();
        self.api.logout().await;
        if was_logged_in {
            println!("Logged out.");
        } else {
            println!("No active session.");
        }
        Ok(())
    }

    pub async fn whoami(&self) -> Result<()> {
        let had_token = self.session.token().is_some();
        let state = self.resolve_session().await;
        match state.user {
            Some(ref user) => Self::print_user(user),
            None if had_token && self.session.token().is_none() => {
                println!("Session expired. Please log in again.");
            }
            None => println!("Not logged in."),
        }
        Ok(())
    }

    /// Report local session state without contacting the server.
    pub fn status(&self) -> Result<()> {
        let token = if self.session.token().is_some() {
            "present"
        } else {
            "absent"
        };
        println!("Server:  {}", self.api.base_url());
        println!("Token:   {} ({:?} storage)", token, self.config.token_backend);

        match self.cache.load_profile() {
            Ok(Some(cached)) => {
                let stale = if cached.is_stale() { ", stale" } else { "" };
                println!(
                    "Profile: {} <{}> (cached {}{})",
                    cached.data.name,
                    cached.data.email,
                    cached.age_display(),
                    stale
                );
            }
            Ok(None) => println!("Profile: none cached"),
            Err(e) => {
                warn!(error = %e, "Failed to read cached profile");
                println!("Profile: unreadable cache");
            }
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn print_user(user: &User) {
        println!("{} <{}>", user.name, user.email);
        println!("  id:   {}", user.id);
        println!("  role: {}", user.role);
        if let Some(ref phone) = user.phone {
            println!("  phone: {}", phone);
        }
        if let Some(address) = user.default_address() {
            println!("  address: {}, {} {}", address.street, address.city, address.postal_code);
        }
    }

    fn prompt_email() -> Result<String> {
        print!("Email: ");
        io::stdout().flush()?;

        let mut email = String::new();
        io::stdin().read_line(&mut email)?;
        Ok(email.trim().to_string())
    }

    /// Turn an API failure into something a user can act on.
    fn user_message(e: &anyhow::Error) -> String {
        let api_error = e.chain().find_map(|c| c.downcast_ref::<ApiError>());
        match api_error {
            Some(ApiError::Unauthorized) => "Invalid email or password".to_string(),
            Some(ApiError::RateLimited) => {
                "Server is busy. Please wait a moment and try again.".to_string()
            }
            Some(ApiError::NetworkError(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            _ => format!("Login failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_bad_credentials() {
        let err: anyhow::Error = ApiError::Unauthorized.into();
        assert_eq!(App::user_message(&err), "Invalid email or password");
    }

    #[test]
    fn test_user_message_for_rate_limit() {
        let err: anyhow::Error = ApiError::RateLimited.into();
        assert!(App::user_message(&err).starts_with("Server is busy"));
    }

    #[test]
    fn test_user_message_for_rate_limit_behind_context() {
        let err = anyhow::Error::from(ApiError::RateLimited).context("Failed to send POST request");
        assert!(App::user_message(&err).starts_with("Server is busy"));
    }

    #[test]
    fn test_user_message_ignores_rate_limit_wording_in_other_errors() {
        let err = anyhow::anyhow!("rate limit config missing");
        assert_eq!(App::user_message(&err), "Login failed: rate limit config missing");
    }

    #[test]
    fn test_user_message_falls_back_to_error_text() {
        let err = anyhow::anyhow!("something odd");
        assert_eq!(App::user_message(&err), "Login failed: something odd");
    }
}
