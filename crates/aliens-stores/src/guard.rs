//! Route guard.
//!
//! Decides, for each navigation, whether the visitor may see the path,
//! needs a guest session provisioned first, or gets redirected.

use crate::StoreResult;
use aliens_session::SessionManager;
use aliens_types::routes;
use std::sync::Arc;

/// Externally visible guard state while a navigation settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Session restore or guest provisioning still running.
    Loading,
    /// Navigation is being redirected.
    Redirecting,
    /// The requested path may render.
    Settled,
}

/// Outcome of evaluating a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Allow,
    Redirect(&'static str),
}

/// What a navigation to `path` requires, given whether a session exists.
/// Pure decision table; [`RouteGuard::evaluate`] acts on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    Allow,
    /// Provision a guest session, then allow.
    EnsureGuest,
    Redirect(&'static str),
}

/// Decide what a navigation needs.
///
/// Guest-accessible paths are checked first so an anonymous visitor gets a
/// guest session instead of a login redirect. A signed-in visitor landing
/// on the login page goes home.
pub fn guard_decision(path: &str, authenticated: bool) -> GuardAction {
    if routes::is_guest_access_route(path) {
        if authenticated {
            return GuardAction::Allow;
        }
        return GuardAction::EnsureGuest;
    }
    if routes::is_public_route(path) {
        if authenticated && path == routes::AUTH {
            return GuardAction::Redirect(routes::HOME);
        }
        return GuardAction::Allow;
    }
    if authenticated {
        GuardAction::Allow
    } else {
        GuardAction::Redirect(routes::AUTH)
    }
}

/// Route guard bound to a session manager.
pub struct RouteGuard {
    session: Arc<SessionManager>,
    state: tokio::sync::RwLock<GuardState>,
}

impl RouteGuard {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self {
            session,
            state: tokio::sync::RwLock::new(GuardState::Loading),
        }
    }

    /// The state of the last navigation.
    pub async fn state(&self) -> GuardState {
        *self.state.read().await
    }

    /// Evaluate a navigation, provisioning a guest session when the path
    /// calls for one. The guard reads [`GuardState::Loading`] while guest
    /// provisioning runs.
    pub async fn evaluate(&self, path: &str) -> StoreResult<GuardOutcome> {
        let authenticated = self.session.current_profile().await.is_some();
        match guard_decision(path, authenticated) {
            GuardAction::Allow => {
                *self.state.write().await = GuardState::Settled;
                Ok(GuardOutcome::Allow)
            }
            GuardAction::Redirect(target) => {
                tracing::debug!(path, target, "navigation redirected");
                *self.state.write().await = GuardState::Redirecting;
                Ok(GuardOutcome::Redirect(target))
            }
            GuardAction::EnsureGuest => {
                *self.state.write().await = GuardState::Loading;
                match self.session.ensure_guest_access().await {
                    Ok(_) => {
                        *self.state.write().await = GuardState::Settled;
                        Ok(GuardOutcome::Allow)
                    }
                    Err(e) => {
                        tracing::warn!(path, error = %e, "guest provisioning failed");
                        *self.state.write().await = GuardState::Redirecting;
                        Ok(GuardOutcome::Redirect(routes::AUTH))
                    }
                }
            }
        }
    }
}
