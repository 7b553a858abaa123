//! Route gating derived from the session state.

use super::session::SessionState;

/// Who a view is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    /// Requires a logged-in user (bookings, profile)
    Protected,
    /// Only for anonymous users (login, register)
    PublicOnly,
    /// Anyone, regardless of session
    Open,
}

/// What to do with a navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Session not settled yet; neither allow nor redirect
    Pending,
    Allow,
    RedirectToLogin,
    RedirectToHome,
}

impl SessionState {
    pub fn gate(&self, access: RouteAccess) -> Gate {
        match access {
            RouteAccess::Open => Gate::Allow,
            _ if self.is_loading => Gate::Pending,
            RouteAccess::Protected if self.is_authenticated() => Gate::Allow,
            RouteAccess::Protected => Gate::RedirectToLogin,
            RouteAccess::PublicOnly if self.is_authenticated() => Gate::RedirectToHome,
            RouteAccess::PublicOnly => Gate::Allow,
        }
    }
}
