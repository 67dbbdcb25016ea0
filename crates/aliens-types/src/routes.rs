//! Application route constants and access predicates.

/// Login / registration page.
pub const AUTH: &str = "/auth";
/// Home page.
pub const HOME: &str = "/";
/// Profile page.
pub const PROFILE: &str = "/profile";
/// Card list and per-card chats.
pub const CARDS: &str = "/cards";
/// Marketing landing page.
pub const LANDING: &str = "/landing";

/// Routes reachable without any session.
pub const PUBLIC_ROUTES: &[&str] = &[AUTH, HOME, LANDING];

/// Route prefixes where an anonymous visitor gets a guest session
/// provisioned automatically.
pub const GUEST_ACCESS_ROUTES: &[&str] = &[CARDS];

/// Whether the path is public (exact match).
pub fn is_public_route(path: &str) -> bool {
    PUBLIC_ROUTES.contains(&path)
}

/// Whether the path is guest-accessible (prefix match).
pub fn is_guest_access_route(path: &str) -> bool {
    GUEST_ACCESS_ROUTES
        .iter()
        .any(|route| path.starts_with(route))
}
