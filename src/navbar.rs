//! Navigation panel: links, incoming-request badge, profile block and logout.

use crate::account;
use crate::api::{self, Backend, LOGOUT_PATH, RECEIVED_REQUESTS_PATH};
use crate::pointer::{Observer, PointerBus, Region};
use crate::preferences::Preferences;
use crate::session::{Session, SessionContext};
use anyhow::anyhow;
use std::cell::Cell;
use std::fmt::Write as _;
use std::rc::Rc;

const NAV_PATHS: &[&str] = &["/", "/features", "/about", "/contact", "/friends", "/search"];
const PROFILE_PICTURE_PLACEHOLDER: &str = "https://via.placeholder.com/50";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavLink {
    pub label: String,
    pub path: String,
    /// Incoming request count shown next to the label
    pub badge: Option<usize>,
}

impl NavLink {
    fn new(label: &str, path: &str) -> Self {
        Self {
            label: label.to_string(),
            path: path.to_string(),
            badge: None,
        }
    }
}

/// Result of an incoming-request count fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestCount {
    Fetched(usize),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// Session cleared; the shell must reload its views
    Reload,
    Failed(String),
}

/// Resets the busy flag on every exit path
struct BusyGuard<'a>(&'a Cell<bool>);

impl<'a> BusyGuard<'a> {
    fn engage(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct Navbar {
    bus: PointerBus,
    menu_open: Rc<Cell<bool>>,
    busy: Rc<Cell<bool>>,
    incoming_requests: usize,
    fetched_for: Option<String>,
    outside_click: Option<Observer>,
    active_path: String,
}

impl Navbar {
    pub fn new(bus: PointerBus) -> Self {
        Self {
            bus,
            menu_open: Rc::new(Cell::new(false)),
            busy: Rc::new(Cell::new(false)),
            incoming_requests: 0,
            fetched_for: None,
            outside_click: None,
            active_path: "/".to_string(),
        }
    }

    pub fn is_menu_open(&self) -> bool {
        self.menu_open.get()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn incoming_requests(&self) -> usize {
        self.incoming_requests
    }

    pub fn active_path(&self) -> &str {
        &self.active_path
    }

    pub fn toggle_menu(&mut self) {
        self.menu_open.set(!self.menu_open.get());
        self.update_listener();
    }

    pub fn close_menu(&mut self) {
        self.menu_open.set(false);
        self.update_listener();
    }

    /// Keep the outside-press observer registered exactly while the menu is open
    pub fn update_listener(&mut self) {
        if !self.menu_open.get() {
            self.outside_click = None;
            return;
        }
        if self.outside_click.is_none() {
            let open = self.menu_open.clone();
            self.outside_click = Some(self.bus.observe(move |event| {
                if open.get() && event.target != Region::Navbar {
                    open.set(false);
                }
            }));
        }
    }

    /// Activate a link. Returns false if no visible link has this path.
    pub fn navigate(&mut self, session: &Session, path: &str) -> bool {
        self.close_menu();
        if !self.links(session).iter().any(|l| l.path == path) {
            return false;
        }
        self.active_path = path.to_string();
        true
    }

    /// Fetch the incoming request count when the signed-in user changed since
    /// the last fetch. A failed fetch leaves the badge unchanged.
    pub fn sync(&mut self, session: &Session, backend: &dyn Backend) -> Option<RequestCount> {
        let identity = session.identity().map(str::to_string);
        if identity == self.fetched_for {
            return None;
        }
        self.fetched_for = identity;
        self.fetched_for.as_ref()?;

        let outcome = backend
            .get(RECEIVED_REQUESTS_PATH, &[])
            .and_then(|resp| {
                if resp.is_success() {
                    Ok(api::sender_count(&resp.body))
                } else {
                    Err(anyhow!("HTTP {}", resp.status))
                }
            });
        match outcome {
            Ok(count) => {
                self.incoming_requests = count;
                Some(RequestCount::Fetched(count))
            }
            Err(e) => {
                eprintln!("Failed to fetch incoming requests count: {}", e);
                Some(RequestCount::Failed(e.to_string()))
            }
        }
    }

    pub fn logout(
        &self,
        session: &SessionContext,
        prefs: &dyn Preferences,
        backend: &dyn Backend,
    ) -> LogoutOutcome {
        let _busy = BusyGuard::engage(&self.busy);

        let result = backend.post(LOGOUT_PATH, None).and_then(|resp| {
            if resp.is_success() {
                Ok(())
            } else {
                Err(anyhow!("Logout failed (HTTP {})", resp.status))
            }
        });
        match result {
            Ok(()) => {
                account::forget(session, prefs);
                LogoutOutcome::Reload
            }
            Err(e) => {
                eprintln!("Logout failed: {}", e);
                LogoutOutcome::Failed(e.to_string())
            }
        }
    }

    pub fn links(&self, session: &Session) -> Vec<NavLink> {
        let mut links: Vec<NavLink> = NAV_PATHS
            .iter()
            .map(|path| {
                let label = if *path == "/" {
                    "Home"
                } else {
                    path.trim_start_matches('/')
                };
                NavLink::new(label, path)
            })
            .collect();

        match &session.user {
            Some(user) => {
                links.push(NavLink {
                    badge: Some(self.incoming_requests),
                    ..NavLink::new("Incoming Requests", "/incoming-requests")
                });
                links.push(NavLink {
                    badge: Some(self.incoming_requests),
                    ..NavLink::new("Notifications", "/notfound")
                });
                links.push(NavLink::new(
                    "Profile",
                    &format!("/users/{}", user.username),
                ));
                links.push(NavLink::new("Settings", "/settings"));
            }
            None => links.push(NavLink::new("Login", "/login")),
        }
        links
    }

    pub fn render(&self, session: &Session) -> String {
        let mut out = String::new();
        let menu = if self.is_menu_open() { "open" } else { "closed" };
        let _ = writeln!(out, "CashTrack  [menu: {}]", menu);

        for link in self.links(session) {
            if link.path.starts_with("/users/")
                || link.path == "/settings"
                || link.path == "/login"
            {
                continue;
            }
            let marker = if link.path == self.active_path { ">" } else { " " };
            match link.badge {
                Some(count) => {
                    let _ = writeln!(out, " {} {} ({})", marker, link.label, count);
                }
                None => {
                    let _ = writeln!(out, " {} {}", marker, link.label);
                }
            }
        }

        let _ = writeln!(out, "  ----");
        match &session.user {
            Some(user) => {
                let name = if user.username.is_empty() {
                    "User"
                } else {
                    user.username.as_str()
                };
                let email = if user.email.is_empty() {
                    "example@email.com"
                } else {
                    user.email.as_str()
                };
                let picture = user
                    .profile_picture
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .unwrap_or(PROFILE_PICTURE_PLACEHOLDER);
                let _ = writeln!(out, "  {} <{}>", name, email);
                let _ = writeln!(out, "  picture: {}", picture);
                let _ = writeln!(out, "  Settings");
                if self.is_busy() {
                    let _ = writeln!(out, "  [Logging out...]");
                } else {
                    let _ = writeln!(out, "  [Logout]");
                }
            }
            None => {
                let _ = writeln!(out, "  [Login]");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedBackend;
    use crate::api::ApiResponse;
    use crate::preferences::{MemoryPreferences, ACCESS_TOKEN_KEY};
    use crate::session::UserProfile;
    use serde_json::{json, Value};

    fn signed_in(username: &str) -> Session {
        Session {
            user: Some(UserProfile {
                username: username.to_string(),
                email: format!("{}@example.com", username),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_signed_out_hides_request_sections() {
        let navbar = Navbar::new(PointerBus::new());
        let session = Session::default();
        let links = navbar.links(&session);
        assert!(links.iter().all(|l| l.badge.is_none()));
        assert!(links.iter().any(|l| l.path == "/login"));

        let rendered = navbar.render(&session);
        assert!(!rendered.contains("Incoming Requests"));
        assert!(!rendered.contains("Notifications"));
        assert!(rendered.contains("[Login]"));
        assert!(!rendered.contains("[Logout]"));
    }

    #[test]
    fn test_signed_in_shows_badges_and_profile() {
        let mut navbar = Navbar::new(PointerBus::new());
        let session = signed_in("alice");
        let backend = ScriptedBackend::new().reply(200, json!({ "data": { "senders": [{}, {}] } }));
        navbar.sync(&session, &backend);

        let rendered = navbar.render(&session);
        assert!(rendered.contains("Incoming Requests (2)"));
        assert!(rendered.contains("Notifications (2)"));
        assert!(rendered.contains("alice <alice@example.com>"));
        assert!(rendered.contains(PROFILE_PICTURE_PLACEHOLDER));
        assert!(rendered.contains("[Logout]"));
        assert!(navbar
            .links(&session)
            .iter()
            .any(|l| l.path == "/users/alice"));
    }

    #[test]
    fn test_profile_fallbacks() {
        let navbar = Navbar::new(PointerBus::new());
        let session = Session {
            user: Some(UserProfile::default()),
            ..Default::default()
        };
        let rendered = navbar.render(&session);
        assert!(rendered.contains("User <example@email.com>"));
    }

    #[test]
    fn test_sync_fetches_once_per_user() {
        let mut navbar = Navbar::new(PointerBus::new());
        let backend = ScriptedBackend::new()
            .reply(200, json!({ "data": { "senders": [{}] } }))
            .reply(200, json!({ "data": { "senders": [{}, {}, {}] } }));

        assert_eq!(navbar.sync(&Session::default(), &backend), None);
        assert!(backend.calls().is_empty());

        let alice = signed_in("alice");
        assert_eq!(navbar.sync(&alice, &backend), Some(RequestCount::Fetched(1)));
        assert_eq!(navbar.sync(&alice, &backend), None);

        let bob = signed_in("bob");
        assert_eq!(navbar.sync(&bob, &backend), Some(RequestCount::Fetched(3)));
        assert_eq!(navbar.incoming_requests(), 3);
        assert_eq!(backend.calls().len(), 2);
        assert_eq!(backend.calls()[0].path, RECEIVED_REQUESTS_PATH);
    }

    #[test]
    fn test_sync_missing_senders_counts_zero() {
        let mut navbar = Navbar::new(PointerBus::new());
        let backend = ScriptedBackend::new().reply(200, json!({ "data": {} }));
        assert_eq!(
            navbar.sync(&signed_in("alice"), &backend),
            Some(RequestCount::Fetched(0))
        );
    }

    #[test]
    fn test_sync_failure_keeps_count() {
        let mut navbar = Navbar::new(PointerBus::new());
        let backend = ScriptedBackend::new()
            .reply(200, json!({ "data": { "senders": [{}, {}] } }))
            .reply(500, json!({ "message": "boom" }))
            .fail("connection refused");

        navbar.sync(&signed_in("alice"), &backend);
        assert!(matches!(
            navbar.sync(&signed_in("bob"), &backend),
            Some(RequestCount::Failed(_))
        ));
        assert_eq!(navbar.incoming_requests(), 2);
        assert!(matches!(
            navbar.sync(&signed_in("carol"), &backend),
            Some(RequestCount::Failed(_))
        ));
        assert_eq!(navbar.incoming_requests(), 2);
    }

    /// Records the busy flag as seen while the request is in flight
    struct ObservingBackend {
        flag: Rc<Cell<bool>>,
        seen: Cell<Option<bool>>,
        status: Option<u16>,
    }

    impl Backend for ObservingBackend {
        fn get(&self, _path: &str, _query: &[(&str, &str)]) -> anyhow::Result<ApiResponse> {
            unreachable!()
        }

        fn post(&self, path: &str, _body: Option<&Value>) -> anyhow::Result<ApiResponse> {
            assert_eq!(path, LOGOUT_PATH);
            self.seen.set(Some(self.flag.get()));
            match self.status {
                Some(status) => Ok(ApiResponse::new(status, Value::Null)),
                None => Err(anyhow!("network down")),
            }
        }
    }

    fn run_logout(status: Option<u16>) -> (LogoutOutcome, Option<bool>, bool, SessionContext) {
        let navbar = Navbar::new(PointerBus::new());
        let session = SessionContext::new();
        session.set_user(signed_in("alice").user);
        session.set_access_token(Some("acc".to_string()));
        let prefs = MemoryPreferences::new();
        prefs.set(ACCESS_TOKEN_KEY, "acc").unwrap();
        let backend = ObservingBackend {
            flag: navbar.busy.clone(),
            seen: Cell::new(None),
            status,
        };
        assert!(!navbar.is_busy());
        let outcome = navbar.logout(&session, &prefs, &backend);
        (outcome, backend.seen.get(), navbar.is_busy(), session)
    }

    #[test]
    fn test_logout_success_clears_session() {
        let (outcome, busy_in_flight, busy_after, session) = run_logout(Some(200));
        assert_eq!(outcome, LogoutOutcome::Reload);
        assert_eq!(busy_in_flight, Some(true));
        assert!(!busy_after);
        assert_eq!(session.snapshot(), Session::default());
    }

    #[test]
    fn test_logout_http_failure_keeps_session() {
        let (outcome, busy_in_flight, busy_after, session) = run_logout(Some(401));
        assert!(matches!(outcome, LogoutOutcome::Failed(_)));
        assert_eq!(busy_in_flight, Some(true));
        assert!(!busy_after);
        assert_eq!(session.user().unwrap().username, "alice");
    }

    #[test]
    fn test_logout_network_failure_resets_busy() {
        let (outcome, busy_in_flight, busy_after, session) = run_logout(None);
        assert!(matches!(outcome, LogoutOutcome::Failed(_)));
        assert_eq!(busy_in_flight, Some(true));
        assert!(!busy_after);
        assert!(session.user().is_some());
    }

    #[test]
    fn test_outside_press_closes_menu() {
        let bus = PointerBus::new();
        let mut navbar = Navbar::new(bus.clone());
        assert_eq!(bus.observer_count(), 0);

        navbar.toggle_menu();
        assert!(navbar.is_menu_open());
        assert_eq!(bus.observer_count(), 1);

        bus.press(Region::Navbar);
        assert!(navbar.is_menu_open());

        bus.press(Region::Content);
        assert!(!navbar.is_menu_open());
        navbar.update_listener();
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn test_closed_menu_registers_no_observer() {
        let bus = PointerBus::new();
        let mut navbar = Navbar::new(bus.clone());
        navbar.toggle_menu();
        navbar.toggle_menu();
        assert_eq!(bus.observer_count(), 0);

        navbar.toggle_menu();
        drop(navbar);
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn test_navigate_closes_menu() {
        let mut navbar = Navbar::new(PointerBus::new());
        let session = signed_in("alice");
        navbar.toggle_menu();
        assert!(navbar.navigate(&session, "/friends"));
        assert!(!navbar.is_menu_open());
        assert_eq!(navbar.active_path(), "/friends");

        assert!(!navbar.navigate(&Session::default(), "/incoming-requests"));
        assert_eq!(navbar.active_path(), "/friends");
    }
}
