//! Application-scoped session context.
//!
//! Holds the signed-in user, the access/refresh tokens and the list of incoming
//! friend requests. The context is a cheap reference-counted handle: every
//! component receives a clone and all clones observe the same state. Each setter
//! notifies the registered subscribers so dependent views can re-render.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

/// A user row as returned by search and friend-request listings
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct UserRecord {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

impl UserRecord {
    pub fn new(id: &str, username: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    pub user: Option<UserProfile>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub incoming_requests: Vec<UserRecord>,
}

impl Session {
    /// Identity used to decide whether per-user data must be re-fetched
    pub fn identity(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }
}

type Listener = Rc<dyn Fn(&Session)>;

#[derive(Default)]
struct Inner {
    session: Session,
    listeners: Vec<(u64, Listener)>,
    next_listener: u64,
}

/// Shared handle to the session state
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Rc<RefCell<Inner>>,
}

/// Keeps a session listener registered; dropping it unsubscribes
pub struct Subscription {
    inner: Weak<RefCell<Inner>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener invoked after every setter call
    pub fn subscribe(&self, listener: impl Fn(&Session) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.push((id, Rc::new(listener)));
        Subscription {
            inner: Rc::downgrade(&self.inner),
            id,
        }
    }

    pub fn snapshot(&self) -> Session {
        self.inner.borrow().session.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.borrow().session.user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.borrow().session.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.borrow().session.refresh_token.clone()
    }

    pub fn incoming_requests(&self) -> Vec<UserRecord> {
        self.inner.borrow().session.incoming_requests.clone()
    }

    pub fn set_user(&self, user: Option<UserProfile>) {
        self.update(|s| s.user = user);
    }

    pub fn set_access_token(&self, token: Option<String>) {
        self.update(|s| s.access_token = token);
    }

    pub fn set_refresh_token(&self, token: Option<String>) {
        self.update(|s| s.refresh_token = token);
    }

    pub fn set_incoming_requests(&self, requests: Vec<UserRecord>) {
        self.update(|s| s.incoming_requests = requests);
    }

    /// Reset every field to its startup value
    pub fn clear(&self) {
        self.update(|s| *s = Session::default());
    }

    fn update(&self, apply: impl FnOnce(&mut Session)) {
        apply(&mut self.inner.borrow_mut().session);
        self.notify();
    }

    fn notify(&self) {
        // Listeners may read or even mutate the context, so no borrow is held
        // while they run.
        let (snapshot, listeners): (Session, Vec<Listener>) = {
            let inner = self.inner.borrow();
            (
                inner.session.clone(),
                inner.listeners.iter().map(|(_, l)| l.clone()).collect(),
            )
        };
        for listener in listeners {
            listener(&snapshot);
        }
    }
}
