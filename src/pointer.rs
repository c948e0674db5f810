//! Document-level pointer events.
//!
//! The shell has no real pointer, so every REPL interaction is reported as a
//! press on the region it targets. Views register observers on the bus while
//! they need them; an observer stays registered until its [`Observer`] guard is
//! dropped.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Regions of the shell a pointer press can land on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// The sliding navigation panel
    Navbar,
    /// The hamburger button that opens the panel (sits outside it)
    MenuButton,
    /// Main page content
    Content,
}

impl Region {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "navbar" | "nav" => Some(Self::Navbar),
            "menu" | "menubutton" | "menu-button" => Some(Self::MenuButton),
            "content" | "page" => Some(Self::Content),
            _ => None,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Navbar => "navbar",
            Self::MenuButton => "menu-button",
            Self::Content => "content",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub target: Region,
}

type Handler = Rc<dyn Fn(&PointerEvent)>;

#[derive(Default)]
struct BusInner {
    handlers: Vec<(u64, Handler)>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct PointerBus {
    inner: Rc<RefCell<BusInner>>,
}

/// Registration guard returned by [`PointerBus::observe`]
pub struct Observer {
    inner: Weak<RefCell<BusInner>>,
    id: u64,
}

impl Drop for Observer {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.borrow_mut().handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl PointerBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, handler: impl Fn(&PointerEvent) + 'static) -> Observer {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.push((id, Rc::new(handler)));
        Observer {
            inner: Rc::downgrade(&self.inner),
            id,
        }
    }

    pub fn dispatch(&self, event: PointerEvent) {
        let handlers: Vec<Handler> = self
            .inner
            .borrow()
            .handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn press(&self, target: Region) {
        self.dispatch(PointerEvent { target });
    }

    pub fn observer_count(&self) -> usize {
        self.inner.borrow().handlers.len()
    }
}
