use crate::account;
use crate::api::{self, Backend};
use crate::config::Config;
use crate::navbar::{LogoutOutcome, Navbar, RequestCount};
use crate::pointer::{PointerBus, Region};
use crate::preferences::Preferences;
use crate::realtime::{ChannelEvent, ChannelState, RealtimeChannel};
use crate::search::{SearchOutcome, SearchView};
use crate::session::{SessionContext, Subscription};
use crate::transcript::Transcript;
use crate::Args;
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

const EVENT_HISTORY: usize = 50;

pub struct Context {
    pub args: Args,
    pub config: Config,
    pub session_id: String,
    pub transcript: RefCell<Transcript>,
    pub tracing: RefCell<bool>,
    pub session: SessionContext,
    pub preferences: Arc<dyn Preferences>,
    pub backend: Rc<dyn Backend>,
    pub pointer: PointerBus,
    pub navbar: RefCell<Navbar>,
    pub search: RefCell<SearchView>,
    pub channel: RefCell<RealtimeChannel>,
    /// Set by the session subscription; the navbar is re-rendered when set
    dirty: Rc<Cell<bool>>,
    last_state: RefCell<ChannelState>,
    events: RefCell<VecDeque<String>>,
    _subscription: Subscription,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        args: Args,
        config: Config,
        session_id: String,
        transcript: Transcript,
        session: SessionContext,
        preferences: Arc<dyn Preferences>,
        backend: Rc<dyn Backend>,
        channel: RealtimeChannel,
    ) -> Self {
        let dirty = Rc::new(Cell::new(false));
        let flag = dirty.clone();
        let subscription = session.subscribe(move |_| flag.set(true));
        let pointer = PointerBus::new();
        let tracing = args.trace;
        let search = SearchView::new(config.placeholder_results());

        Self {
            args,
            config,
            session_id,
            transcript: RefCell::new(transcript),
            tracing: RefCell::new(tracing),
            session,
            preferences,
            backend,
            navbar: RefCell::new(Navbar::new(pointer.clone())),
            pointer,
            search: RefCell::new(search),
            channel: RefCell::new(channel),
            dirty,
            last_state: RefCell::new(ChannelState::Disconnected),
            events: RefCell::new(VecDeque::new()),
            _subscription: subscription,
        }
    }

    /// Rebuild the views as a fresh page load would; the realtime connection
    /// is restarted if it was up
    pub fn reload(&self) {
        trace(self, "reload", "rebuilding views");
        *self.navbar.borrow_mut() = Navbar::new(self.pointer.clone());
        *self.search.borrow_mut() = SearchView::new(self.config.placeholder_results());
        let mut channel = self.channel.borrow_mut();
        if channel.is_running() {
            channel.reconnect();
        }
        self.dirty.set(true);
    }
}

fn trace(ctx: &Context, label: &str, content: &str) {
    if *ctx.tracing.borrow() {
        eprintln!("[TRACE:{}] {}", label, content);
    }
}

fn verbose(ctx: &Context, message: &str) {
    if ctx.args.verbose {
        eprintln!("[VERBOSE] {}", message);
    }
}

pub fn run_once(ctx: &Context, command: &str) -> Result<()> {
    run_effects(ctx);
    let line = if command.starts_with('/') {
        command.to_string()
    } else {
        format!("/{}", command)
    };
    handle_command(ctx, &line);
    run_effects(ctx);
    Ok(())
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cashtrack").join("history.txt"))
}

pub fn run_repl(ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    println!("cashtrack - type /help for commands, /exit to quit");
    run_effects(&ctx);
    println!("{}", ctx.navbar.borrow().render(&ctx.session.snapshot()));
    ctx.dirty.set(false);

    loop {
        match rl.readline("cashtrack> ") {
            Ok(line) => {
                let line = line.trim();
                // Socket events that arrived while waiting for input
                run_effects(&ctx);
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if !line.starts_with('/') {
                    println!("Commands start with '/'. Type /help for the list.");
                    continue;
                }
                if handle_command(&ctx, line) {
                    break;
                }
                run_effects(&ctx);
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let _ = rl.save_history(path);
    }
    ctx.channel.borrow_mut().disconnect();
    Ok(())
}

/// Region a command's pointer press lands on; meta commands press nothing
fn region_for(command: &str) -> Option<Region> {
    match command {
        "/go" | "/logout" | "/nav" => Some(Region::Navbar),
        "/menu" => Some(Region::MenuButton),
        "/login" | "/search" | "/requests" | "/emit" => Some(Region::Content),
        _ => None,
    }
}

/// Run one slash command. Returns true when the shell should exit.
pub fn handle_command(ctx: &Context, line: &str) -> bool {
    let parts = match shell_words::split(line) {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("Could not parse command: {}", e);
            return false;
        }
    };
    let Some((command, rest)) = parts.split_first() else {
        return false;
    };
    let command = command.as_str();

    // /menu presses its own button below
    if command != "/menu" {
        if let Some(region) = region_for(command) {
            trace(ctx, "pointer", &region.to_string());
            ctx.pointer.press(region);
        }
    }

    match command {
        "/exit" | "/quit" => return true,
        "/help" => print_help(),
        "/nav" => {
            println!("{}", ctx.navbar.borrow().render(&ctx.session.snapshot()));
            ctx.dirty.set(false);
        }
        "/menu" => toggle_menu(ctx),
        "/go" => match rest.first() {
            Some(path) => {
                let session = ctx.session.snapshot();
                if ctx.navbar.borrow_mut().navigate(&session, path) {
                    println!("Now at {}", path);
                } else {
                    println!("No link to {}. Use /nav to list links.", path);
                }
            }
            None => println!("Usage: /go <path>"),
        },
        "/click" => match rest.first().and_then(|r| Region::from_str(r)) {
            Some(region) => {
                ctx.pointer.press(region);
                println!("Pressed {}", region);
            }
            None => println!("Usage: /click navbar|menu|content"),
        },
        "/login" => match rest {
            [identifier, password] => login(ctx, identifier, password),
            _ => println!("Usage: /login <email|username> <password>"),
        },
        "/logout" => logout(ctx),
        "/whoami" => match ctx.session.user() {
            Some(user) => {
                println!("{} <{}>", user.username, user.email);
                if let Some(id) = &user.id {
                    println!("  id: {}", id);
                }
            }
            None => println!("Not signed in."),
        },
        "/requests" => list_requests(ctx),
        "/search" => {
            let query = rest.join(" ");
            search(ctx, &query);
        }
        "/socket" => handle_socket_command(ctx, rest.first().map(String::as_str)),
        "/emit" => match rest {
            [event] => emit(ctx, event, None),
            [event, payload, ..] => emit(ctx, event, Some(payload)),
            _ => println!("Usage: /emit <event> [json]"),
        },
        "/events" => {
            let events = ctx.events.borrow();
            if events.is_empty() {
                println!("No realtime events yet.");
            }
            for event in events.iter() {
                println!("  {}", event);
            }
        }
        "/session" => {
            let session = ctx.session.snapshot();
            println!("Session: {}", ctx.session_id);
            println!("Transcript: {:?}", ctx.transcript.borrow().path);
            println!("Backend: {}", ctx.config.backend_url());
            println!("Socket: {}", ctx.config.socket_url());
            println!("Socket state: {}", ctx.channel.borrow().state());
            println!("User: {}", session.identity().unwrap_or("(signed out)"));
            println!(
                "Access token: {}",
                if session.access_token.is_some() { "present" } else { "none" }
            );
            println!("Incoming requests loaded: {}", session.incoming_requests.len());
        }
        "/trace" => {
            let mut t = ctx.tracing.borrow_mut();
            *t = !*t;
            println!("Tracing: {}", if *t { "on" } else { "off" });
        }
        other => println!("Unknown command: {}. Type /help for the list.", other),
    }
    false
}

fn print_help() {
    println!("Commands:");
    println!("  /exit                  - quit");
    println!("  /help                  - show commands");
    println!("  /session               - show session info");
    println!("  /trace                 - toggle tracing");
    println!("Navigation:");
    println!("  /nav                   - show the navigation panel");
    println!("  /menu                  - open or close the navigation menu");
    println!("  /go <path>             - follow a navigation link");
    println!("  /click <region>        - press navbar, menu or content");
    println!("Account:");
    println!("  /login <id> <password> - sign in with email or username");
    println!("  /logout                - sign out");
    println!("  /whoami                - show the signed-in user");
    println!("  /requests              - list incoming friend requests");
    println!("Search:");
    println!("  /search <username>     - search users by username");
    println!("Realtime:");
    println!("  /socket [status|connect|disconnect|reconnect]");
    println!("  /emit <event> [json]   - send an event");
    println!("  /events                - show recent realtime events");
}

fn toggle_menu(ctx: &Context) {
    let was_open = ctx.navbar.borrow().is_menu_open();
    ctx.pointer.press(Region::MenuButton);
    let mut navbar = ctx.navbar.borrow_mut();
    // The press already closed an open menu
    if navbar.is_menu_open() == was_open {
        navbar.toggle_menu();
    } else {
        navbar.update_listener();
    }
    println!(
        "Menu {}",
        if navbar.is_menu_open() { "open" } else { "closed" }
    );
}

fn login(ctx: &Context, identifier: &str, password: &str) {
    let result = account::login(
        &ctx.session,
        ctx.preferences.as_ref(),
        ctx.backend.as_ref(),
        identifier,
        password,
    );
    match result {
        Ok(user) => {
            println!("Signed in as {}", user.username);
            let _ = ctx.transcript.borrow_mut().login(identifier, true, None);
            // New token for the realtime handshake
            let mut channel = ctx.channel.borrow_mut();
            if channel.is_running() {
                verbose(ctx, "Reconnecting realtime channel with new token");
                channel.reconnect();
            }
        }
        Err(e) => {
            eprintln!("Login failed: {}", e);
            let _ = ctx
                .transcript
                .borrow_mut()
                .login(identifier, false, Some(&e.to_string()));
        }
    }
}

fn logout(ctx: &Context) {
    if ctx.session.user().is_none() {
        println!("Not signed in.");
        return;
    }
    println!("Logging out...");
    let outcome = ctx.navbar.borrow().logout(
        &ctx.session,
        ctx.preferences.as_ref(),
        ctx.backend.as_ref(),
    );
    match outcome {
        LogoutOutcome::Reload => {
            let _ = ctx.transcript.borrow_mut().logout(true, None);
            println!("Signed out.");
            ctx.reload();
        }
        LogoutOutcome::Failed(e) => {
            let _ = ctx.transcript.borrow_mut().logout(false, Some(&e));
        }
    }
}

fn list_requests(ctx: &Context) {
    if ctx.session.user().is_none() {
        println!("Sign in to see incoming requests.");
        return;
    }
    match api::received_requests(ctx.backend.as_ref()) {
        Ok(senders) => {
            if senders.is_empty() {
                println!("No incoming requests.");
            }
            for sender in &senders {
                println!("  {}  {}", sender.username, sender.email);
            }
            ctx.session.set_incoming_requests(senders);
        }
        Err(e) => {
            eprintln!("Failed to fetch incoming requests: {}", e);
            let _ = ctx
                .transcript
                .borrow_mut()
                .diagnostic("requests", &e.to_string());
        }
    }
}

fn search(ctx: &Context, query: &str) {
    let mut view = ctx.search.borrow_mut();
    let outcome = view.submit(query, ctx.backend.as_ref());
    trace(ctx, "search", &format!("{:?}", outcome));
    let label = match &outcome {
        SearchOutcome::Skipped => "skipped".to_string(),
        SearchOutcome::Found(_) => "found".to_string(),
        SearchOutcome::NoMatches => "no_matches".to_string(),
        SearchOutcome::Rejected(status) => format!("rejected_{}", status),
        SearchOutcome::Unreachable => "unreachable".to_string(),
    };
    let _ = ctx
        .transcript
        .borrow_mut()
        .search(query, &label, view.results().len());
    if outcome == SearchOutcome::Skipped {
        println!("Enter a username to search.");
    }
    print!("{}", view.render());
}

fn handle_socket_command(ctx: &Context, action: Option<&str>) {
    match action {
        Some("status") | None => println!("Socket: {}", ctx.channel.borrow().state()),
        Some("connect") => {
            ctx.channel.borrow_mut().connect();
            println!("Socket: {}", ctx.channel.borrow().state());
        }
        Some("disconnect") => {
            ctx.channel.borrow_mut().disconnect();
            println!("Socket: {}", ctx.channel.borrow().state());
        }
        Some("reconnect") => {
            ctx.channel.borrow_mut().reconnect();
            println!("Socket: {}", ctx.channel.borrow().state());
        }
        Some(other) => {
            println!("Unknown socket action: {}", other);
            println!("  /socket [status|connect|disconnect|reconnect]");
        }
    }
}

fn emit(ctx: &Context, event: &str, payload: Option<&String>) {
    let args = match payload {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => vec![value],
            Err(e) => {
                println!("Invalid JSON payload: {}", e);
                return;
            }
        },
        None => Vec::new(),
    };
    match ctx.channel.borrow().emit(event, args) {
        Ok(()) => verbose(ctx, &format!("Queued event {}", event)),
        Err(e) => eprintln!("Emit failed: {}", e),
    }
}

/// Work that follows every command: fetch the request badge when the user
/// changed, keep the outside-press observer in step with the menu, surface
/// realtime activity, and re-render the navbar after session changes
pub fn run_effects(ctx: &Context) {
    let session = ctx.session.snapshot();
    {
        let mut navbar = ctx.navbar.borrow_mut();
        if let Some(result) = navbar.sync(&session, ctx.backend.as_ref()) {
            let user = session.identity().unwrap_or_default();
            let mut transcript = ctx.transcript.borrow_mut();
            let _ = match &result {
                RequestCount::Fetched(count) => transcript.request_count(user, Some(*count), None),
                RequestCount::Failed(e) => transcript.request_count(user, None, Some(e)),
            };
            if let RequestCount::Fetched(count) = result {
                trace(ctx, "requests", &format!("{} incoming for {}", count, user));
                ctx.dirty.set(true);
            }
        }
        navbar.update_listener();
    }

    let events = ctx.channel.borrow().drain_events();
    for event in events {
        record_event(ctx, &event);
    }

    let state = ctx.channel.borrow().state();
    if *ctx.last_state.borrow() != state {
        verbose(ctx, &format!("Socket state: {}", state));
        let _ = ctx.transcript.borrow_mut().socket_state(&state.to_string());
        *ctx.last_state.borrow_mut() = state;
    }

    if ctx.dirty.replace(false) {
        println!("{}", ctx.navbar.borrow().render(&ctx.session.snapshot()));
    }
}

fn record_event(ctx: &Context, event: &ChannelEvent) {
    let detail = event.to_string();
    println!("[socket] {}", detail);
    let _ = ctx
        .transcript
        .borrow_mut()
        .socket_event(event.kind(), &detail);
    if let ChannelEvent::ConnectError(e) = event {
        let _ = ctx.transcript.borrow_mut().diagnostic("socket", e);
    }
    let mut events = ctx.events.borrow_mut();
    if events.len() == EVENT_HISTORY {
        events.pop_front();
    }
    events.push_back(detail);
}
