//! Sign-in and session persistence.
//!
//! Login populates the session context and persists the tokens so the realtime
//! channel can authenticate; logout teardown clears both.

use crate::api::{Backend, LOGIN_PATH};
use crate::preferences::{Preferences, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};
use crate::session::{SessionContext, UserProfile};
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};

/// Sign in with an email address or username
pub fn login(
    session: &SessionContext,
    prefs: &dyn Preferences,
    backend: &dyn Backend,
    identifier: &str,
    password: &str,
) -> Result<UserProfile> {
    let identifier = identifier.trim();
    if identifier.is_empty() || password.is_empty() {
        return Err(anyhow!("Username/email and password are required"));
    }
    let body = if identifier.contains('@') {
        json!({ "email": identifier, "password": password })
    } else {
        json!({ "username": identifier, "password": password })
    };

    let resp = backend.post(LOGIN_PATH, Some(&body))?;
    if !resp.is_success() {
        return Err(anyhow!("{}", resp.message().unwrap_or("Login failed")));
    }

    let data = resp
        .body
        .get("data")
        .ok_or_else(|| anyhow!("Invalid login response: missing data"))?;
    let user: UserProfile = serde_json::from_value(data.get("user").cloned().unwrap_or(Value::Null))
        .context("Invalid login response: bad user")?;
    let access_token = data.get("accessToken").and_then(Value::as_str).map(String::from);
    let refresh_token = data.get("refreshToken").and_then(Value::as_str).map(String::from);

    if let Some(token) = &access_token {
        prefs.set(ACCESS_TOKEN_KEY, token)?;
    }
    if let Some(token) = &refresh_token {
        prefs.set(REFRESH_TOKEN_KEY, token)?;
    }
    prefs.set(USER_KEY, &serde_json::to_string(&user)?)?;

    session.set_access_token(access_token);
    session.set_refresh_token(refresh_token);
    session.set_user(Some(user.clone()));
    Ok(user)
}

/// Load a previously persisted session. Returns true if a user was restored.
pub fn restore(session: &SessionContext, prefs: &dyn Preferences) -> Result<bool> {
    let Some(raw) = prefs.get(USER_KEY)? else {
        return Ok(false);
    };
    let user: UserProfile =
        serde_json::from_str(&raw).context("Invalid persisted user profile")?;
    session.set_access_token(prefs.get(ACCESS_TOKEN_KEY)?);
    session.set_refresh_token(prefs.get(REFRESH_TOKEN_KEY)?);
    session.set_user(Some(user));
    Ok(true)
}

/// Drop all session state, in memory and persisted
pub fn forget(session: &SessionContext, prefs: &dyn Preferences) {
    session.clear();
    for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
        if let Err(e) = prefs.remove(key) {
            eprintln!("Warning: failed to remove {} from preferences: {}", key, e);
        }
    }
}
