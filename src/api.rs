use crate::session::{SessionContext, UserRecord};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::time::Duration;

pub const RECEIVED_REQUESTS_PATH: &str = "/api/v1/friendRequests/receivedAll";
pub const LOGIN_PATH: &str = "/api/v1/users/login";
pub const LOGOUT_PATH: &str = "/api/v1/users/logout";
pub const SEARCH_PATH: &str = "/api/v1/users/search";

/// A completed HTTP exchange. Non-2xx statuses are responses, not errors;
/// `Err` from a [`Backend`] call always means the request never completed.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    /// False when the body was empty or not JSON; `body` then holds the raw text
    pub json: bool,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            json: true,
        }
    }

    /// Build a response from a raw body as read off the wire
    pub fn from_text(status: u16, text: &str) -> Self {
        if text.trim().is_empty() {
            return Self {
                status,
                body: Value::Null,
                json: false,
            };
        }
        match serde_json::from_str(text) {
            Ok(body) => Self::new(status, body),
            Err(_) => Self {
                status,
                body: Value::String(text.to_string()),
                json: false,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Backend-provided error message, if any
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }
}

/// Trait for backend access to allow mocking and abstraction
pub trait Backend {
    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<ApiResponse>;
    fn post(&self, path: &str, body: Option<&Value>) -> Result<ApiResponse>;
}

pub struct Client {
    base_url: String,
    session: SessionContext,
    agent: ureq::Agent,
}

impl Client {
    /// The agent keeps a cookie store, so backend session cookies are sent
    /// with every request. A session access token, when present, is also sent
    /// as a bearer token.
    pub fn new(base_url: &str, timeout: Option<Duration>, session: SessionContext) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            agent: builder.build(),
        }
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match self.session.access_token() {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    fn finish(resp: std::result::Result<ureq::Response, ureq::Error>) -> Result<ApiResponse> {
        let resp = match resp {
            Ok(r) | Err(ureq::Error::Status(_, r)) => r,
            Err(e) => return Err(anyhow!("Request failed: {}", e)),
        };
        let status = resp.status();
        let text = resp
            .into_string()
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;
        Ok(ApiResponse::from_text(status, &text))
    }
}

impl Backend for Client {
    fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .authorize(self.agent.get(&url))
            .set("Content-Type", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        Self::finish(request.call())
    }

    fn post(&self, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, path);
        let request = self.authorize(self.agent.post(&url));
        let resp = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        Self::finish(resp)
    }
}

/// Number of entries in `data.senders` of a received-requests body, 0 when absent
pub fn sender_count(body: &Value) -> usize {
    body.pointer("/data/senders")
        .and_then(Value::as_array)
        .map(|senders| senders.len())
        .unwrap_or(0)
}

/// Fetch the users who sent the current user a friend request
pub fn received_requests(backend: &dyn Backend) -> Result<Vec<UserRecord>> {
    let resp = backend.get(RECEIVED_REQUESTS_PATH, &[])?;
    if !resp.is_success() {
        return Err(anyhow!(
            "{}",
            resp.message().unwrap_or("Failed to fetch incoming requests")
        ));
    }
    let senders = resp
        .body
        .pointer("/data/senders")
        .and_then(Value::as_array)
        .map(|senders| {
            senders
                .iter()
                .filter_map(|s| serde_json::from_value(s.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    Ok(senders)
}

#[cfg(test)]
pub mod testing {
    //! Scripted backend double for component tests.

    use super::{ApiResponse, Backend};
    use anyhow::{anyhow, Result};
    use serde_json::Value;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Call {
        pub method: &'static str,
        pub path: String,
        pub query: Vec<(String, String)>,
        pub body: Option<String>,
    }

    #[derive(Default)]
    pub struct ScriptedBackend {
        replies: RefCell<VecDeque<Result<ApiResponse>>>,
        calls: RefCell<Vec<Call>>,
    }

    impl ScriptedBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, status: u16, body: Value) -> Self {
            self.replies
                .borrow_mut()
                .push_back(Ok(ApiResponse::new(status, body)));
            self
        }

        pub fn reply_text(self, status: u16, text: &str) -> Self {
            self.replies
                .borrow_mut()
                .push_back(Ok(ApiResponse::from_text(status, text)));
            self
        }

        pub fn fail(self, message: &str) -> Self {
            self.replies
                .borrow_mut()
                .push_back(Err(anyhow!("{}", message.to_string())));
            self
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }

        fn next(&self, call: Call) -> Result<ApiResponse> {
            self.calls.borrow_mut().push(call);
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted reply")))
        }
    }

    impl Backend for ScriptedBackend {
        fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<ApiResponse> {
            self.next(Call {
                method: "GET",
                path: path.to_string(),
                query: query
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: None,
            })
        }

        fn post(&self, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
            self.next(Call {
                method: "POST",
                path: path.to_string(),
                query: Vec::new(),
                body: body.map(|b| b.to_string()),
            })
        }
    }
}
