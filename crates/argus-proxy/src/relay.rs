//! Upstream HTTP relay.
//!
//! Performs the actual byte-forwarding leg of the proxy: rewrites the inbound
//! URL onto the configured target, re-presents method, headers, and body, and
//! streams the upstream response back. Intercepted exchanges are pumped
//! through a [`ResponseForwarder`](crate::forward::ResponseForwarder) so the
//! tracked transcript fills up while bytes flow to the client.

use crate::error::ProxyError;
use crate::forward::ResponseForwarder;
use actix_web::http::header::HeaderMap;
use futures::StreamExt;

/// Headers that describe the connection rather than the message and must not
/// be relayed in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

#[derive(Clone)]
pub struct Relay {
    client: reqwest::Client,
    target: reqwest::Url,
}

impl Relay {
    pub fn new(client: reqwest::Client, target_url: &str) -> Result<Self, ProxyError> {
        let target = reqwest::Url::parse(target_url).map_err(|e| ProxyError::InvalidTarget {
            url: target_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { client, target })
    }

    /// Rewrite an inbound path and query onto the upstream target.
    pub fn rewrite_url(&self, path: &str, query: &str) -> String {
        let host = self.target.host_str().unwrap_or("localhost");
        let authority = match self.target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut url = format!(
            "{}://{}{}",
            self.target.scheme(),
            authority,
            single_joining_slash(self.target.path(), path)
        );

        let target_query = self.target.query().unwrap_or("");
        let merged = match (target_query.is_empty(), query.is_empty()) {
            (true, true) => String::new(),
            (false, true) => target_query.to_string(),
            (true, false) => query.to_string(),
            (false, false) => format!("{target_query}&{query}"),
        };
        if !merged.is_empty() {
            url.push('?');
            url.push_str(&merged);
        }
        url
    }

    /// Send one request upstream, copying message headers through and
    /// defaulting `User-Agent` to empty rather than advertising the client
    /// library.
    pub async fn send(
        &self,
        method: &str,
        path: &str,
        query: &str,
        headers: &HeaderMap,
        body: reqwest::Body,
    ) -> Result<reqwest::Response, ProxyError> {
        let url = self.rewrite_url(path, query);
        let method =
            reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);

        let mut request = self.client.request(method, &url);
        let mut saw_user_agent = false;
        for (name, value) in headers {
            let name = name.as_str();
            if is_hop_by_hop(name) || name == "host" {
                continue;
            }
            if name == "user-agent" {
                saw_user_agent = true;
            }
            if let Ok(value) = value.to_str() {
                request = request.header(name, value);
            }
        }
        if !saw_user_agent {
            request = request.header("user-agent", "");
        }

        Ok(request.body(body).send().await?)
    }
}

/// Drive an intercepted upstream response through the forwarder until the
/// stream ends or the client goes away. Returns the forwarder so the owning
/// handler can finish the call.
pub async fn pump_through(
    mut forwarder: ResponseForwarder,
    upstream: reqwest::Response,
) -> ResponseForwarder {
    let mut stream = upstream.bytes_stream();
    while let Some(next) = stream.next().await {
        match next {
            Ok(chunk) => {
                if forwarder.write(chunk).await.is_err() {
                    // Client gone; the disconnect watcher records it.
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(call_id = %forwarder.call_id(), error = %e, "upstream stream error");
                break;
            }
        }
    }
    let _ = forwarder.flush().await;
    forwarder
}

/// Join two URL paths with exactly one slash between them.
fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}
