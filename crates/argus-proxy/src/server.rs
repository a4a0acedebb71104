//! Actix Web HTTP server.
//!
//! Every inbound request flows through one catch-all handler: requests whose
//! path matches a capture suffix are intercepted and tracked, everything else
//! is relayed untouched.

use crate::{
    config::ProxyConfig,
    forward::ChannelSink,
    intercept::{Intercepted, Interceptor},
    relay::{self, Relay},
};
use actix_web::web::BytesMut;
use actix_web::{http::StatusCode, web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use argus_tracker::CallTracker;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{error, info};

/// Client-bound chunk queue per intercepted exchange; upstream pumping
/// backpressures on it when the client reads slowly.
const CLIENT_CHANNEL_CAPACITY: usize = 32;

pub struct AppState {
    pub interceptor: Arc<Interceptor>,
    pub relay: Relay,
}

pub async fn serve(config: ProxyConfig, tracker: Arc<CallTracker>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    info!(addr = %addr, target = %config.target_url, "argus-proxy listening");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("failed to build reqwest client")?;
    let relay = Relay::new(client, &config.target_url).context("invalid upstream target")?;
    let interceptor = Arc::new(Interceptor::with_suffixes(
        tracker,
        config.capture_suffixes.clone(),
    ));

    let state = web::Data::new(AppState { interceptor, relay });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .default_service(web::to(proxy_entry))
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?
    .run()
    .await
    .context("server error")?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn proxy_entry(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> HttpResponse {
    if state.interceptor.should_intercept(req.path()) {
        handle_intercepted(state.get_ref(), &req, payload).await
    } else {
        handle_passthrough(state.get_ref(), &req, payload).await
    }
}

async fn handle_intercepted(
    state: &AppState,
    req: &HttpRequest,
    payload: web::Payload,
) -> HttpResponse {
    let (sink, mut client_rx) = ChannelSink::new(CLIENT_CHANNEL_CAPACITY);
    let client_closed = sink.closed_signal();

    let Intercepted { body, forwarder } = match state
        .interceptor
        .intercept_request(req.method().as_str(), req.path(), payload, sink)
        .await
    {
        Ok(intercepted) => intercepted,
        Err(e) => {
            error!(error = %e, "failed to capture request body");
            return HttpResponse::InternalServerError().body("error reading request body");
        }
    };

    forwarder.spawn_disconnect_watch(client_closed);

    let upstream = match state
        .relay
        .send(
            req.method().as_str(),
            req.path(),
            req.query_string(),
            req.headers(),
            body.into(),
        )
        .await
    {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(error = %e, "upstream request failed");
            forwarder.write_status(502).await;
            state.interceptor.complete_call(forwarder.call_id()).await;
            forwarder.close();
            return HttpResponse::BadGateway().body(e.to_string());
        }
    };

    let status = upstream.status();
    forwarder.write_status(status.as_u16()).await;

    let mut response =
        HttpResponse::build(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK));
    copy_response_headers(&mut response, upstream.headers());

    let interceptor = Arc::clone(&state.interceptor);
    tokio::spawn(async move {
        let forwarder = relay::pump_through(forwarder, upstream).await;
        // The relay has returned control; normal completion happens here and
        // the tracker resolves the race against any earlier disconnect or
        // error transition.
        interceptor.complete_call(forwarder.call_id()).await;
        forwarder.close();
    });

    response.streaming(async_stream::stream! {
        while let Some(chunk) = client_rx.recv().await {
            yield Ok::<_, actix_web::Error>(chunk);
        }
    })
}

async fn handle_passthrough(
    state: &AppState,
    req: &HttpRequest,
    mut payload: web::Payload,
) -> HttpResponse {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        match chunk {
            Ok(chunk) => body.extend_from_slice(&chunk),
            Err(e) => {
                error!(error = %e, "failed to read request body");
                return HttpResponse::InternalServerError().body("error reading request body");
            }
        }
    }

    let upstream = match state
        .relay
        .send(
            req.method().as_str(),
            req.path(),
            req.query_string(),
            req.headers(),
            body.freeze().into(),
        )
        .await
    {
        Ok(upstream) => upstream,
        Err(e) => {
            error!(error = %e, "upstream request failed");
            return HttpResponse::BadGateway().body(e.to_string());
        }
    };

    let status = upstream.status();
    let mut response =
        HttpResponse::build(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK));
    copy_response_headers(&mut response, upstream.headers());

    let stream = upstream
        .bytes_stream()
        .map(|r| r.map_err(|e| actix_web::error::ErrorInternalServerError(e.to_string())));
    response.streaming(stream)
}

fn copy_response_headers(
    response: &mut actix_web::HttpResponseBuilder,
    headers: &reqwest::header::HeaderMap,
) {
    for (name, value) in headers {
        if relay::is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            response.append_header((name.as_str(), value));
        }
    }
}
