use std::convert::Infallible;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue, LOCATION, WWW_AUTHENTICATE};
use hyper::http::request::Parts;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{Span, debug, error, info, instrument};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::command::server::error::Error;
use crate::command::server::request_ext::HeaderExt;
use crate::command::server::router::{self, Route};
use crate::command::server::ServerContext;
use crate::metrics_provider::{IN_FLIGHT_REQUESTS, METRICS_PROVIDER};
use crate::spnego::NegotiationOutcome;

type ResponseBody = Full<Bytes>;

fn update_in_flight_gauge() {
    METRICS_PROVIDER.metric_http_request_in_flight.set(
        i64::try_from(IN_FLIGHT_REQUESTS.load(Ordering::Relaxed)).unwrap_or(i64::MAX),
    );
}

pub async fn serve_request<S>(
    stream: TokioIo<S>,
    context: Arc<ArcSwap<ServerContext>>,
    timeouts: Arc<[Duration; 2]>,
    remote_address: SocketAddr,
) where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |mut request| {
            request.extensions_mut().insert(remote_address);
            handle_request(context.load_full(), request)
        }),
    );
    pin!(conn);

    IN_FLIGHT_REQUESTS.fetch_add(1, Ordering::Relaxed);
    update_in_flight_gauge();

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) =>  debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    IN_FLIGHT_REQUESTS.fetch_sub(1, Ordering::Relaxed);
    update_in_flight_gauge();
}

#[instrument(skip(context, request))]
async fn handle_request(
    context: Arc<ServerContext>,
    request: Request<Incoming>,
) -> Result<Response<ResponseBody>, Infallible> {
    let start_time = Instant::now();
    let (parts, _body) = request.into_parts();
    let route = router::parse(&parts.method, &parts.uri, &context.login_path);

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match dispatch_route(&context, route, &parts).await {
        Ok(response) => response,
        Err(error) => error_to_response(&error, trace_id.as_ref()),
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();
    let method = &parts.method;
    let path = parts.uri.path();

    METRICS_PROVIDER
        .metric_http_request_total
        .with_label_values(&[method.as_str(), route.action_name(), status.as_str()])
        .inc();
    METRICS_PROVIDER
        .metric_http_request_duration
        .with_label_values(&[method.as_str(), route.action_name()])
        .observe(elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

async fn dispatch_route(
    context: &ServerContext,
    route: Route,
    parts: &Parts,
) -> Result<Response<ResponseBody>, Error> {
    match route {
        Route::Login => handle_login(context, parts).await,
        Route::Healthz => handle_healthz(),
        Route::Metrics => handle_metrics(),
        Route::Unknown => handle_unknown_route(parts),
    }
}

#[instrument(skip(context, parts))]
async fn handle_login(
    context: &ServerContext,
    parts: &Parts,
) -> Result<Response<ResponseBody>, Error> {
    let alternative_host_header = context.credentials.trust_filter().alternative_host_header();
    let request = parts.negotiation_request(alternative_host_header);

    let outcome = context.credentials.execute(&request).await;
    render_outcome(context, outcome)
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Internal(format!("Invalid header value '{value}': {e}")))
}

fn response(status: StatusCode, body: Bytes) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<ResponseBody> {
    let mut response = response(status, Bytes::from(body.to_string()));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn with_challenge(
    context: &ServerContext,
    mut response: Response<ResponseBody>,
) -> Response<ResponseBody> {
    for scheme in context.credentials.negotiation().challenge() {
        response
            .headers_mut()
            .append(WWW_AUTHENTICATE, HeaderValue::from_static(scheme));
    }
    response
}

fn interactive_login(context: &ServerContext) -> Result<Response<ResponseBody>, Error> {
    let mut response = response(StatusCode::FOUND, Bytes::new());
    response
        .headers_mut()
        .insert(LOCATION, header_value(&context.interactive_login_url)?);
    Ok(response)
}

/// Maps a negotiation outcome to the login endpoint's HTTP answer.
///
/// Challenges are answered with a 200. Backend failures always redirect to the
/// interactive login.
fn render_outcome(
    context: &ServerContext,
    outcome: NegotiationOutcome,
) -> Result<Response<ResponseBody>, Error> {
    match outcome {
        NegotiationOutcome::ChallengeIssued => {
            let response = if context.credentials.negotiation().mixed_mode() {
                let body = json!({
                    "outcome": "challenge",
                    "interactive_login": context.interactive_login_url,
                });
                json_response(StatusCode::OK, &body)
            } else {
                response(StatusCode::OK, Bytes::new())
            };
            Ok(with_challenge(context, response))
        }
        NegotiationOutcome::Success {
            principal,
            response_token,
        } => {
            let body = json!({
                "outcome": "success",
                "principal": principal.id,
                "attributes": principal.attributes,
            });
            let mut response = json_response(StatusCode::OK, &body);
            if let Some(token) = response_token {
                let value = format!("Negotiate {}", BASE64_STANDARD.encode(token));
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, header_value(&value)?);
            }
            Ok(response)
        }
        NegotiationOutcome::Failure(error)
            if context.send_401_on_failure && !error.is_backend_unavailable() =>
        {
            let response = response(StatusCode::UNAUTHORIZED, Bytes::new());
            Ok(with_challenge(context, response))
        }
        NegotiationOutcome::Failure(_) | NegotiationOutcome::Bypassed => {
            interactive_login(context)
        }
    }
}

fn handle_unknown_route(parts: &Parts) -> Result<Response<ResponseBody>, Error> {
    if [Method::GET, Method::HEAD].contains(&parts.method) {
        let msg = format!("unknown route: {} {}", parts.method, parts.uri);
        Err(Error::NotFound(msg))
    } else {
        let msg = format!("unsupported route: {} {}", parts.method, parts.uri);
        Err(Error::BadRequest(msg))
    }
}

fn handle_healthz() -> Result<Response<ResponseBody>, Error> {
    Ok(json_response(StatusCode::OK, &json!({"status": "ok"})))
}

fn handle_metrics() -> Result<Response<ResponseBody>, Error> {
    let (content_type, metrics) = METRICS_PROVIDER.gather()?;
    let mut response = response(StatusCode::OK, Bytes::from(metrics));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, header_value(&content_type)?);
    Ok(response)
}

pub fn error_to_response(error: &Error, request_id: Option<&String>) -> Response<ResponseBody> {
    json_response(error.status_code(), &error.as_json(request_id))
}
