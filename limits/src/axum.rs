use std::net::SocketAddr;
use std::sync::Arc;

use ::axum::extract::{ConnectInfo, Request, State};
use ::axum::http::{Extensions, HeaderMap, StatusCode, header};
use ::axum::middleware::Next;
use ::axum::response::{IntoResponse, Response};

use crate::RateLimiter;

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_ADDRESS: &str = "unknown";

/// Rate limited error.
#[derive(Debug)]
pub struct RateLimited;

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "type": null,
            "title": "Too many requests.",
            "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
            "detail": "Rate limit exceeded.",
            "instance": null,
            "errors": null,
        });

        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Address of the client: first `X-Forwarded-For` entry, then the peer IP
/// when the server was started with connect info.
pub fn client_address(headers: &HeaderMap, extensions: &Extensions) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_owned())
}

/// Middleware to limit request per window time.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Result<Response, RateLimited> {
    let key = client_address(req.headers(), req.extensions());

    if limiter.check(&key) {
        Ok(next.run(req).await)
    } else {
        Err(RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ::axum::Router;
    use ::axum::body::Body;
    use ::axum::middleware::from_fn_with_state;
    use ::axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn request(forwarded: &str) -> Request {
        Request::builder()
            .uri("/")
            .header(FORWARDED_FOR, forwarded)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_middleware() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, rate_limit));

        let response = app.clone().oneshot(request("1.1.1.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request("1.1.1.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.oneshot(request("2.2.2.2, 1.1.1.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_client_address() {
        let mut headers = HeaderMap::new();
        let mut extensions = Extensions::new();
        assert_eq!(client_address(&headers, &extensions), UNKNOWN_ADDRESS);

        let peer: SocketAddr = "192.168.1.4:5120".parse().unwrap();
        extensions.insert(ConnectInfo(peer));
        assert_eq!(client_address(&headers, &extensions), "192.168.1.4");

        headers.insert(FORWARDED_FOR, " 203.0.113.9 , 10.0.0.1".parse().unwrap());
        assert_eq!(client_address(&headers, &extensions), "203.0.113.9");
    }
}
