use axum::{extract::Request, middleware::Next, response::Response};
use metrics::{counter, histogram};
use std::time::Instant;
use uuid::Uuid;

/// Collapse path segments that are ids (UUIDs or bare integers) so that
/// per-job and per-customer URLs share a single metric series.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if Uuid::parse_str(segment).is_ok()
                || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
            {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status().as_u16().to_string();

    let labels = [("method", method), ("path", path), ("status", status)];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration.as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::normalize_path;

    #[test]
    fn uuid_segments_are_collapsed() {
        assert_eq!(
            normalize_path("/api/jobs/7b7f34a3-9c1e-4baf-a1ff-0a1f2d3c4b5a/retry"),
            "/api/jobs/:id/retry"
        );
    }

    #[test]
    fn static_paths_pass_through() {
        assert_eq!(normalize_path("/api/usage/stats"), "/api/usage/stats");
    }
}
