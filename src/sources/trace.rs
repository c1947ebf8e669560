use std::time::Instant;

use http::Extensions;
use reqwest_middleware::{Middleware, Next};
use tracing::{debug, warn};

/// Emits one event per upstream attempt. Sits inside the retry layer, so
/// retried requests show up once per attempt.
#[derive(Clone, Debug, Default)]
pub(crate) struct TraceMiddleware;

#[async_trait::async_trait]
impl Middleware for TraceMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let method = req.method().clone();
        let url = req.url().clone();
        let start = Instant::now();

        let result = next.run(req, extensions).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(resp) => debug!(
                %method,
                %url,
                status = resp.status().as_u16(),
                elapsed_ms,
                "upstream request"
            ),
            Err(err) => warn!(%method, %url, elapsed_ms, error = %err, "upstream request failed"),
        }
        result
    }
}
