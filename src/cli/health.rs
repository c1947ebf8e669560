use std::future::Future;
use std::time::Instant;

use crate::entities::{QueryMode, SearchQuery};
use crate::error::DrugBaseError;
use crate::sources::drugbase::DrugBaseClient;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthRow {
    pub check: String,
    pub status: String,
    pub latency: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub base_url: String,
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# DrugBase Health Check\n\n");
        out.push_str(&format!("Backend: {}\n\n", self.base_url));
        out.push_str("| Check | Status | Latency |\n");
        out.push_str("|-------|--------|---------|\n");
        for row in &self.rows {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                row.check, row.status, row.latency
            ));
        }
        out.push_str(&format!(
            "\nStatus: {}/{} checks healthy\n",
            self.healthy, self.total
        ));
        out
    }
}

async fn check_one<T, F>(check: &str, fut: F) -> HealthRow
where
    F: Future<Output = Result<T, DrugBaseError>>,
{
    let start = Instant::now();
    let result = fut.await;
    let elapsed = start.elapsed().as_millis();
    match result {
        Ok(_) => HealthRow {
            check: check.to_string(),
            status: "ok".into(),
            latency: format!("{elapsed}ms"),
        },
        Err(err) => HealthRow {
            check: check.to_string(),
            status: "error".into(),
            latency: err.notice(),
        },
    }
}

/// Pings the backend root and runs a one-page multi-disease query.
pub async fn check(client: &DrugBaseClient) -> HealthReport {
    let probe = SearchQuery {
        mode: QueryMode::Multi,
        term: String::new(),
        cursor: 0,
        min_diseases: 1,
    };
    let (root, search) = tokio::join!(
        check_one("API root", client.ping()),
        check_one("Multi-disease search", client.search(&probe)),
    );

    let rows = vec![root, search];
    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    HealthReport {
        base_url: client.base().to_string(),
        healthy,
        total: rows.len(),
        rows,
    }
}
