use std::borrow::Cow;
use std::str::FromStr;

use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::entities::{QueryMode, SearchQuery};
use crate::error::DrugBaseError;

const DRUGBASE_BASE: &str = "http://localhost:8000";
const DRUGBASE_API: &str = "drugbase";
const DRUGBASE_BASE_ENV: &str = "DRUGBASE_BASE_URL";
const DRUGBASE_EMPTY_TERM_ENV: &str = "DRUGBASE_EMPTY_TERM";
const DEFAULT_WILDCARD_TERM: &str = "a";

/// What to send when a term-based mode is queried with a blank term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EmptyTermPolicy {
    /// Return no rows without touching the network.
    #[default]
    Skip,
    /// Substitute a fixed term and query anyway.
    Wildcard(String),
}

impl EmptyTermPolicy {
    pub fn from_env() -> Self {
        let Some(raw) = std::env::var(DRUGBASE_EMPTY_TERM_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        else {
            return Self::default();
        };
        match raw.parse() {
            Ok(policy) => policy,
            Err(err) => {
                warn!(env = DRUGBASE_EMPTY_TERM_ENV, %err, "Ignoring invalid empty-term policy");
                Self::default()
            }
        }
    }
}

impl FromStr for EmptyTermPolicy {
    type Err = DrugBaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("skip") {
            return Ok(Self::Skip);
        }
        if s.eq_ignore_ascii_case("wildcard") {
            return Ok(Self::Wildcard(DEFAULT_WILDCARD_TERM.to_string()));
        }
        if let Some(term) = s.strip_prefix("wildcard:").map(str::trim) {
            if term.is_empty() {
                return Err(DrugBaseError::InvalidArgument(
                    "wildcard: requires a non-empty term".into(),
                ));
            }
            return Ok(Self::Wildcard(term.to_string()));
        }
        Err(DrugBaseError::InvalidArgument(format!(
            "Unknown empty-term policy '{s}'. Expected skip, wildcard, or wildcard:<term>"
        )))
    }
}

#[derive(Clone)]
pub struct DrugBaseClient {
    client: reqwest_middleware::ClientWithMiddleware,
    base: Cow<'static, str>,
    empty_term: EmptyTermPolicy,
}

impl DrugBaseClient {
    pub fn new() -> Result<Self, DrugBaseError> {
        Ok(Self {
            client: crate::sources::shared_client()?,
            base: crate::sources::env_base(DRUGBASE_BASE, DRUGBASE_BASE_ENV),
            empty_term: EmptyTermPolicy::from_env(),
        })
    }

    /// Like [`DrugBaseClient::new`], but with an explicit base URL.
    pub fn with_base(base: &str) -> Result<Self, DrugBaseError> {
        let base = base.trim();
        if Url::parse(base).is_err() {
            return Err(DrugBaseError::InvalidArgument(format!(
                "--base-url must be an absolute URL, got '{base}'"
            )));
        }
        Ok(Self {
            base: Cow::Owned(base.to_string()),
            ..Self::new()?
        })
    }

    pub fn with_empty_term_policy(mut self, policy: EmptyTermPolicy) -> Self {
        self.empty_term = policy;
        self
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base: String) -> Result<Self, DrugBaseError> {
        Ok(Self {
            client: crate::sources::build_client(0)?,
            base: Cow::Owned(base),
            empty_term: EmptyTermPolicy::Skip,
        })
    }

    pub fn base(&self) -> &str {
        self.base.as_ref()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DrugBaseError> {
        let mut url = Url::parse(self.base.as_ref()).map_err(|err| {
            DrugBaseError::InvalidArgument(format!("Invalid base URL '{}': {err}", self.base))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                DrugBaseError::InvalidArgument(format!(
                    "Base URL '{}' cannot carry a path",
                    self.base
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Fetches one page of rows.
    ///
    /// A missing or malformed `data` envelope yields no rows rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot complete, the backend answers with a
    /// non-success status, or the body is an HTML error page.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchRow>, DrugBaseError> {
        let cursor = query.cursor.to_string();
        let url = match query.mode {
            QueryMode::Multi => {
                let min_diseases = query.min_diseases.max(1).to_string();
                self.endpoint(&["Multi_Disease_Treatment", &cursor, &min_diseases])?
            }
            mode => {
                let trimmed = query.term.trim();
                let term = if !trimmed.is_empty() {
                    trimmed
                } else {
                    match &self.empty_term {
                        EmptyTermPolicy::Skip => {
                            debug!(%mode, "Blank search term; skipping request");
                            return Ok(Vec::new());
                        }
                        EmptyTermPolicy::Wildcard(term) => term.as_str(),
                    }
                };
                let path = match mode {
                    QueryMode::Disease => "Disease_Search",
                    _ => "Drug_Search",
                };
                self.endpoint(&[path, &cursor, term])?
            }
        };

        let payload = self.get_payload(url).await?;
        Ok(decode_rows(query.mode, payload))
    }

    /// Fetches the API root and returns its greeting.
    pub async fn ping(&self) -> Result<String, DrugBaseError> {
        let url = self.endpoint(&[])?;
        let payload = self.get_payload(url).await?;
        Ok(payload
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("ok")
            .to_string())
    }

    async fn get_payload(&self, url: Url) -> Result<Option<Value>, DrugBaseError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let content_type = resp.headers().get(CONTENT_TYPE).cloned();
        let bytes = crate::sources::read_limited_body(resp, DRUGBASE_API).await?;
        if !status.is_success() {
            return Err(DrugBaseError::HttpStatus {
                api: DRUGBASE_API.to_string(),
                status: status.as_u16(),
                message: crate::sources::body_excerpt(&bytes),
            });
        }
        crate::sources::ensure_json_content_type(DRUGBASE_API, content_type.as_ref(), &bytes)?;

        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(
                    source = DRUGBASE_API,
                    error = %err,
                    excerpt = %crate::sources::body_excerpt(&bytes),
                    "Unparseable response body; treating as empty"
                );
                Ok(None)
            }
        }
    }
}

fn decode_rows(mode: QueryMode, payload: Option<Value>) -> Vec<SearchRow> {
    let rows = payload.as_ref().and_then(|v| v.get("data"));
    match rows {
        Some(Value::Array(rows)) => rows.iter().map(|row| SearchRow::decode(mode, row)).collect(),
        Some(Value::Null) | None => {
            warn!(source = DRUGBASE_API, %mode, "Response missing data array; treating as empty");
            Vec::new()
        }
        Some(other) => {
            warn!(
                source = DRUGBASE_API,
                %mode,
                kind = json_kind(other),
                "Response data is not an array; treating as empty"
            );
            Vec::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Positional view over one wire row; every accessor is total.
struct Positional<'a>(&'a [Value]);

impl Positional<'_> {
    fn text(&self, idx: usize) -> Option<String> {
        match self.0.get(idx)? {
            Value::String(s) => Some(s.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn id(&self, idx: usize) -> Option<u64> {
        match self.0.get(idx)? {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|v| v.is_finite() && *v >= 0.0 && v.fract() == 0.0)
                    .map(|v| v as u64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn price(&self, idx: usize) -> Option<f64> {
        let value = match self.0.get(idx)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().trim_start_matches('$').parse().ok(),
            _ => None,
        };
        value.filter(|v: &f64| v.is_finite())
    }

    fn count(&self, idx: usize) -> Option<u32> {
        self.id(idx).and_then(|v| u32::try_from(v).ok())
    }
}

/// `drug` rows: `[name, drugID, generic, treatments(csv), manufacturer, genericPrice, brandPrice]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrugRow {
    pub name: Option<String>,
    pub drug_id: Option<u64>,
    pub generic: Option<String>,
    pub treatments: Option<String>,
    pub manufacturer: Option<String>,
    pub generic_price: Option<f64>,
    pub brand_price: Option<f64>,
}

/// `disease` rows: `[genericName, diseaseID, genericPrice, brandPrice, drugID, diseaseName, drugName]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiseaseRow {
    pub generic_name: Option<String>,
    pub disease_id: Option<u64>,
    pub generic_price: Option<f64>,
    pub brand_price: Option<f64>,
    pub drug_id: Option<u64>,
    pub disease_name: Option<String>,
    pub drug_name: Option<String>,
}

/// `multi` rows: `[name, drugID, diseaseCount, diseaseNames(csv), manufacturer, price]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MultiRow {
    pub name: Option<String>,
    pub drug_id: Option<u64>,
    pub disease_count: Option<u32>,
    pub disease_names: Option<String>,
    pub manufacturer: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchRow {
    Drug(DrugRow),
    Disease(DiseaseRow),
    Multi(MultiRow),
}

impl SearchRow {
    /// Decodes one positional wire row. Anything that is not an array decodes
    /// to a row with every field empty.
    pub fn decode(mode: QueryMode, value: &Value) -> Self {
        let fields = value.as_array().map(Vec::as_slice).unwrap_or_default();
        let p = Positional(fields);
        match mode {
            QueryMode::Drug => Self::Drug(DrugRow {
                name: p.text(0),
                drug_id: p.id(1),
                generic: p.text(2),
                treatments: p.text(3),
                manufacturer: p.text(4),
                generic_price: p.price(5),
                brand_price: p.price(6),
            }),
            QueryMode::Disease => Self::Disease(DiseaseRow {
                generic_name: p.text(0),
                disease_id: p.id(1),
                generic_price: p.price(2),
                brand_price: p.price(3),
                drug_id: p.id(4),
                disease_name: p.text(5),
                drug_name: p.text(6),
            }),
            QueryMode::Multi => Self::Multi(MultiRow {
                name: p.text(0),
                drug_id: p.id(1),
                disease_count: p.count(2),
                disease_names: p.text(3),
                manufacturer: p.text(4),
                price: p.price(5),
            }),
        }
    }

    pub fn mode(&self) -> QueryMode {
        match self {
            Self::Drug(_) => QueryMode::Drug,
            Self::Disease(_) => QueryMode::Disease,
            Self::Multi(_) => QueryMode::Multi,
        }
    }

    /// Keyset identifier. Every endpoint pages on the drug ID.
    pub fn record_id(&self) -> Option<u64> {
        match self {
            Self::Drug(row) => row.drug_id,
            Self::Disease(row) => row.drug_id,
            Self::Multi(row) => row.drug_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn query(mode: QueryMode, term: &str, cursor: u64, min_diseases: u32) -> SearchQuery {
        SearchQuery {
            mode,
            term: term.to_string(),
            cursor,
            min_diseases,
        }
    }

    #[tokio::test]
    async fn drug_search_requests_cursor_and_term_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Drug_Search/0/aspirin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    ["Aspirin", 3, "acetylsalicylic acid", "Headache,Fever", "Bayer", 4.5, 12.0]
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let rows = client
            .search(&query(QueryMode::Drug, " aspirin ", 0, 2))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        let SearchRow::Drug(row) = &rows[0] else {
            panic!("expected drug row");
        };
        assert_eq!(row.name.as_deref(), Some("Aspirin"));
        assert_eq!(row.drug_id, Some(3));
        assert_eq!(row.treatments.as_deref(), Some("Headache,Fever"));
        assert_eq!(row.brand_price, Some(12.0));
    }

    #[tokio::test]
    async fn disease_search_encodes_term_as_single_segment() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Disease_Search/14/heart%20disease"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [["Lisinopril", 2, 3.0, 9.5, 21, "Heart Disease", "Zestril"]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let rows = client
            .search(&query(QueryMode::Disease, "heart disease", 14, 2))
            .await
            .unwrap();

        assert_eq!(rows[0].record_id(), Some(21));
        let SearchRow::Disease(row) = &rows[0] else {
            panic!("expected disease row");
        };
        assert_eq!(row.disease_id, Some(2));
        assert_eq!(row.drug_name.as_deref(), Some("Zestril"));
    }

    #[tokio::test]
    async fn multi_search_uses_threshold_and_ignores_term() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Multi_Disease_Treatment/0/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [["Metformin", 8, 3, "Diabetes,PCOS,Obesity", "Merck", 15.25]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let rows = client
            .search(&query(QueryMode::Multi, "ignored", 0, 3))
            .await
            .unwrap();

        let SearchRow::Multi(row) = &rows[0] else {
            panic!("expected multi row");
        };
        assert_eq!(row.disease_count, Some(3));
        assert_eq!(row.price, Some(15.25));
    }

    #[tokio::test]
    async fn blank_term_skips_network_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(0)
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let rows = client
            .search(&query(QueryMode::Drug, "   ", 0, 2))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn wildcard_policy_substitutes_term() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Disease_Search/0/a"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri())
            .unwrap()
            .with_empty_term_policy(EmptyTermPolicy::Wildcard("a".into()));
        let rows = client
            .search(&query(QueryMode::Disease, "", 0, 2))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn missing_data_field_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Drug_Search/0/zz"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"detail": "nope"})),
            )
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let rows = client
            .search(&query(QueryMode::Drug, "zz", 0, 2))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_is_empty_not_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Drug_Search/0/zz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let rows = client
            .search(&query(QueryMode::Drug, "zz", 0, 2))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn server_error_maps_to_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Drug_Search/0/aspirin"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let err = client
            .search(&query(QueryMode::Drug, "aspirin", 0, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DrugBaseError::HttpStatus { status: 500, .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn html_error_page_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Drug_Search/0/aspirin"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>proxy</html>", "text/html"),
            )
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        let err = client
            .search(&query(QueryMode::Drug, "aspirin", 0, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, DrugBaseError::Api { .. }));
        assert!(err.to_string().contains("Unexpected HTML response"));
    }

    #[tokio::test]
    async fn ping_returns_greeting() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"message": "This is the drugbase API"}),
            ))
            .mount(&server)
            .await;

        let client = DrugBaseClient::new_for_test(server.uri()).unwrap();
        assert_eq!(client.ping().await.unwrap(), "This is the drugbase API");
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let client = DrugBaseClient::new_for_test("http://example.org/api/".into()).unwrap();
        let url = client.endpoint(&["Drug_Search", "0", "a/b"]).unwrap();
        assert_eq!(url.as_str(), "http://example.org/api/Drug_Search/0/a%2Fb");
    }

    #[test]
    fn decode_tolerates_loose_scalars() {
        let row = SearchRow::decode(
            QueryMode::Drug,
            &serde_json::json!(["Advil", "12", 7, null, "", "3.50", true]),
        );
        let SearchRow::Drug(row) = row else {
            panic!("expected drug row");
        };
        assert_eq!(row.drug_id, Some(12));
        assert_eq!(row.generic.as_deref(), Some("7"));
        assert_eq!(row.treatments, None);
        assert_eq!(row.manufacturer, None);
        assert_eq!(row.generic_price, Some(3.5));
        assert_eq!(row.brand_price, None);
    }

    #[test]
    fn decode_non_array_yields_empty_row() {
        let row = SearchRow::decode(QueryMode::Multi, &serde_json::json!({"name": "x"}));
        assert_eq!(row, SearchRow::Multi(MultiRow::default()));
        assert_eq!(row.record_id(), None);
    }

    #[test]
    fn decode_rows_ignores_non_array_data() {
        let rows = decode_rows(QueryMode::Drug, Some(serde_json::json!({"data": "oops"})));
        assert!(rows.is_empty());
        let rows = decode_rows(QueryMode::Drug, None);
        assert!(rows.is_empty());
    }

    #[test]
    fn empty_term_policy_parses_variants() {
        assert_eq!(
            "skip".parse::<EmptyTermPolicy>().unwrap(),
            EmptyTermPolicy::Skip
        );
        assert_eq!(
            "wildcard".parse::<EmptyTermPolicy>().unwrap(),
            EmptyTermPolicy::Wildcard("a".into())
        );
        assert_eq!(
            "wildcard: ibu".parse::<EmptyTermPolicy>().unwrap(),
            EmptyTermPolicy::Wildcard("ibu".into())
        );
        assert!("wildcard:".parse::<EmptyTermPolicy>().is_err());
        assert!("sometimes".parse::<EmptyTermPolicy>().is_err());
    }
}
