//! HTTP client wrapper for interacting with Qdrant.

use crate::qdrant::types::{
    CountResponse, QdrantError, QueryResponse, QueryResponseResult, ScoredPoint,
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Lightweight HTTP client for Qdrant operations.
#[derive(Debug, Clone)]
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client for the Qdrant instance at `url`.
    pub fn new(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("docqa/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Create a collection only when it is missing from Qdrant.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            return Ok(());
        }

        tracing::debug!(
            collection = collection_name,
            vector_size,
            "Creating collection"
        );
        self.create_collection(collection_name, vector_size).await
    }

    /// Create or update a collection with the specified vector size and cosine distance.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = collection_name, "Collection ensured/created");
        })
        .await
    }

    /// Exact number of points in a collection; a missing collection counts as zero.
    pub async fn count_points(&self, collection_name: &str) -> Result<usize, QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/count"),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(0),
            status if status.is_success() => {
                let payload: CountResponse = response.json().await?;
                Ok(payload.result.count)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(
                    collection = collection_name,
                    error = %error,
                    "Qdrant count failed"
                );
                Err(error)
            }
        }
    }

    /// Upsert serialized points (`{id, vector, payload}` objects) and wait for persistence.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<Value>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let point_count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{collection_name}/points"),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = collection_name,
                points = point_count,
                "Points indexed"
            );
        })
        .await?;

        Ok(point_count)
    }

    /// Perform a similarity search against a collection, returning scored payloads.
    ///
    /// A missing collection yields no hits.
    pub async fn query_points(
        &self,
        collection_name: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .request(
                Method::POST,
                &format!("collections/{collection_name}/points/query"),
            )
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(collection = collection_name, "Query against missing collection");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = collection_name, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let results = points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect();

        Ok(results)
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(
                    collection = collection_name,
                    error = %error,
                    "Collection existence check failed"
                );
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn service(server: &MockServer) -> QdrantService {
        QdrantService::new(&server.base_url(), Some("secret".into())).expect("client")
    }

    #[tokio::test]
    async fn query_points_emits_expected_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/doc_abc/points/query")
                    .header("api-key", "secret")
                    .json_body(json!({
                        "query": [0.5, 0.25],
                        "limit": 3,
                        "with_payload": true
                    }));
                then.status(200).json_body(json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": {
                        "points": [
                            {
                                "id": "01234567-89ab-cdef-0123-456789abcdef",
                                "score": 0.42,
                                "payload": { "content": "Example" }
                            }
                        ]
                    }
                }));
            })
            .await;

        let results = service(&server)
            .query_points("doc_abc", &[0.5, 0.25], 3)
            .await
            .expect("search request");

        mock.assert();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "01234567-89ab-cdef-0123-456789abcdef");
        assert!((results[0].score - 0.42).abs() < f32::EPSILON);
        let payload = results[0].payload.as_ref().expect("payload");
        assert_eq!(payload["content"], Value::String("Example".into()));
    }

    #[tokio::test]
    async fn count_points_treats_missing_collection_as_empty() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/doc_new/points/count");
                then.status(404)
                    .json_body(json!({ "status": { "error": "Not found" } }));
            })
            .await;

        assert_eq!(service(&server).count_points("doc_new").await.unwrap(), 0);
        mock.assert();
    }

    #[tokio::test]
    async fn count_points_surfaces_server_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/doc_err/points/count");
                then.status(500).body("boom");
            })
            .await;

        let error = service(&server).count_points("doc_err").await.unwrap_err();
        assert!(matches!(error, QdrantError::UnexpectedStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(
            normalize_base_url("http://localhost:6333/").unwrap(),
            "http://localhost:6333/"
        );
        assert_eq!(
            format_endpoint("http://localhost:6333/", "/collections"),
            "http://localhost:6333/collections"
        );
        assert!(normalize_base_url("not a url").is_err());
    }
}
