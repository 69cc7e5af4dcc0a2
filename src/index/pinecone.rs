use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::{PeermatchError, Result};
use crate::index::{
    IndexDescription, IndexEntry, IndexHandle, IndexMetadata, IndexMetric, IndexSpec, QueryMatch, QueryRequest,
    VectorIndex,
};

/// Pinecone REST client (control plane plus per-index data plane).
///
/// Handles authentication headers, request timeouts and error mapping.
/// Non-success responses become [`PeermatchError::IndexApi`] so callers can
/// decide whether to retry.
pub struct PineconeClient {
    client: Client,
    api_key: String,
    api_version: String,
    control_plane: Url,
}

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: IndexMetric,
    spec: ServerlessSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ServerlessSpec<'a> {
    serverless: CloudRegion<'a>,
}

#[derive(Debug, Serialize)]
struct CloudRegion<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexListResponse {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    dimension: usize,
    metric: IndexMetric,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: IndexStatus,
}

#[derive(Debug, Default, Deserialize)]
struct IndexStatus {
    #[serde(default)]
    ready: bool,
}

impl From<IndexModel> for IndexDescription {
    fn from(model: IndexModel) -> Self {
        IndexDescription {
            name: model.name,
            dimension: model.dimension,
            metric: model.metric,
            host: model.host,
            ready: model.status.ready,
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [IndexEntry],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
    include_values: bool,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<MatchModel>,
}

#[derive(Debug, Deserialize)]
struct MatchModel {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<IndexMetadata>,
}

#[derive(Debug, Deserialize)]
struct ListIdsResponse {
    #[serde(default)]
    vectors: Vec<ListedId>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct ListedId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

/// Page size for listing ids
const LIST_PAGE_SIZE: usize = 100;

impl PineconeClient {
    /// Create a client for the given control plane
    ///
    /// # Arguments
    ///
    /// * `api_key` - Pinecone API key
    /// * `control_plane_url` - e.g. `https://api.pinecone.io`
    /// * `api_version` - value of the `X-Pinecone-API-Version` header
    /// * `timeout` - per-request timeout; a timeout is a retryable failure
    pub fn new(api_key: String, control_plane_url: &str, api_version: String, timeout: Duration) -> Result<Self> {
        let control_plane = Url::parse(control_plane_url)
            .map_err(|e| PeermatchError::Config(format!("Invalid control plane URL {}: {}", control_plane_url, e)))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            api_version,
            control_plane,
        })
    }

    fn control_url(&self, path: &str) -> Result<Url> {
        self.control_plane
            .join(path)
            .map_err(|e| PeermatchError::Config(format!("Invalid control plane path {}: {}", path, e)))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
    }

    /// Map non-success statuses to `IndexApi`, keeping the response body as the message.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        Err(PeermatchError::IndexApi {
            status: status.as_u16(),
            message: body,
        })
    }
}

/// Data-plane base URL. Hosts reported by the control plane carry no scheme.
pub(crate) fn data_plane_url(host: &str, path: &str) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(PeermatchError::Index("index host is empty".to_string()));
    }
    let base = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };
    let url = Url::parse(&format!("{}/", base))
        .and_then(|u| u.join(path))
        .map_err(|e| PeermatchError::Index(format!("Invalid index host {}: {}", host, e)))?;
    Ok(url)
}

#[async_trait]
impl VectorIndex for PineconeClient {
    async fn list_indexes(&self) -> Result<Vec<IndexDescription>> {
        let request = self.authed(self.client.get(self.control_url("indexes")?));
        let response = Self::check(request.send().await?).await?;
        let list: IndexListResponse = response.json().await?;
        Ok(list.indexes.into_iter().map(IndexDescription::from).collect())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<IndexDescription> {
        let body = CreateIndexRequest {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric,
            spec: ServerlessSpec {
                serverless: CloudRegion {
                    cloud: &spec.cloud,
                    region: &spec.region,
                },
            },
        };
        let request = self.authed(self.client.post(self.control_url("indexes")?)).json(&body);
        let response = Self::check(request.send().await?).await?;
        let model: IndexModel = response.json().await?;
        log::info!(
            "Created index '{}' (dimension={}, metric={})",
            model.name,
            model.dimension,
            model.metric.as_str()
        );
        Ok(model.into())
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        let url = self.control_url(&format!("indexes/{}", name))?;
        let response = Self::check(self.authed(self.client.get(url)).send().await?).await?;
        let model: IndexModel = response.json().await?;
        Ok(model.into())
    }

    async fn upsert(&self, handle: &IndexHandle, entries: &[IndexEntry]) -> Result<usize> {
        let body = UpsertRequest {
            vectors: entries,
            namespace: handle.namespace.as_deref(),
        };
        let url = data_plane_url(&handle.host, "vectors/upsert")?;
        let response = Self::check(self.authed(self.client.post(url)).json(&body).send().await?).await?;
        let result: UpsertResponse = response.json().await?;
        Ok(result.upserted_count)
    }

    async fn query(&self, handle: &IndexHandle, request: &QueryRequest) -> Result<Vec<QueryMatch>> {
        let body = QueryBody {
            vector: &request.vector,
            top_k: request.top_k,
            filter: request.filter.as_ref().map(|f| f.to_json()),
            include_values: false,
            include_metadata: request.include_metadata,
            namespace: handle.namespace.as_deref(),
        };
        let url = data_plane_url(&handle.host, "query")?;
        let response = Self::check(self.authed(self.client.post(url)).json(&body).send().await?).await?;
        let result: QueryResponse = response.json().await?;
        Ok(result
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }

    async fn list_ids(&self, handle: &IndexHandle) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut url = data_plane_url(&handle.host, "vectors/list")?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("limit", &LIST_PAGE_SIZE.to_string());
                if let Some(namespace) = &handle.namespace {
                    pairs.append_pair("namespace", namespace);
                }
                if let Some(token) = &token {
                    pairs.append_pair("paginationToken", token);
                }
            }
            let response = Self::check(self.authed(self.client.get(url)).send().await?).await?;
            let page: ListIdsResponse = response.json().await?;
            ids.extend(page.vectors.into_iter().map(|v| v.id));

            token = page.pagination.and_then(|p| p.next).filter(|t| !t.is_empty());
            if token.is_none() {
                return Ok(ids);
            }
        }
    }

    async fn delete(&self, handle: &IndexHandle, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = DeleteRequest {
            ids,
            namespace: handle.namespace.as_deref(),
        };
        let url = data_plane_url(&handle.host, "vectors/delete")?;
        Self::check(self.authed(self.client.post(url)).json(&body).send().await?).await?;
        Ok(())
    }
}
