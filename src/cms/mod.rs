//! 内容库文档存储：变更 API 客户端与事务构建

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;
use crate::config::CmsConfig;
use crate::core::{DocumentRef, DocumentStore, MediaError, Result};

pub const IMAGE_ASSET_TYPE: &str = "media.imageAsset";
pub const VIDEO_ASSET_TYPE: &str = "media.videoAsset";

/// 单个变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mutation {
    Create(Value),
    CreateIfNotExists(Value),
    Patch {
        id: String,
        set: Value,
    },
    Delete {
        id: String,
    },
}

/// 多文档事务，提交时整体生效
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, document: Value) -> Self {
        self.mutations.push(Mutation::Create(document));
        self
    }

    pub fn create_if_not_exists(mut self, document: Value) -> Self {
        self.mutations.push(Mutation::CreateIfNotExists(document));
        self
    }

    pub fn patch(mut self, id: impl Into<String>, set: Value) -> Self {
        self.mutations.push(Mutation::Patch { id: id.into(), set });
        self
    }

    pub fn delete(mut self, id: impl Into<String>) -> Self {
        self.mutations.push(Mutation::Delete { id: id.into() });
        self
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// 补齐 `_id`，返回文档引用
pub fn ensure_document_id(document: &mut Value) -> Result<DocumentRef> {
    let object = document
        .as_object_mut()
        .ok_or_else(|| MediaError::document_error("document must be a JSON object"))?;
    let doc_type = object
        .get("_type")
        .and_then(Value::as_str)
        .ok_or_else(|| MediaError::document_error("document is missing _type"))?
        .to_string();
    let id = match object.get("_id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            object.insert("_id".to_string(), Value::String(id.clone()));
            id
        }
    };
    Ok(DocumentRef { id, doc_type })
}

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    documents: Vec<Value>,
}

/// 基于 HTTP 变更接口的文档存储
#[derive(Clone)]
pub struct HttpDocumentStore {
    client: Client,
    config: CmsConfig,
}

impl HttpDocumentStore {
    pub fn new(config: CmsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn mutate_url(&self) -> String {
        format!(
            "{}/v{}/data/mutate/{}",
            self.config.base_url(),
            self.config.api_version,
            self.config.dataset
        )
    }

    fn doc_url(&self, ids: &[String]) -> String {
        format!(
            "{}/v{}/data/doc/{}/{}",
            self.config.base_url(),
            self.config.api_version,
            self.config.dataset,
            ids.join(",")
        )
    }

    async fn mutate(&self, mutations: Vec<Mutation>) -> Result<()> {
        debug!(count = mutations.len(), "committing mutations");
        let response = self
            .client
            .post(self.mutate_url())
            .query(&[("returnIds", "true")])
            .bearer_auth(&self.config.token)
            .json(&json!({ "mutations": mutations }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MediaError::document_error(format!(
                "mutation failed with status {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn create(&self, mut document: Value) -> Result<DocumentRef> {
        let reference = ensure_document_id(&mut document)?;
        self.mutate(vec![Mutation::Create(document)]).await?;
        Ok(reference)
    }

    async fn patch_set(&self, id: &str, fields: Value) -> Result<()> {
        self.mutate(vec![Mutation::Patch { id: id.to_string(), set: fields }]).await
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .get(self.doc_url(ids))
            .bearer_auth(&self.config.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::document_error(format!(
                "document fetch failed with status {}",
                status.as_u16()
            )));
        }
        let body: DocumentsResponse = response.json().await?;
        Ok(body.documents)
    }

    async fn commit(&self, transaction: Transaction) -> Result<()> {
        if transaction.is_empty() {
            return Ok(());
        }
        self.mutate(transaction.into_mutations()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> CmsConfig {
        CmsConfig {
            project_id: "abc123".to_string(),
            dataset: "production".to_string(),
            api_version: "2024-01-01".to_string(),
            token: "secret-token".to_string(),
            api_host: Some(server.uri()),
        }
    }

    #[test]
    fn test_mutation_serialization() {
        let tx = Transaction::new()
            .create(json!({"_id": "a", "_type": "media.imageAsset"}))
            .patch("b", json!({"title": "x"}))
            .delete("c");
        let encoded = serde_json::to_value(tx.mutations()).unwrap();
        assert_eq!(
            encoded,
            json!([
                {"create": {"_id": "a", "_type": "media.imageAsset"}},
                {"patch": {"id": "b", "set": {"title": "x"}}},
                {"delete": {"id": "c"}}
            ])
        );
    }

    #[test]
    fn test_ensure_document_id() {
        let mut doc = json!({"_type": "media.imageAsset"});
        let reference = ensure_document_id(&mut doc).unwrap();
        assert_eq!(doc["_id"], Value::String(reference.id.clone()));
        assert_eq!(reference.doc_type, "media.imageAsset");

        let mut doc = json!({"_id": "fixed", "_type": "media.videoAsset"});
        assert_eq!(ensure_document_id(&mut doc).unwrap().id, "fixed");

        assert!(ensure_document_id(&mut json!({"title": "no type"})).is_err());
    }

    #[tokio::test]
    async fn test_create_posts_mutation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2024-01-01/data/mutate/production"))
            .and(query_param("returnIds", "true"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(json!({
                "mutations": [{"create": {"_id": "img-1", "_type": "media.imageAsset"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "transactionId": "tx",
                "results": [{"id": "img-1", "operation": "create"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(config(&server));
        let reference = store
            .create(json!({"_id": "img-1", "_type": "media.imageAsset"}))
            .await
            .unwrap();
        assert_eq!(reference.id, "img-1");
    }

    #[tokio::test]
    async fn test_patch_set_and_create_if_not_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2024-01-01/data/mutate/production"))
            .and(body_json(json!({
                "mutations": [{"patch": {"id": "vid-1", "set": {"title": "Launch"}}}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2024-01-01/data/mutate/production"))
            .and(body_json(json!({
                "mutations": [{"createIfNotExists": {"_id": "tag-1", "_type": "media.tag"}}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(config(&server));
        store.patch_set("vid-1", json!({"title": "Launch"})).await.unwrap();
        store
            .commit(Transaction::new().create_if_not_exists(json!({"_id": "tag-1", "_type": "media.tag"})))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mutation_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(config(&server));
        let err = store.commit(Transaction::new().delete("x")).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_get_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2024-01-01/data/doc/production/a,b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{"_id": "a", "_type": "media.imageAsset"}]
            })))
            .mount(&server)
            .await;

        let store = HttpDocumentStore::new(config(&server));
        let docs = store
            .get_documents(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], "a");
    }

    #[tokio::test]
    async fn test_empty_transaction_is_skipped() {
        let server = MockServer::start().await;
        let store = HttpDocumentStore::new(config(&server));
        store.commit(Transaction::new()).await.unwrap();
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
