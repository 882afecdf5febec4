//! Firestore REST client
//!
//! Event documents are merged inside a transaction so `createdAt` is only
//! written when the document does not exist yet, while `updatedAt` is stamped
//! with the server's request time on every write.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::client::{upstream_error, GoogleClient};
use crate::error::{RevenueError, RevenueResult};
use crate::events::{format_iso_millis, EventDocument, FieldValue};
use crate::sinks::DocumentSink;

pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Clone)]
pub struct FirestoreClient {
    google: GoogleClient,
}

#[derive(Debug, Deserialize)]
struct BeginTransactionResponse {
    transaction: String,
}

impl FirestoreClient {
    pub fn new(google: GoogleClient) -> Self {
        Self { google }
    }

    /// `projects/{project}/databases/{database}`
    fn database_path(&self) -> String {
        let config = self.google.config();
        format!(
            "projects/{}/databases/{}",
            config.project_id, config.firestore_database
        )
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/{}/documents",
            self.google.config().firestore_api_base.trim_end_matches('/'),
            self.database_path()
        )
    }

    fn document_url(&self, collection: &str, id: &str) -> RevenueResult<Url> {
        let mut url = Url::parse(&self.documents_url())
            .map_err(|e| RevenueError::Config(format!("invalid Firestore base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RevenueError::Config("Firestore base URL cannot hold a path".into()))?
            .push(collection)
            .push(id);
        Ok(url)
    }

    async fn begin_transaction(&self) -> RevenueResult<String> {
        let url = format!("{}:beginTransaction", self.documents_url());
        let request = self.google.http().post(&url).json(&json!({}));
        let response = self.google.authorize(request).await?.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        let parsed: BeginTransactionResponse = response.json().await?;
        Ok(parsed.transaction)
    }

    async fn document_exists(
        &self,
        collection: &str,
        id: &str,
        transaction: &str,
    ) -> RevenueResult<bool> {
        let url = self.document_url(collection, id)?;
        let request = self
            .google
            .http()
            .get(url)
            .query(&[("transaction", transaction)]);
        let response = self.google.authorize(request).await?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(upstream_error(response).await),
        }
    }

    async fn rollback(&self, transaction: &str) {
        let url = format!("{}:rollback", self.documents_url());
        let request = self
            .google
            .http()
            .post(&url)
            .json(&json!({ "transaction": transaction }));
        let result = match self.google.authorize(request).await {
            Ok(request) => request.send().await.map_err(RevenueError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to roll back Firestore transaction");
        }
    }

    /// Merge `document` into `collection/{eventId}`
    pub async fn merge_event_document(
        &self,
        collection: &str,
        document: &EventDocument,
    ) -> RevenueResult<()> {
        let id = document.document_id()?;
        let transaction = self.begin_transaction().await?;

        let exists = match self.document_exists(collection, id, &transaction).await {
            Ok(exists) => exists,
            Err(e) => {
                self.rollback(&transaction).await;
                return Err(e);
            }
        };

        let body = commit_body(
            &format!("{}/documents/{}/{}", self.database_path(), collection, id),
            document,
            !exists,
            &transaction,
        );

        let url = format!("{}:commit", self.documents_url());
        let request = self.google.http().post(&url).json(&body);
        let response = self.google.authorize(request).await?.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        tracing::debug!(
            collection = %collection,
            document_id = %id,
            created = !exists,
            "Firestore document merged"
        );
        Ok(())
    }
}

/// Build the `commit` request for a single merge write
fn commit_body(name: &str, document: &EventDocument, is_new: bool, transaction: &str) -> Value {
    let fields = document.fields();
    let mask: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();
    let encoded: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| (name.to_string(), encode_field(value)))
        .collect();

    let mut transforms = vec![json!({
        "fieldPath": UPDATED_AT_FIELD,
        "setToServerValue": "REQUEST_TIME",
    })];
    if is_new {
        transforms.push(json!({
            "fieldPath": CREATED_AT_FIELD,
            "setToServerValue": "REQUEST_TIME",
        }));
    }

    json!({
        "writes": [{
            "update": { "name": name, "fields": encoded },
            "updateMask": { "fieldPaths": mask },
            "updateTransforms": transforms,
        }],
        "transaction": transaction,
    })
}

fn encode_field(value: &FieldValue) -> Value {
    match value {
        FieldValue::Json(json) => encode_value(json),
        FieldValue::Timestamp(ts) => json!({ "timestampValue": format_iso_millis(*ts) }),
    }
}

/// Encode plain JSON as a typed Firestore `Value`
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

#[async_trait]
impl DocumentSink for FirestoreClient {
    async fn merge_document(&self, collection: &str, document: &EventDocument) -> RevenueResult<()> {
        self.merge_event_document(collection, document).await
    }
}
