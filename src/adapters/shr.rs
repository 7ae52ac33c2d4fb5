//! Shared health record and patient registry clients
//!
//! Both remotes sit behind the identity server session. GET and PUT are
//! retried with backoff; POST is sent once since a timed-out create may
//! already have been applied remotely.

use crate::adapters::http::{build_client, check_status, retry_request, send_error};
use crate::adapters::identity::{authorize, on_unauthorized, IdentitySession};
use crate::config::{RetryConfig, ShrConfig};
use crate::domain::{HealthId, PatientDocument, RegistryError, Result, SyncError};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Encounter submission to the shared health record
#[async_trait]
pub trait SharedHealthRecord: Send + Sync {
    /// Creates an encounter, returning the SHR encounter id
    async fn create_encounter(&self, health_id: &HealthId, bundle: &Value) -> Result<String>;

    /// Replaces an encounter, returning the SHR encounter id
    async fn update_encounter(
        &self,
        health_id: &HealthId,
        encounter_id: &str,
        bundle: &Value,
    ) -> Result<String>;

    async fn fetch_encounter(&self, health_id: &HealthId, encounter_id: &str) -> Result<Value>;

    /// Canonical URI of an SHR encounter
    fn encounter_uri(&self, health_id: &HealthId, encounter_id: &str) -> String;
}

/// Patient registry
#[async_trait]
pub trait PatientRegistry: Send + Sync {
    /// Registers a patient, returning the issued health id
    async fn create_patient(&self, patient: &PatientDocument) -> Result<HealthId>;

    async fn update_patient(&self, health_id: &HealthId, patient: &PatientDocument) -> Result<()>;

    async fn fetch_patient(&self, health_id: &HealthId) -> Result<PatientDocument>;

    /// Canonical URI of a registry patient
    fn patient_uri(&self, health_id: &HealthId) -> String;
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

/// HTTP client for the SHR and the patient registry
pub struct HttpShrClient {
    client: Client,
    shr_base_url: String,
    registry_base_url: String,
    session: Arc<dyn IdentitySession>,
    retry: RetryConfig,
}

impl HttpShrClient {
    pub fn new(config: &ShrConfig, session: Arc<dyn IdentitySession>) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_seconds, config.tls_verify)?,
            shr_base_url: config.base_url.trim_end_matches('/').to_string(),
            registry_base_url: config.patient_registry_url.trim_end_matches('/').to_string(),
            session,
            retry: config.retry.clone(),
        })
    }

    async fn send_json<B: Serialize + Sync + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let request = authorize(request, self.session.as_ref()).await?;
        let response = request.send().await.map_err(send_error)?;
        check_status(response, url).await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(format!("{what}: {e}")).into())
    }

    async fn created_id(response: reqwest::Response, what: &str) -> Result<String> {
        let created: CreatedResponse = Self::read_json(response, what).await?;
        if created.id.is_empty() {
            return Err(RegistryError::InvalidResponse(format!("{what}: empty id")).into());
        }
        Ok(created.id)
    }

    fn encounters_url(&self, health_id: &HealthId) -> String {
        format!("{}/patients/{}/encounters", self.shr_base_url, health_id)
    }

    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        on_unauthorized(result, self.session.as_ref())
    }
}

#[async_trait]
impl SharedHealthRecord for HttpShrClient {
    async fn create_encounter(&self, health_id: &HealthId, bundle: &Value) -> Result<String> {
        let url = self.encounters_url(health_id);
        let result = async {
            let response = self.send_json(Method::POST, &url, Some(bundle)).await?;
            Self::created_id(response, "encounter create").await
        }
        .await;
        let id = self.guard(result)?;
        tracing::info!(health_id = %health_id, shr_encounter_id = %id, "Created SHR encounter");
        Ok(id)
    }

    async fn update_encounter(
        &self,
        health_id: &HealthId,
        encounter_id: &str,
        bundle: &Value,
    ) -> Result<String> {
        let url = self.encounter_uri(health_id, encounter_id);
        let result = retry_request(&self.retry, || async {
            let response = self.send_json(Method::PUT, &url, Some(bundle)).await?;
            Self::created_id(response, "encounter update").await
        })
        .await;
        let id = self.guard(result)?;
        tracing::info!(health_id = %health_id, shr_encounter_id = %id, "Updated SHR encounter");
        Ok(id)
    }

    async fn fetch_encounter(&self, health_id: &HealthId, encounter_id: &str) -> Result<Value> {
        let url = self.encounter_uri(health_id, encounter_id);
        let result = retry_request(&self.retry, || async {
            let response = self.send_json::<Value>(Method::GET, &url, None).await?;
            Self::read_json(response, "encounter").await
        })
        .await;
        self.guard(result)
    }

    fn encounter_uri(&self, health_id: &HealthId, encounter_id: &str) -> String {
        format!("{}/{}", self.encounters_url(health_id), encounter_id)
    }
}

#[async_trait]
impl PatientRegistry for HttpShrClient {
    async fn create_patient(&self, patient: &PatientDocument) -> Result<HealthId> {
        let url = format!("{}/patients", self.registry_base_url);
        let result = async {
            let response = self.send_json(Method::POST, &url, Some(patient)).await?;
            Self::created_id(response, "patient create").await
        }
        .await;
        let id = self.guard(result)?;
        HealthId::new(id).map_err(SyncError::Validation)
    }

    async fn update_patient(&self, health_id: &HealthId, patient: &PatientDocument) -> Result<()> {
        let url = self.patient_uri(health_id);
        let result = retry_request(&self.retry, || async {
            self.send_json(Method::PUT, &url, Some(patient)).await?;
            Ok(())
        })
        .await;
        self.guard(result)
    }

    async fn fetch_patient(&self, health_id: &HealthId) -> Result<PatientDocument> {
        let url = self.patient_uri(health_id);
        let result = retry_request(&self.retry, || async {
            let response = self.send_json::<Value>(Method::GET, &url, None).await?;
            Self::read_json(response, "patient").await
        })
        .await;
        self.guard(result)
    }

    fn patient_uri(&self, health_id: &HealthId) -> String {
        format!("{}/patients/{}", self.registry_base_url, health_id)
    }
}
