//! Local EMR REST client
//!
//! Reads the encounters and patients the local feeds point at, and writes
//! back patients and encounters pulled from the catchment feeds.

use crate::adapters::http::{
    basic_auth_header, build_client, check_status, retry_request, send_error,
};
use crate::config::{EmrConfig, RetryConfig};
use crate::domain::{ClinicalEncounter, LocalPatient, PatientDocument, RegistryError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Local EMR operations used by the workers
#[async_trait]
pub trait LocalEmr: Send + Sync {
    async fn fetch_encounter(&self, uuid: &str) -> Result<ClinicalEncounter>;

    async fn fetch_patient(&self, uuid: &str) -> Result<LocalPatient>;

    /// Creates a local patient, returning its uuid
    async fn create_patient(&self, patient: &PatientDocument) -> Result<String>;

    async fn update_patient(&self, uuid: &str, patient: &PatientDocument) -> Result<()>;

    /// Stores an SHR encounter bundle against a local patient, returning the
    /// local encounter uuid
    async fn import_encounter(
        &self,
        patient_uuid: &str,
        shr_encounter_id: &str,
        bundle: &Value,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct Created {
    uuid: String,
}

/// HTTP client for the local EMR
pub struct HttpEmrClient {
    client: Client,
    base_url: String,
    auth_header: String,
    retry: RetryConfig,
}

impl HttpEmrClient {
    pub fn new(config: &EmrConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_seconds, config.tls_verify)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: basic_auth_header(
                &config.username,
                config.password.expose_secret().as_ref(),
            ),
            retry: config.retry.clone(),
        })
    }

    async fn call<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(send_error)?;
        let response = check_status(response, &url).await?;
        response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(format!("{url}: {e}")).into())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        retry_request(&self.retry, || self.call::<Value, T>(Method::GET, path, None)).await
    }
}

#[async_trait]
impl LocalEmr for HttpEmrClient {
    async fn fetch_encounter(&self, uuid: &str) -> Result<ClinicalEncounter> {
        self.get(&format!("encounters/{uuid}")).await
    }

    async fn fetch_patient(&self, uuid: &str) -> Result<LocalPatient> {
        self.get(&format!("patients/{uuid}")).await
    }

    async fn create_patient(&self, patient: &PatientDocument) -> Result<String> {
        let created: Created = self.call(Method::POST, "patients", Some(patient)).await?;
        tracing::info!(patient_uuid = %created.uuid, "Created local patient");
        Ok(created.uuid)
    }

    async fn update_patient(&self, uuid: &str, patient: &PatientDocument) -> Result<()> {
        let path = format!("patients/{uuid}");
        retry_request(&self.retry, || async {
            self.call::<_, Value>(Method::PUT, &path, Some(patient)).await?;
            Ok(())
        })
        .await
    }

    async fn import_encounter(
        &self,
        patient_uuid: &str,
        shr_encounter_id: &str,
        bundle: &Value,
    ) -> Result<String> {
        let body = json!({
            "shr_encounter_id": shr_encounter_id,
            "bundle": bundle,
        });
        let created: Created = self
            .call(
                Method::POST,
                &format!("patients/{patient_uuid}/encounters"),
                Some(&body),
            )
            .await?;
        tracing::info!(
            patient_uuid,
            shr_encounter_id,
            encounter_uuid = %created.uuid,
            "Imported SHR encounter"
        );
        Ok(created.uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;
    use crate::domain::{Gender, SyncError};

    fn client(server: &mockito::ServerGuard) -> HttpEmrClient {
        HttpEmrClient::new(&EmrConfig {
            base_url: format!("{}/openmrs/ws/rest", server.url()),
            username: "admin".to_string(),
            password: secret_string("test".to_string()),
            timeout_seconds: 5,
            tls_verify: true,
            retry: RetryConfig {
                max_retries: 1,
                ..RetryConfig::default()
            },
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_patient_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/openmrs/ws/rest/patients/p-1")
            .match_header("authorization", "Basic YWRtaW46dGVzdA==")
            .with_status(200)
            .with_body(
                r#"{"uuid":"p-1","health_id":"98001046534","given_name":"Karim",
                "gender":"male","date_of_birth":"1984-02-01"}"#,
            )
            .create_async()
            .await;

        let patient = client(&server).fetch_patient("p-1").await.unwrap();
        assert_eq!(patient.uuid, "p-1");
        assert_eq!(patient.demographics.gender, Gender::Male);
        assert_eq!(
            patient.demographics.health_id.as_ref().map(|h| h.as_str()),
            Some("98001046534")
        );
    }

    #[tokio::test]
    async fn test_import_encounter_returns_local_uuid() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/openmrs/ws/rest/patients/p-1/encounters")
            .match_body(mockito::Matcher::PartialJson(
                json!({"shr_encounter_id": "shr-1"}),
            ))
            .with_status(201)
            .with_body(r#"{"uuid":"enc-local-1"}"#)
            .create_async()
            .await;

        let uuid = client(&server)
            .import_encounter("p-1", "shr-1", &json!({"resourceType": "Bundle"}))
            .await
            .unwrap();
        assert_eq!(uuid, "enc-local-1");
    }

    #[tokio::test]
    async fn test_missing_encounter_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/openmrs/ws/rest/encounters/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = client(&server).fetch_encounter("missing").await.unwrap_err();
        assert!(matches!(err, SyncError::Registry(RegistryError::NotFound(_))));
    }
}
