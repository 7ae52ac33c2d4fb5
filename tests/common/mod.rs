//! In-memory fakes of the remote systems, shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use serde_json::{json, Value};
use shrsync::adapters::database::Storage;
use shrsync::adapters::emr::LocalEmr;
use shrsync::adapters::feed::FeedSource;
use shrsync::adapters::memory::MemoryStorage;
use shrsync::adapters::shr::{PatientRegistry, SharedHealthRecord};
use shrsync::config::{parse_config, ShrSyncConfig};
use shrsync::core::sync::{SyncCoordinator, SyncServices};
use shrsync::domain::{
    ClinicalEncounter, EntryContent, FeedEntry, FeedPage, FeedUrl, HealthId, LocalPatient,
    PatientDocument, Result, SyncError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const HID: &str = "98001046534";
pub const SURVIVING_HID: &str = "98001046999";

pub const CONFIG: &str = r#"
environment = "development"
database_target = "memory"

[application]
log_level = "info"

[shr]
base_url = "https://shr.example.org"
patient_registry_url = "https://mci.example.org/api/v1"
facility_registry_url = "https://fr.example.org/api/1.0"

[identity]
signin_url = "https://idp.example.org/signin"
client_id = "18550"
auth_token = "token"
email = "facility@example.org"
password = "secret"

[emr]
base_url = "http://emr.local/openmrs"
username = "admin"
password = "Admin123"

[sync]
catchments = ["3026"]
max_failed_events = 3
page_size = 2
local_patient_feed_url = "http://emr.local/openmrs/ws/atomfeed/patient/recent"
local_encounter_feed_url = "http://emr.local/openmrs/ws/atomfeed/encounter/recent"

[assembly]
default_facility_id = "10019841"

[logging]
local_enabled = false
"#;

pub fn config() -> ShrSyncConfig {
    parse_config(CONFIG).unwrap()
}

pub fn hid(value: &str) -> HealthId {
    HealthId::new(value).unwrap()
}

/// Feeds keyed by URL, paged like the real feed endpoints
#[derive(Default)]
pub struct FakeFeeds {
    feeds: Mutex<HashMap<String, Vec<FeedEntry>>>,
}

impl FakeFeeds {
    pub fn publish(&self, feed: &str, entry: FeedEntry) {
        self.feeds
            .lock()
            .unwrap()
            .entry(feed.to_string())
            .or_default()
            .push(entry);
    }
}

#[async_trait]
impl FeedSource for FakeFeeds {
    async fn fetch_page(
        &self,
        feed: &FeedUrl,
        after: Option<&str>,
        limit: usize,
    ) -> Result<FeedPage> {
        let feeds = self.feeds.lock().unwrap();
        let entries = feeds.get(feed.as_str()).cloned().unwrap_or_default();
        let start = match after {
            Some(id) => entries
                .iter()
                .position(|e| e.id == id)
                .map_or(0, |i| i + 1),
            None => 0,
        };
        Ok(FeedPage {
            entries: entries.into_iter().skip(start).take(limit).collect(),
        })
    }
}

/// Local EMR holding patients and encounters in maps
#[derive(Default)]
pub struct FakeEmr {
    pub patients: Mutex<HashMap<String, LocalPatient>>,
    pub encounters: Mutex<HashMap<String, ClinicalEncounter>>,
    /// (patient uuid, SHR encounter id)
    pub imported: Mutex<Vec<(String, String)>>,
    pub patient_updates: Mutex<usize>,
}

impl FakeEmr {
    pub fn add_patient(&self, uuid: &str, document: PatientDocument) {
        self.patients.lock().unwrap().insert(
            uuid.to_string(),
            LocalPatient {
                uuid: uuid.to_string(),
                demographics: document,
            },
        );
    }

    pub fn add_encounter(&self, encounter: ClinicalEncounter) {
        self.encounters
            .lock()
            .unwrap()
            .insert(encounter.uuid.clone(), encounter);
    }

    pub fn patient_count(&self) -> usize {
        self.patients.lock().unwrap().len()
    }
}

#[async_trait]
impl LocalEmr for FakeEmr {
    async fn fetch_encounter(&self, uuid: &str) -> Result<ClinicalEncounter> {
        self.encounters
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| SyncError::Feed(format!("no encounter {uuid}")))
    }

    async fn fetch_patient(&self, uuid: &str) -> Result<LocalPatient> {
        self.patients
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| SyncError::Feed(format!("no patient {uuid}")))
    }

    async fn create_patient(&self, patient: &PatientDocument) -> Result<String> {
        let mut patients = self.patients.lock().unwrap();
        let uuid = format!("local-{}", patients.len() + 1);
        patients.insert(
            uuid.clone(),
            LocalPatient {
                uuid: uuid.clone(),
                demographics: patient.clone(),
            },
        );
        Ok(uuid)
    }

    async fn update_patient(&self, uuid: &str, patient: &PatientDocument) -> Result<()> {
        let mut patients = self.patients.lock().unwrap();
        let existing = patients
            .get_mut(uuid)
            .ok_or_else(|| SyncError::Feed(format!("no patient {uuid}")))?;
        existing.demographics = patient.clone();
        *self.patient_updates.lock().unwrap() += 1;
        Ok(())
    }

    async fn import_encounter(
        &self,
        patient_uuid: &str,
        shr_encounter_id: &str,
        _bundle: &Value,
    ) -> Result<String> {
        let mut imported = self.imported.lock().unwrap();
        imported.push((patient_uuid.to_string(), shr_encounter_id.to_string()));
        Ok(format!("imported-{}", imported.len()))
    }
}

/// SHR and patient registry in one
#[derive(Default)]
pub struct FakeShr {
    /// (health id, encounter id) -> last submitted bundle
    pub encounters: Mutex<HashMap<(String, String), Value>>,
    pub registry: Mutex<HashMap<String, PatientDocument>>,
    pub creates: Mutex<usize>,
    pub updates: Mutex<usize>,
}

impl FakeShr {
    pub fn creates(&self) -> usize {
        *self.creates.lock().unwrap()
    }

    pub fn updates(&self) -> usize {
        *self.updates.lock().unwrap()
    }

    pub fn publish_encounter(&self, health_id: &str, id: &str, bundle: Value) {
        self.encounters
            .lock()
            .unwrap()
            .insert((health_id.to_string(), id.to_string()), bundle);
    }
}

#[async_trait]
impl SharedHealthRecord for FakeShr {
    async fn create_encounter(&self, health_id: &HealthId, bundle: &Value) -> Result<String> {
        let mut creates = self.creates.lock().unwrap();
        *creates += 1;
        let id = format!("shr-enc-{creates}");
        self.publish_encounter(health_id.as_str(), &id, bundle.clone());
        Ok(id)
    }

    async fn update_encounter(
        &self,
        health_id: &HealthId,
        encounter_id: &str,
        bundle: &Value,
    ) -> Result<String> {
        *self.updates.lock().unwrap() += 1;
        self.publish_encounter(health_id.as_str(), encounter_id, bundle.clone());
        Ok(encounter_id.to_string())
    }

    async fn fetch_encounter(&self, health_id: &HealthId, encounter_id: &str) -> Result<Value> {
        self.encounters
            .lock()
            .unwrap()
            .get(&(health_id.to_string(), encounter_id.to_string()))
            .cloned()
            .ok_or_else(|| SyncError::Feed(format!("no SHR encounter {encounter_id}")))
    }

    fn encounter_uri(&self, health_id: &HealthId, encounter_id: &str) -> String {
        format!("https://shr.example.org/patients/{health_id}/encounters/{encounter_id}")
    }
}

#[async_trait]
impl PatientRegistry for FakeShr {
    async fn create_patient(&self, patient: &PatientDocument) -> Result<HealthId> {
        let mut registry = self.registry.lock().unwrap();
        let health_id = hid(&format!("9800104{:04}", registry.len() + 1));
        let mut stored = patient.clone();
        stored.health_id = Some(health_id.clone());
        registry.insert(health_id.to_string(), stored);
        Ok(health_id)
    }

    async fn update_patient(&self, health_id: &HealthId, patient: &PatientDocument) -> Result<()> {
        self.registry
            .lock()
            .unwrap()
            .insert(health_id.to_string(), patient.clone());
        Ok(())
    }

    async fn fetch_patient(&self, health_id: &HealthId) -> Result<PatientDocument> {
        self.registry
            .lock()
            .unwrap()
            .get(health_id.as_str())
            .cloned()
            .ok_or_else(|| SyncError::Feed(format!("no registry patient {health_id}")))
    }

    fn patient_uri(&self, health_id: &HealthId) -> String {
        format!("https://mci.example.org/api/v1/patients/{health_id}")
    }
}

/// Coordinator wired to fakes and in-memory storage
pub struct Harness {
    pub feeds: Arc<FakeFeeds>,
    pub emr: Arc<FakeEmr>,
    pub shr: Arc<FakeShr>,
    pub storage: Arc<MemoryStorage>,
    pub config: ShrSyncConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            feeds: Arc::new(FakeFeeds::default()),
            emr: Arc::new(FakeEmr::default()),
            shr: Arc::new(FakeShr::default()),
            storage: Arc::new(MemoryStorage::new()),
            config: config(),
        }
    }

    /// A fresh coordinator over the same fakes and storage, like a new process
    pub fn coordinator(&self) -> SyncCoordinator {
        let services = SyncServices {
            local_feeds: self.feeds.clone(),
            catchment_feeds: self.feeds.clone(),
            emr: self.emr.clone(),
            shr: self.shr.clone(),
            registry: self.shr.clone(),
        };
        SyncCoordinator::from_parts(
            self.config.clone(),
            services,
            Storage::from_backend(self.storage.clone()),
        )
    }

    pub fn local_patient_feed(&self) -> String {
        self.config.sync.local_patient_feed_url.clone()
    }

    pub fn local_encounter_feed(&self) -> String {
        self.config.sync.local_encounter_feed_url.clone()
    }

    /// `(patients, encounters)` feed URLs of the first catchment
    pub fn catchment_feeds(&self) -> (FeedUrl, FeedUrl) {
        let (_, patients, encounters) = self.config.catchment_feeds().unwrap().remove(0);
        (patients, encounters)
    }
}

pub fn reference_entry(id: &str, reference: &str) -> FeedEntry {
    FeedEntry {
        id: id.to_string(),
        title: "change".to_string(),
        updated: None,
        categories: vec![],
        content: EntryContent::Reference(reference.to_string()),
    }
}

pub fn document_entry(id: &str, document: Value) -> FeedEntry {
    FeedEntry {
        id: id.to_string(),
        title: "change".to_string(),
        updated: Some("2025-01-01T00:00:00Z".parse().unwrap()),
        categories: vec![],
        content: EntryContent::Document(document),
    }
}

/// Demographics with generated names
pub fn patient_document(health_id: Option<&str>) -> PatientDocument {
    let given_name: String = FirstName().fake();
    let family_name: String = LastName().fake();
    serde_json::from_value(json!({
        "health_id": health_id,
        "given_name": given_name,
        "family_name": family_name,
        "gender": "female",
        "date_of_birth": "1987-04-12",
        "address": { "division_id": "30", "district_id": "26" }
    }))
    .unwrap()
}

pub fn encounter(uuid: &str, patient_uuid: &str, changed: &str) -> ClinicalEncounter {
    serde_json::from_value(json!({
        "uuid": uuid,
        "patient_uuid": patient_uuid,
        "encounter_type": "Consultation",
        "encounter_datetime": "2025-03-01T09:00:00Z",
        "date_changed": changed,
        "visit": {
            "uuid": format!("visit-{uuid}"),
            "visit_type": "OPD",
            "start": "2025-03-01T08:45:00Z"
        },
        "observations": [{
            "uuid": format!("{uuid}-pulse"),
            "concept": { "uuid": "c-pulse", "name": "Pulse" },
            "obs_datetime": "2025-03-01T09:05:00Z",
            "value": { "type": "numeric", "value": 72.0, "units": "/min" }
        }]
    }))
    .unwrap()
}
