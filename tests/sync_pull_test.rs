//! Integration tests for pulling catchment patients and SHR encounters

mod common;

use common::{document_entry, hid, patient_document, reference_entry, Harness, HID, SURVIVING_HID};
use serde_json::json;
use shrsync::core::sync::{Direction, EntityKind, FeedRunReport, SyncOptions, SyncSummary};
use shrsync::domain::MappingType;

fn pull(entity: EntityKind) -> SyncOptions {
    SyncOptions {
        direction: Direction::Pull,
        entity,
        ..SyncOptions::default()
    }
}

fn report<'a>(summary: &'a SyncSummary, worker: &str) -> &'a FeedRunReport {
    summary
        .feeds
        .iter()
        .find(|feed| feed.worker == worker)
        .unwrap()
}

fn encounter_uri(health_id: &str, id: &str) -> String {
    format!("https://shr.example.org/patients/{health_id}/encounters/{id}")
}

fn publish_patient(h: &Harness, entry_id: &str) {
    let (patients, _) = h.catchment_feeds();
    let document = serde_json::to_value(patient_document(Some(HID))).unwrap();
    h.feeds
        .publish(patients.as_str(), document_entry(entry_id, document));
}

#[tokio::test]
async fn test_patient_pulled_twice_is_imported_once() {
    let h = Harness::new();
    publish_patient(&h, "p1");
    publish_patient(&h, "p2");

    let summary = h.coordinator().execute(&pull(EntityKind::Patient)).await.unwrap();
    assert!(summary.is_successful());
    let patients = report(&summary, "patient_pull");
    assert_eq!(patients.synced, 1);
    assert_eq!(patients.unchanged, 1);
    assert_eq!(h.emr.patient_count(), 1);

    let coordinator = h.coordinator();
    let mapping = coordinator
        .stores()
        .mappings
        .find_by_external_id(HID, MappingType::Patient)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.internal_id, "local-1");
    assert_eq!(mapping.uri, format!("https://mci.example.org/api/v1/patients/{HID}"));
}

#[tokio::test]
async fn test_encounter_reference_is_fetched_and_imported() {
    let h = Harness::new();
    let (_, encounters) = h.catchment_feeds();
    publish_patient(&h, "p1");
    h.shr
        .publish_encounter(HID, "shr-77", json!({ "resourceType": "Bundle", "type": "collection" }));
    h.feeds.publish(
        encounters.as_str(),
        reference_entry("e1", &encounter_uri(HID, "shr-77")),
    );

    let summary = h.coordinator().execute(&pull(EntityKind::All)).await.unwrap();
    assert!(summary.is_successful());
    assert_eq!(report(&summary, "encounter_pull").synced, 1);
    assert_eq!(
        h.emr.imported.lock().unwrap().as_slice(),
        &[("local-1".to_string(), "shr-77".to_string())]
    );

    let coordinator = h.coordinator();
    let mapping = coordinator
        .stores()
        .mappings
        .find_by_internal_id("imported-1", MappingType::Encounter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mapping.external_id, "shr-77");
    assert_eq!(mapping.uri, encounter_uri(HID, "shr-77"));

    // The same encounter announced again is not imported twice
    h.feeds.publish(
        encounters.as_str(),
        reference_entry("e2", &encounter_uri(HID, "shr-77")),
    );
    let summary = h.coordinator().execute(&pull(EntityKind::Encounter)).await.unwrap();
    assert_eq!(report(&summary, "encounter_pull").unchanged, 1);
    assert_eq!(h.emr.imported.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_encounter_waits_for_its_patient() {
    let h = Harness::new();
    let (_, encounters) = h.catchment_feeds();
    h.feeds.publish(
        encounters.as_str(),
        document_entry(
            "e1",
            json!({
                "uri": encounter_uri(HID, "shr-5"),
                "bundle": { "resourceType": "Bundle" }
            }),
        ),
    );

    let summary = h.coordinator().execute(&pull(EntityKind::Encounter)).await.unwrap();
    assert_eq!(summary.total_failed(), 1);
    let coordinator = h.coordinator();
    let stores = coordinator.stores();
    assert!(stores.failed.contains(&encounters, "e1").await.unwrap());
    let marker = stores.markers.load(&encounters).await.unwrap();
    assert!(marker.last_read_entry_id.is_none());

    // Once the patient arrives the held entry goes through
    publish_patient(&h, "p1");
    let summary = h.coordinator().execute(&pull(EntityKind::All)).await.unwrap();
    assert!(summary.is_successful());
    assert_eq!(report(&summary, "encounter_pull").synced, 1);
    assert_eq!(stores.failed.count(&encounters).await.unwrap(), 0);
    let marker = stores.markers.load(&encounters).await.unwrap();
    assert_eq!(marker.last_read_entry_id.as_deref(), Some("e1"));
}

#[tokio::test]
async fn test_merge_notice_moves_encounters_to_surviving_patient() {
    let h = Harness::new();
    let (patients, encounters) = h.catchment_feeds();
    publish_patient(&h, "p1");
    h.feeds.publish(
        encounters.as_str(),
        reference_entry("e1", &encounter_uri(HID, "shr-9")),
    );
    h.shr
        .publish_encounter(HID, "shr-9", json!({ "resourceType": "Bundle" }));
    h.coordinator().execute(&pull(EntityKind::All)).await.unwrap();

    let mut retired = patient_document(Some(HID));
    retired.active = false;
    retired.merged_with = Some(hid(SURVIVING_HID));
    h.feeds.publish(
        patients.as_str(),
        document_entry("p2", serde_json::to_value(retired).unwrap()),
    );

    let summary = h.coordinator().execute(&pull(EntityKind::Patient)).await.unwrap();
    assert!(summary.is_successful());
    let patients = report(&summary, "patient_pull");
    assert_eq!(patients.merges, 1);
    assert_eq!(patients.unchanged, 1);

    let coordinator = h.coordinator();
    let mappings = &coordinator.stores().mappings;
    let moved = mappings
        .find_by_health_id(&hid(SURVIVING_HID), MappingType::Encounter)
        .await
        .unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].uri, encounter_uri(SURVIVING_HID, "shr-9"));
    assert!(mappings
        .find_by_health_id(&hid(HID), MappingType::Encounter)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_merge_notice_by_reference_moves_encounters() {
    let h = Harness::new();
    let (patients, encounters) = h.catchment_feeds();
    publish_patient(&h, "p1");
    h.feeds.publish(
        encounters.as_str(),
        reference_entry("e1", &encounter_uri(HID, "shr-9")),
    );
    h.shr
        .publish_encounter(HID, "shr-9", json!({ "resourceType": "Bundle" }));
    h.coordinator().execute(&pull(EntityKind::All)).await.unwrap();

    // The feed only names the retired health id; the registry holds the notice
    let mut retired = patient_document(Some(HID));
    retired.active = false;
    retired.merged_with = Some(hid(SURVIVING_HID));
    h.shr
        .registry
        .lock()
        .unwrap()
        .insert(HID.to_string(), retired);
    h.feeds.publish(
        patients.as_str(),
        reference_entry("p2", &format!("/api/v1/patients/{HID}")),
    );

    let summary = h.coordinator().execute(&pull(EntityKind::Patient)).await.unwrap();
    assert!(summary.is_successful());
    let patients = report(&summary, "patient_pull");
    assert_eq!(patients.merges, 1);
    assert_eq!(patients.unchanged, 1);
    assert_eq!(h.emr.patient_count(), 1);

    let coordinator = h.coordinator();
    let mappings = &coordinator.stores().mappings;
    let moved = mappings
        .find_by_health_id(&hid(SURVIVING_HID), MappingType::Encounter)
        .await
        .unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].external_id, "shr-9");
    assert!(mappings
        .find_by_health_id(&hid(HID), MappingType::Encounter)
        .await
        .unwrap()
        .is_empty());
}
