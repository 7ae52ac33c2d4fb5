//! Integration tests for the identity mapping store over in-memory storage

mod common;

use common::{hid, HID, SURVIVING_HID};
use shrsync::adapters::memory::MemoryStorage;
use shrsync::core::mapping::{IdMappingStore, SaveOutcome};
use shrsync::domain::{IdMapping, MappingType, SyncError};
use std::sync::Arc;

fn encounter_mapping(local: &str, shr: &str, health_id: &str) -> IdMapping {
    IdMapping::new(
        local,
        shr,
        MappingType::Encounter,
        format!("https://shr.example.org/patients/{health_id}/encounters/{shr}"),
    )
}

fn store() -> (Arc<MemoryStorage>, IdMappingStore) {
    let storage = Arc::new(MemoryStorage::new());
    (storage.clone(), IdMappingStore::new(storage))
}

#[tokio::test]
async fn test_save_is_idempotent_and_repoints() {
    let (storage, mappings) = store();

    let first = encounter_mapping("enc-1", "shr-1", HID);
    assert_eq!(mappings.save(&first).await.unwrap(), SaveOutcome::Inserted);
    assert_eq!(mappings.save(&first).await.unwrap(), SaveOutcome::Unchanged);

    let moved = encounter_mapping("enc-1", "shr-2", HID);
    assert_eq!(mappings.save(&moved).await.unwrap(), SaveOutcome::Repointed);

    assert_eq!(storage.snapshot().len(), 1);
    let stored = mappings
        .find_by_internal_id("enc-1", MappingType::Encounter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.external_id, "shr-2");
    assert!(stored.last_sync_time.is_some());
}

#[tokio::test]
async fn test_same_internal_id_in_different_kinds() {
    let (storage, mappings) = store();
    mappings
        .save(&encounter_mapping("uuid-1", "shr-1", HID))
        .await
        .unwrap();
    mappings
        .save(&IdMapping::new(
            "uuid-1",
            HID,
            MappingType::Patient,
            format!("https://mci.example.org/api/v1/patients/{HID}"),
        ))
        .await
        .unwrap();

    assert_eq!(storage.snapshot().len(), 2);
    let patient = mappings
        .find_by_external_id(HID, MappingType::Patient)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(patient.internal_id, "uuid-1");
}

#[tokio::test]
async fn test_replace_health_id_moves_every_encounter() {
    let (_, mappings) = store();
    for (local, shr) in [("enc-1", "shr-1"), ("enc-2", "shr-2")] {
        mappings
            .save(&encounter_mapping(local, shr, HID))
            .await
            .unwrap();
    }
    mappings
        .save(&encounter_mapping("enc-3", "shr-3", "98001040001"))
        .await
        .unwrap();

    let rewritten = mappings
        .replace_health_id(&hid(HID), &hid(SURVIVING_HID))
        .await
        .unwrap();
    assert_eq!(rewritten, 2);

    let moved = mappings
        .find_by_health_id(&hid(SURVIVING_HID), MappingType::Encounter)
        .await
        .unwrap();
    assert_eq!(moved.len(), 2);
    assert!(moved.iter().all(|m| m.uri.contains(SURVIVING_HID)));
    let untouched = mappings
        .find_by_internal_id("enc-3", MappingType::Encounter)
        .await
        .unwrap()
        .unwrap();
    assert!(untouched.uri.contains("98001040001"));
}

#[tokio::test]
async fn test_interrupted_replace_leaves_mappings_untouched() {
    let (storage, mappings) = store();
    for (local, shr) in [("enc-1", "shr-1"), ("enc-2", "shr-2")] {
        mappings
            .save(&encounter_mapping(local, shr, HID))
            .await
            .unwrap();
    }
    let mut before = storage.snapshot();
    before.sort_by(|a, b| a.internal_id.cmp(&b.internal_id));

    storage.fail_replace_after(1);
    let err = mappings
        .replace_health_id(&hid(HID), &hid(SURVIVING_HID))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::IdentityIntegrity(_)));

    let mut after = storage.snapshot();
    after.sort_by(|a, b| a.internal_id.cmp(&b.internal_id));
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_replace_with_same_health_id_is_noop() {
    let (_, mappings) = store();
    mappings
        .save(&encounter_mapping("enc-1", "shr-1", HID))
        .await
        .unwrap();
    let rewritten = mappings
        .replace_health_id(&hid(HID), &hid(HID))
        .await
        .unwrap();
    assert_eq!(rewritten, 0);
}
