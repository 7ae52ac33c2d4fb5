use crate::domain::{urn, ProducedResource};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

const DATA_OPERATION_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-DataOperation";

/// What happened to the order behind an action resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Create,
    Update,
    Abort,
}

impl Activity {
    fn coding(self) -> Value {
        let (code, display) = match self {
            Activity::Create => ("CREATE", "create"),
            Activity::Update => ("UPDATE", "revise"),
            Activity::Abort => ("ABORT", "abort"),
        };
        json!({ "coding": [{ "system": DATA_OPERATION_SYSTEM, "code": code, "display": display }] })
    }
}

pub fn provenance_id(action_id: &str) -> String {
    format!("{action_id}-provenance")
}

/// Provenance of an order-derived action resource
///
/// `recorded` is the action's `authoredOn`. A revision names the
/// predecessor's provenance, given as a resolved reference, as a revision
/// entity.
pub fn order_provenance(
    action_id: &str,
    activity: Activity,
    recorded: DateTime<Utc>,
    agent: Value,
    predecessor_provenance: Option<&str>,
) -> ProducedResource {
    let mut payload = json!({
        "target": [{ "reference": urn(action_id) }],
        "recorded": recorded.to_rfc3339(),
        "activity": activity.coding(),
        "agent": [{ "who": agent }],
    });
    if let Some(previous) = predecessor_provenance {
        payload["entity"] = json!([{
            "role": "revision",
            "what": { "reference": previous }
        }]);
    }
    ProducedResource::new("Provenance", provenance_id(action_id), payload)
}
