use crate::core::assembler::handlers::provenance::{order_provenance, provenance_id, Activity};
use crate::core::assembler::handlers::OrderHandler;
use crate::core::assembler::scope::{AssemblyScope, PendingMapping};
use crate::domain::{urn, MappingType, Order, OrderAction, OrderType, ProducedResource, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

const SNOMED: &str = "http://snomed.info/sct";

/// The action resource an order turns into
struct ActionPlan<'o> {
    /// Id of the action resource; a discontinuation acts on its predecessor
    id: &'o str,
    activity: Activity,
    predecessor: Option<&'o str>,
    /// Where the predecessor's provenance lives, once resolved
    predecessor_provenance: Option<String>,
}

impl<'o> ActionPlan<'o> {
    fn for_order(order: &'o Order) -> Option<Self> {
        let previous = order.previous_order_uuid.as_deref();
        let (id, activity, predecessor) = match order.action {
            OrderAction::Discontinue => (previous?, Activity::Abort, None),
            OrderAction::New => (order.uuid.as_str(), Activity::Create, None),
            OrderAction::Revise => (order.uuid.as_str(), Activity::Update, previous),
            OrderAction::Renew => (order.uuid.as_str(), Activity::Create, previous),
        };
        Some(Self {
            id,
            activity,
            predecessor,
            predecessor_provenance: None,
        })
    }

    /// Looks the predecessor up in this encounter, then through the mapping
    /// of its action resource. A predecessor that never reached the SHR is
    /// left out of the history.
    async fn resolve_predecessor(
        &mut self,
        scope: &AssemblyScope<'_>,
        mapping_type: MappingType,
    ) -> Result<()> {
        let Some(previous) = self.predecessor else {
            return Ok(());
        };
        let provenance = provenance_id(previous);
        if scope.encounter.order(previous).is_some() {
            self.predecessor_provenance = Some(urn(&provenance));
            return Ok(());
        }
        let mapping = scope
            .ctx
            .mappings
            .find_by_internal_id(previous, mapping_type)
            .await?;
        match mapping {
            Some(mapping) => {
                let encounter_uri = mapping
                    .uri
                    .split_once('#')
                    .map_or(mapping.uri.as_str(), |(encounter, _)| encounter);
                self.predecessor_provenance =
                    Some(format!("{encounter_uri}#Provenance/{provenance}"));
            }
            None => {
                tracing::debug!(previous, "Replaced order was never sent, leaving it out");
            }
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.activity == Activity::Abort
    }

    fn relevant_history(&self) -> Value {
        let mut history = vec![json!({ "reference": urn(&provenance_id(self.id)) })];
        if let Some(previous) = &self.predecessor_provenance {
            history.push(json!({ "reference": previous }));
        }
        Value::Array(history)
    }
}

/// Fields every order-derived request shares
async fn request_base(
    scope: &AssemblyScope<'_>,
    order: &Order,
    plan: &ActionPlan<'_>,
    status: &str,
) -> Result<(Value, Value)> {
    let requester = scope
        .practitioner(order.orderer.as_ref())
        .await?
        .unwrap_or_else(|| json!({ "reference": scope.facility_reference }));

    let mut payload = json!({
        "status": status,
        "intent": "order",
        "subject": { "reference": scope.patient_reference },
        "encounter": { "reference": scope.encounter_reference },
        "authoredOn": order.date_activated.to_rfc3339(),
        "requester": requester,
        "relevantHistory": plan.relevant_history(),
    });
    if let Some(comment) = &order.comment {
        payload["note"] = json!([{ "text": comment }]);
    }
    Ok((payload, requester))
}

fn push_all(scope: &mut AssemblyScope<'_>, resources: Vec<ProducedResource>) -> usize {
    resources
        .into_iter()
        .map(|r| usize::from(scope.push(r)))
        .sum()
}

fn skip_without_predecessor(order: &Order) -> Result<usize> {
    tracing::warn!(
        order = %order.uuid,
        "Discontinued order does not name the order it stops, skipping"
    );
    Ok(0)
}

/// Drug orders become MedicationRequests
///
/// Revisions point at the prescription they replace through
/// `priorPrescription`, resolved in this encounter first and then through the
/// medication order mappings.
pub struct DrugOrderHandler;

impl DrugOrderHandler {
    async fn prior_prescription(
        scope: &AssemblyScope<'_>,
        previous: &str,
    ) -> Result<Option<String>> {
        if scope.encounter.order(previous).is_some() {
            return Ok(Some(urn(previous)));
        }
        let mapping = scope
            .ctx
            .mappings
            .find_by_internal_id(previous, MappingType::MedicationOrder)
            .await?;
        if mapping.is_none() {
            tracing::debug!(previous, "Prior prescription was never sent, leaving it out");
        }
        Ok(mapping.map(|m| m.uri))
    }
}

fn dosage_instruction(order: &Order) -> Option<Value> {
    let dosing = order.dosing.as_ref()?;
    let mut dosage = json!({ "asNeededBoolean": dosing.as_needed });
    if let Some(text) = &dosing.instructions {
        dosage["text"] = json!(text);
    }
    if let Some(frequency) = &dosing.frequency {
        dosage["timing"] = json!({ "code": { "text": frequency } });
    }
    if let Some(route) = &dosing.route {
        dosage["route"] = json!({ "text": route });
    }
    if let Some(dose) = dosing.dose {
        let mut quantity = json!({ "value": dose });
        if let Some(units) = &dosing.dose_units {
            quantity["unit"] = json!(units);
        }
        dosage["doseAndRate"] = json!([{ "doseQuantity": quantity }]);
    }
    Some(dosage)
}

fn dispense_request(order: &Order) -> Option<Value> {
    let dosing = order.dosing.as_ref()?;
    let mut request = json!({});
    if let Some(quantity) = dosing.quantity {
        request["quantity"] = json!({ "value": quantity, "unit": dosing.quantity_units });
    }
    if let Some(duration) = dosing.duration {
        request["expectedSupplyDuration"] =
            json!({ "value": duration, "unit": dosing.duration_units });
    }
    (request != json!({})).then_some(request)
}

#[async_trait]
impl OrderHandler for DrugOrderHandler {
    fn name(&self) -> &'static str {
        "drug_order"
    }

    fn can_handle(&self, order: &Order) -> bool {
        order.order_type == OrderType::Drug
    }

    async fn map(&self, order: &Order, scope: &mut AssemblyScope<'_>) -> Result<usize> {
        let Some(mut plan) = ActionPlan::for_order(order) else {
            return skip_without_predecessor(order);
        };
        plan.resolve_predecessor(scope, MappingType::MedicationOrder).await?;
        let status = if plan.is_stopped() { "stopped" } else { "active" };
        let (mut payload, requester) = request_base(scope, order, &plan, status).await?;

        let mut medication = scope.ctx.concept(&order.concept).await?;
        if let Some(dosing) = &order.dosing {
            medication["text"] = json!(dosing.drug_name);
        }
        payload["medicationCodeableConcept"] = medication;
        if let Some(dosage) = dosage_instruction(order) {
            payload["dosageInstruction"] = json!([dosage]);
        }
        if let Some(dispense) = dispense_request(order) {
            payload["dispenseRequest"] = dispense;
        }
        if let Some(previous) = plan.predecessor {
            if let Some(prior) = Self::prior_prescription(scope, previous).await? {
                payload["priorPrescription"] = json!({ "reference": prior });
            }
        }

        let request = ProducedResource::new("MedicationRequest", plan.id, payload);
        scope.add_mapping(PendingMapping::new(
            plan.id,
            plan.id,
            MappingType::MedicationOrder,
            &request,
        ));
        let provenance = order_provenance(
            plan.id,
            plan.activity,
            order.date_activated,
            requester,
            plan.predecessor_provenance.as_deref(),
        );
        Ok(push_all(scope, vec![request, provenance]))
    }
}

/// Lab, radiology, procedure and test orders become ServiceRequests
pub struct ServiceRequestHandler {
    name: &'static str,
    handles: &'static [OrderType],
}

impl ServiceRequestHandler {
    pub fn lab_and_radiology() -> Self {
        Self {
            name: "lab_radiology_order",
            handles: &[OrderType::Lab, OrderType::Radiology],
        }
    }

    pub fn procedure() -> Self {
        Self {
            name: "procedure_order",
            handles: &[OrderType::Procedure],
        }
    }

    pub fn test() -> Self {
        Self {
            name: "test_order",
            handles: &[OrderType::Test],
        }
    }

    fn category(order_type: OrderType) -> Value {
        let (code, display) = match order_type {
            OrderType::Lab => ("108252007", "Laboratory procedure"),
            OrderType::Radiology => ("363679005", "Imaging"),
            OrderType::Procedure => ("387713003", "Surgical procedure"),
            _ => ("103693007", "Diagnostic procedure"),
        };
        json!([{ "coding": [{ "system": SNOMED, "code": code, "display": display }] }])
    }
}

#[async_trait]
impl OrderHandler for ServiceRequestHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, order: &Order) -> bool {
        self.handles.contains(&order.order_type)
    }

    async fn map(&self, order: &Order, scope: &mut AssemblyScope<'_>) -> Result<usize> {
        let Some(mut plan) = ActionPlan::for_order(order) else {
            return skip_without_predecessor(order);
        };
        plan.resolve_predecessor(scope, MappingType::Order).await?;
        let status = if plan.is_stopped() { "revoked" } else { "active" };
        let (mut payload, requester) = request_base(scope, order, &plan, status).await?;

        payload["category"] = Self::category(order.order_type);
        payload["code"] = scope.ctx.concept(&order.concept).await?;
        let stat = order
            .urgency
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case("stat"));
        payload["priority"] = json!(if stat { "stat" } else { "routine" });

        if let Some(accession) = &order.accession_number {
            payload["identifier"] = json!([{ "value": accession }]);
        }
        let mut request = ProducedResource::new("ServiceRequest", plan.id, payload);
        if let Some(accession) = &order.accession_number {
            request = request.with_identifier(accession);
        }

        scope.add_mapping(PendingMapping::new(
            plan.id,
            plan.id,
            MappingType::Order,
            &request,
        ));
        let provenance = order_provenance(
            plan.id,
            plan.activity,
            order.date_activated,
            requester,
            plan.predecessor_provenance.as_deref(),
        );
        Ok(push_all(scope, vec![request, provenance]))
    }
}
