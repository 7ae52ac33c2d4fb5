//! Observation and order handlers
//!
//! Handlers are tried in registration order and the first one whose
//! `can_handle` accepts the input maps it. A handler reports how many
//! resources it produced; zero means the input was skipped.

mod chief_complaint;
mod diagnosis;
mod family_history;
mod lab_result;
mod observation;
mod orders;
mod procedure;
mod provenance;

pub use chief_complaint::ChiefComplaintHandler;
pub use diagnosis::DiagnosisHandler;
pub use family_history::FamilyHistoryHandler;
pub use lab_result::LabResultHandler;
pub use observation::{observation_resource, GenericObservationHandler};
pub use orders::{DrugOrderHandler, ServiceRequestHandler};
pub use procedure::ProcedureFulfillmentHandler;
pub use provenance::{order_provenance, provenance_id, Activity};

use crate::config::ConceptNames;
use crate::core::assembler::scope::AssemblyScope;
use crate::domain::{ObservationNode, Order, Result};
use async_trait::async_trait;

/// Maps a top-level observation group to bundle resources
#[async_trait]
pub trait ObservationHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, observation: &ObservationNode, concepts: &ConceptNames) -> bool;

    async fn map(
        &self,
        observation: &ObservationNode,
        scope: &mut AssemblyScope<'_>,
    ) -> Result<usize>;
}

/// Maps an order to bundle resources
#[async_trait]
pub trait OrderHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, order: &Order) -> bool;

    async fn map(&self, order: &Order, scope: &mut AssemblyScope<'_>) -> Result<usize>;
}

/// Observation handlers in priority order
pub fn observation_handlers() -> Vec<Box<dyn ObservationHandler>> {
    vec![
        Box::new(DiagnosisHandler),
        Box::new(ChiefComplaintHandler),
        Box::new(FamilyHistoryHandler),
        Box::new(ProcedureFulfillmentHandler),
        Box::new(LabResultHandler),
        Box::new(GenericObservationHandler),
    ]
}

/// Order handlers in priority order
pub fn order_handlers() -> Vec<Box<dyn OrderHandler>> {
    vec![
        Box::new(DrugOrderHandler),
        Box::new(ServiceRequestHandler::lab_and_radiology()),
        Box::new(ServiceRequestHandler::procedure()),
        Box::new(ServiceRequestHandler::test()),
    ]
}
