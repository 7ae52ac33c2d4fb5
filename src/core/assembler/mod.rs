//! Encounter bundle assembly
//!
//! Turns a [`ClinicalEncounter`] into a document [`Bundle`]: an Encounter
//! header, the resources produced by the observation and order handlers, and
//! a Composition listing every top-level resource.
//!
//! Assembly is deterministic. Resource ids derive from local uuids and the
//! bundle timestamp is the encounter's last change, so assembling the same
//! encounter twice yields identical bundles.
//!
//! # Example
//!
//! ```rust,no_run
//! use shrsync::core::assembler::{AssemblyContext, EncounterAssembler};
//! # use shrsync::core::mapping::IdMappingStore;
//! # use shrsync::domain::{ClinicalEncounter, HealthId};
//! # use std::sync::Arc;
//!
//! # async fn example(
//! #     config: &shrsync::config::ShrSyncConfig,
//! #     mappings: IdMappingStore,
//! #     encounter: ClinicalEncounter,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let context = Arc::new(AssemblyContext::from_config(config, mappings));
//! let assembler = EncounterAssembler::new(context);
//!
//! let hid = HealthId::new("98001046534")?;
//! let assembled = assembler.assemble(&encounter, &hid).await?;
//! println!("{}", assembled.bundle.to_fhir_json());
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod context;
pub mod handlers;
pub mod header;
pub mod scope;

pub use bundle::{derived_id, find_resource_by_reference, identify_top_level_resources};
pub use context::{AssemblyContext, Coding, MappedTerminology, TerminologyLookup};
pub use handlers::{ObservationHandler, OrderHandler};
pub use scope::{AssemblyScope, PendingMapping};

use crate::domain::{Bundle, ClinicalEncounter, HealthId, MappingType, Result};
use std::sync::Arc;

/// Inputs the assembler left out of the bundle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub skipped_observations: usize,
    pub skipped_orders: usize,
}

/// Result of assembling one encounter
#[derive(Debug, Clone)]
pub struct AssembledEncounter {
    pub bundle: Bundle,
    /// Mappings to save once the SHR has accepted the bundle
    pub pending_mappings: Vec<PendingMapping>,
    pub stats: AssemblyStats,
}

/// Builds encounter bundles by dispatching to registered handlers
pub struct EncounterAssembler {
    context: Arc<AssemblyContext>,
    observation_handlers: Vec<Box<dyn ObservationHandler>>,
    order_handlers: Vec<Box<dyn OrderHandler>>,
}

impl EncounterAssembler {
    /// Assembler with the default handler set
    pub fn new(context: Arc<AssemblyContext>) -> Self {
        Self::with_handlers(
            context,
            handlers::observation_handlers(),
            handlers::order_handlers(),
        )
    }

    pub fn with_handlers(
        context: Arc<AssemblyContext>,
        observation_handlers: Vec<Box<dyn ObservationHandler>>,
        order_handlers: Vec<Box<dyn OrderHandler>>,
    ) -> Self {
        Self {
            context,
            observation_handlers,
            order_handlers,
        }
    }

    pub fn context(&self) -> &AssemblyContext {
        &self.context
    }

    /// Assembles the bundle of `encounter` for patient `health_id`
    ///
    /// # Errors
    ///
    /// Fails with `EncounterNotYetSynced` when a result references an order
    /// from an encounter that has not reached the SHR, and with storage
    /// errors from mapping lookups. No partial bundle is returned.
    pub async fn assemble(
        &self,
        encounter: &ClinicalEncounter,
        health_id: &HealthId,
    ) -> Result<AssembledEncounter> {
        let ctx = self.context.as_ref();

        let encounter_uri = ctx
            .mappings
            .find_by_internal_id(&encounter.uuid, MappingType::Encounter)
            .await?
            .map(|m| m.uri);
        let facility_reference = ctx.facility_reference(encounter.location.as_ref()).await?;
        let patient_reference = ctx.patient_reference(health_id);

        let mut scope = AssemblyScope::new(
            ctx,
            encounter,
            health_id,
            encounter_uri,
            facility_reference.clone(),
        );
        let header = header::encounter_resource(&scope, &facility_reference).await?;
        scope.push(header);

        let mut stats = AssemblyStats::default();

        for observation in &encounter.observations {
            if observation.voided || ctx.is_ignored(&observation.concept) {
                tracing::debug!(obs = %observation.uuid, "Skipping voided or ignored observation");
                stats.skipped_observations += 1;
                continue;
            }
            let handler = self
                .observation_handlers
                .iter()
                .find(|h| h.can_handle(observation, &ctx.config.concepts));
            let produced = match handler {
                Some(handler) => handler.map(observation, &mut scope).await?,
                None => 0,
            };
            if produced == 0 {
                tracing::debug!(
                    obs = %observation.uuid,
                    concept = %observation.concept.name,
                    "Observation produced no resources"
                );
                stats.skipped_observations += 1;
            }
        }

        for order in &encounter.orders {
            if order.voided {
                stats.skipped_orders += 1;
                continue;
            }
            let handler = self.order_handlers.iter().find(|h| h.can_handle(order));
            let produced = match handler {
                Some(handler) => handler.map(order, &mut scope).await?,
                None => 0,
            };
            if produced == 0 {
                tracing::debug!(
                    order = %order.uuid,
                    order_type = ?order.order_type,
                    "Order produced no resources"
                );
                stats.skipped_orders += 1;
            }
        }

        let (resources, pending_mappings) = scope.into_parts();
        let root_document = {
            let sections = identify_top_level_resources(&resources);
            bundle::composition(encounter, &patient_reference, &facility_reference, &sections)
        };

        tracing::debug!(
            encounter = %encounter.uuid,
            resources = resources.len(),
            skipped_observations = stats.skipped_observations,
            skipped_orders = stats.skipped_orders,
            "Assembled encounter bundle"
        );

        Ok(AssembledEncounter {
            bundle: Bundle {
                id: derived_id(&encounter.uuid, "bundle"),
                timestamp: encounter.last_changed(),
                root_document,
                resources,
            },
            pending_mappings,
            stats,
        })
    }
}
