//! Patient demographics exchanged with the patient registry and the local EMR

use crate::domain::ids::HealthId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Address {
    #[serde(default)]
    pub address_line: Option<String>,
    #[serde(default)]
    pub division_id: Option<String>,
    #[serde(default)]
    pub district_id: Option<String>,
    #[serde(default)]
    pub upazila_id: Option<String>,
}

impl Address {
    /// Catchment code of the address, most specific level first-to-last
    pub fn catchment_code(&self) -> String {
        [&self.division_id, &self.district_id, &self.upazila_id]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect::<Vec<_>>()
            .concat()
    }
}

/// Patient document as published by the patient registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDocument {
    #[serde(default)]
    pub health_id: Option<HealthId>,
    pub given_name: String,
    #[serde(default)]
    pub family_name: Option<String>,
    pub gender: Gender,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Set on a retired record that was merged into another health id
    #[serde(default)]
    pub merged_with: Option<HealthId>,
}

fn default_active() -> bool {
    true
}

impl PatientDocument {
    /// `(retired, surviving)` when this document announces a merge
    pub fn merge_notice(&self) -> Option<(&HealthId, &HealthId)> {
        match (&self.health_id, &self.merged_with) {
            (Some(retired), Some(surviving)) if !self.active && retired != surviving => {
                Some((retired, surviving))
            }
            _ => None,
        }
    }
}

/// Patient as stored in the local EMR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPatient {
    pub uuid: String,
    #[serde(flatten)]
    pub demographics: PatientDocument,
}
