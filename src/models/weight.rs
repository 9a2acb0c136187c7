use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WeightUnit {
    Lbs,
    Kg,
}

impl Default for WeightUnit {
    fn default() -> Self {
        WeightUnit::Lbs
    }
}

impl WeightUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightUnit::Lbs => "lbs",
            WeightUnit::Kg => "kg",
        }
    }

    pub fn parse(value: &str) -> Option<WeightUnit> {
        match value {
            "lbs" => Some(WeightUnit::Lbs),
            "kg" => Some(WeightUnit::Kg),
            _ => None,
        }
    }
}

/// Body weight entered after all three photos are in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Weight {
    pub value: f64,
    pub unit: WeightUnit,
}

impl Weight {
    pub fn new(value: f64, unit: WeightUnit) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 {
            bail!("weight must be a positive number, got {value}");
        }
        Ok(Self { value, unit })
    }
}
