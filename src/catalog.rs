use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::floor::FloorId;
use crate::remote::RecordId;

pub type ProductId = RecordId;
pub type UnitTypeId = RecordId;
pub type NonRentableTypeId = RecordId;

/// A named category grouping repeatable unit designs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub unit_types: Vec<UnitType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitType {
    pub id: UnitTypeId,
    pub product_id: ProductId,
    /// Display name, e.g. "1BR-A".
    pub unit_type: String,
    #[serde(default)]
    pub number_of_units: u32,
    /// Gross area of one unit in square feet.
    pub gross_area: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUnitType {
    pub unit_type: String,
    #[serde(default)]
    pub number_of_units: u32,
    pub gross_area: f64,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub length: Option<f64>,
}

impl NewUnitType {
    pub fn new(unit_type: impl Into<String>, gross_area: f64) -> Self {
        Self {
            unit_type: unit_type.into(),
            number_of_units: 0,
            gross_area,
            width: None,
            length: None,
        }
    }
}

/// Finds a unit type anywhere in the product catalog.
pub fn find_unit_type(products: &[Product], unit_type_id: UnitTypeId) -> Option<&UnitType> {
    products
        .iter()
        .flat_map(|product| product.unit_types.iter())
        .find(|unit_type| unit_type.id == unit_type_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMethod {
    /// Set by hand per floor; never recomputed.
    #[default]
    Specific,
    /// Spread evenly (or by percentage, see `is_percentage_based`) across floors.
    Uniform,
}

impl AllocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationMethod::Specific => "specific",
            AllocationMethod::Uniform => "uniform",
        }
    }
}

impl fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "specific" => Ok(AllocationMethod::Specific),
            "uniform" => Ok(AllocationMethod::Uniform),
            other => Err(format!("unknown allocation method '{other}'")),
        }
    }
}

/// Resolved distribution rule of a non-rentable type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NonRentablePolicy {
    Manual,
    /// Percent of each floor's gross area.
    Percentage(f64),
    /// Total square footage split evenly over all floors.
    Uniform(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonRentableType {
    pub id: NonRentableTypeId,
    pub name: String,
    #[serde(default)]
    pub allocation_method: AllocationMethod,
    #[serde(default)]
    pub is_percentage_based: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub square_footage: f64,
}

impl NonRentableType {
    pub fn policy(&self) -> NonRentablePolicy {
        match self.allocation_method {
            AllocationMethod::Specific => NonRentablePolicy::Manual,
            AllocationMethod::Uniform if self.is_percentage_based => match self.percentage {
                Some(percentage) => NonRentablePolicy::Percentage(percentage),
                None => NonRentablePolicy::Manual,
            },
            AllocationMethod::Uniform => NonRentablePolicy::Uniform(self.square_footage),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNonRentableType {
    pub name: String,
    #[serde(default)]
    pub allocation_method: AllocationMethod,
    #[serde(default)]
    pub is_percentage_based: bool,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub square_footage: f64,
}

impl NewNonRentableType {
    pub fn specific(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allocation_method: AllocationMethod::Specific,
            is_percentage_based: false,
            percentage: None,
            square_footage: 0.0,
        }
    }

    pub fn uniform(name: impl Into<String>, square_footage: f64) -> Self {
        Self {
            name: name.into(),
            allocation_method: AllocationMethod::Uniform,
            is_percentage_based: false,
            percentage: None,
            square_footage,
        }
    }

    pub fn percentage(name: impl Into<String>, percentage: f64) -> Self {
        Self {
            name: name.into(),
            allocation_method: AllocationMethod::Uniform,
            is_percentage_based: true,
            percentage: Some(percentage),
            square_footage: 0.0,
        }
    }
}

/// Square footage of one non-rentable type on one floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonRentableAllocation {
    pub id: RecordId,
    pub floor_id: FloorId,
    pub non_rentable_type_id: NonRentableTypeId,
    pub square_footage: f64,
}
