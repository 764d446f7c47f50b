use thiserror::Error;

use crate::catalog::{AllocationMethod, NewNonRentableType, NewUnitType};
use crate::floor::{FloorPatch, NewFloorPlateTemplate};
use crate::metadata::ProjectMetadata;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn require_name(kind: &str, name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new(format!("{kind} requires a non-empty name")));
    }
    Ok(())
}

fn require_area(kind: &str, name: &str, area: f64) -> Result<(), ValidationError> {
    if !area.is_finite() || area < 0.0 {
        return Err(ValidationError::new(format!(
            "{kind} '{name}' has invalid gross area {area} (must be >= 0)"
        )));
    }
    Ok(())
}

fn require_dimension(kind: &str, name: &str, value: Option<f64>) -> Result<(), ValidationError> {
    if let Some(value) = value {
        if !value.is_finite() || value <= 0.0 {
            return Err(ValidationError::new(format!(
                "{kind} '{name}' has invalid dimension {value} (must be > 0)"
            )));
        }
    }
    Ok(())
}

pub fn validate_template(template: &NewFloorPlateTemplate) -> Result<(), ValidationError> {
    require_name("floor plate template", &template.name)?;
    require_area("floor plate template", &template.name, template.gross_area)?;
    require_dimension("floor plate template", &template.name, template.width)?;
    require_dimension("floor plate template", &template.name, template.length)?;
    Ok(())
}

pub fn validate_floor_label(label: &str) -> Result<(), ValidationError> {
    require_name("floor", label)
}

pub fn validate_floor_patch(patch: &FloorPatch) -> Result<(), ValidationError> {
    if patch.is_empty() {
        return Err(ValidationError::new("floor update has no fields to change"));
    }
    if let Some(label) = &patch.label {
        validate_floor_label(label)?;
    }
    Ok(())
}

pub fn validate_product_name(name: &str) -> Result<(), ValidationError> {
    require_name("product", name)
}

pub fn validate_unit_type(unit: &NewUnitType) -> Result<(), ValidationError> {
    require_name("unit type", &unit.unit_type)?;
    require_area("unit type", &unit.unit_type, unit.gross_area)?;
    require_dimension("unit type", &unit.unit_type, unit.width)?;
    require_dimension("unit type", &unit.unit_type, unit.length)?;
    Ok(())
}

pub fn validate_non_rentable_type(kind: &NewNonRentableType) -> Result<(), ValidationError> {
    require_name("non-rentable type", &kind.name)?;
    if kind.is_percentage_based {
        match kind.percentage {
            Some(pct) if pct.is_finite() && (-EPSILON..=100.0 + EPSILON).contains(&pct) => {}
            Some(pct) => {
                return Err(ValidationError::new(format!(
                    "non-rentable type '{}' has invalid percentage {pct} (must be between 0 and 100)",
                    kind.name
                )));
            }
            None => {
                return Err(ValidationError::new(format!(
                    "non-rentable type '{}' is percentage based but has no percentage",
                    kind.name
                )));
            }
        }
    } else if kind.allocation_method == AllocationMethod::Uniform
        && (!kind.square_footage.is_finite() || kind.square_footage < 0.0)
    {
        return Err(ValidationError::new(format!(
            "non-rentable type '{}' has invalid square footage {}",
            kind.name, kind.square_footage
        )));
    }
    Ok(())
}

pub fn validate_non_rentable_square_footage(square_footage: f64) -> Result<(), ValidationError> {
    if !square_footage.is_finite() || square_footage <= 0.0 {
        return Err(ValidationError::new(format!(
            "square footage must be greater than 0 (got {square_footage})"
        )));
    }
    Ok(())
}

pub fn validate_metadata(metadata: &ProjectMetadata) -> Result<(), ValidationError> {
    let checks = [
        ("land_area", metadata.land_area),
        ("far_allowance", metadata.far_allowance),
        ("loan_to_cost_pct", metadata.financing.loan_to_cost_pct),
        ("interest_rate_pct", metadata.financing.interest_rate_pct),
    ];
    for (field, value) in checks {
        if !value.is_finite() || value < 0.0 {
            return Err(ValidationError::new(format!(
                "{field} must be a non-negative number (got {value})"
            )));
        }
    }
    if metadata.financing.loan_to_cost_pct > 100.0 + EPSILON {
        return Err(ValidationError::new(format!(
            "loan_to_cost_pct cannot exceed 100 (got {})",
            metadata.financing.loan_to_cost_pct
        )));
    }
    Ok(())
}
