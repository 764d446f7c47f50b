use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::floor::{Floor, FloorPlateTemplate, FloorType, resolve_template};
use crate::validation::{ValidationError, validate_metadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Financing {
    /// Share of total cost funded by debt, in percent.
    pub loan_to_cost_pct: f64,
    pub interest_rate_pct: f64,
}

impl Financing {
    pub fn equity_pct(&self) -> f64 {
        (100.0 - self.loan_to_cost_pct).max(0.0)
    }
}

impl Default for Financing {
    fn default() -> Self {
        Self {
            loan_to_cost_pct: 65.0,
            interest_rate_pct: 7.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    /// Site area in square feet.
    pub land_area: f64,
    /// Zoning floor area ratio allowance.
    pub far_allowance: f64,
    #[serde(default)]
    pub financing: Financing,
}

impl Default for ProjectMetadata {
    fn default() -> Self {
        Self {
            name: "New Project".to_string(),
            land_area: 0.0,
            far_allowance: 0.0,
            financing: Financing::default(),
        }
    }
}

impl ProjectMetadata {
    pub fn buildable_area(&self) -> f64 {
        self.land_area * self.far_allowance
    }

    /// Applies one form field. The metadata is left untouched when the result is invalid.
    pub fn apply(&mut self, update: &MetadataUpdate) -> Result<(), ValidationError> {
        let mut next = self.clone();
        (update.field.setter())(&mut next, &update.value)?;
        validate_metadata(&next)?;
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormSection {
    Property,
    Zoning,
    Financing,
}

impl FormSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormSection::Property => "property",
            FormSection::Zoning => "zoning",
            FormSection::Financing => "financing",
        }
    }
}

impl fmt::Display for FormSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormSection {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "property" => Ok(FormSection::Property),
            "zoning" => Ok(FormSection::Zoning),
            "financing" => Ok(FormSection::Financing),
            other => Err(ValidationError::new(format!("unknown form section '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    Name,
    LandArea,
    FarAllowance,
    LoanToCostPct,
    InterestRatePct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

type FieldSetter = fn(&mut ProjectMetadata, &FieldValue) -> Result<(), ValidationError>;

const FIELD_TABLE: [(FormSection, &str, MetadataField); 5] = [
    (FormSection::Property, "name", MetadataField::Name),
    (FormSection::Property, "land_area", MetadataField::LandArea),
    (FormSection::Zoning, "far_allowance", MetadataField::FarAllowance),
    (FormSection::Financing, "loan_to_cost_pct", MetadataField::LoanToCostPct),
    (FormSection::Financing, "interest_rate_pct", MetadataField::InterestRatePct),
];

impl MetadataField {
    pub fn lookup(section: FormSection, field: &str) -> Option<Self> {
        FIELD_TABLE
            .iter()
            .find(|(s, name, _)| *s == section && *name == field)
            .map(|(_, _, metadata_field)| *metadata_field)
    }

    pub fn section(&self) -> FormSection {
        FIELD_TABLE
            .iter()
            .find(|(_, _, metadata_field)| metadata_field == self)
            .map(|(section, _, _)| *section)
            .unwrap_or(FormSection::Property)
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, MetadataField::Name)
    }

    fn setter(&self) -> FieldSetter {
        match self {
            MetadataField::Name => set_name,
            MetadataField::LandArea => set_land_area,
            MetadataField::FarAllowance => set_far_allowance,
            MetadataField::LoanToCostPct => set_loan_to_cost,
            MetadataField::InterestRatePct => set_interest_rate,
        }
    }
}

fn number(value: &FieldValue) -> Result<f64, ValidationError> {
    match value {
        FieldValue::Number(n) => Ok(*n),
        FieldValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::new(format!("'{text}' is not a number"))),
    }
}

fn set_name(metadata: &mut ProjectMetadata, value: &FieldValue) -> Result<(), ValidationError> {
    let name = match value {
        FieldValue::Text(text) => text.trim().to_string(),
        FieldValue::Number(n) => n.to_string(),
    };
    if name.is_empty() {
        return Err(ValidationError::new("project name cannot be empty"));
    }
    metadata.name = name;
    Ok(())
}

fn set_land_area(metadata: &mut ProjectMetadata, value: &FieldValue) -> Result<(), ValidationError> {
    metadata.land_area = number(value)?;
    Ok(())
}

fn set_far_allowance(
    metadata: &mut ProjectMetadata,
    value: &FieldValue,
) -> Result<(), ValidationError> {
    metadata.far_allowance = number(value)?;
    Ok(())
}

fn set_loan_to_cost(
    metadata: &mut ProjectMetadata,
    value: &FieldValue,
) -> Result<(), ValidationError> {
    metadata.financing.loan_to_cost_pct = number(value)?;
    Ok(())
}

fn set_interest_rate(
    metadata: &mut ProjectMetadata,
    value: &FieldValue,
) -> Result<(), ValidationError> {
    metadata.financing.interest_rate_pct = number(value)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub field: MetadataField,
    pub value: FieldValue,
}

impl MetadataUpdate {
    pub fn new(field: MetadataField, value: FieldValue) -> Self {
        Self { field, value }
    }

    /// Resolves a form `(section, field)` pair; numeric fields must parse as numbers.
    pub fn parse(section: &str, field: &str, raw: &str) -> Result<Self, ValidationError> {
        let section: FormSection = section.parse()?;
        let field = MetadataField::lookup(section, field.trim()).ok_or_else(|| {
            ValidationError::new(format!("unknown field '{field}' in section '{section}'"))
        })?;
        let value = if field.is_numeric() {
            FieldValue::Number(number(&FieldValue::Text(raw.to_string()))?)
        } else {
            FieldValue::Text(raw.to_string())
        };
        Ok(Self { field, value })
    }
}

/// Zoning capacity versus what the current floor stack uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarMetrics {
    pub land_area: f64,
    pub far_allowance: f64,
    pub buildable_area: f64,
    /// Gross area of aboveground floors with a resolved template.
    pub above_ground_area: f64,
    pub below_ground_area: f64,
    pub actual_far: f64,
    pub far_utilization_pct: f64,
    /// Negative when the stack exceeds the zoning allowance.
    pub remaining_buildable_area: f64,
}

impl FarMetrics {
    pub fn compute(
        metadata: &ProjectMetadata,
        floors: &[Floor],
        templates: &[FloorPlateTemplate],
    ) -> Self {
        let mut above_ground_area = 0.0;
        let mut below_ground_area = 0.0;
        for floor in floors {
            let Some(template) = resolve_template(floor, templates) else {
                continue;
            };
            match floor.floor_type {
                FloorType::Aboveground => above_ground_area += template.gross_area,
                FloorType::Underground => below_ground_area += template.gross_area,
            }
        }

        let buildable_area = metadata.buildable_area();
        let actual_far = if metadata.land_area > 0.0 {
            above_ground_area / metadata.land_area
        } else {
            0.0
        };
        let far_utilization_pct = if buildable_area > 0.0 {
            above_ground_area / buildable_area * 100.0
        } else {
            0.0
        };

        Self {
            land_area: metadata.land_area,
            far_allowance: metadata.far_allowance,
            buildable_area,
            above_ground_area,
            below_ground_area,
            actual_far,
            far_utilization_pct,
            remaining_buildable_area: buildable_area - above_ground_area,
        }
    }
}
