use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::remote::RecordId;

pub type FloorId = RecordId;
pub type TemplateId = RecordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloorType {
    #[default]
    Aboveground,
    Underground,
}

impl FloorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FloorType::Aboveground => "aboveground",
            FloorType::Underground => "underground",
        }
    }
}

impl fmt::Display for FloorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FloorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aboveground" | "above" => Ok(FloorType::Aboveground),
            "underground" | "below" => Ok(FloorType::Underground),
            other => Err(format!("unknown floor type '{other}'")),
        }
    }
}

/// One storey of the building. `position` orders floors physically; higher is higher up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Floor {
    pub id: FloorId,
    pub label: String,
    pub position: i32,
    /// Weak reference: the template may have been deleted since.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub floor_type: FloorType,
}

/// Fields for a floor that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFloor {
    pub label: String,
    pub position: i32,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub floor_type: FloorType,
}

/// Partial update of a floor. `template_id: Some(None)` clears the template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloorPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub template_id: Option<Option<TemplateId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_type: Option<FloorType>,
}

// Distinguishes an explicit `null` (clear) from an absent field (keep).
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl FloorPatch {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.template_id.is_none() && self.floor_type.is_none()
    }

    pub fn apply_to(&self, floor: &mut Floor) {
        if let Some(label) = &self.label {
            floor.label = label.clone();
        }
        if let Some(template_id) = self.template_id {
            floor.template_id = template_id;
        }
        if let Some(floor_type) = self.floor_type {
            floor.floor_type = floor_type;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorPlateTemplate {
    pub id: TemplateId,
    pub name: String,
    /// Gross floor area in square feet.
    pub gross_area: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFloorPlateTemplate {
    pub name: String,
    pub gross_area: f64,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub length: Option<f64>,
}

impl NewFloorPlateTemplate {
    pub fn new(name: impl Into<String>, gross_area: f64) -> Self {
        Self {
            name: name.into(),
            gross_area,
            width: None,
            length: None,
        }
    }

    pub fn with_dimensions(mut self, width: f64, length: f64) -> Self {
        self.width = Some(width);
        self.length = Some(length);
        self
    }
}

/// Looks up the template a floor points at. Unresolved references yield `None`.
pub fn resolve_template<'a>(
    floor: &Floor,
    templates: &'a [FloorPlateTemplate],
) -> Option<&'a FloorPlateTemplate> {
    let template_id = floor.template_id?;
    templates.iter().find(|template| template.id == template_id)
}

pub fn next_position(floors: &[Floor]) -> i32 {
    floors
        .iter()
        .map(|floor| floor.position)
        .max()
        .map(|max| max + 1)
        .unwrap_or(1)
}
