use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::allocation::AllocationTable;
use crate::catalog::{NonRentableAllocation, Product, UnitType, UnitTypeId};
use crate::floor::{Floor, FloorId, FloorPlateTemplate, resolve_template};

/// Warning thresholds for [`BuildingSummary::calculate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryThresholds {
    /// Floors allocated above 0% but below this percentage are underutilized.
    pub underutilized_below_pct: f64,
    /// A unit type holding more than this share of all units is flagged.
    pub excessive_unit_share_pct: f64,
}

impl SummaryThresholds {
    pub fn standard() -> Self {
        Self {
            underutilized_below_pct: 70.0,
            excessive_unit_share_pct: 30.0,
        }
    }

    pub fn lenient() -> Self {
        Self {
            underutilized_below_pct: 50.0,
            excessive_unit_share_pct: 60.0,
        }
    }

    pub fn from_preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::standard()),
            "lenient" => Some(Self::lenient()),
            _ => None,
        }
    }
}

impl Default for SummaryThresholds {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Overallocated,
    Underutilized,
    ExcessiveUnits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub floor_ids: Vec<FloorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateUsage {
    pub name: String,
    pub floor_count: usize,
    pub total_area: f64,
    /// Share of the total building area.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorUtilization {
    pub floor_id: FloorId,
    pub label: String,
    /// `None` when the floor's template does not resolve.
    pub gross_area: Option<f64>,
    pub allocated_area: f64,
    pub unit_count: u64,
    pub allocation_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingSummary {
    pub total_floors: usize,
    pub total_building_area: f64,
    pub total_allocated_area: f64,
    pub allocation_percentage: f64,
    pub total_units: u64,
    /// Filled in by [`BuildingSummary::with_non_rentable`]; zero otherwise.
    pub total_non_rentable_area: f64,
    /// Unit type name -> allocated unit count. Unallocated types are absent.
    pub unit_type_breakdown: BTreeMap<String, u64>,
    /// Template name -> number of floors using it.
    pub floor_template_breakdown: BTreeMap<String, usize>,
    /// Template usage ordered by area, largest first.
    pub template_usage: Vec<TemplateUsage>,
    pub floors: Vec<FloorUtilization>,
    pub warnings: Vec<Warning>,
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole * 100.0 } else { 0.0 }
}

impl BuildingSummary {
    /// Folds the floor stack and allocation matrix into aggregate statistics.
    ///
    /// Unresolved template or unit type references contribute nothing; this never fails.
    pub fn calculate(
        floors: &[Floor],
        templates: &[FloorPlateTemplate],
        products: &[Product],
        allocations: &AllocationTable,
        thresholds: &SummaryThresholds,
    ) -> Self {
        let unit_types: HashMap<UnitTypeId, &UnitType> = products
            .iter()
            .flat_map(|product| product.unit_types.iter())
            .map(|unit_type| (unit_type.id, unit_type))
            .collect();

        let mut summary = BuildingSummary {
            total_floors: floors.len(),
            ..Default::default()
        };
        let mut usage: BTreeMap<String, (usize, f64)> = BTreeMap::new();

        for floor in floors {
            let template = resolve_template(floor, templates);
            if let Some(template) = template {
                summary.total_building_area += template.gross_area;
                let entry = usage.entry(template.name.clone()).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += template.gross_area;
            }

            let mut floor_area = 0.0;
            let mut floor_units = 0u64;
            for (unit_type_id, quantity) in allocations.row(floor.id) {
                let Some(unit_type) = unit_types.get(&unit_type_id) else {
                    continue;
                };
                let quantity = u64::from(quantity);
                floor_area += quantity as f64 * unit_type.gross_area;
                floor_units += quantity;
                *summary
                    .unit_type_breakdown
                    .entry(unit_type.unit_type.clone())
                    .or_insert(0) += quantity;
            }

            summary.total_allocated_area += floor_area;
            summary.total_units += floor_units;
            let gross_area = template.map(|template| template.gross_area);
            summary.floors.push(FloorUtilization {
                floor_id: floor.id,
                label: floor.label.clone(),
                gross_area,
                allocated_area: floor_area,
                unit_count: floor_units,
                allocation_percentage: percentage(floor_area, gross_area.unwrap_or(0.0)),
            });
        }

        summary.allocation_percentage =
            percentage(summary.total_allocated_area, summary.total_building_area);

        for (name, (floor_count, total_area)) in usage {
            summary
                .floor_template_breakdown
                .insert(name.clone(), floor_count);
            summary.template_usage.push(TemplateUsage {
                name,
                floor_count,
                total_area,
                percentage: percentage(total_area, summary.total_building_area),
            });
        }
        summary
            .template_usage
            .sort_by(|a, b| b.total_area.total_cmp(&a.total_area));

        summary.warnings = summary.collect_warnings(thresholds);
        summary
    }

    fn collect_warnings(&self, thresholds: &SummaryThresholds) -> Vec<Warning> {
        let mut warnings = Vec::new();

        let overallocated: Vec<FloorId> = self
            .floors
            .iter()
            .filter(|floor| floor.allocation_percentage > 100.0)
            .map(|floor| floor.floor_id)
            .collect();
        if !overallocated.is_empty() {
            warnings.push(Warning {
                kind: WarningKind::Overallocated,
                severity: Severity::Error,
                message: format!(
                    "{} floor(s) have more unit area allocated than their floor plate",
                    overallocated.len()
                ),
                floor_ids: overallocated,
                unit_type: None,
            });
        }

        let underutilized: Vec<FloorId> = self
            .floors
            .iter()
            .filter(|floor| {
                floor.allocation_percentage > 0.0
                    && floor.allocation_percentage < thresholds.underutilized_below_pct
            })
            .map(|floor| floor.floor_id)
            .collect();
        if !underutilized.is_empty() {
            warnings.push(Warning {
                kind: WarningKind::Underutilized,
                severity: Severity::Warning,
                message: format!(
                    "{} floor(s) are less than {}% allocated",
                    underutilized.len(),
                    thresholds.underutilized_below_pct
                ),
                floor_ids: underutilized,
                unit_type: None,
            });
        }

        if self.total_units > 0 {
            for (name, count) in &self.unit_type_breakdown {
                let share = percentage(*count as f64, self.total_units as f64);
                if share > thresholds.excessive_unit_share_pct {
                    warnings.push(Warning {
                        kind: WarningKind::ExcessiveUnits,
                        severity: Severity::Warning,
                        message: format!(
                            "unit type '{name}' makes up {share:.1}% of all units (limit {}%)",
                            thresholds.excessive_unit_share_pct
                        ),
                        floor_ids: Vec::new(),
                        unit_type: Some(name.clone()),
                    });
                }
            }
        }

        warnings
    }

    /// Adds non-rentable square footage on floors that are part of this summary.
    pub fn with_non_rentable(mut self, allocations: &[NonRentableAllocation]) -> Self {
        self.total_non_rentable_area = allocations
            .iter()
            .filter(|allocation| self.floor(allocation.floor_id).is_some())
            .map(|allocation| allocation.square_footage)
            .sum();
        self
    }

    pub fn floor(&self, floor_id: FloorId) -> Option<&FloorUtilization> {
        self.floors.iter().find(|floor| floor.floor_id == floor_id)
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|warning| warning.kind == kind)
    }

    pub fn to_cli_summary(&self) -> String {
        let mut parts = vec![
            format!("floors={}", self.total_floors),
            format!("area={:.0}", self.total_building_area),
            format!("allocated={:.0}", self.total_allocated_area),
            format!("pct={:.1}", self.allocation_percentage),
            format!("units={}", self.total_units),
        ];
        if !self.warnings.is_empty() {
            parts.push(format!("warnings={}", self.warnings.len()));
        }
        parts.join(", ")
    }
}
