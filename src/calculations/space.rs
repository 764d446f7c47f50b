use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::allocation::AllocationTable;
use crate::catalog::{NonRentableAllocation, Product, UnitType, UnitTypeId};
use crate::floor::{Floor, FloorId, FloorPlateTemplate, resolve_template};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceBreakdown {
    pub gross_area: f64,
    pub unit_area: f64,
    pub non_rentable_area: f64,
    /// Gross area less non-rentable area.
    pub rentable_area: f64,
    /// Gross area claimed by neither units nor non-rentable space; negative when overallocated.
    pub unallocated_area: f64,
    pub unit_pct: f64,
    pub non_rentable_pct: f64,
    pub unallocated_pct: f64,
}

impl SpaceBreakdown {
    fn new(gross_area: f64, unit_area: f64, non_rentable_area: f64) -> Self {
        let pct = |part: f64| {
            if gross_area > 0.0 {
                part / gross_area * 100.0
            } else {
                0.0
            }
        };
        let unallocated_area = gross_area - unit_area - non_rentable_area;
        Self {
            gross_area,
            unit_area,
            non_rentable_area,
            rentable_area: gross_area - non_rentable_area,
            unallocated_area,
            unit_pct: pct(unit_area),
            non_rentable_pct: pct(non_rentable_area),
            unallocated_pct: pct(unallocated_area),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorSpace {
    pub floor_id: FloorId,
    pub label: String,
    pub space: SpaceBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceAllocation {
    pub floors: Vec<FloorSpace>,
    pub building: SpaceBreakdown,
}

impl SpaceAllocation {
    /// Splits every floor's gross area into unit, non-rentable and unallocated space.
    ///
    /// Floors with an unresolved template have zero gross area.
    pub fn compute(
        floors: &[Floor],
        templates: &[FloorPlateTemplate],
        products: &[Product],
        allocations: &AllocationTable,
        non_rentable: &[NonRentableAllocation],
    ) -> Self {
        let unit_types: HashMap<UnitTypeId, &UnitType> = products
            .iter()
            .flat_map(|product| product.unit_types.iter())
            .map(|unit_type| (unit_type.id, unit_type))
            .collect();

        let mut totals = (0.0, 0.0, 0.0);
        let mut result = SpaceAllocation::default();
        for floor in floors {
            let gross_area = resolve_template(floor, templates)
                .map(|template| template.gross_area)
                .unwrap_or(0.0);
            let unit_area: f64 = allocations
                .row(floor.id)
                .into_iter()
                .filter_map(|(unit_type_id, quantity)| {
                    unit_types
                        .get(&unit_type_id)
                        .map(|unit_type| f64::from(quantity) * unit_type.gross_area)
                })
                .sum();
            let non_rentable_area: f64 = non_rentable
                .iter()
                .filter(|allocation| allocation.floor_id == floor.id)
                .map(|allocation| allocation.square_footage)
                .sum();

            totals.0 += gross_area;
            totals.1 += unit_area;
            totals.2 += non_rentable_area;
            result.floors.push(FloorSpace {
                floor_id: floor.id,
                label: floor.label.clone(),
                space: SpaceBreakdown::new(gross_area, unit_area, non_rentable_area),
            });
        }
        result.building = SpaceBreakdown::new(totals.0, totals.1, totals.2);
        result
    }
}
