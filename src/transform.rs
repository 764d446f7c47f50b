//! Mapping between remote record shapes and in-memory domain types.
//!
//! Remote rows use the store's column names (`floor_plate_template_id`,
//! `unit_type` as `name`, ...); numeric columns may arrive as JSON numbers or
//! as decimal strings. Nothing here performs I/O.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::allocation::UnitAllocation;
use crate::catalog::{
    AllocationMethod, NewNonRentableType, NewUnitType, NonRentableAllocation, NonRentableType,
    Product, ProductId, UnitType,
};
use crate::floor::{Floor, FloorPatch, FloorPlateTemplate, FloorType, NewFloor, NewFloorPlateTemplate};
use crate::metadata::{Financing, ProjectMetadata};
use crate::remote::{ProjectId, Record, RecordId, Table};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("{table} record is missing column '{column}'")]
    MissingColumn { table: Table, column: &'static str },
    #[error("{table} record has invalid column '{column}': {message}")]
    InvalidColumn {
        table: Table,
        column: &'static str,
        message: String,
    },
}

pub type TransformResult<T> = Result<T, TransformError>;

struct Row<'a> {
    table: Table,
    record: &'a Record,
}

impl<'a> Row<'a> {
    fn new(table: Table, record: &'a Record) -> Self {
        Self { table, record }
    }

    fn present(&self, column: &'static str) -> Option<&'a Value> {
        self.record.get(column).filter(|value| !value.is_null())
    }

    fn invalid(&self, column: &'static str, message: impl Into<String>) -> TransformError {
        TransformError::InvalidColumn {
            table: self.table,
            column,
            message: message.into(),
        }
    }

    fn id(&self, column: &'static str) -> TransformResult<RecordId> {
        self.opt_id(column)?.ok_or(TransformError::MissingColumn {
            table: self.table,
            column,
        })
    }

    fn opt_id(&self, column: &'static str) -> TransformResult<Option<RecordId>> {
        match self.present(column) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.invalid(column, format!("expected integer id, got {n}"))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<RecordId>()
                .map(Some)
                .map_err(|err| self.invalid(column, err.to_string())),
            Some(other) => Err(self.invalid(column, format!("expected integer id, got {other}"))),
        }
    }

    fn string(&self, column: &'static str) -> TransformResult<String> {
        match self.present(column) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.invalid(column, format!("expected string, got {other}"))),
            None => Err(TransformError::MissingColumn {
                table: self.table,
                column,
            }),
        }
    }

    fn string_or_default(&self, column: &'static str) -> TransformResult<String> {
        match self.present(column) {
            None => Ok(String::new()),
            Some(_) => self.string(column),
        }
    }

    fn opt_f64(&self, column: &'static str) -> TransformResult<Option<f64>> {
        match self.present(column) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(column, "number out of range")),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|err| self.invalid(column, err.to_string())),
            Some(other) => Err(self.invalid(column, format!("expected number, got {other}"))),
        }
    }

    fn f64_or_zero(&self, column: &'static str) -> TransformResult<f64> {
        Ok(self.opt_f64(column)?.unwrap_or(0.0))
    }

    fn u32_or_zero(&self, column: &'static str) -> TransformResult<u32> {
        let value = self.f64_or_zero(column)?;
        if value < 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
            return Err(self.invalid(column, format!("expected non-negative integer, got {value}")));
        }
        Ok(value as u32)
    }

    fn i32_or(&self, column: &'static str, fallback: i32) -> TransformResult<i32> {
        match self.opt_f64(column)? {
            None => Ok(fallback),
            Some(value)
                if value.fract() == 0.0
                    && value >= f64::from(i32::MIN)
                    && value <= f64::from(i32::MAX) =>
            {
                Ok(value as i32)
            }
            Some(value) => Err(self.invalid(column, format!("expected 32-bit integer, got {value}"))),
        }
    }

    fn bool_or_false(&self, column: &'static str) -> TransformResult<bool> {
        match self.present(column) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => Ok(matches!(s.trim(), "true" | "t" | "1")),
            Some(other) => Err(self.invalid(column, format!("expected boolean, got {other}"))),
        }
    }
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

pub fn floor_from_record(record: &Record) -> TransformResult<Floor> {
    let row = Row::new(Table::Floors, record);
    let floor_type = match row.present("floor_type") {
        None => FloorType::default(),
        Some(_) => row
            .string("floor_type")?
            .parse()
            .map_err(|err: String| row.invalid("floor_type", err))?,
    };
    Ok(Floor {
        id: row.id("id")?,
        label: row.string_or_default("name")?,
        position: row.i32_or("position", 0)?,
        template_id: row.opt_id("floor_plate_template_id")?,
        floor_type,
    })
}

pub fn new_floor_record(project_id: ProjectId, floor: &NewFloor) -> Record {
    into_record(json!({
        "project_id": project_id,
        "name": floor.label,
        "position": floor.position,
        "floor_plate_template_id": floor.template_id,
        "floor_type": floor.floor_type.as_str(),
    }))
}

pub fn floor_patch_record(patch: &FloorPatch) -> Record {
    let mut record = Record::new();
    if let Some(label) = &patch.label {
        record.insert("name".into(), json!(label));
    }
    if let Some(template_id) = patch.template_id {
        record.insert("floor_plate_template_id".into(), json!(template_id));
    }
    if let Some(floor_type) = patch.floor_type {
        record.insert("floor_type".into(), json!(floor_type.as_str()));
    }
    record
}

pub fn template_from_record(record: &Record) -> TransformResult<FloorPlateTemplate> {
    let row = Row::new(Table::FloorPlateTemplates, record);
    Ok(FloorPlateTemplate {
        id: row.id("id")?,
        name: row.string_or_default("name")?,
        gross_area: row.f64_or_zero("gross_area")?,
        width: row.opt_f64("width")?,
        length: row.opt_f64("length")?,
    })
}

pub fn template_record(project_id: ProjectId, template: &NewFloorPlateTemplate) -> Record {
    into_record(json!({
        "project_id": project_id,
        "name": template.name,
        "gross_area": template.gross_area,
        "width": template.width,
        "length": template.length,
    }))
}

pub fn unit_type_from_record(record: &Record) -> TransformResult<UnitType> {
    let row = Row::new(Table::UnitTypes, record);
    Ok(UnitType {
        id: row.id("id")?,
        product_id: row.id("product_id")?,
        unit_type: row.string_or_default("name")?,
        number_of_units: row.u32_or_zero("number_of_units")?,
        gross_area: row.f64_or_zero("gross_area")?,
        width: row.opt_f64("width")?,
        length: row.opt_f64("length")?,
    })
}

pub fn unit_type_record(project_id: ProjectId, product_id: ProductId, unit: &NewUnitType) -> Record {
    into_record(json!({
        "project_id": project_id,
        "product_id": product_id,
        "name": unit.unit_type,
        "number_of_units": unit.number_of_units,
        "gross_area": unit.gross_area,
        "width": unit.width,
        "length": unit.length,
    }))
}

pub fn product_record(project_id: ProjectId, name: &str) -> Record {
    into_record(json!({ "project_id": project_id, "name": name }))
}

/// Groups unit type rows under their product rows.
///
/// Products keep the order of `product_records`; unit types are ordered by id.
/// Unit types whose product is unknown are dropped.
pub fn products_from_records(
    product_records: &[Record],
    unit_type_records: &[Record],
) -> TransformResult<Vec<Product>> {
    let mut by_product: BTreeMap<ProductId, Vec<UnitType>> = BTreeMap::new();
    for record in unit_type_records {
        let unit_type = unit_type_from_record(record)?;
        by_product
            .entry(unit_type.product_id)
            .or_default()
            .push(unit_type);
    }

    let mut products = Vec::with_capacity(product_records.len());
    for record in product_records {
        let row = Row::new(Table::Products, record);
        let id = row.id("id")?;
        let mut unit_types = by_product.remove(&id).unwrap_or_default();
        unit_types.sort_by_key(|unit_type| unit_type.id);
        products.push(Product {
            id,
            name: row.string_or_default("name")?,
            unit_types,
        });
    }
    Ok(products)
}

pub fn unit_allocation_from_record(record: &Record) -> TransformResult<UnitAllocation> {
    let row = Row::new(Table::UnitAllocations, record);
    Ok(UnitAllocation {
        id: row.id("id")?,
        floor_id: row.id("floor_id")?,
        unit_type_id: row.id("unit_type_id")?,
        quantity: row.u32_or_zero("quantity")?,
    })
}

pub fn unit_allocation_record(
    project_id: ProjectId,
    floor_id: RecordId,
    unit_type_id: RecordId,
    quantity: u32,
) -> Record {
    into_record(json!({
        "project_id": project_id,
        "floor_id": floor_id,
        "unit_type_id": unit_type_id,
        "quantity": quantity,
    }))
}

pub fn unit_allocation_quantity_patch(quantity: u32) -> Record {
    into_record(json!({ "quantity": quantity }))
}

pub fn non_rentable_type_from_record(record: &Record) -> TransformResult<NonRentableType> {
    let row = Row::new(Table::NonRentableTypes, record);
    let allocation_method = match row.present("allocation_method") {
        None => AllocationMethod::default(),
        Some(_) => row
            .string("allocation_method")?
            .parse()
            .map_err(|err: String| row.invalid("allocation_method", err))?,
    };
    Ok(NonRentableType {
        id: row.id("id")?,
        name: row.string_or_default("name")?,
        allocation_method,
        is_percentage_based: row.bool_or_false("is_percentage_based")?,
        percentage: row.opt_f64("percentage")?,
        square_footage: row.f64_or_zero("square_footage")?,
    })
}

pub fn non_rentable_type_record(project_id: ProjectId, kind: &NewNonRentableType) -> Record {
    into_record(json!({
        "project_id": project_id,
        "name": kind.name,
        "allocation_method": kind.allocation_method.as_str(),
        "is_percentage_based": kind.is_percentage_based,
        "percentage": kind.percentage,
        "square_footage": kind.square_footage,
    }))
}

pub fn non_rentable_allocation_from_record(
    record: &Record,
) -> TransformResult<NonRentableAllocation> {
    let row = Row::new(Table::NonRentableAllocations, record);
    Ok(NonRentableAllocation {
        id: row.id("id")?,
        floor_id: row.id("floor_id")?,
        non_rentable_type_id: row.id("non_rentable_type_id")?,
        square_footage: row.f64_or_zero("square_footage")?,
    })
}

pub fn non_rentable_allocation_record(
    project_id: ProjectId,
    floor_id: RecordId,
    non_rentable_type_id: RecordId,
    square_footage: f64,
) -> Record {
    into_record(json!({
        "project_id": project_id,
        "floor_id": floor_id,
        "non_rentable_type_id": non_rentable_type_id,
        "square_footage": square_footage,
    }))
}

pub fn square_footage_patch(square_footage: f64) -> Record {
    into_record(json!({ "square_footage": square_footage }))
}

pub fn metadata_from_record(record: &Record) -> TransformResult<ProjectMetadata> {
    let row = Row::new(Table::Projects, record);
    Ok(ProjectMetadata {
        name: row.string_or_default("name")?,
        land_area: row.f64_or_zero("land_area")?,
        far_allowance: row.f64_or_zero("far_allowance")?,
        financing: Financing {
            loan_to_cost_pct: row.f64_or_zero("loan_to_cost_pct")?,
            interest_rate_pct: row.f64_or_zero("interest_rate_pct")?,
        },
    })
}

pub fn metadata_record(metadata: &ProjectMetadata) -> Record {
    into_record(json!({
        "name": metadata.name,
        "land_area": metadata.land_area,
        "far_allowance": metadata.far_allowance,
        "loan_to_cost_pct": metadata.financing.loan_to_cost_pct,
        "interest_rate_pct": metadata.financing.interest_rate_pct,
    }))
}

/// Maps every record with `map`, failing on the first malformed one.
pub fn collect<T, F>(records: &[Record], map: F) -> TransformResult<Vec<T>>
where
    F: Fn(&Record) -> TransformResult<T>,
{
    records.iter().map(map).collect()
}
