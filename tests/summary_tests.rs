use massing_tool::allocation::{AllocationTable, UnitAllocation};
use massing_tool::calculations::{BuildingSummary, Severity, SummaryThresholds, WarningKind};
use massing_tool::catalog::{NonRentableAllocation, Product, UnitType};
use massing_tool::floor::{Floor, FloorPlateTemplate, FloorType};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

fn template(id: i64, name: &str, gross_area: f64) -> FloorPlateTemplate {
    FloorPlateTemplate {
        id,
        name: name.to_string(),
        gross_area,
        width: None,
        length: None,
    }
}

fn floor(id: i64, position: i32, template_id: Option<i64>) -> Floor {
    Floor {
        id,
        label: format!("L{position}"),
        position,
        template_id,
        floor_type: FloorType::Aboveground,
    }
}

fn unit(id: i64, name: &str, gross_area: f64) -> UnitType {
    UnitType {
        id,
        product_id: 1,
        unit_type: name.to_string(),
        number_of_units: 0,
        gross_area,
        width: None,
        length: None,
    }
}

fn product(unit_types: Vec<UnitType>) -> Vec<Product> {
    vec![Product {
        id: 1,
        name: "Residential".into(),
        unit_types,
    }]
}

fn table(entries: &[(i64, i64, u32)]) -> AllocationTable {
    AllocationTable::from_allocations(entries.iter().enumerate().map(
        |(idx, &(floor_id, unit_type_id, quantity))| UnitAllocation {
            id: 1000 + idx as i64,
            floor_id,
            unit_type_id,
            quantity,
        },
    ))
}

#[test]
fn empty_building_has_zero_totals_and_no_warnings() {
    let summary = BuildingSummary::calculate(
        &[],
        &[],
        &[],
        &AllocationTable::new(),
        &SummaryThresholds::standard(),
    );
    assert_eq!(summary.total_floors, 0);
    assert_eq!(summary.total_building_area, 0.0);
    assert_eq!(summary.total_allocated_area, 0.0);
    assert_eq!(summary.allocation_percentage, 0.0);
    assert!(summary.unit_type_breakdown.is_empty());
    assert!(summary.floor_template_breakdown.is_empty());
    assert!(summary.warnings.is_empty());
}

#[test]
fn overallocated_floor_is_reported_as_error() {
    let floors = vec![floor(1, 1, Some(10))];
    let templates = vec![template(10, "Typical", 1000.0)];
    let products = product(vec![unit(100, "Studio", 100.0)]);
    let summary = BuildingSummary::calculate(
        &floors,
        &templates,
        &products,
        &table(&[(1, 100, 11)]),
        &SummaryThresholds::standard(),
    );

    assert!(approx(summary.allocation_percentage, 110.0));
    let warning = summary
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::Overallocated)
        .expect("overallocated warning");
    assert_eq!(warning.severity, Severity::Error);
    assert_eq!(warning.floor_ids, vec![1]);
}

#[test]
fn overallocated_floors_are_aggregated_into_one_warning() {
    let floors = vec![floor(1, 1, Some(10)), floor(2, 2, Some(10)), floor(3, 3, Some(10))];
    let templates = vec![template(10, "Typical", 1000.0)];
    let products = product(vec![unit(100, "Studio", 600.0)]);
    let summary = BuildingSummary::calculate(
        &floors,
        &templates,
        &products,
        &table(&[(1, 100, 2), (3, 100, 2)]),
        &SummaryThresholds::standard(),
    );

    let overallocated: Vec<_> = summary
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::Overallocated)
        .collect();
    assert_eq!(overallocated.len(), 1);
    assert_eq!(overallocated[0].floor_ids, vec![1, 3]);
}

fn scenario_a(thresholds: SummaryThresholds) -> BuildingSummary {
    let floors = vec![floor(1, 1, Some(10)), floor(2, 2, Some(10)), floor(3, 3, Some(10))];
    let templates = vec![template(10, "Typical", 1000.0)];
    let products = product(vec![unit(100, "1BR", 250.0)]);
    BuildingSummary::calculate(&floors, &templates, &products, &table(&[(1, 100, 2)]), &thresholds)
}

#[test]
fn partially_allocated_floor_is_underutilized_under_standard_thresholds() {
    let summary = scenario_a(SummaryThresholds::standard());

    assert!(approx(summary.total_building_area, 3000.0));
    assert!(approx(summary.total_allocated_area, 500.0));
    assert!((summary.allocation_percentage - 16.7).abs() < 0.05);
    assert!(approx(summary.floor(1).unwrap().allocation_percentage, 50.0));

    let warning = summary
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::Underutilized)
        .expect("underutilized warning");
    assert_eq!(warning.severity, Severity::Warning);
    assert_eq!(warning.floor_ids, vec![1]);
}

#[test]
fn half_allocated_floor_is_not_underutilized_under_lenient_thresholds() {
    let summary = scenario_a(SummaryThresholds::lenient());
    assert!(approx(summary.floor(1).unwrap().allocation_percentage, 50.0));
    assert!(!summary.has_warning(WarningKind::Underutilized));
}

#[test]
fn empty_floors_are_not_underutilized() {
    let summary = scenario_a(SummaryThresholds::standard());
    let warning = summary
        .warnings
        .iter()
        .find(|w| w.kind == WarningKind::Underutilized)
        .unwrap();
    assert!(!warning.floor_ids.contains(&2));
    assert!(!warning.floor_ids.contains(&3));
}

fn mix(a_units: u32, b_units: u32, thresholds: SummaryThresholds) -> BuildingSummary {
    let floors = vec![floor(1, 1, Some(10))];
    let templates = vec![template(10, "Tower", 100_000.0)];
    let products = product(vec![unit(100, "A", 10.0), unit(101, "B", 10.0)]);
    BuildingSummary::calculate(
        &floors,
        &templates,
        &products,
        &table(&[(1, 100, a_units), (1, 101, b_units)]),
        &thresholds,
    )
}

fn excessive(summary: &BuildingSummary) -> Vec<String> {
    summary
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::ExcessiveUnits)
        .filter_map(|w| w.unit_type.clone())
        .collect()
}

#[test]
fn dominant_unit_type_is_flagged_under_standard_thresholds() {
    let summary = mix(70, 30, SummaryThresholds::standard());
    assert_eq!(summary.unit_type_breakdown["A"], 70);
    assert_eq!(summary.unit_type_breakdown["B"], 30);
    // 30% is not strictly above the 30% limit.
    assert_eq!(excessive(&summary), vec!["A".to_string()]);
}

#[test]
fn dominant_unit_type_is_flagged_under_lenient_thresholds() {
    let summary = mix(70, 30, SummaryThresholds::lenient());
    assert_eq!(excessive(&summary), vec!["A".to_string()]);
}

#[test]
fn threshold_variants_disagree_on_moderate_mix() {
    let standard = mix(55, 45, SummaryThresholds::standard());
    assert_eq!(excessive(&standard), vec!["A".to_string(), "B".to_string()]);

    let lenient = mix(55, 45, SummaryThresholds::lenient());
    assert!(excessive(&lenient).is_empty());
}

#[test]
fn unresolved_references_contribute_nothing() {
    let floors = vec![floor(1, 1, Some(10)), floor(2, 2, Some(99)), floor(3, 3, None)];
    let templates = vec![template(10, "Typical", 1000.0)];
    let products = product(vec![unit(100, "Studio", 100.0), unit(101, "Loft", 300.0)]);
    let summary = BuildingSummary::calculate(
        &floors,
        &templates,
        &products,
        &table(&[(1, 100, 2), (1, 555, 4), (2, 100, 1)]),
        &SummaryThresholds::standard(),
    );

    assert_eq!(summary.total_floors, 3);
    assert!(approx(summary.total_building_area, 1000.0));
    // Floor 2's units still count toward allocated area; its own percentage is 0.
    assert!(approx(summary.total_allocated_area, 300.0));
    assert_eq!(summary.floor(2).unwrap().allocation_percentage, 0.0);
    assert_eq!(summary.floor(2).unwrap().gross_area, None);
    assert!(!summary.unit_type_breakdown.contains_key("Loft"));
    assert_eq!(summary.floor_template_breakdown.len(), 1);
    assert_eq!(summary.floor_template_breakdown["Typical"], 1);
}

#[test]
fn template_usage_is_sorted_by_area() {
    let floors = vec![
        floor(1, 1, Some(10)),
        floor(2, 2, Some(11)),
        floor(3, 3, Some(11)),
        floor(4, 4, Some(12)),
    ];
    let templates = vec![
        template(10, "Podium", 3000.0),
        template(11, "Tower", 1000.0),
        template(12, "Crown", 500.0),
    ];
    let summary = BuildingSummary::calculate(
        &floors,
        &templates,
        &[],
        &AllocationTable::new(),
        &SummaryThresholds::standard(),
    );

    let names: Vec<&str> = summary.template_usage.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["Podium", "Tower", "Crown"]);
    assert_eq!(summary.template_usage[1].floor_count, 2);
    assert!(approx(summary.template_usage[0].percentage, 3000.0 / 5500.0 * 100.0));
}

#[test]
fn non_rentable_area_only_counts_known_floors() {
    let floors = vec![floor(1, 1, Some(10))];
    let templates = vec![template(10, "Typical", 1000.0)];
    let summary = BuildingSummary::calculate(
        &floors,
        &templates,
        &[],
        &AllocationTable::new(),
        &SummaryThresholds::standard(),
    )
    .with_non_rentable(&[
        NonRentableAllocation {
            id: 1,
            floor_id: 1,
            non_rentable_type_id: 7,
            square_footage: 120.0,
        },
        NonRentableAllocation {
            id: 2,
            floor_id: 42,
            non_rentable_type_id: 7,
            square_footage: 80.0,
        },
    ]);
    assert!(approx(summary.total_non_rentable_area, 120.0));
}

#[test]
fn threshold_presets_resolve_by_name() {
    assert_eq!(SummaryThresholds::from_preset("Standard"), Some(SummaryThresholds::standard()));
    assert_eq!(SummaryThresholds::from_preset("lenient"), Some(SummaryThresholds::lenient()));
    assert_eq!(SummaryThresholds::from_preset("strict"), None);
    assert_eq!(SummaryThresholds::default(), SummaryThresholds::standard());
}
