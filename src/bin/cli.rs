use std::io::{self, BufRead, Write};
use std::sync::Arc;

use massing_tool::allocation::AllocationKey;
use massing_tool::catalog::{NewNonRentableType, NewUnitType};
use massing_tool::config::{EngineConfig, RuntimeSettings};
use massing_tool::floor::{FloorPatch, FloorType, NewFloorPlateTemplate};
use massing_tool::metadata::MetadataUpdate;
use massing_tool::table::{allocation_matrix, floors_frame, render_text_table, template_usage_frame};
use massing_tool::{NotificationLevel, NotificationLog, NotificationSink, Project};
use tracing_subscriber::EnvFilter;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn print_help() {
    println!("Commands:");
    println!("  help                                   Show this help");
    println!("  show                                   Show the floor stack");
    println!("  templates                              List floor plate templates");
    println!("  template add <name> <area> [w l]       Add a floor plate template");
    println!("  template update <id> <name> <area>     Replace a template");
    println!("  template rm <id>                       Delete a template");
    println!("  floor add <label> [template] [type]    Add a floor on top (type: aboveground|underground)");
    println!("  floor label <id> <label>               Rename a floor");
    println!("  floor template <id> <template|none>    Change a floor's template");
    println!("  floor type <id> <type>                 Change a floor's type");
    println!("  floor rm <id>                          Delete a floor and its allocations");
    println!("  products                               List products and unit types");
    println!("  product add <name>                     Add a product");
    println!("  product rename <id> <name>             Rename a product");
    println!("  product rm <id>                        Delete a product and its unit types");
    println!("  unit add <product> <name> <area>       Add a unit type");
    println!("  unit update <id> <name> <area>         Replace a unit type");
    println!("  unit rm <id>                           Delete a unit type");
    println!("  alloc <floor> <unit> <qty>             Set a unit allocation (0 removes it)");
    println!("  bulk <floor>:<unit>=<qty> ...          Save several allocations at once");
    println!("  matrix                                 Show the allocation matrix");
    println!("  nr add <name> specific                 Add a manually allocated non-rentable type");
    println!("  nr add <name> uniform <sqft>           Add a type spread evenly over all floors");
    println!("  nr add <name> percent <pct>            Add a type taking a share of each floor");
    println!("  nr rm <id>                             Delete a non-rentable type");
    println!("  nr set <floor> <type> <sqft>           Set non-rentable space on a floor");
    println!("  nr list                                List non-rentable types and allocations");
    println!("  reconcile                              Recompute policy-driven non-rentable space");
    println!("  summary                                Building summary and warnings");
    println!("  usage                                  Template usage");
    println!("  far                                    FAR metrics");
    println!("  space                                  Space allocation per floor");
    println!("  meta <section> <field> <value>         Update project details");
    println!("  quit | exit                            Leave");
}

fn arg<'a>(parts: &[&'a str], idx: usize, name: &str) -> Result<&'a str, String> {
    parts
        .get(idx)
        .copied()
        .ok_or_else(|| format!("missing <{name}>"))
}

fn num<T: std::str::FromStr>(parts: &[&str], idx: usize, name: &str) -> Result<T, String> {
    let raw = arg(parts, idx, name)?;
    raw.parse()
        .map_err(|_| format!("invalid <{name}> '{raw}'"))
}

fn print_notifications(log: &NotificationLog) {
    for notification in log.drain() {
        let tag = match notification.level {
            NotificationLevel::Success => "ok",
            NotificationLevel::Info => "info",
            NotificationLevel::Error => "error",
        };
        println!("[{tag}] {}", notification.message);
    }
}

async fn run_command(project: &Project, parts: &[&str]) -> CommandResult {
    match parts {
        ["show"] => println!(
            "{}",
            render_text_table(&floors_frame(&project.floors(), &project.templates())?)
        ),
        ["templates"] => {
            for t in project.templates() {
                println!("{}\t{}\t{:.0}", t.id, t.name, t.gross_area);
            }
        }
        ["template", "add", ..] => {
            let mut template = NewFloorPlateTemplate::new(
                arg(parts, 2, "name")?,
                num(parts, 3, "area")?,
            );
            if parts.len() >= 6 {
                template = template.with_dimensions(num(parts, 4, "w")?, num(parts, 5, "l")?);
            }
            let template = project.add_template(template).await?;
            println!("template {} added", template.id);
        }
        ["template", "update", ..] => {
            let template =
                NewFloorPlateTemplate::new(arg(parts, 3, "name")?, num(parts, 4, "area")?);
            project.update_template(num(parts, 2, "id")?, template).await?;
        }
        ["template", "rm", ..] => project.delete_template(num(parts, 2, "id")?).await?,
        ["floor", "add", ..] => {
            let template_id = match parts.get(3) {
                Some(&"none") | None => None,
                Some(_) => Some(num(parts, 3, "template")?),
            };
            let floor_type = match parts.get(4) {
                Some(raw) => raw.parse::<FloorType>()?,
                None => FloorType::default(),
            };
            let floor = project
                .add_floor(arg(parts, 2, "label")?, template_id, floor_type)
                .await?;
            println!("floor {} added at position {}", floor.id, floor.position);
        }
        ["floor", "label", ..] => {
            let patch = FloorPatch {
                label: Some(arg(parts, 3, "label")?.to_string()),
                ..Default::default()
            };
            project.update_floor(num(parts, 2, "id")?, patch).await?;
        }
        ["floor", "template", ..] => {
            let template_id = match arg(parts, 3, "template")? {
                "none" => None,
                _ => Some(num(parts, 3, "template")?),
            };
            let patch = FloorPatch {
                template_id: Some(template_id),
                ..Default::default()
            };
            project.update_floor(num(parts, 2, "id")?, patch).await?;
        }
        ["floor", "type", ..] => {
            let patch = FloorPatch {
                floor_type: Some(arg(parts, 3, "type")?.parse::<FloorType>()?),
                ..Default::default()
            };
            project.update_floor(num(parts, 2, "id")?, patch).await?;
        }
        ["floor", "rm", ..] => project.delete_floor(num(parts, 2, "id")?).await?,
        ["products"] => {
            for product in project.products() {
                println!("{}\t{}", product.id, product.name);
                for unit in &product.unit_types {
                    println!("  {}\t{}\t{:.0}", unit.id, unit.unit_type, unit.gross_area);
                }
            }
        }
        ["product", "add", ..] => {
            let product = project.add_product(arg(parts, 2, "name")?).await?;
            println!("product {} added", product.id);
        }
        ["product", "rename", ..] => {
            project
                .rename_product(num(parts, 2, "id")?, arg(parts, 3, "name")?)
                .await?;
        }
        ["product", "rm", ..] => project.delete_product(num(parts, 2, "id")?).await?,
        ["unit", "add", ..] => {
            let unit = NewUnitType::new(arg(parts, 3, "name")?, num(parts, 4, "area")?);
            let unit = project.add_unit_type(num(parts, 2, "product")?, unit).await?;
            println!("unit type {} added", unit.id);
        }
        ["unit", "update", ..] => {
            let unit = NewUnitType::new(arg(parts, 3, "name")?, num(parts, 4, "area")?);
            project.update_unit_type(num(parts, 2, "id")?, unit).await?;
        }
        ["unit", "rm", ..] => project.delete_unit_type(num(parts, 2, "id")?).await?,
        ["alloc", ..] => {
            let quantity: i64 = num(parts, 3, "qty")?;
            let quantity = u32::try_from(quantity.max(0))?;
            project
                .update_unit_allocation(num(parts, 1, "floor")?, num(parts, 2, "unit")?, quantity)
                .await?;
        }
        ["bulk", entries @ ..] => {
            let mut desired: Vec<(AllocationKey, u32)> = Vec::with_capacity(entries.len());
            for entry in entries {
                let (key, qty) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("expected <floor>:<unit>=<qty>, got '{entry}'"))?;
                let (floor, unit) = key
                    .split_once(':')
                    .ok_or_else(|| format!("expected <floor>:<unit>=<qty>, got '{entry}'"))?;
                desired.push((AllocationKey::new(floor.parse()?, unit.parse()?), qty.parse()?));
            }
            let report = project.save_all_allocations(desired).await;
            println!(
                "saved {} allocation(s), {} failed",
                report.applied.len(),
                report.failures.len()
            );
        }
        ["matrix"] => println!(
            "{}",
            render_text_table(&allocation_matrix(
                &project.floors(),
                &project.products(),
                &project.allocation_table(),
            )?)
        ),
        ["nr", "add", name, "specific"] => {
            let kind = project
                .add_non_rentable_type(NewNonRentableType::specific(*name))
                .await?;
            println!("non-rentable type {} added", kind.id);
        }
        ["nr", "add", name, "uniform", ..] => {
            let kind = NewNonRentableType::uniform(*name, num(parts, 4, "sqft")?);
            let kind = project.add_non_rentable_type(kind).await?;
            println!("non-rentable type {} added", kind.id);
        }
        ["nr", "add", name, "percent", ..] => {
            let kind = NewNonRentableType::percentage(*name, num(parts, 4, "pct")?);
            let kind = project.add_non_rentable_type(kind).await?;
            println!("non-rentable type {} added", kind.id);
        }
        ["nr", "rm", ..] => project.delete_non_rentable_type(num(parts, 2, "id")?).await?,
        ["nr", "set", ..] => {
            project
                .set_non_rentable_allocation(
                    num(parts, 2, "floor")?,
                    num(parts, 3, "type")?,
                    num(parts, 4, "sqft")?,
                )
                .await?;
        }
        ["nr", "list"] => {
            for kind in project.non_rentable_types() {
                println!("{}\t{}\t{}", kind.id, kind.name, kind.allocation_method);
            }
            for a in project.non_rentable_allocations() {
                println!(
                    "  floor {} type {}: {:.2} sqft",
                    a.floor_id, a.non_rentable_type_id, a.square_footage
                );
            }
        }
        ["reconcile"] => match project.reconcile_non_rentable().await {
            Some(report) => println!(
                "planned {}, updated {}, failed {}",
                report.planned,
                report.touched.len(),
                report.failures.len()
            ),
            None => println!("reconciliation already running"),
        },
        ["summary"] => {
            let summary = project.summary();
            println!("{}", summary.to_cli_summary());
            for warning in &summary.warnings {
                println!("warning: {}", warning.message);
            }
        }
        ["usage"] => println!(
            "{}",
            render_text_table(&template_usage_frame(&project.summary())?)
        ),
        ["far"] => {
            let far = project.far_metrics();
            println!(
                "buildable={:.0} above_ground={:.0} far={:.2} utilization={:.1}% remaining={:.0}",
                far.buildable_area,
                far.above_ground_area,
                far.actual_far,
                far.far_utilization_pct,
                far.remaining_buildable_area
            );
        }
        ["space"] => {
            let space = project.space_allocation();
            for floor in &space.floors {
                println!(
                    "{}\tgross={:.0} units={:.0} non_rentable={:.0} unallocated={:.1}%",
                    floor.label,
                    floor.space.gross_area,
                    floor.space.unit_area,
                    floor.space.non_rentable_area,
                    floor.space.unallocated_pct
                );
            }
        }
        ["meta", section, field, value @ ..] => {
            let update = MetadataUpdate::parse(section, field, &value.join(" "))?;
            project.update_metadata(update).await?;
        }
        _ => println!("Unknown command. Type 'help' for a list of commands."),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("massing_tool=info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = EngineConfig::from_env()?;
    let settings = RuntimeSettings::from_env()?;
    let log = Arc::new(NotificationLog::new());
    let sink: Arc<dyn NotificationSink> = log.clone();
    let project = Project::open(&settings, config, sink).await?;

    println!("massing-tool CLI (project {})", project.id());
    println!("Type 'help' for a list of commands.");
    print_notifications(&log);

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] => continue,
            ["help"] => print_help(),
            ["quit"] | ["exit"] => break,
            _ => {
                if let Err(err) = run_command(&project, &parts).await {
                    println!("Error: {err}");
                }
            }
        }
        print_notifications(&log);
    }

    project.close();
    Ok(())
}
