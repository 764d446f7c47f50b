//! Presentation-facing entry point: one loaded project and every operation on it.
//!
//! Mutations go to the remote store first and land in the in-memory state only
//! after they succeed. Each failed mutation emits exactly one error notification;
//! each successful one mirrors a snapshot into local persistence.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::allocation::{AllocationKey, AllocationTable, UnitAllocation};
use crate::calculations::{BuildingSummary, SpaceAllocation};
use crate::catalog::{
    NewNonRentableType, NewUnitType, NonRentableAllocation, NonRentableType, NonRentableTypeId,
    Product, ProductId, UnitType, UnitTypeId,
};
use crate::config::{EngineConfig, RuntimeSettings};
use crate::floor::{
    Floor, FloorId, FloorPatch, FloorPlateTemplate, FloorType, NewFloor, NewFloorPlateTemplate,
    TemplateId, next_position,
};
use crate::metadata::{FarMetrics, MetadataUpdate, ProjectMetadata};
use crate::notify::{Notification, NotificationLevel, NotificationSink};
use crate::persistence::{
    FileStorage, KeyValueStorage, LocalPersistence, MemoryStorage, WriteOutcome,
};
use crate::reconcile::{NonRentableReconciler, ReconcileInputs, ReconcileReport};
use crate::remote::{
    Filter, MemoryRemoteStore, ProjectId, RecordId, RemoteError, RemoteStore, Table, record_id,
};
use crate::store::{
    AllocationChange, AllocationError, AllocationStore, Liveness, NonRentableStore, SaveAllReport,
};
use crate::transform::{self, TransformError};
use crate::validation::{self, ValidationError};

const MAX_RECONCILE_PASSES: usize = 4;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: RecordId },
    #[error("project has been closed")]
    Closed,
}

pub type ProjectResult<T> = Result<T, ProjectError>;

/// Everything needed to rebuild a project without the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub metadata: ProjectMetadata,
    pub floors: Vec<Floor>,
    pub templates: Vec<FloorPlateTemplate>,
    pub products: Vec<Product>,
    pub non_rentable_types: Vec<NonRentableType>,
    pub unit_allocations: Vec<UnitAllocation>,
    pub non_rentable_allocations: Vec<NonRentableAllocation>,
}

#[derive(Debug, Clone, Default)]
struct ProjectState {
    metadata: ProjectMetadata,
    floors: Vec<Floor>,
    templates: Vec<FloorPlateTemplate>,
    products: Vec<Product>,
    non_rentable_types: Vec<NonRentableType>,
}

impl ProjectState {
    fn floor(&self, id: FloorId) -> ProjectResult<&Floor> {
        self.floors
            .iter()
            .find(|floor| floor.id == id)
            .ok_or(ProjectError::NotFound { kind: "floor", id })
    }

    fn product(&self, id: ProductId) -> ProjectResult<&Product> {
        self.products
            .iter()
            .find(|product| product.id == id)
            .ok_or(ProjectError::NotFound { kind: "product", id })
    }

    fn unit_type(&self, id: UnitTypeId) -> ProjectResult<&UnitType> {
        crate::catalog::find_unit_type(&self.products, id)
            .ok_or(ProjectError::NotFound { kind: "unit type", id })
    }

    fn non_rentable_type(&self, id: NonRentableTypeId) -> ProjectResult<&NonRentableType> {
        self.non_rentable_types
            .iter()
            .find(|kind| kind.id == id)
            .ok_or(ProjectError::NotFound {
                kind: "non-rentable type",
                id,
            })
    }

    fn template(&self, id: TemplateId) -> ProjectResult<&FloorPlateTemplate> {
        self.templates
            .iter()
            .find(|template| template.id == id)
            .ok_or(ProjectError::NotFound {
                kind: "floor plate template",
                id,
            })
    }

    fn sort_floors(&mut self) {
        self.floors.sort_by_key(|floor| (floor.position, floor.id));
    }
}

pub fn snapshot_key(project_id: ProjectId) -> String {
    format!("project:{project_id}:snapshot")
}

pub fn draft_key(project_id: ProjectId, name: &str) -> String {
    format!("project:{project_id}:draft:{name}")
}

pub struct Project {
    id: ProjectId,
    remote: Arc<dyn RemoteStore>,
    local: LocalPersistence,
    config: EngineConfig,
    notifications: Arc<dyn NotificationSink>,
    liveness: Liveness,
    offline: AtomicBool,
    state: RwLock<ProjectState>,
    allocations: AllocationStore,
    non_rentable: NonRentableStore,
    reconciler: NonRentableReconciler,
    input_version: AtomicU64,
    recently_updated: RwLock<Vec<RecordId>>,
    /// Held from reading the next position until the new floor is stored.
    floor_adds: tokio::sync::Mutex<()>,
}

impl Project {
    /// Inserts a new project record and returns its id.
    pub async fn create(
        remote: &dyn RemoteStore,
        metadata: &ProjectMetadata,
    ) -> ProjectResult<ProjectId> {
        validation::validate_metadata(metadata)?;
        let stored = remote
            .insert(Table::Projects, transform::metadata_record(metadata))
            .await?;
        let id = record_id(&stored).ok_or(TransformError::MissingColumn {
            table: Table::Projects,
            column: "id",
        })?;
        info!(project_id = id, name = %metadata.name, "project created");
        Ok(id)
    }

    /// Opens the project named by `settings`, creating one when no id is given.
    ///
    /// Uses SQLite with a file-backed local mirror when a database path is set,
    /// in-memory stores otherwise.
    pub async fn open(
        settings: &RuntimeSettings,
        config: EngineConfig,
        notifications: Arc<dyn NotificationSink>,
    ) -> ProjectResult<Self> {
        let remote: Arc<dyn RemoteStore> = match &settings.db_path {
            #[cfg(feature = "sqlite")]
            Some(path) => Arc::new(crate::remote::SqliteRemoteStore::new(path)?),
            _ => Arc::new(MemoryRemoteStore::new()),
        };
        let storage: Arc<dyn KeyValueStorage> = match settings.local_store_path() {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };
        let local = LocalPersistence::new(storage, config.local);
        let id = match settings.project_id {
            Some(id) => id,
            None => Self::create(remote.as_ref(), &ProjectMetadata::default()).await?,
        };
        Self::load(id, remote, local, config, notifications).await
    }

    /// Loads every table of the project. Falls back to the last local snapshot
    /// (and marks the project offline) when the remote store cannot be read.
    pub async fn load(
        id: ProjectId,
        remote: Arc<dyn RemoteStore>,
        local: LocalPersistence,
        config: EngineConfig,
        notifications: Arc<dyn NotificationSink>,
    ) -> ProjectResult<Self> {
        let (snapshot, offline) = match fetch(id, remote.as_ref()).await {
            Ok(snapshot) => (snapshot, false),
            Err(err) => {
                let cached: Option<ProjectSnapshot> = local.safe_read(&snapshot_key(id), None);
                match cached {
                    Some(snapshot) => {
                        warn!(project_id = id, "remote load failed, using local snapshot: {err}");
                        notifications.notify(Notification::new(
                            NotificationLevel::Info,
                            "Working offline from the last saved copy",
                        ));
                        (snapshot, true)
                    }
                    None => {
                        notifications.error(format!("Failed to load project: {err}"));
                        return Err(err);
                    }
                }
            }
        };

        let liveness = Liveness::new();
        let mut state = ProjectState {
            metadata: snapshot.metadata,
            floors: snapshot.floors,
            templates: snapshot.templates,
            products: snapshot.products,
            non_rentable_types: snapshot.non_rentable_types,
        };
        state.sort_floors();
        info!(
            project_id = id,
            floors = state.floors.len(),
            offline,
            "project loaded"
        );

        let project = Self {
            id,
            allocations: AllocationStore::new(
                id,
                Arc::clone(&remote),
                AllocationTable::from_allocations(snapshot.unit_allocations),
                liveness.clone(),
            ),
            non_rentable: NonRentableStore::new(
                id,
                Arc::clone(&remote),
                snapshot.non_rentable_allocations,
                liveness.clone(),
            ),
            reconciler: NonRentableReconciler::new(config.reconcile_tolerance),
            remote,
            local,
            config,
            notifications,
            liveness,
            offline: AtomicBool::new(offline),
            state: RwLock::new(state),
            input_version: AtomicU64::new(0),
            recently_updated: RwLock::new(Vec::new()),
            floor_adds: tokio::sync::Mutex::new(()),
        };
        if project.config.auto_reconcile && !offline {
            project.reconcile_non_rentable().await;
        }
        Ok(project)
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        !self.liveness.is_alive()
    }

    pub fn metadata(&self) -> ProjectMetadata {
        self.state.read().metadata.clone()
    }

    /// Floors ordered by position, lowest first.
    pub fn floors(&self) -> Vec<Floor> {
        self.state.read().floors.clone()
    }

    pub fn floor(&self, id: FloorId) -> Option<Floor> {
        self.state.read().floor(id).ok().cloned()
    }

    pub fn templates(&self) -> Vec<FloorPlateTemplate> {
        self.state.read().templates.clone()
    }

    pub fn products(&self) -> Vec<Product> {
        self.state.read().products.clone()
    }

    pub fn non_rentable_types(&self) -> Vec<NonRentableType> {
        self.state.read().non_rentable_types.clone()
    }

    pub fn non_rentable_allocations(&self) -> Vec<NonRentableAllocation> {
        self.non_rentable.allocations()
    }

    pub fn allocation_table(&self) -> AllocationTable {
        self.allocations.snapshot()
    }

    /// Allocation ids written by the latest reconciliation.
    pub fn recently_updated(&self) -> Vec<RecordId> {
        self.recently_updated.read().clone()
    }

    pub fn input_version(&self) -> u64 {
        self.input_version.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        let state = self.state.read().clone();
        ProjectSnapshot {
            metadata: state.metadata,
            floors: state.floors,
            templates: state.templates,
            products: state.products,
            non_rentable_types: state.non_rentable_types,
            unit_allocations: self.allocations.allocations(),
            non_rentable_allocations: self.non_rentable.allocations(),
        }
    }

    pub fn summary(&self) -> BuildingSummary {
        let state = self.state.read();
        BuildingSummary::calculate(
            &state.floors,
            &state.templates,
            &state.products,
            &self.allocations.snapshot(),
            &self.config.summary,
        )
        .with_non_rentable(&self.non_rentable.allocations())
    }

    pub fn far_metrics(&self) -> FarMetrics {
        let state = self.state.read();
        FarMetrics::compute(&state.metadata, &state.floors, &state.templates)
    }

    pub fn space_allocation(&self) -> SpaceAllocation {
        let state = self.state.read();
        SpaceAllocation::compute(
            &state.floors,
            &state.templates,
            &state.products,
            &self.allocations.snapshot(),
            &self.non_rentable.allocations(),
        )
    }

    // ---- floors ----

    pub async fn add_floor(
        &self,
        label: &str,
        template_id: Option<TemplateId>,
        floor_type: FloorType,
    ) -> ProjectResult<Floor> {
        let result = self.add_floor_inner(label, template_id, floor_type).await;
        self.finish("add floor", result, true).await
    }

    async fn add_floor_inner(
        &self,
        label: &str,
        template_id: Option<TemplateId>,
        floor_type: FloorType,
    ) -> ProjectResult<Floor> {
        self.ensure_open()?;
        validation::validate_floor_label(label)?;
        let _adding = self.floor_adds.lock().await;
        let new_floor = NewFloor {
            label: label.trim().to_string(),
            position: next_position(&self.state.read().floors),
            template_id,
            floor_type,
        };
        let stored = self
            .remote
            .insert(Table::Floors, transform::new_floor_record(self.id, &new_floor))
            .await?;
        let floor = transform::floor_from_record(&stored)?;
        self.with_state(|state| {
            state.floors.push(floor.clone());
            state.sort_floors();
        });
        Ok(floor)
    }

    pub async fn update_floor(&self, id: FloorId, patch: FloorPatch) -> ProjectResult<Floor> {
        let result = self.update_floor_inner(id, patch).await;
        self.finish("update floor", result, true).await
    }

    async fn update_floor_inner(&self, id: FloorId, patch: FloorPatch) -> ProjectResult<Floor> {
        self.ensure_open()?;
        validation::validate_floor_patch(&patch)?;
        let mut floor = self.state.read().floor(id)?.clone();
        self.remote
            .update(Table::Floors, id, transform::floor_patch_record(&patch))
            .await?;
        patch.apply_to(&mut floor);
        self.with_state(|state| {
            if let Some(existing) = state.floors.iter_mut().find(|f| f.id == id) {
                *existing = floor.clone();
            }
        });
        Ok(floor)
    }

    /// Deletes the floor after removing its unit and non-rentable allocations.
    pub async fn delete_floor(&self, id: FloorId) -> ProjectResult<()> {
        let result = self.delete_floor_inner(id).await;
        self.finish("delete floor", result, true).await
    }

    async fn delete_floor_inner(&self, id: FloorId) -> ProjectResult<()> {
        self.ensure_open()?;
        self.state.read().floor(id)?;
        let units = self.allocations.remove_floor(id).await?;
        let non_rentable = self.non_rentable.remove_floor(id).await?;
        self.remote.delete(Table::Floors, id).await?;
        self.with_state(|state| state.floors.retain(|floor| floor.id != id));
        debug!(floor_id = id, units, non_rentable, "floor deleted with its allocations");
        Ok(())
    }

    // ---- templates ----

    pub async fn add_template(
        &self,
        template: NewFloorPlateTemplate,
    ) -> ProjectResult<FloorPlateTemplate> {
        let result = self.add_template_inner(template).await;
        self.finish("add floor plate template", result, true).await
    }

    async fn add_template_inner(
        &self,
        template: NewFloorPlateTemplate,
    ) -> ProjectResult<FloorPlateTemplate> {
        self.ensure_open()?;
        validation::validate_template(&template)?;
        let stored = self
            .remote
            .insert(
                Table::FloorPlateTemplates,
                transform::template_record(self.id, &template),
            )
            .await?;
        let template = transform::template_from_record(&stored)?;
        self.with_state(|state| state.templates.push(template.clone()));
        Ok(template)
    }

    pub async fn update_template(
        &self,
        id: TemplateId,
        template: NewFloorPlateTemplate,
    ) -> ProjectResult<FloorPlateTemplate> {
        let result = self.update_template_inner(id, template).await;
        self.finish("update floor plate template", result, true)
            .await
    }

    async fn update_template_inner(
        &self,
        id: TemplateId,
        template: NewFloorPlateTemplate,
    ) -> ProjectResult<FloorPlateTemplate> {
        self.ensure_open()?;
        validation::validate_template(&template)?;
        self.state.read().template(id)?;
        self.remote
            .update(
                Table::FloorPlateTemplates,
                id,
                transform::template_record(self.id, &template),
            )
            .await?;
        let updated = FloorPlateTemplate {
            id,
            name: template.name,
            gross_area: template.gross_area,
            width: template.width,
            length: template.length,
        };
        self.with_state(|state| {
            if let Some(existing) = state.templates.iter_mut().find(|t| t.id == id) {
                *existing = updated.clone();
            }
        });
        Ok(updated)
    }

    /// Floors that used the template keep the now dangling reference.
    pub async fn delete_template(&self, id: TemplateId) -> ProjectResult<()> {
        let result = self.delete_template_inner(id).await;
        self.finish("delete floor plate template", result, true)
            .await
    }

    async fn delete_template_inner(&self, id: TemplateId) -> ProjectResult<()> {
        self.ensure_open()?;
        self.state.read().template(id)?;
        self.remote.delete(Table::FloorPlateTemplates, id).await?;
        self.with_state(|state| state.templates.retain(|t| t.id != id));
        Ok(())
    }

    // ---- products and unit types ----

    pub async fn add_product(&self, name: &str) -> ProjectResult<Product> {
        let result = self.add_product_inner(name).await;
        self.finish("add product", result, false).await
    }

    async fn add_product_inner(&self, name: &str) -> ProjectResult<Product> {
        self.ensure_open()?;
        validation::validate_product_name(name)?;
        let stored = self
            .remote
            .insert(Table::Products, transform::product_record(self.id, name.trim()))
            .await?;
        let product = transform::products_from_records(std::slice::from_ref(&stored), &[])?
            .pop()
            .ok_or(TransformError::MissingColumn {
                table: Table::Products,
                column: "id",
            })?;
        self.with_state(|state| state.products.push(product.clone()));
        Ok(product)
    }

    pub async fn rename_product(&self, id: ProductId, name: &str) -> ProjectResult<Product> {
        let result = self.rename_product_inner(id, name).await;
        self.finish("rename product", result, false).await
    }

    async fn rename_product_inner(&self, id: ProductId, name: &str) -> ProjectResult<Product> {
        self.ensure_open()?;
        validation::validate_product_name(name)?;
        let mut product = self.state.read().product(id)?.clone();
        self.remote
            .update(Table::Products, id, transform::product_record(self.id, name.trim()))
            .await?;
        product.name = name.trim().to_string();
        self.with_state(|state| {
            if let Some(existing) = state.products.iter_mut().find(|p| p.id == id) {
                existing.name = product.name.clone();
            }
        });
        Ok(product)
    }

    /// Deletes the product, its unit types and their allocations.
    pub async fn delete_product(&self, id: ProductId) -> ProjectResult<()> {
        let result = self.delete_product_inner(id).await;
        self.finish("delete product", result, false).await
    }

    async fn delete_product_inner(&self, id: ProductId) -> ProjectResult<()> {
        self.ensure_open()?;
        let product = self.state.read().product(id)?.clone();
        for unit_type in &product.unit_types {
            self.delete_unit_type_inner(unit_type.id).await?;
        }
        self.remote.delete(Table::Products, id).await?;
        self.with_state(|state| state.products.retain(|p| p.id != id));
        Ok(())
    }

    pub async fn add_unit_type(
        &self,
        product_id: ProductId,
        unit_type: NewUnitType,
    ) -> ProjectResult<UnitType> {
        let result = self.add_unit_type_inner(product_id, unit_type).await;
        self.finish("add unit type", result, false).await
    }

    async fn add_unit_type_inner(
        &self,
        product_id: ProductId,
        unit_type: NewUnitType,
    ) -> ProjectResult<UnitType> {
        self.ensure_open()?;
        validation::validate_unit_type(&unit_type)?;
        self.state.read().product(product_id)?;
        let stored = self
            .remote
            .insert(
                Table::UnitTypes,
                transform::unit_type_record(self.id, product_id, &unit_type),
            )
            .await?;
        let unit_type = transform::unit_type_from_record(&stored)?;
        self.with_state(|state| {
            if let Some(product) = state.products.iter_mut().find(|p| p.id == product_id) {
                product.unit_types.push(unit_type.clone());
            }
        });
        Ok(unit_type)
    }

    pub async fn update_unit_type(
        &self,
        id: UnitTypeId,
        unit_type: NewUnitType,
    ) -> ProjectResult<UnitType> {
        let result = self.update_unit_type_inner(id, unit_type).await;
        self.finish("update unit type", result, false).await
    }

    async fn update_unit_type_inner(
        &self,
        id: UnitTypeId,
        unit_type: NewUnitType,
    ) -> ProjectResult<UnitType> {
        self.ensure_open()?;
        validation::validate_unit_type(&unit_type)?;
        let product_id = self.state.read().unit_type(id)?.product_id;
        self.remote
            .update(
                Table::UnitTypes,
                id,
                transform::unit_type_record(self.id, product_id, &unit_type),
            )
            .await?;
        let updated = UnitType {
            id,
            product_id,
            unit_type: unit_type.unit_type,
            number_of_units: unit_type.number_of_units,
            gross_area: unit_type.gross_area,
            width: unit_type.width,
            length: unit_type.length,
        };
        self.with_state(|state| {
            if let Some(existing) = state
                .products
                .iter_mut()
                .flat_map(|p| p.unit_types.iter_mut())
                .find(|u| u.id == id)
            {
                *existing = updated.clone();
            }
        });
        Ok(updated)
    }

    /// Deletes the unit type and every allocation of it.
    pub async fn delete_unit_type(&self, id: UnitTypeId) -> ProjectResult<()> {
        let result = self.delete_unit_type_inner(id).await;
        self.finish("delete unit type", result, false).await
    }

    async fn delete_unit_type_inner(&self, id: UnitTypeId) -> ProjectResult<()> {
        self.ensure_open()?;
        self.state.read().unit_type(id)?;
        self.allocations.remove_unit_type(id).await?;
        self.remote.delete(Table::UnitTypes, id).await?;
        self.with_state(|state| {
            for product in &mut state.products {
                product.unit_types.retain(|u| u.id != id);
            }
        });
        Ok(())
    }

    // ---- non-rentable space ----

    pub async fn add_non_rentable_type(
        &self,
        kind: NewNonRentableType,
    ) -> ProjectResult<NonRentableType> {
        let result = self.add_non_rentable_type_inner(kind).await;
        self.finish("add non-rentable type", result, true).await
    }

    async fn add_non_rentable_type_inner(
        &self,
        kind: NewNonRentableType,
    ) -> ProjectResult<NonRentableType> {
        self.ensure_open()?;
        validation::validate_non_rentable_type(&kind)?;
        let stored = self
            .remote
            .insert(
                Table::NonRentableTypes,
                transform::non_rentable_type_record(self.id, &kind),
            )
            .await?;
        let kind = transform::non_rentable_type_from_record(&stored)?;
        self.with_state(|state| state.non_rentable_types.push(kind.clone()));
        Ok(kind)
    }

    pub async fn update_non_rentable_type(
        &self,
        id: NonRentableTypeId,
        kind: NewNonRentableType,
    ) -> ProjectResult<NonRentableType> {
        let result = self.update_non_rentable_type_inner(id, kind).await;
        self.finish("update non-rentable type", result, true).await
    }

    async fn update_non_rentable_type_inner(
        &self,
        id: NonRentableTypeId,
        kind: NewNonRentableType,
    ) -> ProjectResult<NonRentableType> {
        self.ensure_open()?;
        validation::validate_non_rentable_type(&kind)?;
        self.state.read().non_rentable_type(id)?;
        self.remote
            .update(
                Table::NonRentableTypes,
                id,
                transform::non_rentable_type_record(self.id, &kind),
            )
            .await?;
        let updated = NonRentableType {
            id,
            name: kind.name,
            allocation_method: kind.allocation_method,
            is_percentage_based: kind.is_percentage_based,
            percentage: kind.percentage,
            square_footage: kind.square_footage,
        };
        self.with_state(|state| {
            if let Some(existing) = state.non_rentable_types.iter_mut().find(|k| k.id == id) {
                *existing = updated.clone();
            }
        });
        Ok(updated)
    }

    /// Deletes the type and every allocation of it.
    pub async fn delete_non_rentable_type(&self, id: NonRentableTypeId) -> ProjectResult<()> {
        let result = self.delete_non_rentable_type_inner(id).await;
        self.finish("delete non-rentable type", result, true).await
    }

    async fn delete_non_rentable_type_inner(&self, id: NonRentableTypeId) -> ProjectResult<()> {
        self.ensure_open()?;
        self.state.read().non_rentable_type(id)?;
        self.non_rentable.remove_type(id).await?;
        self.remote.delete(Table::NonRentableTypes, id).await?;
        self.with_state(|state| state.non_rentable_types.retain(|k| k.id != id));
        Ok(())
    }

    /// Adds or updates the square footage of a type on a floor. Must be positive.
    pub async fn set_non_rentable_allocation(
        &self,
        floor_id: FloorId,
        non_rentable_type_id: NonRentableTypeId,
        square_footage: f64,
    ) -> ProjectResult<NonRentableAllocation> {
        let result = self
            .set_non_rentable_allocation_inner(floor_id, non_rentable_type_id, square_footage)
            .await;
        self.finish("save non-rentable allocation", result, true)
            .await
    }

    async fn set_non_rentable_allocation_inner(
        &self,
        floor_id: FloorId,
        non_rentable_type_id: NonRentableTypeId,
        square_footage: f64,
    ) -> ProjectResult<NonRentableAllocation> {
        self.ensure_open()?;
        validation::validate_non_rentable_square_footage(square_footage)?;
        {
            let state = self.state.read();
            state.floor(floor_id)?;
            state.non_rentable_type(non_rentable_type_id)?;
        }
        Ok(self
            .non_rentable
            .upsert(floor_id, non_rentable_type_id, square_footage)
            .await?)
    }

    // ---- unit allocations ----

    /// Cached quantity; zero when the pair has no allocation.
    pub fn unit_allocation(&self, floor_id: FloorId, unit_type_id: UnitTypeId) -> u32 {
        self.allocations.get_unit_allocation(floor_id, unit_type_id)
    }

    pub async fn update_unit_allocation(
        &self,
        floor_id: FloorId,
        unit_type_id: UnitTypeId,
        quantity: u32,
    ) -> ProjectResult<AllocationChange> {
        let result = match self.ensure_open() {
            Ok(()) => self
                .allocations
                .update_unit_allocation(floor_id, unit_type_id, quantity)
                .await
                .map_err(ProjectError::from),
            Err(err) => Err(err),
        };
        self.finish("update unit allocation", result, false).await
    }

    /// Saves every changed entry concurrently; successes are kept on partial failure.
    pub async fn save_all_allocations<I>(&self, desired: I) -> SaveAllReport
    where
        I: IntoIterator<Item = (AllocationKey, u32)>,
    {
        let report = self.allocations.save_all(desired).await;
        if !report.is_complete() {
            self.notifications.error(format!(
                "Failed to save {} of {} allocation(s)",
                report.failures.len(),
                report.failures.len() + report.applied.len()
            ));
        } else if !report.applied.is_empty() {
            self.notifications
                .success(format!("Saved {} allocation(s)", report.applied.len()));
        }
        if !report.applied.is_empty() {
            self.mirror_snapshot();
        }
        report
    }

    // ---- metadata ----

    pub async fn update_metadata(&self, update: MetadataUpdate) -> ProjectResult<ProjectMetadata> {
        let result = self.update_metadata_inner(update).await;
        self.finish("update project details", result, false).await
    }

    async fn update_metadata_inner(&self, update: MetadataUpdate) -> ProjectResult<ProjectMetadata> {
        self.ensure_open()?;
        let mut metadata = self.state.read().metadata.clone();
        metadata.apply(&update)?;
        self.remote
            .update(Table::Projects, self.id, transform::metadata_record(&metadata))
            .await?;
        self.with_state(|state| state.metadata = metadata.clone());
        Ok(metadata)
    }

    // ---- reconciliation ----

    /// Runs reconciliation passes until no input changed during the last one.
    ///
    /// Returns `None` when another pass was already running before the first one.
    /// A later pass blocked by another runner ends the loop with what was done so far.
    pub async fn reconcile_non_rentable(&self) -> Option<ReconcileReport> {
        let mut combined: Option<ReconcileReport> = None;
        for _ in 0..MAX_RECONCILE_PASSES {
            if self.is_closed() {
                break;
            }
            let version = self.input_version();
            let state = self.state.read().clone();
            let allocations = self.non_rentable.allocations();
            let inputs = ReconcileInputs {
                floors: &state.floors,
                templates: &state.templates,
                types: &state.non_rentable_types,
                allocations: &allocations,
            };
            let Some(report) = self
                .reconciler
                .run(&inputs, &self.non_rentable, self.notifications.as_ref())
                .await
            else {
                break;
            };

            if !report.touched.is_empty() {
                *self.recently_updated.write() = report.touched.clone();
                self.mirror_snapshot();
            }
            let total = combined.get_or_insert_with(ReconcileReport::default);
            total.planned += report.planned;
            total.touched.extend(report.touched);
            total.failures.extend(report.failures);

            if self.input_version() == version {
                break;
            }
        }
        combined
    }

    // ---- local drafts ----

    pub fn save_draft<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> WriteOutcome {
        self.local.debounced_write(&draft_key(self.id, name), value)
    }

    pub fn load_draft<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.local.safe_read(&draft_key(self.id, name), None)
    }

    pub fn clear_draft(&self, name: &str) {
        self.local.clear(&draft_key(self.id, name));
    }

    /// Stops applying remote results and writes out pending local state.
    pub fn close(&self) {
        self.liveness.shut_down();
        self.local.flush_all();
        info!(project_id = self.id, "project closed");
    }

    fn ensure_open(&self) -> ProjectResult<()> {
        if self.liveness.is_alive() {
            Ok(())
        } else {
            Err(ProjectError::Closed)
        }
    }

    fn with_state<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ProjectState),
    {
        if self.liveness.is_alive() {
            mutate(&mut *self.state.write());
        }
    }

    fn mirror_snapshot(&self) {
        if self.is_closed() {
            return;
        }
        self.local
            .debounced_write(&snapshot_key(self.id), &self.snapshot());
    }

    async fn finish<T>(
        &self,
        action: &str,
        result: ProjectResult<T>,
        feeds_reconciler: bool,
    ) -> ProjectResult<T> {
        match &result {
            Ok(_) => {
                if feeds_reconciler {
                    self.input_version.fetch_add(1, Ordering::AcqRel);
                }
                self.mirror_snapshot();
                if feeds_reconciler && self.config.auto_reconcile {
                    self.reconcile_non_rentable().await;
                }
            }
            Err(err) => {
                warn!(project_id = self.id, action, "mutation failed: {err}");
                self.notifications.error(format!("Failed to {action}: {err}"));
            }
        }
        result
    }
}

async fn fetch(id: ProjectId, remote: &dyn RemoteStore) -> ProjectResult<ProjectSnapshot> {
    let by_project = Filter::eq("project_id", id);
    let project = remote.select(Table::Projects, &Filter::eq("id", id)).await?;
    let metadata = match project.first() {
        Some(record) => transform::metadata_from_record(record)?,
        None => return Err(ProjectError::NotFound { kind: "project", id }),
    };
    let floors = remote.select(Table::Floors, &by_project).await?;
    let templates = remote.select(Table::FloorPlateTemplates, &by_project).await?;
    let products = remote.select(Table::Products, &by_project).await?;
    let unit_types = remote.select(Table::UnitTypes, &by_project).await?;
    let unit_allocations = remote.select(Table::UnitAllocations, &by_project).await?;
    let non_rentable_types = remote.select(Table::NonRentableTypes, &by_project).await?;
    let non_rentable_allocations = remote
        .select(Table::NonRentableAllocations, &by_project)
        .await?;

    Ok(ProjectSnapshot {
        metadata,
        floors: transform::collect(&floors, transform::floor_from_record)?,
        templates: transform::collect(&templates, transform::template_from_record)?,
        products: transform::products_from_records(&products, &unit_types)?,
        non_rentable_types: transform::collect(
            &non_rentable_types,
            transform::non_rentable_type_from_record,
        )?,
        unit_allocations: transform::collect(
            &unit_allocations,
            transform::unit_allocation_from_record,
        )?,
        non_rentable_allocations: transform::collect(
            &non_rentable_allocations,
            transform::non_rentable_allocation_from_record,
        )?,
    })
}
