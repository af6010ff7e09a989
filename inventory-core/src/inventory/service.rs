use crate::backend::{
    InventoryBackend, MergeItemsRequest, MoveStockRequest, MoveStockResult, StockAdjustment,
};
use crate::location::LocationResolver;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::{
    ActorContext, InventoryCreate, InventoryLogCreate, InventoryLogEntry, InventoryRecord,
    InventoryUpdate, ItemIdentity, LogAction, PickingList, PickingStatus, UndoOutcome,
};
use shared::mutation::{
    AddItemVars, DeleteItemVars, MoveItemVars, MutationPayload, ProcessPickingListVars,
    UpdateItemVars, UpdateQuantityVars,
};
use std::sync::Arc;
use validator::Validate;

/// Parse user-typed quantity text; rejects negative and non-numeric input
pub fn parse_quantity(raw: &str) -> AppResult<i64> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= 0 => Ok(n),
        _ => Err(AppError::invalid_quantity(raw)),
    }
}

/// Strip all whitespace from a SKU; empty results are rejected
pub fn sanitize_sku(raw: &str) -> AppResult<String> {
    let sku: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if sku.is_empty() {
        return Err(AppError::with_message(
            ErrorCode::RequiredField,
            "SKU cannot be empty.",
        ));
    }
    Ok(sku)
}

fn check<T: Validate>(vars: &T) -> AppResult<()> {
    vars.validate()
        .map_err(|e| AppError::validation(e.to_string()))
}

fn log_entry(
    action: LogAction,
    sku: &str,
    actor: &ActorContext,
    request_id: Option<&str>,
) -> InventoryLogCreate {
    let mut log = InventoryLogCreate::new(action, sku, &actor.performed_by);
    log.user_id = actor.user_id.clone();
    log.request_id = request_id.map(str::to_string);
    log
}

/// Server-authoritative stock mutations
#[derive(Clone)]
pub struct InventoryService {
    backend: Arc<dyn InventoryBackend>,
    locations: LocationResolver,
}

impl InventoryService {
    pub fn new(backend: Arc<dyn InventoryBackend>) -> Self {
        let locations = LocationResolver::new(backend.clone());
        Self { backend, locations }
    }

    pub fn backend(&self) -> &Arc<dyn InventoryBackend> {
        &self.backend
    }

    pub fn locations(&self) -> &LocationResolver {
        &self.locations
    }

    /// Apply a queued mutation
    ///
    /// `request_id` is the queue's mutation id. Every backend write stamps it
    /// in the same transaction as its effect, so a replay of a mutation that
    /// landed before a crash is a no-op.
    pub async fn apply(&self, payload: &MutationPayload, request_id: Option<&str>) -> AppResult<()> {
        if let Some(id) = request_id
            && self.backend.request_applied(id).await?
        {
            tracing::info!(mutation_id = %id, key = %payload.key(), "Mutation already applied, skipping");
            return Ok(());
        }

        match payload {
            MutationPayload::AddItem(vars) => self.add(vars, request_id).await.map(drop),
            MutationPayload::UpdateQuantity(vars) => self.adjust(vars, request_id).await.map(drop),
            MutationPayload::UpdateItem(vars) => self.update(vars, request_id).await.map(drop),
            MutationPayload::MoveItem(vars) => self.relocate(vars, request_id).await.map(drop),
            MutationPayload::DeleteItem(vars) => self.delete(vars, request_id).await,
            MutationPayload::ProcessPickingList(vars) => {
                let list = self.backend.get_picking_list(vars.list_id).await?;
                if list.as_ref().is_some_and(|l| l.status == PickingStatus::Completed) {
                    tracing::info!(list_id = vars.list_id, "Picking list already processed, skipping");
                    return Ok(());
                }
                self.process_picking_list(vars).await.map(drop)
            }
        }
    }

    pub async fn add_stock(&self, vars: &AddItemVars) -> AppResult<InventoryRecord> {
        self.add(vars, None).await
    }

    pub async fn adjust_quantity(&self, vars: &UpdateQuantityVars) -> AppResult<InventoryRecord> {
        self.adjust(vars, None).await
    }

    pub async fn move_stock(&self, vars: &MoveItemVars) -> AppResult<MoveStockResult> {
        self.relocate(vars, None).await
    }

    pub async fn update_item(&self, vars: &UpdateItemVars) -> AppResult<InventoryRecord> {
        self.update(vars, None).await
    }

    pub async fn delete_item(&self, vars: &DeleteItemVars) -> AppResult<()> {
        self.delete(vars, None).await
    }

    /// Deduct every line of a picking list and mark it completed
    pub async fn process_picking_list(&self, vars: &ProcessPickingListVars) -> AppResult<PickingList> {
        let list = self
            .backend
            .process_picking_list(vars.list_id, vars.pallets_qty, vars.total_units, &vars.actor)
            .await?;
        crate::audit_log!(
            vars.actor.id(),
            "DEDUCT",
            format!("picking_list:{}", list.id),
            format!("{} units, {} pallets", vars.total_units, vars.pallets_qty)
        );
        Ok(list)
    }

    /// Reverse a log entry, newest first per item
    pub async fn undo(&self, log_id: i64, actor: &ActorContext) -> AppResult<UndoOutcome> {
        let outcome = self.backend.undo_action(log_id, actor).await?;
        if !outcome.success {
            let code = if outcome.message.contains("already reversed") {
                ErrorCode::AlreadyReversed
            } else if outcome.message.contains("LIFO") {
                ErrorCode::LifoViolation
            } else {
                ErrorCode::IdentityCollision
            };
            tracing::warn!(log_id, message = %outcome.message, "Undo refused");
            return Err(AppError::with_message(code, outcome.message).with_detail("log_id", log_id));
        }
        crate::audit_log!(actor.id(), "UNDO", format!("inventory_log:{}", log_id), outcome.message);
        Ok(outcome)
    }

    /// Log history touching `item_id`, newest first
    pub async fn logs_for_item(&self, item_id: i64) -> AppResult<Vec<InventoryLogEntry>> {
        Ok(self.backend.logs_for_item(item_id).await?)
    }

    async fn find(&self, id: Option<i64>, identity: &ItemIdentity) -> AppResult<InventoryRecord> {
        let found = match id {
            Some(id) => self.backend.get_item(id).await?,
            None => self.backend.find_item(identity).await?,
        };
        found
            .filter(|r| r.is_active)
            .ok_or_else(|| AppError::item_not_found(identity.to_string()))
    }

    /// Log writes never fail the mutation that already committed
    ///
    /// Replay protection rests on the request id stamped with the write, not
    /// on this entry. A lost entry only costs history and undo for that step.
    async fn record(&self, log: InventoryLogCreate) {
        let action = log.action;
        let request_id = log.request_id.clone();
        if let Err(e) = self.backend.append_log(log).await {
            tracing::error!(
                action = %action,
                request_id = request_id.as_deref().unwrap_or("-"),
                error = %e,
                "Failed to write inventory log"
            );
        }
    }

    // ========== Add ==========

    async fn add(&self, vars: &AddItemVars, request_id: Option<&str>) -> AppResult<InventoryRecord> {
        check(vars)?;
        let sku = sanitize_sku(&vars.sku)?;
        if vars.quantity < 0 {
            return Err(AppError::invalid_quantity(vars.quantity.to_string()));
        }
        let actor = &vars.actor;

        let resolved = self
            .locations
            .ensure(&vars.warehouse, &vars.location, actor)
            .await?;
        let (location, location_id) = match resolved {
            Some(r) => (r.name, Some(r.id)),
            None => (String::new(), None),
        };
        let identity = ItemIdentity::new(&sku, &vars.warehouse, &location);

        let (before, record) = match self.backend.find_item(&identity).await? {
            Some(existing) => {
                let record = self
                    .add_to_existing(&existing, vars, location_id, request_id)
                    .await?;
                (Some(existing), record)
            }
            None => {
                let create = InventoryCreate {
                    sku: sku.clone(),
                    warehouse: vars.warehouse.clone(),
                    location: Some(location.clone()).filter(|l| !l.is_empty()),
                    location_id,
                    quantity: vars.quantity,
                    capacity: None,
                    note: vars.note.clone().filter(|n| !n.trim().is_empty()),
                };
                match self.backend.insert_item(create, actor, request_id).await {
                    Ok(record) => (None, record),
                    // Inserted concurrently by someone else; add on top of theirs
                    Err(e) if e.is_unique_violation() => {
                        let existing = self.find(None, &identity).await?;
                        let record = self
                            .add_to_existing(&existing, vars, location_id, request_id)
                            .await?;
                        (Some(existing), record)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let prev_quantity = before.as_ref().map_or(0, |b| b.quantity);
        let mut log = log_entry(LogAction::Add, &sku, actor, request_id);
        log.item_id = Some(record.id);
        log.to_warehouse = Some(record.warehouse.clone());
        log.to_location = record.location.clone();
        log.quantity_change = vars.quantity;
        log.prev_quantity = prev_quantity;
        log.new_quantity = record.quantity;
        log.snapshot_before = before;
        self.record(log).await;

        crate::audit_log!(
            actor.id(),
            "ADD",
            format!("inventory:{}", record.id),
            format!("+{} {}", vars.quantity, identity)
        );
        tracing::info!(item_id = record.id, sku = %sku, quantity = record.quantity, "Stock added");
        Ok(record)
    }

    /// Quantity, note and location link land in one backend write
    async fn add_to_existing(
        &self,
        existing: &InventoryRecord,
        vars: &AddItemVars,
        location_id: Option<i64>,
        request_id: Option<&str>,
    ) -> AppResult<InventoryRecord> {
        if existing.quantity.checked_add(vars.quantity).is_none() {
            return Err(AppError::invalid_quantity(vars.quantity.to_string()));
        }
        let adjustment = StockAdjustment {
            identity: existing.identity(),
            delta: vars.quantity,
            note: vars.note.clone().filter(|n| !n.trim().is_empty()),
            location_id,
            request_id: request_id.map(str::to_string),
        };
        Ok(self.backend.adjust_quantity(&adjustment, &vars.actor).await?)
    }

    // ========== Quantity adjustments ==========

    async fn adjust(
        &self,
        vars: &UpdateQuantityVars,
        request_id: Option<&str>,
    ) -> AppResult<InventoryRecord> {
        if vars.delta == 0 {
            return Err(AppError::validation("Quantity change must not be zero"));
        }
        let before = self.find(None, &vars.identity).await?;
        let Some(after) = before.quantity.checked_add(vars.delta) else {
            return Err(AppError::invalid_quantity(vars.delta.to_string()));
        };
        if after < 0 {
            return Err(AppError::with_message(
                ErrorCode::InsufficientStock,
                format!(
                    "Insufficient stock for {}: have {}, need {}",
                    vars.identity, before.quantity, -vars.delta
                ),
            ));
        }

        let mut adjustment = StockAdjustment::new(vars.identity.clone(), vars.delta);
        adjustment.request_id = request_id.map(str::to_string);
        let record = self.backend.adjust_quantity(&adjustment, &vars.actor).await?;

        let action = if vars.delta < 0 { LogAction::Deduct } else { LogAction::Add };
        let mut log = log_entry(action, &record.sku, &vars.actor, request_id);
        log.item_id = Some(record.id);
        if vars.delta < 0 {
            log.from_warehouse = Some(record.warehouse.clone());
            log.from_location = record.location.clone();
        } else {
            log.to_warehouse = Some(record.warehouse.clone());
            log.to_location = record.location.clone();
        }
        log.quantity_change = vars.delta;
        log.prev_quantity = before.quantity;
        log.new_quantity = record.quantity;
        log.list_id = vars.list_id;
        log.order_number = vars.order_number.clone();
        log.snapshot_before = Some(before);
        self.record(log).await;

        crate::audit_log!(
            vars.actor.id(),
            action,
            format!("inventory:{}", record.id),
            format!("{:+} {}", vars.delta, vars.identity)
        );
        Ok(record)
    }

    // ========== Move ==========

    async fn relocate(
        &self,
        vars: &MoveItemVars,
        request_id: Option<&str>,
    ) -> AppResult<MoveStockResult> {
        check(vars)?;
        if vars.quantity <= 0 {
            return Err(AppError::invalid_quantity(vars.quantity.to_string()));
        }
        let actor = &vars.actor;

        let source = self.find(None, &vars.source).await?;
        if source.quantity < vars.quantity {
            return Err(AppError::stock_mismatch(source.quantity, vars.quantity));
        }

        let target_location = self
            .locations
            .ensure(&vars.target_warehouse, &vars.target_location, actor)
            .await?
            .ok_or_else(|| {
                AppError::with_message(ErrorCode::LocationNameRequired, "Target location is required")
            })?;
        let target = ItemIdentity::new(&source.sku, &vars.target_warehouse, &target_location.name);
        if source.is_at(&target) {
            return Err(AppError::validation("Source and target location are the same"));
        }

        let result = self
            .backend
            .move_stock(
                &MoveStockRequest {
                    source_id: source.id,
                    quantity: vars.quantity,
                    target: target.clone(),
                    target_location_id: Some(target_location.id),
                    request_id: request_id.map(str::to_string),
                },
                actor,
            )
            .await?;

        let mut log = log_entry(LogAction::Move, &source.sku, actor, request_id);
        log.item_id = Some(result.source.id);
        log.from_warehouse = Some(source.warehouse.clone());
        log.from_location = source.location.clone();
        log.to_warehouse = Some(target.warehouse.clone());
        log.to_location = Some(target.location.clone());
        log.quantity_change = vars.quantity;
        log.prev_quantity = result.source_before.quantity;
        log.new_quantity = result.source.quantity;
        log.snapshot_before = Some(result.source_before.clone());
        log.related_item_id = Some(result.target.id);
        log.related_snapshot_before = result.target_before.clone();
        self.record(log).await;

        crate::audit_log!(
            actor.id(),
            "MOVE",
            format!("inventory:{}", source.id),
            format!("{} units {} -> {}", vars.quantity, vars.source, target)
        );
        tracing::info!(
            source_id = source.id,
            target_id = result.target.id,
            merged = result.merged(),
            quantity = vars.quantity,
            "Stock moved"
        );
        Ok(result)
    }

    // ========== Update ==========

    async fn update(
        &self,
        vars: &UpdateItemVars,
        request_id: Option<&str>,
    ) -> AppResult<InventoryRecord> {
        check(vars)?;
        let sku = sanitize_sku(&vars.sku)?;
        let quantity = vars.quantity.max(0);
        let actor = &vars.actor;

        let current = self.find(vars.item_id, &vars.original).await?;
        let resolved = self
            .locations
            .ensure(&vars.warehouse, &vars.location, actor)
            .await?;
        let (location, location_id) = match resolved {
            Some(r) => (r.name, Some(r.id)),
            None => (String::new(), None),
        };
        let identity = ItemIdentity::new(&sku, &vars.warehouse, &location);

        if !current.is_at(&identity) {
            let collision = self
                .backend
                .find_item(&identity)
                .await?
                .filter(|r| r.id != current.id);
            if let Some(survivor) = collision {
                return self
                    .merge_on_rename(&current, survivor, quantity, vars, request_id)
                    .await;
            }
        }

        let patch = InventoryUpdate {
            sku: Some(sku.clone()),
            warehouse: Some(vars.warehouse.clone()),
            location: Some(location.clone()),
            location_id,
            quantity: Some(quantity),
            note: Some(vars.note.clone().unwrap_or_default()),
            ..Default::default()
        };
        let record = self
            .backend
            .update_item(current.id, patch, actor, request_id)
            .await?;

        let moved = current.warehouse != record.warehouse || current.location != record.location;
        let action = if moved { LogAction::Move } else { LogAction::Edit };
        let mut log = log_entry(action, &record.sku, actor, request_id);
        log.item_id = Some(record.id);
        log.from_warehouse = Some(current.warehouse.clone());
        log.from_location = current.location.clone();
        log.to_warehouse = Some(record.warehouse.clone());
        log.to_location = record.location.clone();
        log.quantity_change = record.quantity - current.quantity;
        log.prev_quantity = current.quantity;
        log.new_quantity = record.quantity;
        if current.sku != record.sku {
            log.previous_sku = Some(current.sku.clone());
        }
        log.snapshot_before = Some(current.clone());
        self.record(log).await;

        crate::audit_log!(
            actor.id(),
            action,
            format!("inventory:{}", record.id),
            format!("{} -> {}", current.identity(), identity)
        );
        Ok(record)
    }

    /// The edit renamed onto an existing record: fold the source into it
    async fn merge_on_rename(
        &self,
        source: &InventoryRecord,
        survivor: InventoryRecord,
        quantity: i64,
        vars: &UpdateItemVars,
        request_id: Option<&str>,
    ) -> AppResult<InventoryRecord> {
        let actor = &vars.actor;
        if survivor.quantity.checked_add(quantity).is_none() {
            return Err(AppError::invalid_quantity(quantity.to_string()));
        }
        let incoming_note = vars.note.as_deref().or(source.note.as_deref());
        let result = self
            .backend
            .merge_items(
                &MergeItemsRequest {
                    source_id: source.id,
                    survivor_id: survivor.id,
                    quantity,
                    note: incoming_note.map(str::to_string),
                    hard: actor.is_privileged(),
                    request_id: request_id.map(str::to_string),
                },
                actor,
            )
            .await?;
        let merged = result.survivor;

        let mut log = log_entry(LogAction::Edit, &merged.sku, actor, request_id);
        log.item_id = Some(merged.id);
        log.from_warehouse = Some(source.warehouse.clone());
        log.from_location = source.location.clone();
        log.to_warehouse = Some(merged.warehouse.clone());
        log.to_location = merged.location.clone();
        log.quantity_change = quantity;
        log.prev_quantity = result.survivor_before.quantity;
        log.new_quantity = merged.quantity;
        log.previous_sku = Some(source.sku.clone());
        log.snapshot_before = Some(result.survivor_before);
        log.related_item_id = Some(source.id);
        log.related_snapshot_before = Some(result.source_before);
        self.record(log).await;

        crate::audit_log!(
            actor.id(),
            "EDIT",
            format!("inventory:{}", merged.id),
            format!("merged {} into {}", source.identity(), merged.identity())
        );
        tracing::info!(source_id = source.id, survivor_id = merged.id, "Merged on rename");
        Ok(merged)
    }

    // ========== Delete ==========

    async fn delete(&self, vars: &DeleteItemVars, request_id: Option<&str>) -> AppResult<()> {
        let actor = &vars.actor;
        let item = self.find(vars.item_id, &vars.identity).await?;
        let hard = actor.is_privileged();
        self.backend
            .delete_item(item.id, hard, actor, request_id)
            .await?;

        let mut log = log_entry(LogAction::Delete, &item.sku, actor, request_id);
        log.item_id = Some(item.id);
        log.from_warehouse = Some(item.warehouse.clone());
        log.from_location = item.location.clone();
        log.quantity_change = -item.quantity;
        log.prev_quantity = item.quantity;
        log.new_quantity = 0;
        log.snapshot_before = Some(item.clone());
        self.record(log).await;

        crate::audit_log!(
            actor.id(),
            "DELETE",
            format!("inventory:{}", item.id),
            if hard { "hard delete" } else { "quantity zeroed" }
        );
        Ok(())
    }
}
