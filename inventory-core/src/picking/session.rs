//! Picking session state machine
//!
//! ```text
//! Idle -> Building -> Active -> DoubleChecking <-> NeedsCorrection -> Completed
//!                                     |  ^
//!                                     v  |
//!                             ReadyToDoubleCheck
//! ```
//!
//! The first item added while idle creates the order identity and a
//! `building` list row. Cart contents can be edited while building, and by
//! the owner while the list needs correction. Every edit is persisted by
//! the debounced saver.

use super::cart::{CartChange, PickingCart};
use super::path::{PalletPlan, SkuDimensions, calculate_pallets, optimized_picking_path};
use super::saver::{CartSnapshot, DebouncedSaver};
use crate::backend::InventoryBackend;
use crate::queue::MutationSink;
use crate::reservation::{AvailableStock, ReservationLedger};
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::{
    ActorContext, CartItem, ItemIdentity, PickingList, PickingListCreate, PickingListUpdate,
    PickingNote, PickingStatus,
};
use shared::mutation::{MutationPayload, ProcessPickingListVars};
use shared::util::{now_millis, snowflake_id};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Sessions untouched for this long are expired
pub const DEFAULT_STALE_AFTER_MS: i64 = 5 * 60 * 60 * 1000;

fn invalid_transition(from: Option<PickingStatus>, action: &str) -> AppError {
    let from = from.map_or("idle", |s| s.as_str());
    AppError::with_message(
        ErrorCode::InvalidTransition,
        format!("Cannot {} while the order is {}", action, from),
    )
    .with_detail("status", from)
}

pub struct PickingSession {
    backend: Arc<dyn InventoryBackend>,
    sink: Arc<dyn MutationSink>,
    saver: DebouncedSaver,
    actor: ActorContext,
    stale_after_ms: i64,

    /// `None` while idle
    status: Option<PickingStatus>,
    list_id: Option<i64>,
    owner_id: Option<String>,
    checked_by: Option<String>,
    order_number: Option<String>,
    correction_notes: Option<String>,
    updated_at: i64,
    cart: PickingCart,
    ledger: ReservationLedger,
}

impl PickingSession {
    pub fn new(
        backend: Arc<dyn InventoryBackend>,
        sink: Arc<dyn MutationSink>,
        saver: DebouncedSaver,
        actor: ActorContext,
    ) -> Self {
        Self {
            backend,
            sink,
            saver,
            actor,
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            status: None,
            list_id: None,
            owner_id: None,
            checked_by: None,
            order_number: None,
            correction_notes: None,
            updated_at: now_millis(),
            cart: PickingCart::new(),
            ledger: ReservationLedger::default(),
        }
    }

    pub fn with_stale_after(mut self, stale_after_ms: i64) -> Self {
        self.stale_after_ms = stale_after_ms;
        self
    }

    // ========== Accessors ==========

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    pub fn status(&self) -> Option<PickingStatus> {
        self.status
    }

    pub fn is_idle(&self) -> bool {
        self.status.is_none()
    }

    pub fn list_id(&self) -> Option<i64> {
        self.list_id
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    pub fn checked_by(&self) -> Option<&str> {
        self.checked_by.as_deref()
    }

    pub fn order_number(&self) -> Option<&str> {
        self.order_number.as_deref()
    }

    pub fn correction_notes(&self) -> Option<&str> {
        self.correction_notes.as_deref()
    }

    pub fn cart(&self) -> &PickingCart {
        &self.cart
    }

    pub fn is_saving(&self) -> bool {
        self.saver.is_saving()
    }

    pub fn last_saved(&self) -> Option<i64> {
        self.saver.last_saved()
    }

    /// No activity for longer than the stale window
    pub fn is_stale(&self, now: i64) -> bool {
        !self.is_idle() && now - self.updated_at > self.stale_after_ms
    }

    // ========== Internal helpers ==========

    fn is_owner(&self) -> bool {
        self.owner_id.as_deref() == Some(self.actor.id())
    }

    fn is_checker(&self) -> bool {
        self.checked_by.as_deref() == Some(self.actor.id())
    }

    fn require_list(&self) -> AppResult<i64> {
        self.list_id
            .ok_or_else(|| invalid_transition(self.status, "continue without a picking list"))
    }

    fn require_status(&self, allowed: &[PickingStatus], action: &str) -> AppResult<()> {
        match self.status {
            Some(status) if allowed.contains(&status) => Ok(()),
            other => Err(invalid_transition(other, action)),
        }
    }

    fn ensure_editable(&self) -> AppResult<()> {
        match self.status {
            None => Ok(()),
            Some(PickingStatus::Building | PickingStatus::NeedsCorrection) if self.is_owner() => Ok(()),
            Some(status) => Err(AppError::with_message(
                ErrorCode::CartLocked,
                format!("Cart is locked while the order is {}", status),
            )),
        }
    }

    fn adopt(&mut self, list: PickingList) {
        self.status = Some(list.status);
        self.list_id = Some(list.id);
        self.owner_id = Some(list.owner_id);
        self.checked_by = list.checked_by;
        self.order_number = list.order_number;
        self.correction_notes = list.correction_notes;
        self.updated_at = list.updated_at;
        self.cart = PickingCart::from_items(list.items);
    }

    async fn fetch(&self, list_id: i64) -> AppResult<PickingList> {
        self.backend.get_picking_list(list_id).await?.ok_or_else(|| {
            AppError::with_message(
                ErrorCode::PickingListNotFound,
                format!("Picking list {} not found", list_id),
            )
        })
    }

    async fn update_list(&mut self, patch: PickingListUpdate) -> AppResult<()> {
        let list_id = self.require_list()?;
        let list = self.backend.update_picking_list(list_id, patch).await?;
        self.adopt(list);
        Ok(())
    }

    fn schedule_save(&mut self) {
        self.updated_at = now_millis();
        if let Some(list_id) = self.list_id {
            self.saver.schedule(CartSnapshot {
                list_id,
                items: self.cart.items().to_vec(),
                order_number: self.order_number.clone(),
            });
        }
    }

    /// Leave idle: pick an order identity and create the `building` row
    async fn ensure_started(&mut self) -> AppResult<()> {
        if !self.is_idle() {
            return Ok(());
        }
        let order_number = self
            .order_number
            .clone()
            .unwrap_or_else(|| format!("ORD-{}", snowflake_id()));
        let list = self
            .backend
            .insert_picking_list(PickingListCreate {
                owner_id: self.actor.id().to_string(),
                status: PickingStatus::Building,
                items: self.cart.items().to_vec(),
                order_number: Some(order_number),
            })
            .await?;
        tracing::info!(list_id = list.id, order_number = ?list.order_number, "Picking list started");
        self.adopt(list);
        Ok(())
    }

    async fn refresh_ledger(&mut self, extra_skus: &[String]) -> AppResult<()> {
        let skus: Vec<String> = self
            .cart
            .skus()
            .into_iter()
            .chain(extra_skus.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.ledger = ReservationLedger::load(self.backend.as_ref(), &skus).await?;
        Ok(())
    }

    fn availability(&self, identity: &ItemIdentity) -> AvailableStock {
        self.ledger
            .available(identity, self.list_id, self.cart.quantity_of(identity))
    }

    // ========== Cart operations ==========

    /// Fresh availability of `identity` from this cart's point of view
    pub async fn get_available_stock(&mut self, identity: &ItemIdentity) -> AppResult<AvailableStock> {
        self.refresh_ledger(std::slice::from_ref(&identity.sku)).await?;
        Ok(self.availability(identity))
    }

    pub async fn add_to_cart(&mut self, identity: &ItemIdentity, qty: i64) -> AppResult<CartChange> {
        self.ensure_editable()?;
        self.refresh_ledger(std::slice::from_ref(&identity.sku)).await?;
        let stock = self.availability(identity);
        let change = self.cart.add(identity, qty, &stock)?;
        if let Some(warning) = &change.warning {
            tracing::info!(sku = %identity.sku, warning = %warning, "Cart add limited");
        }
        if change.changed {
            self.ensure_started().await?;
            self.schedule_save();
        }
        Ok(change)
    }

    pub async fn update_cart_qty(&mut self, identity: &ItemIdentity, delta: i64) -> AppResult<CartChange> {
        self.ensure_editable()?;
        self.refresh_ledger(&[]).await?;
        let stock = self.availability(identity);
        let change = self.cart.update_qty(identity, delta, &stock)?;
        if change.changed {
            self.schedule_save();
        }
        Ok(change)
    }

    pub async fn set_cart_qty(&mut self, identity: &ItemIdentity, qty: i64) -> AppResult<CartChange> {
        self.ensure_editable()?;
        self.refresh_ledger(&[]).await?;
        let stock = self.availability(identity);
        let change = self.cart.set_qty(identity, qty, &stock);
        if change.changed {
            self.schedule_save();
        }
        Ok(change)
    }

    pub fn remove_from_cart(&mut self, identity: &ItemIdentity) -> AppResult<bool> {
        self.ensure_editable()?;
        let removed = self.cart.remove(identity);
        if removed {
            self.schedule_save();
        }
        Ok(removed)
    }

    /// User-supplied order number; cleared values fall back to a generated one
    pub fn set_order_number(&mut self, order_number: Option<String>) -> AppResult<()> {
        self.ensure_editable()?;
        self.order_number = order_number.filter(|o| !o.trim().is_empty());
        self.schedule_save();
        Ok(())
    }

    // ========== Lifecycle ==========

    /// Reserve the cart: `building` -> `active`
    pub async fn start_picking(&mut self) -> AppResult<()> {
        self.require_status(&[PickingStatus::Building], "start picking")?;
        if self.cart.is_empty() {
            return Err(AppError::with_message(ErrorCode::CartEmpty, "Add items to your cart first."));
        }
        let list_id = self.require_list()?;
        self.saver.flush().await;
        self.refresh_ledger(&[]).await?;
        self.ledger.validate_cart(self.cart.items(), Some(list_id))?;

        self.update_list(PickingListUpdate {
            status: Some(PickingStatus::Active),
            items: Some(self.cart.items().to_vec()),
            order_number: Some(self.order_number.clone()),
            ..Default::default()
        })
        .await?;
        tracing::info!(list_id, units = self.cart.total_units(), "Picking started, stock reserved");
        Ok(())
    }

    /// Commit the cart for verification and lock it to this actor as checker
    pub async fn mark_as_ready(&mut self) -> AppResult<()> {
        self.require_status(
            &[PickingStatus::Building, PickingStatus::Active, PickingStatus::NeedsCorrection],
            "mark the order ready",
        )?;
        if self.cart.is_empty() {
            return Err(AppError::with_message(
                ErrorCode::CartEmpty,
                "Cannot mark an empty order as ready.",
            ));
        }
        let list_id = self.require_list()?;
        self.saver.flush().await;

        let released = self
            .backend
            .release_checks_by(self.actor.id(), Some(list_id))
            .await?;
        if released > 0 {
            tracing::info!(released, "Released previous double-check locks");
        }

        self.refresh_ledger(&[]).await?;
        self.ledger.validate_cart(self.cart.items(), Some(list_id))?;

        self.update_list(PickingListUpdate {
            status: Some(PickingStatus::DoubleChecking),
            checked_by: Some(Some(self.actor.id().to_string())),
            items: Some(self.cart.items().to_vec()),
            order_number: Some(self.order_number.clone()),
            correction_notes: Some(None),
            ..Default::default()
        })
        .await?;
        tracing::info!(list_id, "Order ready for double check");
        Ok(())
    }

    /// Claim a list for verification
    pub async fn lock_for_check(&mut self, list_id: i64) -> AppResult<()> {
        let list = self.fetch(list_id).await?;
        match (list.status, list.checked_by.as_deref()) {
            (PickingStatus::ReadyToDoubleCheck, _) => {}
            (PickingStatus::DoubleChecking, Some(checker)) if checker == self.actor.id() => {}
            (PickingStatus::DoubleChecking, Some(checker)) => {
                return Err(AppError::with_message(
                    ErrorCode::CartLocked,
                    format!("Order is being checked by {}", checker),
                ));
            }
            (status, _) => return Err(invalid_transition(Some(status), "check this order")),
        }

        self.backend
            .release_checks_by(self.actor.id(), Some(list_id))
            .await?;
        self.adopt(list);
        self.update_list(PickingListUpdate {
            status: Some(PickingStatus::DoubleChecking),
            checked_by: Some(Some(self.actor.id().to_string())),
            ..Default::default()
        })
        .await
    }

    /// Put the list back in the checker queue and leave it
    pub async fn release_check(&mut self) -> AppResult<()> {
        self.require_status(&[PickingStatus::DoubleChecking], "release the check")?;
        if !self.is_checker() {
            return Err(AppError::permission_denied("Only the checker can release this order"));
        }
        self.update_list(PickingListUpdate {
            status: Some(PickingStatus::ReadyToDoubleCheck),
            checked_by: Some(None),
            ..Default::default()
        })
        .await?;
        self.reset();
        Ok(())
    }

    /// Send the list back to its owner with correction notes
    pub async fn return_to_picker(&mut self, notes: &str) -> AppResult<()> {
        self.require_status(&[PickingStatus::DoubleChecking], "return the order")?;
        if !self.is_checker() && !self.actor.is_privileged() {
            return Err(AppError::permission_denied("Only the checker can return this order"));
        }
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(AppError::with_message(ErrorCode::RequiredField, "Correction notes are required"));
        }
        let list_id = self.require_list()?;
        self.update_list(PickingListUpdate {
            status: Some(PickingStatus::NeedsCorrection),
            checked_by: Some(None),
            correction_notes: Some(Some(notes.to_string())),
            ..Default::default()
        })
        .await?;
        self.backend.add_note(list_id, self.actor.id(), notes).await?;
        tracing::info!(list_id, "Order returned to picker");
        self.reset();
        Ok(())
    }

    /// Back to `active`, dropping any checker
    pub async fn revert_to_picking(&mut self) -> AppResult<()> {
        self.require_status(
            &[
                PickingStatus::DoubleChecking,
                PickingStatus::ReadyToDoubleCheck,
                PickingStatus::NeedsCorrection,
            ],
            "revert to picking",
        )?;
        if !self.is_owner() && !self.is_checker() {
            return Err(AppError::permission_denied("Only the owner or checker can revert this order"));
        }
        self.update_list(PickingListUpdate {
            status: Some(PickingStatus::Active),
            checked_by: Some(None),
            ..Default::default()
        })
        .await
    }

    /// Become the write holder of another user's order
    ///
    /// An `active` list changes owner; a `double_checking` list changes
    /// checker. Cart contents are kept.
    pub async fn take_over_order(&mut self, list_id: i64) -> AppResult<()> {
        let list = self.fetch(list_id).await?;
        let me = self.actor.id().to_string();
        let patch = match list.status {
            PickingStatus::Active => {
                if list.owner_id == me {
                    return Err(AppError::with_message(ErrorCode::TakeOverSelf, "You already own this order"));
                }
                PickingListUpdate {
                    owner_id: Some(me.clone()),
                    ..Default::default()
                }
            }
            PickingStatus::DoubleChecking => {
                if list.checked_by.as_deref() == Some(me.as_str()) {
                    return Err(AppError::with_message(ErrorCode::TakeOverSelf, "You are already checking this order"));
                }
                PickingListUpdate {
                    checked_by: Some(Some(me.clone())),
                    ..Default::default()
                }
            }
            status => return Err(invalid_transition(Some(status), "take over this order")),
        };

        let previous = list.checked_by.clone().unwrap_or_else(|| list.owner_id.clone());
        if list.status == PickingStatus::DoubleChecking {
            self.backend.release_checks_by(&me, Some(list_id)).await?;
        }
        self.adopt(list);
        self.update_list(patch).await?;
        crate::audit_log!(me, "TAKE_OVER", format!("picking_list:{}", list_id), format!("from {}", previous));
        Ok(())
    }

    /// Deduct the verified list from stock and release the session
    pub async fn complete(&mut self) -> AppResult<PalletPlan> {
        self.require_status(&[PickingStatus::DoubleChecking], "complete the order")?;
        if !self.is_checker() && !self.actor.is_privileged() {
            return Err(AppError::permission_denied("Only the checker can complete this order"));
        }
        let list_id = self.require_list()?;
        self.saver.flush().await;

        let plan = calculate_pallets(self.cart.items(), &HashMap::<String, SkuDimensions>::new());
        self.sink
            .submit(MutationPayload::ProcessPickingList(ProcessPickingListVars {
                actor: self.actor.clone(),
                list_id,
                pallets_qty: plan.pallets_qty,
                total_units: plan.total_units,
            }))
            .await?;
        tracing::info!(list_id, pallets = plan.pallets_qty, units = plan.total_units, "Order completed");
        self.reset();
        Ok(plan)
    }

    /// Delete the current list; completed lists are kept for history
    pub async fn delete_list(&mut self) -> AppResult<()> {
        let Some(list_id) = self.list_id else {
            self.reset();
            return Ok(());
        };
        self.saver.flush().await;
        let list = self.fetch(list_id).await?;
        if list.status == PickingStatus::Completed {
            return Err(AppError::with_message(
                ErrorCode::ListCompleted,
                "Completed orders cannot be deleted",
            ));
        }
        self.backend.delete_picking_list(list_id).await?;
        tracing::info!(list_id, "Picking list deleted");
        self.reset();
        Ok(())
    }

    /// Back to idle without touching the backend
    pub fn reset(&mut self) {
        self.status = None;
        self.list_id = None;
        self.owner_id = None;
        self.checked_by = None;
        self.order_number = None;
        self.correction_notes = None;
        self.updated_at = now_millis();
        self.cart.clear();
    }

    /// Load an existing list into the session, e.g. after a restart
    pub async fn load(&mut self, list_id: i64) -> AppResult<()> {
        let list = self.fetch(list_id).await?;
        self.adopt(list);
        Ok(())
    }

    /// Restore this actor's session: a double check first, then an owned
    /// list. Stale sessions are expired instead of restored.
    pub async fn resume(&mut self) -> AppResult<bool> {
        let now = now_millis();
        let me = self.actor.id().to_string();

        let checking = self
            .backend
            .picking_lists_by_status(&[PickingStatus::DoubleChecking])
            .await?
            .into_iter()
            .find(|l| l.checked_by.as_deref() == Some(me.as_str()));
        if let Some(list) = checking {
            if now - list.updated_at > self.stale_after_ms {
                tracing::info!(list_id = list.id, "Double check session expired");
                self.backend.release_checks_by(&me, None).await?;
                self.reset();
                return Ok(false);
            }
            self.adopt(list);
            return Ok(true);
        }

        let owned = self
            .backend
            .picking_lists_by_status(&[
                PickingStatus::Building,
                PickingStatus::Active,
                PickingStatus::NeedsCorrection,
            ])
            .await?
            .into_iter()
            .filter(|l| l.owner_id == me)
            .max_by_key(|l| l.updated_at);
        match owned {
            Some(list) if now - list.updated_at <= self.stale_after_ms => {
                self.adopt(list);
                Ok(true)
            }
            Some(list) => {
                tracing::info!(list_id = list.id, "Picking session expired");
                self.reset();
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Cart lines in walking order
    pub async fn picking_path(&self) -> AppResult<Vec<CartItem>> {
        let warehouses: BTreeSet<&str> = self.cart.items().iter().map(|i| i.warehouse.as_str()).collect();
        let mut locations = Vec::new();
        for warehouse in warehouses {
            locations.extend(self.backend.list_locations(warehouse).await?);
        }
        Ok(optimized_picking_path(self.cart.items(), &locations))
    }

    pub async fn notes(&self) -> AppResult<Vec<PickingNote>> {
        let list_id = self.require_list()?;
        Ok(self.backend.notes_for_list(list_id).await?)
    }
}
