//! Stock reservations shared between concurrent picking sessions

use inventory_core::picking::CartWarning;
use inventory_core::{DebouncedSaver, ErrorCode, InventoryService, MemoryBackend, PickingSession};
use shared::models::{ActorContext, ItemIdentity, PickingStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn session(backend: &Arc<MemoryBackend>, actor: ActorContext, shutdown: &CancellationToken) -> PickingSession {
    let saver = DebouncedSaver::spawn(backend.clone(), Duration::from_millis(10), shutdown.clone());
    let sink = Arc::new(InventoryService::new(backend.clone()));
    PickingSession::new(backend.clone(), sink, saver, actor)
}

fn identity() -> ItemIdentity {
    ItemIdentity::new("A-1", "LUDLOW", "Row 1")
}

#[tokio::test]
async fn test_second_cart_is_clamped_by_active_reservation() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_item("A-1", "LUDLOW", "Row 1", 10);
    let shutdown = CancellationToken::new();
    let mut alice = session(&backend, ActorContext::staff("Alice", "alice"), &shutdown);
    let mut bob = session(&backend, ActorContext::staff("Bob", "bob"), &shutdown);

    alice.add_to_cart(&identity(), 7).await.unwrap();
    alice.start_picking().await.unwrap();
    assert_eq!(alice.status(), Some(PickingStatus::Active));

    let change = bob.add_to_cart(&identity(), 5).await.unwrap();
    assert!(change.changed);
    assert_eq!(change.quantity, 3);
    assert!(matches!(
        change.warning,
        Some(CartWarning::Clamped { available: 3, reserved_by_others: 7, .. })
    ));

    let stock = bob.get_available_stock(&identity()).await.unwrap();
    assert_eq!(stock.total_stock, 10);
    assert_eq!(stock.reserved_by_others, 7);
    assert_eq!(stock.in_my_cart, 3);

    bob.start_picking().await.unwrap();

    // Nothing left for a third picker
    let mut carol = session(&backend, ActorContext::staff("Carol", "carol"), &shutdown);
    let change = carol.add_to_cart(&identity(), 1).await.unwrap();
    assert!(!change.changed);
    assert!(matches!(change.warning, Some(CartWarning::FullyReserved { .. })));
    assert!(carol.is_idle());

    shutdown.cancel();
}

#[tokio::test]
async fn test_start_picking_revalidates_against_new_reservations() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_item("A-1", "LUDLOW", "Row 1", 10);
    let shutdown = CancellationToken::new();
    let mut alice = session(&backend, ActorContext::staff("Alice", "alice"), &shutdown);
    let mut bob = session(&backend, ActorContext::staff("Bob", "bob"), &shutdown);

    // Building carts do not reserve, so both fit at first
    bob.add_to_cart(&identity(), 8).await.unwrap();
    alice.add_to_cart(&identity(), 7).await.unwrap();
    alice.start_picking().await.unwrap();

    let err = bob.start_picking().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::StockUnavailable);
    assert_eq!(bob.status(), Some(PickingStatus::Building));

    // Trimming the cart to what is left lets it through
    bob.set_cart_qty(&identity(), 3).await.unwrap();
    bob.start_picking().await.unwrap();
    assert_eq!(bob.status(), Some(PickingStatus::Active));

    shutdown.cancel();
}

#[tokio::test]
async fn test_empty_cart_cannot_start() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_item("A-1", "LUDLOW", "Row 1", 10);
    let shutdown = CancellationToken::new();
    let mut alice = session(&backend, ActorContext::staff("Alice", "alice"), &shutdown);

    alice.add_to_cart(&identity(), 2).await.unwrap();
    assert!(alice.remove_from_cart(&identity()).unwrap());
    let err = alice.start_picking().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::CartEmpty);

    shutdown.cancel();
}
