//! Inventory Core - offline-first warehouse inventory client
//!
//! # Overview
//!
//! - **Locations** (`location`): canonical names, admin-only creation, race-safe get-or-create
//! - **Inventory** (`inventory`): add / move / edit / delete with merge semantics and LIFO undo
//! - **Reservations** (`reservation`): stock held by open picking lists
//! - **Picking** (`picking`): cart, session state machine, debounced persistence, pallets
//! - **Queue** (`queue`): durable redb-backed mutation queue with replay registry
//! - **Cache** (`cache`): change-event patcher over a normalized row store
//!
//! # Module layout
//!
//! ```text
//! inventory-core/src/
//! ├── backend/       # Remote store trait + in-memory implementation
//! ├── cache/         # Client-side inventory cache
//! ├── common/        # Logging
//! ├── core/          # Configuration, wiring
//! ├── inventory/     # Inventory mutation service
//! ├── location/      # Location resolver
//! ├── picking/       # Carts and picking sessions
//! ├── queue/         # Durable mutation queue
//! └── reservation/   # Reservation ledger
//! ```

pub mod backend;
pub mod cache;
pub mod common;
pub mod core;
pub mod inventory;
pub mod location;
pub mod picking;
pub mod queue;
pub mod reservation;

pub use backend::{BackendError, InventoryBackend, MemoryBackend};
pub use cache::{InventoryCache, InventoryView, ViewFilter};
pub use crate::core::{Config, CoreState};
pub use inventory::InventoryService;
pub use location::LocationResolver;
pub use picking::{DebouncedSaver, PickingCart, PickingSession};
pub use queue::{MutationQueue, MutationRegistry, MutationSink, MutationStorage, MutationWorker};
pub use reservation::{AvailableStock, ReservationLedger};
pub use shared::error::{AppError, AppResult, ErrorCode, ErrorKind};

// Re-export logger functions
pub use common::logger::{cleanup_old_logs, init_logger, init_logger_with_file};
