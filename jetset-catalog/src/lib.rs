pub mod inventory;

pub use inventory::{InMemorySeatAllocator, InventoryError, SeatAllocator};
