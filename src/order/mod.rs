// =============================================================================
// Order lifecycle — position book, coordinator state machine, watchdog
// =============================================================================

pub mod book;
pub mod coordinator;
pub mod watchdog;

pub use book::{PendingOrder, Position, PositionBook};
pub use coordinator::OrderCoordinator;
pub use watchdog::OrderWatchdog;
