// Domain layers - business logic on top of the kernel infrastructure.
//
// Each domain owns its job payloads and handlers and registers them with
// the handler registry during bootstrap.

pub mod matching;
pub mod sync;
pub mod watchlist;

use crate::kernel::jobs::registry::HandlerRegistry;

/// Build the full handler registry. Called once from bootstrap; the
/// registry is read-only afterwards.
pub fn build_handler_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    sync::register_sync_jobs(&mut registry);
    matching::register_matching_jobs(&mut registry);
    watchlist::register_watchlist_jobs(&mut registry);
    registry
}
