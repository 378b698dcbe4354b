// =============================================================================
// Control surface — thin HTTP layer over the engine
// =============================================================================

pub mod rest;
