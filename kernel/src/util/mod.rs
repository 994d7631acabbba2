// =============================================================================
// Carousel — Kernel Utilities
// =============================================================================
//
//   panic.rs   the `#[panic_handler]`: banner on serial, then halt
// =============================================================================

pub mod panic;
