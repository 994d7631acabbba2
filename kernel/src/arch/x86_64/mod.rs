// =============================================================================
// Carousel — x86_64 Boot and CPU Support
// =============================================================================
//
//   boot.rs   Limine boot protocol requests and typed accessors
//   cpu.rs    idle and halt
// =============================================================================

pub mod boot;
pub mod cpu;
