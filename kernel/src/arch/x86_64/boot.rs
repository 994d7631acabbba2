// =============================================================================
// Carousel — Limine Boot Protocol Interface
// =============================================================================
//
// The kernel image carries static request structures in `.limine_requests`.
// Limine finds them by their magic numbers and fills in response pointers
// before jumping to `kmain`. The accessors below read those responses.
//
// WHAT WE ASK FOR:
//   - HHDM offset      physical memory is mapped at `phys + offset`
//   - Memory map       usable regions for the PMM
//   - Command line     `key=value` tunables for the core
//   - Kernel address   physical/virtual load base, for the boot log
// =============================================================================

use limine::BaseRevision;
use limine::memory_map::Entry;
use limine::request::{
    ExecutableAddressRequest, ExecutableCmdlineRequest, HhdmRequest, MemoryMapRequest,
    RequestsEndMarker, RequestsStartMarker,
};

#[used]
#[unsafe(link_section = ".limine_requests_start")]
static REQUESTS_START: RequestsStartMarker = RequestsStartMarker::new();

/// Protocol revision we were written against.
#[used]
#[unsafe(link_section = ".limine_requests")]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static CMDLINE_REQUEST: ExecutableCmdlineRequest = ExecutableCmdlineRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests")]
static KERNEL_ADDRESS_REQUEST: ExecutableAddressRequest = ExecutableAddressRequest::new();

#[used]
#[unsafe(link_section = ".limine_requests_end")]
static REQUESTS_END: RequestsEndMarker = RequestsEndMarker::new();

/// Did the bootloader accept our base revision?
pub fn revision_supported() -> bool {
    BASE_REVISION.is_supported()
}

/// # Panics
/// Panics if Limine did not answer the HHDM request.
pub fn hhdm_offset() -> u64 {
    HHDM_REQUEST
        .get_response()
        .expect("Limine HHDM response not available")
        .offset()
}

/// The physical memory map, sorted by base address.
///
/// # Panics
/// Panics if Limine did not answer the memory map request.
pub fn memory_map() -> &'static [&'static Entry] {
    MEMORY_MAP_REQUEST
        .get_response()
        .expect("Limine memory map response not available")
        .entries()
}

/// The kernel command line, or `""` when absent or not UTF-8.
pub fn cmdline() -> &'static str {
    CMDLINE_REQUEST
        .get_response()
        .and_then(|response| response.cmdline().to_str().ok())
        .unwrap_or("")
}

/// `(physical_base, virtual_base)` of the kernel image, if reported.
pub fn kernel_address() -> Option<(u64, u64)> {
    KERNEL_ADDRESS_REQUEST
        .get_response()
        .map(|response| (response.physical_base(), response.virtual_base()))
}
