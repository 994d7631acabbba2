//! Kernel heap: a linked-list allocator that grows on demand from the PMM.
//!
//! Thread stacks are freed from the timer trap when killed threads are
//! reaped, so the heap sits behind an interrupt-masking lock.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};

use kcore::IrqMutex;
use linked_list_allocator::Heap;

use super::paging::{self, PageFlags};
use super::pmm::{self, FRAME_SIZE};

/// Virtual base address of the kernel heap (upper half, away from the HHDM).
const HEAP_START: u64 = 0xFFFF_A000_0000_0000;

/// Ceiling on heap growth.
const HEAP_MAX_SIZE: u64 = 16 * 1024 * 1024;

/// Pages mapped by `init`.
const INITIAL_PAGES: u64 = 16;

struct GrowableHeap {
	inner: Heap,
	/// End of the mapped range, growing upward from `HEAP_START`.
	mapped_end: u64,
}

impl GrowableHeap {
	/// Map `bytes` more (rounded up to frames) past `mapped_end`. Returns the
	/// number of bytes actually mapped.
	fn map_more(&mut self, bytes: u64) -> u64 {
		let wanted = bytes.next_multiple_of(FRAME_SIZE).max(FRAME_SIZE);
		let room = HEAP_START + HEAP_MAX_SIZE - self.mapped_end;
		let mut mapped = 0;
		while mapped < wanted.min(room) {
			let Some(phys) = pmm::alloc_frame() else { break };
			// SAFETY: the heap window is reserved for this allocator.
			if unsafe { paging::map_page(self.mapped_end + mapped, phys, PageFlags::KERNEL_RW) }.is_err() {
				pmm::free_frame(phys);
				break;
			}
			mapped += FRAME_SIZE;
		}
		self.mapped_end += mapped;
		mapped
	}
}

// SAFETY: only touched under the allocator's lock.
unsafe impl Send for GrowableHeap {}

pub struct KernelHeap {
	heap: IrqMutex<GrowableHeap>,
}

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap {
	heap: IrqMutex::new(GrowableHeap {
		inner: Heap::empty(),
		mapped_end: HEAP_START,
	}),
};

unsafe impl GlobalAlloc for KernelHeap {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		let mut heap = self.heap.lock();
		if let Ok(block) = heap.inner.allocate_first_fit(layout) {
			return block.as_ptr();
		}

		// Alignment padding may need up to `align` extra bytes.
		let grown = heap.map_more((layout.size() + layout.align()) as u64);
		if grown == 0 {
			return ptr::null_mut();
		}
		// SAFETY: the pages directly after the heap's top were just mapped.
		unsafe { heap.inner.extend(grown as usize) };

		heap.inner
			.allocate_first_fit(layout)
			.map_or(ptr::null_mut(), |block| block.as_ptr())
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		if let Some(block) = NonNull::new(ptr) {
			// SAFETY: `ptr` came from `alloc` with the same layout.
			unsafe { self.heap.lock().inner.deallocate(block, layout) };
		}
	}
}

/// Map the initial heap window. Must be called after PMM and paging init.
///
/// # Safety
///
/// Call exactly once, before the first allocation.
pub unsafe fn init() {
	let mut heap = ALLOCATOR.heap.lock();
	let mapped = heap.map_more(INITIAL_PAGES * FRAME_SIZE);
	if mapped == 0 {
		panic!("heap: no frames for the initial heap window");
	}
	// SAFETY: [HEAP_START, HEAP_START + mapped) is mapped and unused.
	unsafe { heap.inner.init(HEAP_START as *mut u8, mapped as usize) };

	log::info!(
		"Heap: {} KiB at {:#x}..{:#x} (max {} MiB)",
		mapped / 1024,
		HEAP_START,
		heap.mapped_end,
		HEAP_MAX_SIZE / (1024 * 1024),
	);
}

/// Bytes in use and free in the mapped window.
pub fn usage() -> (usize, usize) {
	let heap = ALLOCATOR.heap.lock();
	(heap.inner.used(), heap.inner.free())
}
