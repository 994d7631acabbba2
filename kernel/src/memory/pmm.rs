//! Bitmap-based Physical Memory Manager (PMM).
//!
//! Tracks 4 KiB page frames with a simple bitmap: bit **1** = used, bit **0** = free.
//! The bitmap itself is carved from the first usable region large enough to hold it.
//!
//! Frames are returned from trap context (address spaces of reaped threads),
//! so the allocator lives behind an interrupt-masking lock.

use kcore::IrqMutex;
use limine::memory_map::{Entry, EntryType};

/// Size of a single page frame.
pub const FRAME_SIZE: u64 = 4096;

/// Global PMM instance, initialised once at boot.
static PMM: IrqMutex<Option<BitmapAllocator>> = IrqMutex::new(None);

/// A bitmap-based physical frame allocator.
struct BitmapAllocator {
	/// Virtual address of the bitmap (accessed via HHDM).
	bitmap: *mut u8,
	/// Total number of page frames tracked by the bitmap.
	total_frames: usize,
	/// Current number of free (allocatable) frames.
	free_frames: usize,
	/// Byte index where the last successful allocation was found.
	search_hint: usize,
}

// SAFETY: the bitmap pointer is only accessed under the PMM lock.
unsafe impl Send for BitmapAllocator {}

/// Snapshot for the boot log.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
	pub total_frames: usize,
	pub free_frames: usize,
}

// ── Init ────────────────────────────────────────────────────────

/// Initialise the physical memory manager from the Limine memory map.
///
/// # Safety
///
/// Must be called exactly once during early kernel init, after HHDM is available.
pub unsafe fn init(hhdm_offset: u64, entries: &[&Entry]) {
	// ── 1. Highest usable physical address ──
	let max_usable_addr = entries
		.iter()
		.filter(|e| e.entry_type == EntryType::USABLE)
		.map(|e| e.base + e.length)
		.max()
		.unwrap_or(0);

	let total_frames = (max_usable_addr / FRAME_SIZE) as usize;
	let bitmap_bytes = total_frames.div_ceil(8);
	let bitmap_size = (bitmap_bytes as u64).next_multiple_of(FRAME_SIZE);
	let bitmap_frames = (bitmap_size / FRAME_SIZE) as usize;

	// ── 2. A usable region big enough for the bitmap (never frame 0) ──
	let bitmap_phys = entries
		.iter()
		.filter(|e| e.entry_type == EntryType::USABLE)
		.find_map(|e| {
			let candidate = e.base.max(FRAME_SIZE);
			(candidate + bitmap_size <= e.base + e.length).then_some(candidate)
		});
	let Some(bitmap_phys) = bitmap_phys else {
		panic!("no usable region large enough for the PMM bitmap");
	};
	let bitmap = (hhdm_offset + bitmap_phys) as *mut u8;

	// SAFETY: the bitmap region is usable RAM reachable through the HHDM and
	// every index below is < bitmap_bytes.
	let free_frames = unsafe {
		// ── 3. Everything used ──
		core::ptr::write_bytes(bitmap, 0xFF, bitmap_bytes);

		// ── 4. Free the usable regions ──
		let mut free = 0usize;
		for entry in entries.iter().filter(|e| e.entry_type == EntryType::USABLE) {
			let start = (entry.base / FRAME_SIZE) as usize;
			let count = (entry.length / FRAME_SIZE) as usize;
			for frame in start..(start + count).min(total_frames) {
				*bitmap.add(frame / 8) &= !(1u8 << (frame % 8));
				free += 1;
			}
		}

		// ── 5. Re-mark the bitmap's own frames, and frame 0 ──
		let first = (bitmap_phys / FRAME_SIZE) as usize;
		for frame in first..first + bitmap_frames {
			*bitmap.add(frame / 8) |= 1u8 << (frame % 8);
			free -= 1;
		}
		if total_frames > 0 && *bitmap & 1 == 0 {
			*bitmap |= 1;
			free -= 1;
		}
		free
	};

	log::info!(
		"PMM: {} frames tracked, {} free ({} MiB), bitmap at {:#x}",
		total_frames,
		free_frames,
		(free_frames * FRAME_SIZE as usize) / (1024 * 1024),
		bitmap_phys,
	);

	*PMM.lock() = Some(BitmapAllocator {
		bitmap,
		total_frames,
		free_frames,
		search_hint: 0,
	});
}

// ── Allocation / Free ───────────────────────────────────────────

/// Allocate a single 4 KiB physical frame. Returns its **physical address**.
pub fn alloc_frame() -> Option<u64> {
	PMM.lock().as_mut()?.alloc()
}

/// Allocate `count` physically contiguous frames.
pub fn alloc_contiguous(count: usize) -> Option<u64> {
	PMM.lock().as_mut()?.alloc_run(count)
}

/// Return a frame. Misaligned, out-of-range and double frees are logged and
/// ignored.
pub fn free_frame(phys_addr: u64) {
	if let Some(alloc) = PMM.lock().as_mut() {
		alloc.free(phys_addr);
	}
}

pub fn stats() -> Stats {
	PMM.lock().as_ref().map_or(
		Stats { total_frames: 0, free_frames: 0 },
		|a| Stats { total_frames: a.total_frames, free_frames: a.free_frames },
	)
}

impl BitmapAllocator {
	fn is_used(&self, frame: usize) -> bool {
		// SAFETY: callers keep `frame < total_frames`.
		unsafe { *self.bitmap.add(frame / 8) & (1u8 << (frame % 8)) != 0 }
	}

	fn set_used(&mut self, frame: usize, used: bool) {
		// SAFETY: callers keep `frame < total_frames`.
		unsafe {
			let byte = self.bitmap.add(frame / 8);
			if used {
				*byte |= 1u8 << (frame % 8);
			} else {
				*byte &= !(1u8 << (frame % 8));
			}
		}
	}

	/// Search from the hint, wrapping around.
	fn alloc(&mut self) -> Option<u64> {
		let bytes = self.total_frames.div_ceil(8);
		for offset in 0..bytes {
			let byte_idx = (self.search_hint + offset) % bytes;
			// SAFETY: byte_idx < bytes.
			let byte = unsafe { *self.bitmap.add(byte_idx) };
			if byte == 0xFF {
				continue;
			}
			let frame = byte_idx * 8 + byte.trailing_ones() as usize;
			if frame >= self.total_frames {
				continue;
			}
			self.set_used(frame, true);
			self.free_frames -= 1;
			self.search_hint = byte_idx;
			return Some(frame as u64 * FRAME_SIZE);
		}
		None
	}

	fn alloc_run(&mut self, count: usize) -> Option<u64> {
		if count == 0 {
			return None;
		}
		let mut run_start = 0;
		for frame in 0..self.total_frames {
			if self.is_used(frame) {
				run_start = frame + 1;
				continue;
			}
			if frame + 1 - run_start == count {
				for f in run_start..=frame {
					self.set_used(f, true);
				}
				self.free_frames -= count;
				return Some(run_start as u64 * FRAME_SIZE);
			}
		}
		None
	}

	fn free(&mut self, phys_addr: u64) {
		let frame = (phys_addr / FRAME_SIZE) as usize;
		if phys_addr % FRAME_SIZE != 0 || frame >= self.total_frames {
			log::error!("PMM: bad free of {:#x}", phys_addr);
			return;
		}
		if !self.is_used(frame) {
			log::error!("PMM: double free of frame {:#x}", phys_addr);
			return;
		}
		self.set_used(frame, false);
		self.free_frames += 1;
	}
}
