//! Page table management and the kernel's address-space manager.
//!
//! Page-table frames are reached through the HHDM. Intermediate tables are
//! allocated on demand from the bitmap PMM.

use core::ptr;
use core::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use kcore::AddressSpaces;
use x86_64::PhysAddr;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::structures::paging::PhysFrame;

use super::pmm;

bitflags! {
	/// Page-table entry attributes.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct PageFlags: u64 {
		const PRESENT = 1 << 0;
		const WRITABLE = 1 << 1;
		const USER = 1 << 2;
		const WRITE_THROUGH = 1 << 3;
		const CACHE_DISABLE = 1 << 4;
		const HUGE = 1 << 7;
		const NO_EXECUTE = 1 << 63;

		const KERNEL_RW = Self::PRESENT.bits() | Self::WRITABLE.bits();
		/// Uncached kernel mapping for device registers.
		const MMIO = Self::KERNEL_RW.bits()
			| Self::WRITE_THROUGH.bits()
			| Self::CACHE_DISABLE.bits()
			| Self::NO_EXECUTE.bits();
	}
}

static HHDM: AtomicU64 = AtomicU64::new(0);

/// Mask to extract the physical address from a page-table entry.
const PHYS_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// First PML4 slot of the higher half.
const KERNEL_HALF: usize = 256;

const ENTRIES: usize = 512;

/// Out of physical frames while building a table walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfFrames;

/// Record the HHDM offset. Must be called after PMM init.
pub fn init(hhdm_offset: u64) {
	HHDM.store(hhdm_offset, Ordering::Relaxed);
	log::info!("Paging: HHDM at {:#x}", hhdm_offset);
}

pub fn hhdm_offset() -> u64 {
	HHDM.load(Ordering::Relaxed)
}

/// Physical address of the PML4 currently in CR3.
pub fn active_pml4() -> u64 {
	Cr3::read().0.start_address().as_u64()
}

/// Map one 4 KiB page in the active tables and flush its TLB entry.
///
/// # Safety
///
/// `virt` must be page-aligned, `phys` frame-aligned, and the mapping must
/// not alias memory the kernel relies on.
pub unsafe fn map_page(virt: u64, phys: u64, flags: PageFlags) -> Result<(), OutOfFrames> {
	debug_assert!(virt & 0xFFF == 0, "map_page: virt not page-aligned");
	debug_assert!(phys & 0xFFF == 0, "map_page: phys not frame-aligned");

	let hhdm = hhdm_offset();
	let indices = [
		((virt >> 39) & 0x1FF) as usize,
		((virt >> 30) & 0x1FF) as usize,
		((virt >> 21) & 0x1FF) as usize,
	];
	let pt_idx = ((virt >> 12) & 0x1FF) as usize;

	let mut table = active_pml4();
	for index in indices {
		// SAFETY: `table` is a live page-table frame reachable via the HHDM.
		table = unsafe { ensure_table(hhdm, table, index)? };
	}

	// SAFETY: as above; pt_idx < 512.
	unsafe {
		let pt = (hhdm + table) as *mut u64;
		ptr::write_volatile(pt.add(pt_idx), phys | (flags | PageFlags::PRESENT).bits());
	}
	x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(virt));
	Ok(())
}

/// Translate `virt` by walking the active tables. Handles 4 KiB, 2 MiB and
/// 1 GiB pages.
pub fn translate(virt: u64) -> Option<u64> {
	let hhdm = hhdm_offset();
	let mut table = active_pml4();
	let levels = [(39, 0x3FFF_FFFF_u64), (30, 0x3FFF_FFFF), (21, 0x1F_FFFF), (12, 0xFFF)];

	for (depth, (shift, offset_mask)) in levels.into_iter().enumerate() {
		let index = ((virt >> shift) & 0x1FF) as usize;
		// SAFETY: every table on the walk is a present frame under the HHDM.
		let entry = unsafe { ptr::read_volatile(((hhdm + table) as *const u64).add(index)) };
		if entry & PageFlags::PRESENT.bits() == 0 {
			return None;
		}
		let leaf = depth == 3 || (depth > 0 && entry & PageFlags::HUGE.bits() != 0);
		if leaf {
			return Some((entry & PHYS_ADDR_MASK & !offset_mask) | (virt & offset_mask));
		}
		table = entry & PHYS_ADDR_MASK;
	}
	None
}

/// Make `table[index]` point at a next-level table, allocating a zeroed
/// frame when absent. Returns the next table's physical address.
unsafe fn ensure_table(hhdm: u64, table_phys: u64, index: usize) -> Result<u64, OutOfFrames> {
	let table = (hhdm + table_phys) as *mut u64;
	// SAFETY: caller guarantees `table_phys` is a page-table frame.
	let entry = unsafe { ptr::read_volatile(table.add(index)) };
	if entry & PageFlags::PRESENT.bits() != 0 {
		return Ok(entry & PHYS_ADDR_MASK);
	}

	let frame = pmm::alloc_frame().ok_or(OutOfFrames)?;
	// SAFETY: fresh frame from the PMM, mapped by the HHDM.
	unsafe {
		ptr::write_bytes((hhdm + frame) as *mut u8, 0, pmm::FRAME_SIZE as usize);
		ptr::write_volatile(table.add(index), frame | PageFlags::KERNEL_RW.bits());
	}
	Ok(frame)
}

// ── Address spaces ──────────────────────────────────────────────

/// Address-space manager over PML4 frames.
///
/// A clone gets a fresh PML4 whose higher half shares the source's
/// kernel mappings; the lower half starts empty. Handles are PML4
/// physical addresses.
pub struct KernelSpaces;

impl AddressSpaces for KernelSpaces {
	type Handle = u64;

	fn active(&self) -> u64 {
		active_pml4()
	}

	fn clone_space(&self, source: u64) -> Option<u64> {
		let hhdm = hhdm_offset();
		let pml4 = pmm::alloc_frame()?;
		let src = (hhdm + source) as *const u64;
		let dst = (hhdm + pml4) as *mut u64;

		// SAFETY: both frames are whole page tables under the HHDM.
		unsafe {
			ptr::write_bytes(dst, 0, KERNEL_HALF);
			for i in KERNEL_HALF..ENTRIES {
				ptr::write_volatile(dst.add(i), ptr::read_volatile(src.add(i)));
			}
		}
		log::trace!("Paging: cloned PML4 {:#x} -> {:#x}", source, pml4);
		Some(pml4)
	}

	fn switch_to(&self, handle: u64) {
		let (current, _) = Cr3::read();
		if current.start_address().as_u64() == handle {
			return;
		}
		let frame = PhysFrame::containing_address(PhysAddr::new(handle));
		// SAFETY: every handle shares the kernel half, so the code running
		// now stays mapped across the switch.
		unsafe { Cr3::write(frame, Cr3Flags::empty()) };
	}

	fn release(&self, handle: u64) {
		if handle == active_pml4() {
			log::error!("Paging: refusing to release the active PML4 {:#x}", handle);
			return;
		}
		pmm::free_frame(handle);
	}
}
