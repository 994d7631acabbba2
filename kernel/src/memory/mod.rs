//! Physical memory, paging and the kernel heap.

pub mod heap;
pub mod paging;
pub mod pmm;

use limine::memory_map::{Entry, EntryType};

use self::paging::{OutOfFrames, PageFlags};

/// Make the 4 KiB register page at `phys` reachable at `hhdm + phys`,
/// uncached. Limine's HHDM only covers RAM, so device pages such as the
/// local APIC and I/O APIC need an explicit mapping. Returns the virtual
/// address.
///
/// # Safety
///
/// `phys` must be a device register page, not RAM in use.
pub unsafe fn map_mmio(phys: u64) -> Result<u64, OutOfFrames> {
	let page = phys & !(pmm::FRAME_SIZE - 1);
	let virt = paging::hhdm_offset() + page;
	if paging::translate(virt) == Some(page) {
		return Ok(virt + (phys - page));
	}
	// SAFETY: caller guarantees `phys` is MMIO; the HHDM slot is free.
	unsafe { paging::map_page(virt, page, PageFlags::MMIO)? };
	log::debug!("MMIO: {:#x} -> {:#x}", page, virt);
	Ok(virt + (phys - page))
}

fn entry_type_name(et: EntryType) -> &'static str {
	match et {
		EntryType::USABLE => "Usable",
		EntryType::RESERVED => "Reserved",
		EntryType::ACPI_RECLAIMABLE => "ACPI Reclaimable",
		EntryType::ACPI_NVS => "ACPI NVS",
		EntryType::BAD_MEMORY => "Bad Memory",
		EntryType::BOOTLOADER_RECLAIMABLE => "Bootloader Reclaimable",
		EntryType::EXECUTABLE_AND_MODULES => "Kernel/Modules",
		EntryType::FRAMEBUFFER => "Framebuffer",
		_ => "Unknown",
	}
}

/// Log the Limine memory map at debug level. Returns usable bytes.
pub fn census(entries: &[&Entry]) -> u64 {
	let mut usable = 0;
	for entry in entries {
		log::debug!(
			"  {:<22} {:#016x}..{:#016x} ({} KiB)",
			entry_type_name(entry.entry_type),
			entry.base,
			entry.base + entry.length,
			entry.length / 1024,
		);
		if entry.entry_type == EntryType::USABLE {
			usable += entry.length;
		}
	}
	log::info!("Memory: {} regions, {} MiB usable", entries.len(), usable / (1024 * 1024));
	usable
}
