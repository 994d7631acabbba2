//! Hardware access layer.
//!
//! Thin, stateless-as-possible drivers for the devices the trap and
//! scheduling core touches: the COM1 console, both interrupt controller
//! generations, and the PIT that produces the scheduler tick.
#![cfg_attr(not(test), no_std)]

pub mod apic;
pub mod ioapic;
pub mod pic;
pub mod pit;
pub mod serial;
