//! Gate installation: every vector points at its assembly stub.

use kcore::VECTOR_COUNT;
use kcore::vectors::GateOptions;

use super::Kernel;
use crate::arch::stubs;
use crate::arch::tss::DOUBLE_FAULT_IST;

/// Double fault.
const DOUBLE_FAULT: u8 = 8;

pub(super) fn install_all(kernel: &Kernel) {
    for vector in 0..VECTOR_COUNT {
        let vector = vector as u8;
        let mut options = GateOptions::kernel_interrupt();
        if vector == DOUBLE_FAULT {
            options = options.set_stack_index(DOUBLE_FAULT_IST);
        }
        kernel.install(vector, stubs::entry(vector), options);
    }
    log::debug!("{} gates installed, #DF on IST{}", VECTOR_COUNT, DOUBLE_FAULT_IST);
}
