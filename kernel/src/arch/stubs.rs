//! Trap entry assembly.
//!
//! 256 stubs, 16 bytes apart from `trap_stubs_start`. Each pushes a zero
//! error code when the CPU did not push one, then its vector number, and
//! jumps to `trap_common`, which saves the general-purpose registers in
//! `TrapFrame` order and calls `trap_dispatch(&mut TrapFrame)`.
//!
//! The dispatcher may overwrite the frame with another thread's. Restoring
//! from it and `iretq` then resume that thread, on its own stack.

use core::arch::global_asm;

/// Distance between consecutive stubs.
pub const STUB_SIZE: u64 = 16;

global_asm!(
    r#"
    .section .text.trap_stubs, "ax"
    .global trap_stubs_start
    .p2align 4
trap_stubs_start:
    .set trap_vec, 0
    .rept 256
    .p2align 4
    .if (trap_vec == 8) || ((trap_vec >= 10) && (trap_vec <= 14)) || (trap_vec == 17) || (trap_vec == 21) || (trap_vec == 29) || (trap_vec == 30)
    .else
    pushq $0
    .endif
    pushq $trap_vec
    jmp trap_common
    .set trap_vec, trap_vec + 1
    .endr

trap_common:
    pushq %rax
    pushq %rbx
    pushq %rcx
    pushq %rdx
    pushq %rsi
    pushq %rdi
    pushq %rbp
    pushq %r8
    pushq %r9
    pushq %r10
    pushq %r11
    pushq %r12
    pushq %r13
    pushq %r14
    pushq %r15
    cld
    movq %rsp, %rdi
    movq %rsp, %rbx
    andq $-16, %rsp
    call trap_dispatch
    movq %rbx, %rsp
    popq %r15
    popq %r14
    popq %r13
    popq %r12
    popq %r11
    popq %r10
    popq %r9
    popq %r8
    popq %rbp
    popq %rdi
    popq %rsi
    popq %rdx
    popq %rcx
    popq %rbx
    popq %rax
    addq $16, %rsp
    iretq
    .text
"#,
    options(att_syntax)
);

unsafe extern "C" {
    static trap_stubs_start: u8;
}

/// Address of the entry stub for `vector`.
pub fn entry(vector: u8) -> u64 {
    // SAFETY: only the symbol's address is taken.
    let start = unsafe { &raw const trap_stubs_start } as u64;
    start + vector as u64 * STUB_SIZE
}
