//! CPU exception classification (vectors 0–31).

/// Message shown for each exception vector.
const MESSAGES: [&str; 32] = [
    "Division by zero",
    "Debug",
    "Non-maskable interrupt",
    "Breakpoint",
    "Detected overflow",
    "Out-of-bounds",
    "Invalid opcode",
    "No coprocessor",
    "Double fault",
    "Coprocessor segment overrun",
    "Bad TSS",
    "Segment not present",
    "Stack fault",
    "General protection fault",
    "Page fault",
    "Unknown interrupt",
    "Coprocessor fault",
    "Alignment check",
    "Machine check",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
    "Reserved",
];

/// Human-readable name of an exception vector.
pub fn describe(vector: u8) -> &'static str {
    MESSAGES
        .get(vector as usize)
        .copied()
        .unwrap_or("Unknown interrupt")
}

/// Whether the diagnostic prints the error code: double fault and the
/// segment/paging faults 10–14.
pub fn reports_error_code(vector: u8) -> bool {
    matches!(vector, 8 | 10..=14)
}

/// What the dispatcher does after diagnosing an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionPolicy {
    /// Print the banner and halt the core.
    #[default]
    Fatal,
    /// Log and resume the interrupted context. Debug builds only.
    Report,
}

impl ExceptionPolicy {
    /// `Report` outside a debug build degrades to `Fatal`.
    pub fn effective(self) -> Self {
        if cfg!(debug_assertions) { self } else { Self::Fatal }
    }
}
