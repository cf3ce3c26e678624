//! Architecture support.
//!
//! All privileged-instruction and table-format knowledge lives under
//! `arch::x86`. When the crate is compiled for any other architecture (the
//! hosted test build), the `stub` module supplies inert replacements with the
//! same signatures.

#[cfg(target_arch = "x86")]
pub mod x86;

#[cfg(not(target_arch = "x86"))]
#[path = "stub.rs"]
pub mod x86;

pub use x86::{
    disable_interrupts, enable_interrupts, halt_loop, init, invlpg, read_cr2, switch_stacks,
    write_cr3,
};

/// Saved CPU state of a thread at the moment it entered the kernel, in the
/// exact layout the interrupt entry stub pushes it: segment registers, the
/// `pusha` block, the vector/error pair, and the hardware iret frame.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct InterruptFrame {
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

pub const KERNEL_CODE_SELECTOR: u32 = 0x08;
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;
pub const USER_CODE_SELECTOR: u32 = 0x1b;
pub const USER_DATA_SELECTOR: u32 = 0x23;
pub const USER_FS_SELECTOR: u32 = 0x33;

pub const EFLAGS_INTERRUPT_ENABLE: u32 = 1 << 9;
pub const EFLAGS_CARRY: u32 = 1 << 0;

/// 512-byte FXSAVE area, 16-byte aligned.
#[derive(Clone, Copy)]
#[repr(C, align(16))]
pub struct SseState(pub [u8; 512]);

impl Default for SseState {
    fn default() -> Self {
        SseState([0; 512])
    }
}

pub fn exception_name(int_no: u32) -> &'static str {
    match int_no {
        0 => "Divide error",
        1 => "Debug",
        2 => "Non-maskable interrupt",
        3 => "Breakpoint",
        4 => "Overflow",
        5 => "Bound range exceeded",
        6 => "Invalid opcode",
        7 => "Device not available",
        8 => "Double fault",
        10 => "Invalid TSS",
        11 => "Segment not present",
        12 => "Stack-segment fault",
        13 => "General protection fault",
        14 => "Page fault",
        16 => "x87 floating-point exception",
        17 => "Alignment check",
        18 => "Machine check",
        19 => "SIMD floating-point exception",
        _ => "Unknown interrupt",
    }
}
