//! Inert architecture layer for hosted builds.
//!
//! The kernel library is unit-tested on the build host, where none of the
//! privileged i386 instructions exist. These replacements keep the same
//! signatures; anything that would transfer control to hardware is a no-op or
//! an abort.

pub fn init() {}

pub fn halt_loop() -> ! {
    panic!("halt_loop() reached in hosted build");
}

pub fn enable_interrupts() {}

pub fn disable_interrupts() {}

pub fn read_cr2() -> u32 {
    0
}

pub unsafe fn write_cr3(_phys: u32) {}

pub unsafe fn invlpg(_virt: u32) {}

pub unsafe fn switch_stacks(_save_esp: *mut u32, _load_esp: u32) {}

pub fn set_kernel_stack(_top: u32) {}

pub fn set_fsbase(_base: u32) {}

pub unsafe fn fxsave(_area: *mut u8) {}

pub unsafe fn fxrstor(_area: *const u8) {}

pub fn read_tsc() -> u64 {
    0
}

pub fn wait_for_interrupt() {}

pub fn end_of_interrupt(_irq: u8) {}
