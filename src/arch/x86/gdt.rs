//! Global descriptor table and TSS.
//!
//! Selector layout (fixed; the interrupt stubs and thread construction rely
//! on it): 0x08 kernel code, 0x10 kernel data, 0x1b user code, 0x23 user
//! data/stack, 0x28 TSS, 0x33 the per-thread %fs segment whose base the
//! scheduler rewrites on every switch.

use core::arch::asm;
use core::mem::size_of;
use spin::Mutex;

const GDT_ENTRIES: usize = 7;

#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn new(base: u32, limit: u32, access: u8, granularity: u8) -> Self {
        Self {
            limit_low: (limit & 0xffff) as u16,
            base_low: (base & 0xffff) as u16,
            base_middle: ((base >> 16) & 0xff) as u8,
            access,
            granularity: (((limit >> 16) & 0x0f) as u8) | (granularity & 0xf0),
            base_high: ((base >> 24) & 0xff) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// 32-bit task state segment. Only `ss0`/`esp0` (and the IO map offset) are
/// meaningful; hardware task switching is not used.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct TaskStateSegment {
    link: u32,
    esp0: u32,
    ss0: u32,
    unused: [u32; 23],
    iomap_base: u16,
    trailer: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            link: 0,
            esp0: 0,
            ss0: super::super::KERNEL_DATA_SELECTOR,
            unused: [0; 23],
            iomap_base: size_of::<TaskStateSegment>() as u16,
            trailer: 0,
        }
    }
}

struct GdtState {
    entries: [GdtEntry; GDT_ENTRIES],
    tss: TaskStateSegment,
}

static GDT: Mutex<GdtState> = Mutex::new(GdtState {
    entries: [GdtEntry::new(0, 0, 0, 0); GDT_ENTRIES],
    tss: TaskStateSegment::new(),
});

pub fn init() {
    let mut gdt = GDT.lock();

    // access bytes: present | ring | code/data | type
    gdt.entries[0] = GdtEntry::new(0, 0, 0, 0);
    gdt.entries[1] = GdtEntry::new(0, 0xfffff, 0x9a, 0xc0); // kernel code
    gdt.entries[2] = GdtEntry::new(0, 0xfffff, 0x92, 0xc0); // kernel data
    gdt.entries[3] = GdtEntry::new(0, 0xfffff, 0xfa, 0xc0); // user code
    gdt.entries[4] = GdtEntry::new(0, 0xfffff, 0xf2, 0xc0); // user data
    let tss_base = &gdt.tss as *const _ as u32;
    gdt.entries[5] = GdtEntry::new(tss_base, size_of::<TaskStateSegment>() as u32 - 1, 0x89, 0x00);
    gdt.entries[6] = GdtEntry::new(0, 0xfffff, 0xf2, 0xc0); // user %fs, base set per thread

    let pointer = GdtPointer {
        limit: (size_of::<[GdtEntry; GDT_ENTRIES]>() - 1) as u16,
        base: gdt.entries.as_ptr() as u32,
    };

    unsafe {
        asm!(
            "lgdt [{ptr}]",
            "mov ax, 0x10",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            // reload cs with a far jump through the new code segment
            "push 0x08",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            "mov ax, 0x28",
            "ltr ax",
            ptr = in(reg) &pointer as *const GdtPointer,
            out("eax") _,
        );
    }
}

/// Point esp0 at the top of the about-to-run thread's kernel stack so the
/// next privilege transition lands there.
pub fn set_kernel_stack(top: u32) {
    GDT.lock().tss.esp0 = top;
}

/// Rewrite the base of the user %fs segment (TLS anchor of the running
/// thread) and force a reload of the cached descriptor.
pub fn set_fsbase(base: u32) {
    {
        let mut gdt = GDT.lock();
        gdt.entries[6] = GdtEntry::new(base, 0xfffff, 0xf2, 0xc0);
    }
    unsafe {
        asm!("mov ax, 0x33", "mov fs, ax", out("eax") _);
    }
}
