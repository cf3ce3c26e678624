//! Interrupt descriptor table and the common entry stub.
//!
//! Every vector funnels through `isr_common`, which materializes an
//! `InterruptFrame` on the interrupted thread's kernel stack and calls into
//! `task::isr_dispatch`. Vector 0x80 carries DPL 3 so userspace can reach the
//! syscall gate.

use core::arch::{asm, global_asm};
use core::mem::size_of;
use spin::Mutex;

const IDT_ENTRIES: usize = 256;

#[derive(Clone, Copy, Default)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    fn interrupt_gate(handler: u32, dpl: u8) -> Self {
        Self {
            offset_low: (handler & 0xffff) as u16,
            selector: 0x08,
            zero: 0,
            type_attr: 0x8e | (dpl << 5), // present, 32-bit interrupt gate
            offset_high: (handler >> 16) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

static IDT: Mutex<[IdtEntry; IDT_ENTRIES]> =
    Mutex::new([IdtEntry {
        offset_low: 0,
        selector: 0,
        zero: 0,
        type_attr: 0,
        offset_high: 0,
    }; IDT_ENTRIES]);

extern "C" {
    static isr_stub_table: [u32; 48];
    fn isr_stub_syscall();
}

pub fn init() {
    let mut idt = IDT.lock();

    for (vector, &stub) in unsafe { isr_stub_table.iter().enumerate() } {
        idt[vector] = IdtEntry::interrupt_gate(stub, 0);
    }
    idt[0x80] = IdtEntry::interrupt_gate(isr_stub_syscall as usize as u32, 3);

    let pointer = IdtPointer {
        limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
        base: idt.as_ptr() as u32,
    };
    unsafe {
        asm!("lidt [{}]", in(reg) &pointer as *const IdtPointer);
    }
}

global_asm!(
    r#"
.macro ISR_NOERR vector
isr_stub_\vector:
    push 0
    push \vector
    jmp isr_common
.endm

.macro ISR_ERR vector
isr_stub_\vector:
    push \vector
    jmp isr_common
.endm

ISR_NOERR 0
ISR_NOERR 1
ISR_NOERR 2
ISR_NOERR 3
ISR_NOERR 4
ISR_NOERR 5
ISR_NOERR 6
ISR_NOERR 7
ISR_ERR   8
ISR_NOERR 9
ISR_ERR   10
ISR_ERR   11
ISR_ERR   12
ISR_ERR   13
ISR_ERR   14
ISR_NOERR 15
ISR_NOERR 16
ISR_ERR   17
ISR_NOERR 18
ISR_NOERR 19
ISR_NOERR 20
ISR_NOERR 21
ISR_NOERR 22
ISR_NOERR 23
ISR_NOERR 24
ISR_NOERR 25
ISR_NOERR 26
ISR_NOERR 27
ISR_NOERR 28
ISR_NOERR 29
ISR_NOERR 30
ISR_NOERR 31
ISR_NOERR 32
ISR_NOERR 33
ISR_NOERR 34
ISR_NOERR 35
ISR_NOERR 36
ISR_NOERR 37
ISR_NOERR 38
ISR_NOERR 39
ISR_NOERR 40
ISR_NOERR 41
ISR_NOERR 42
ISR_NOERR 43
ISR_NOERR 44
ISR_NOERR 45
ISR_NOERR 46
ISR_NOERR 47

.global isr_stub_syscall
isr_stub_syscall:
    push 0
    push 0x80
    jmp isr_common

isr_common:
    pusha
    push gs
    push fs
    push es
    push ds
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call isr_dispatch
    add esp, 4
    pop ds
    pop es
    pop fs
    pop gs
    popa
    add esp, 8
    iretd

.section .rodata
.global isr_stub_table
.align 4
isr_stub_table:
.irp vector, 0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31,32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47
    .long isr_stub_\vector
.endr
.section .text
"#
);
