//! Multiboot2 entry shim.
//!
//! GRUB drops us at `_start` in 32-bit protected mode with paging off and
//! physical addressing; `.text.boot` is linked at its load address so that
//! works. The shim builds a page directory mapping the first 16 MiB both
//! identity and at the kernel base (0xc0000000), turns paging on, jumps to
//! the higher half, moves the stack there and calls `kmain`. The kernel
//! virtual mapper replaces these boot tables once the frame allocator is up.

use core::arch::global_asm;

global_asm!(
    r#"
.section .multiboot, "a"
.align 8
multiboot2_header_start:
    .long 0xe85250d6                # multiboot2 magic
    .long 0                         # architecture: i386 protected mode
    .long multiboot2_header_end - multiboot2_header_start
    .long -(0xe85250d6 + 0 + (multiboot2_header_end - multiboot2_header_start))
    # end tag
    .word 0
    .word 0
    .long 8
multiboot2_header_end:

.section .bss
.align 4096
boot_page_directory:
    .skip 4096
boot_page_tables:
    .skip 4096 * 4                  # 16 MiB worth of page tables
.align 16
boot_stack_bottom:
    .skip 0x4000
boot_stack_top:

.section .text.boot, "ax"
.global _start
.type _start, @function
_start:
    cli
    # Save the multiboot registers before clobbering them.
    mov edi, eax                    # magic
    mov esi, ebx                    # info address

    # Fill four page tables covering phys 0..16MiB.
    lea edx, [boot_page_tables - 0xc0000000]
    mov ecx, 0
1:
    mov eax, ecx
    shl eax, 12                     # frame address
    or eax, 0x003                   # present | writable
    mov [edx + ecx * 4], eax
    inc ecx
    cmp ecx, 4096
    jne 1b

    # Point directory entries 0..3 (identity) and 768..771 (higher half)
    # at those tables.
    lea eax, [boot_page_directory - 0xc0000000]
    mov ecx, 0
2:
    mov edx, ecx
    shl edx, 12
    lea ebx, [boot_page_tables - 0xc0000000]
    add ebx, edx
    or ebx, 0x003
    mov [eax + ecx * 4], ebx
    mov [eax + (768 + ecx) * 4], ebx
    inc ecx
    cmp ecx, 4
    jne 2b

    mov cr3, eax
    mov eax, cr0
    or eax, 0x80010000              # PG | WP
    mov cr0, eax

    # Enable SSE (fxsave/fxrstor of thread state depends on it).
    mov eax, cr0
    and eax, 0xFFFFFFFB             # clear EM
    or eax, 0x2                     # set MP
    mov cr0, eax
    mov eax, cr4
    or eax, 0x600                   # OSFXSR | OSXMMEXCPT
    mov cr4, eax

    # The identity mapping keeps the next fetch alive; jump to the linked
    # (virtual) addresses for good.
    lea eax, [boot_higher_half]
    jmp eax

.section .text
.global boot_higher_half
.type boot_higher_half, @function
boot_higher_half:
    lea esp, [boot_stack_top]
    push edi                        # magic
    push esi                        # multiboot info (physical)
    call kmain
3:
    cli
    hlt
    jmp 3b
"#
);
