//! Legacy 8259 interrupt controllers, remapped to vectors 32..48.

use pic8259::ChainedPics;
use spin::Mutex;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

pub fn init() {
    unsafe {
        let mut pics = PICS.lock();
        pics.initialize();
        // Only the timer line is unmasked; there are no other in-kernel
        // drivers behind the PIC.
        pics.write_masks(0xfe, 0xff);
    }
}

pub fn end_of_interrupt(irq: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + irq);
    }
}
