//! VGA text-mode writer.
//!
//! The text buffer lives at physical 0xb8000, which the boot page tables map
//! at 0xc00b8000 in every address space. Output scrolls; the bottom row is the
//! insertion row. The same writer backs the kernel log and the write-only
//! console descriptor handed to processes.

use core::fmt::{self, Write};
use spin::Mutex;

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;
const VGA_BUFFER_ADDR: usize = 0xc00b_8000;

#[allow(dead_code)]
#[derive(Clone, Copy)]
#[repr(u8)]
pub enum Color {
    Black = 0x0,
    Blue = 0x1,
    Green = 0x2,
    Cyan = 0x3,
    Red = 0x4,
    Magenta = 0x5,
    Brown = 0x6,
    LightGray = 0x7,
    DarkGray = 0x8,
    LightBlue = 0x9,
    LightGreen = 0xA,
    LightCyan = 0xB,
    LightRed = 0xC,
    Pink = 0xD,
    Yellow = 0xE,
    White = 0xF,
}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(foreground: Color, background: Color) -> Self {
        Self((background as u8) << 4 | (foreground as u8))
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

static VGA_WRITER: Mutex<Writer> = Mutex::new(Writer::new());

pub fn init() {
    VGA_WRITER.lock().clear_screen();
}

pub(crate) fn _print(args: fmt::Arguments<'_>) {
    VGA_WRITER.lock().write_fmt(args).ok();
}

pub fn write_bytes(bytes: &[u8]) {
    let mut writer = VGA_WRITER.lock();
    for &byte in bytes {
        writer.write_byte(byte);
    }
}

/// Run `f` with the foreground color temporarily changed.
pub fn with_color<F: FnOnce(&mut Writer)>(color: Color, f: F) {
    let mut writer = VGA_WRITER.lock();
    let saved = writer.color_code;
    writer.color_code = ColorCode::new(color, Color::Black);
    f(&mut writer);
    writer.color_code = saved;
}

pub struct Writer {
    column_position: usize,
    color_code: ColorCode,
    buffer_ptr: *mut ScreenChar,
}

unsafe impl Send for Writer {}

impl Writer {
    const fn new() -> Self {
        Self {
            column_position: 0,
            color_code: ColorCode::new(Color::LightGray, Color::Black),
            buffer_ptr: VGA_BUFFER_ADDR as *mut ScreenChar,
        }
    }

    fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.column_position >= BUFFER_WIDTH {
                    self.new_line();
                }

                let row = BUFFER_HEIGHT - 1;
                let col = self.column_position;
                unsafe {
                    self.write_at(
                        row,
                        col,
                        ScreenChar {
                            ascii_character: byte,
                            color_code: self.color_code,
                        },
                    );
                }
                self.column_position += 1;
            }
        }
    }

    fn new_line(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                unsafe {
                    let character = self.read_at(row, col);
                    self.write_at(row - 1, col, character);
                }
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
        self.column_position = 0;
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for col in 0..BUFFER_WIDTH {
            unsafe {
                self.write_at(row, col, blank);
            }
        }
    }

    fn clear_screen(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.column_position = 0;
    }

    unsafe fn write_at(&mut self, row: usize, col: usize, value: ScreenChar) {
        #[cfg(target_arch = "x86")]
        core::ptr::write_volatile(self.buffer_ptr.add(row * BUFFER_WIDTH + col), value);
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = (row, col, value);
        }
    }

    unsafe fn read_at(&mut self, row: usize, col: usize) -> ScreenChar {
        #[cfg(target_arch = "x86")]
        return core::ptr::read_volatile(self.buffer_ptr.add(row * BUFFER_WIDTH + col));
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = (row, col);
            ScreenChar {
                ascii_character: b' ',
                color_code: self.color_code,
            }
        }
    }
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}
