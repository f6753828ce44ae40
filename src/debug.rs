//! Kernel console output.
//!
//! The teacher writes straight to the serial port with hand-rolled `inb`/
//! `outb` (see `debug.rs` upstream); that's x86-specific and this crate
//! targets a MIPS-style machine, so the byte sink is abstracted behind a
//! `Console` trait that the concrete kernel binary registers at boot. The
//! `printk!` macro and the rest of this crate don't change.

use core::fmt::{self, Write};

use spin::Mutex;

/// Something that can receive raw kernel console bytes.
pub trait Console: Send {
    /// Write `bytes` to the console, blocking if necessary.
    fn write_bytes(&self, bytes: &[u8]);
}

static CONSOLE: Mutex<Option<&'static dyn Console>> = Mutex::new(None);

/// Register the console backend. Called once during boot, before the first
/// `printk!`.
pub fn set_console(console: &'static dyn Console) {
    *CONSOLE.lock() = Some(console);
}

/// A `core::fmt::Write` adapter over the registered console. `printk!`
/// writes through this; if no console has been registered yet the bytes are
/// silently dropped rather than panicking, so very early boot messages don't
/// crash the kernel before `set_console` runs.
pub struct Printer;

impl Write for Printer {
    fn write_str(&mut self, data: &str) -> fmt::Result {
        if let Some(console) = *CONSOLE.lock() {
            console.write_bytes(data.as_bytes());
        }
        Ok(())
    }
}

/// Print a formatted message to the kernel console.
#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => ({
        use ::core::fmt::Write;
        let _ = write!($crate::debug::Printer, $($arg)*);
    })
}
