//! COM1 console shared by every core.

use core::fmt;
use spin::Mutex;
use uart_16550::SerialPort;
use x86_64::instructions::interrupts;

const COM1: u16 = 0x3F8;

struct SerialConsole {
    port: Option<SerialPort>,
}

impl SerialConsole {
    const fn new() -> Self {
        Self { port: None }
    }

    fn port(&mut self) -> &mut SerialPort {
        self.port.get_or_insert_with(|| {
            let mut port = unsafe { SerialPort::new(COM1) };
            port.init();
            port
        })
    }
}

static CONSOLE: Mutex<SerialConsole> = Mutex::new(SerialConsole::new());

pub fn init() {
    CONSOLE.lock().port();
}

/// Write formatted output. Interrupts stay off while the lock is held so
/// an xcall handler that logs cannot deadlock against its own core.
pub(crate) fn _print(args: fmt::Arguments<'_>) {
    use core::fmt::Write;
    interrupts::without_interrupts(|| {
        let _ = CONSOLE.lock().port().write_fmt(args);
    });
}
