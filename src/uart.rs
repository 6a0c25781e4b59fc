use core::ptr;

use crate::memlayout::UART0;
use crate::proc;
use crate::spinlock::SpinLock;

// UART control registers are memory-mapped at address UART0.
// http://byterunner.com/16550.html

/// Transmit Holding Register (for output bytes)
const THR: usize = 0;

/// Interrupt Enable Register
const IER: usize = 1;

/// FIFO Control Register
const FCR: usize = 2;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
/// Clear the content of the two FIFOs
const FCR_FIFO_CLEAR: u8 = 3 << 1;

/// Line Control Register
const LCR: usize = 3;
const LCR_EIGHT_BITS: u8 = 3;
/// Special mode to set baud rate
const LCR_BAUD_LATCH: u8 = 1 << 7;

/// Line Status Register
const LSR: usize = 5;
/// THR can accept another character to send
const LSR_TX_IDLE: u8 = 1 << 5;

pub static UART: SpinLock<Uart> = SpinLock::new(Uart::new(UART0), "uart");

#[derive(Debug)]
pub struct Uart {
    base_address: usize,
}

impl Uart {
    pub const fn new(base_address: usize) -> Self {
        Self { base_address }
    }

    /// Read a byte from the given UART register.
    fn read(&self, reg: usize) -> u8 {
        unsafe { ptr::read_volatile((self.base_address as *mut u8).add(reg)) }
    }

    /// Write a byte to the given UART register.
    fn write(&mut self, reg: usize, value: u8) {
        unsafe { ptr::write_volatile((self.base_address as *mut u8).add(reg), value) }
    }

    /// Initialize the UART to 38.4K baud, 8 data bits, no parity, one stop bit.
    pub fn init(&mut self) {
        // disable interrupts
        self.write(IER, 0x00);

        // special mode to set baud rate
        self.write(LCR, LCR_BAUD_LATCH);

        // LSB for baud rate of 38.4K
        self.write(0, 0x03);
        // MSB for baud rate of 38.4K
        self.write(1, 0x00);

        // leave set-baud mode
        self.write(LCR, LCR_EIGHT_BITS);

        // reset and enable FIFOs
        self.write(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
    }
}

/// Sends a byte over UART, spinning until the transmit register is free.
///
/// Used by the kernel's `print!`/`println!` macros and panic output, where no
/// interrupt-driven buffering is available.
pub fn putc_sync(c: u8) {
    let _intr_lock = proc::lock_current_cpu();

    // Safety: interrupts are disabled by `_intr_lock`, so we are the only
    // caller that can be touching the UART right now.
    let uart = unsafe { UART.get_mut_unchecked() };

    while (uart.read(LSR) & LSR_TX_IDLE) == 0 {}
    uart.write(THR, c);
}

/// # Safety
/// Must be called only once during kernel initialization.
pub unsafe fn init() {
    unsafe { UART.get_mut_unchecked().init() }
}
