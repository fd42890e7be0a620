//! The memory-mapped I/O band.
//!
//! A 64-byte window at [`crate::cpu::MMIO_BASE`] publishes machine state to
//! the guest. The interpreter writes the cycle counter words every tick; the
//! front end seeds the static machine description once at startup. An
//! attached display would additionally update the frame counter and input
//! state words.

use crate::cpu::MMIO_BASE;
use crate::ram::{MemError, Ram};

/// Cycle counter, low word.
pub const MMIO_CLKCNTLO: u32 = 0x00;
/// Cycle counter, high word.
pub const MMIO_CLKCNTHI: u32 = 0x04;
/// Nominal CPU clock frequency in Hz.
pub const MMIO_CPUCLK: u32 = 0x08;
/// Video RAM size in bytes.
pub const MMIO_VRAMSIZE: u32 = 0x0C;
/// Native video width in pixels.
pub const MMIO_VIDWIDTH: u32 = 0x14;
/// Native video height in pixels.
pub const MMIO_VIDHEIGHT: u32 = 0x18;
/// Video refresh rate, 16.16 fixed point.
pub const MMIO_VIDFPS: u32 = 0x1C;
/// Frame counter, written by an attached display.
pub const MMIO_FRAMENO: u32 = 0x20;
/// Key event counter.
pub const MMIO_KEYPTR: u32 = 0x30;
/// Mouse position (x in the low half-word, y in the high).
pub const MMIO_MOUSEPOS: u32 = 0x34;
/// Mouse button state bits.
pub const MMIO_MOUSEBTNS: u32 = 0x38;
/// Board switch state.
pub const MMIO_SWITCHES: u32 = 0x40;
/// Start of the circular key event buffer (16 words).
pub const MMIO_KEYBUF: u32 = 0x80;

/// Seed the static machine-description words. A no-op when RAM does not
/// cover the MMIO band.
pub fn populate(ram: &mut Ram) -> Result<(), MemError> {
    if !ram.valid_range(MMIO_BASE, 64) {
        return Ok(());
    }
    ram.store32(MMIO_BASE + MMIO_CPUCLK, 70_000_000)?;
    ram.store32(MMIO_BASE + MMIO_VRAMSIZE, 128 * 1024)?;
    ram.store32(MMIO_BASE + MMIO_VIDWIDTH, 1920)?;
    ram.store32(MMIO_BASE + MMIO_VIDHEIGHT, 1080)?;
    ram.store32(MMIO_BASE + MMIO_VIDFPS, 60 << 16)?;
    ram.store32(MMIO_BASE + MMIO_SWITCHES, 4)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populate_skips_small_ram() {
        let mut ram = Ram::new(0x1000);
        populate(&mut ram).unwrap();
        // Nothing written, nothing faulted.
        assert_eq!(ram.load32(0x0).unwrap(), 0);
    }

    #[test]
    fn test_populate_seeds_description() {
        let mut ram = Ram::new(0xC000_1000);
        populate(&mut ram).unwrap();
        assert_eq!(ram.load32(MMIO_BASE + MMIO_CPUCLK).unwrap(), 70_000_000);
        assert_eq!(ram.load32(MMIO_BASE + MMIO_VIDWIDTH).unwrap(), 1920);
        assert_eq!(ram.load32(MMIO_BASE + MMIO_SWITCHES).unwrap(), 4);
        // Cycle counter words start at zero.
        assert_eq!(ram.load32(MMIO_BASE + MMIO_CLKCNTLO).unwrap(), 0);
    }
}
