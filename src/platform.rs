use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// Everything the store needs from its target: NOR flash access plus a
/// CRC-8 primitive. See README.md for an example implementation.
///
/// If the flash bank needs unlocking before it accepts programming,
/// that bracketing belongs inside the `NorFlash` implementation.
pub trait Platform: Crc8 + NorFlash + ReadNorFlash {}

impl<T: Crc8 + NorFlash + ReadNorFlash> Platform for T {}

pub type FnCrc8 = fn(init: u8, data: &[u8]) -> u8;

/// CRC-8 accumulator, chained through `init`: feeding a buffer in
/// slices must give the same result as feeding it whole.
///
/// The polynomial is part of the on-flash format: standard CRC-8
/// (polynomial 0x07), init 0x00, no reflection, no final xor. Check
/// value: `crc8(0, b"123456789") == 0xF4`.
pub trait Crc8 {
    fn crc8(init: u8, data: &[u8]) -> u8;
}

impl<T: Crc8> Crc8 for &mut T {
    fn crc8(init: u8, data: &[u8]) -> u8 {
        T::crc8(init, data)
    }
}
