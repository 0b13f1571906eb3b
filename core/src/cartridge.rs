//! Everything related to the cartridge (game pak) and its header.

use std::fmt;

use log::warn;


/// Maximum size of a game pak ROM: 32 MiB, the full wait-state 0 mirror.
pub const MAX_ROM_SIZE: usize = 32 * 1024 * 1024;

/// A loaded cartridge.
///
/// The interesting parts of the header start at offset 0xA0: 12 bytes of
/// game title, 4 bytes of game code, 2 bytes of maker code. The byte at 0xBD
/// is the header complement check over 0xA0..=0xBC.
pub struct Cartridge {
    rom: Vec<u8>,
    title: String,
    game_code: String,
}

impl Cartridge {
    /// Creates a cartridge from the raw bytes of a ROM image.
    ///
    /// The image has to be at most 32 MiB. A bad header checksum is not an
    /// error (plenty of homebrew doesn't bother), but it is logged.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() > MAX_ROM_SIZE {
            return Err(CartridgeError::TooLarge(bytes.len()));
        }

        let (title, game_code) = if bytes.len() >= 0xC0 {
            if !header_checksum_ok(bytes) {
                warn!("Cartridge header complement check failed");
            }

            (ascii_field(&bytes[0xA0..0xAC]), ascii_field(&bytes[0xAC..0xB0]))
        } else {
            // Too small to even hold a header. Raw test ROMs do this; the
            // CPU doesn't care.
            warn!("ROM image is smaller than the cartridge header");
            (String::new(), String::new())
        };

        Ok(Self {
            rom: bytes.to_vec(),
            title,
            game_code,
        })
    }

    /// The raw ROM bytes.
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// The game title from the header (trimmed, ASCII).
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The 4 character game code from the header.
    pub fn game_code(&self) -> &str {
        &self.game_code
    }
}

impl fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cartridge")
            .field("title", &self.title)
            .field("game_code", &self.game_code)
            .field("rom_size", &self.rom.len())
            .finish()
    }
}

/// Checks the header complement at 0xBD: the sum of the bytes 0xA0..=0xBC
/// plus the complement plus 0x19 has to be 0 modulo 256.
fn header_checksum_ok(bytes: &[u8]) -> bool {
    let sum = bytes[0xA0..=0xBC]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));

    sum.wrapping_add(bytes[0xBD]).wrapping_add(0x19) == 0
}

/// Decodes a fixed size, zero padded ASCII header field.
fn ascii_field(bytes: &[u8]) -> String {
    bytes.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}


/// Why a ROM image could not be used as a cartridge.
#[derive(Debug)]
pub enum CartridgeError {
    /// The image is larger than the 32 MiB game pak address space.
    TooLarge(usize),
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CartridgeError::TooLarge(size) => {
                write!(f, "ROM image is {} bytes, but a game pak holds at most {} bytes",
                    size, MAX_ROM_SIZE)
            }
        }
    }
}

impl std::error::Error for CartridgeError {}


#[cfg(test)]
mod test {
    use super::*;


    fn rom_with_header(title: &[u8], code: &[u8]) -> Vec<u8> {
        let mut rom = vec![0u8; 0xC0];
        rom[0xA0..0xA0 + title.len()].copy_from_slice(title);
        rom[0xAC..0xAC + code.len()].copy_from_slice(code);

        // Fix up the complement check.
        let sum = rom[0xA0..=0xBC].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        rom[0xBD] = 0u8.wrapping_sub(sum).wrapping_sub(0x19);

        rom
    }

    #[test]
    fn test_header_fields() {
        let rom = rom_with_header(b"TESTGAME", b"ATST");
        let cartridge = Cartridge::from_bytes(&rom).unwrap();

        assert_eq!(cartridge.title(), "TESTGAME");
        assert_eq!(cartridge.game_code(), "ATST");
        assert!(header_checksum_ok(cartridge.rom()));
    }

    #[test]
    fn test_headerless_rom_is_fine() {
        // A four byte "ROM" (single instruction) is accepted.
        let cartridge = Cartridge::from_bytes(&[0xFE, 0xFF, 0xFF, 0xEA]).unwrap();
        assert_eq!(cartridge.title(), "");
    }

    #[test]
    fn test_oversized_rom_is_rejected() {
        let rom = vec![0u8; MAX_ROM_SIZE + 1];
        assert!(matches!(
            Cartridge::from_bytes(&rom),
            Err(CartridgeError::TooLarge(_)),
        ));
    }
}
