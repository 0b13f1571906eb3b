//! Advanboi!
//!
//! A Game Boy Advance emulator core: an ARM7TDMI (ARMv4T) interpreter with
//! ARM and Thumb decoding, the wait-state accounting memory bus and a
//! scanline based pixel engine for the bitmap video modes. Everything that
//! touches the host (window, files, CLI) lives in the frontend crate.

use log::info;

use crate::{
    cartridge::Cartridge,
    env::Display,
    machine::Machine,
    primitives::CYCLES_PER_FRAME,
};


pub mod instr;
pub mod primitives;
pub mod env;
pub mod cartridge;
pub mod machine;


/// Width of the GBA screen in pixels.
pub const SCREEN_WIDTH: usize = 240;

/// Height of the GBA screen in pixels.
pub const SCREEN_HEIGHT: usize = 160;


pub struct Emulator {
    machine: Machine,
}

impl Emulator {
    /// Creates a new emulator from a cartridge and a 16 KiB BIOS image.
    ///
    /// With `skip_bios` the CPU starts directly at the cartridge entry point
    /// (with the register state the BIOS would have left behind); otherwise
    /// execution starts at the reset vector inside the BIOS.
    pub fn new(cartridge: Cartridge, bios: &[u8], skip_bios: bool) -> Self {
        info!("Creating emulator");

        Self {
            machine: Machine::new(cartridge, bios, skip_bios),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Executes until the pixel engine has finished one frame (in most cases
    /// exactly 280,896 cycles).
    ///
    /// When this returns `Ok`, one new frame has been handed to `display`.
    /// The only case in which no frame is presented is the fallback path
    /// where a full frame worth of cycles passed without the pixel engine
    /// reaching V-blank.
    #[inline(never)]
    pub fn execute_frame(
        &mut self,
        display: &mut impl Display,
    ) -> Result<(), Disruption> {
        let start_cycle = self.machine.cycle_counter;
        loop {
            // Let the CPU execute one instruction. Every cycle this consumes
            // is handed to the pixel engine before `step` returns.
            self.machine.step()?;

            // If the pixel engine just finished line 159, hand the frame
            // over. This is what keeps the pixel engine and the real display
            // synchronized.
            if self.machine.ppu.take_frame_ready() {
                display.present(self.machine.ppu.frame());
                return Ok(());
            }

            // Fallback: if a whole frame worth of cycles passed without a
            // V-blank (the guest never enabled the LCD in a meaningful way),
            // return anyway so the host loop stays responsive.
            if self.machine.cycle_counter - start_cycle >= CYCLES_PER_FRAME {
                return Ok(());
            }
        }
    }
}


/// Describes the special situation when the emulator stops unexpectedly.
#[derive(Debug)]
pub enum Disruption {
    /// The emulation was terminated, usually because of a critical error
    /// (e.g. an instruction encoding that cannot be decoded at all). This
    /// means that the emulator probably can't be resumed in any useful way.
    Terminated,
}
