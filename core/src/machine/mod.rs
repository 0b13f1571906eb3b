use log::info;

use crate::cartridge::Cartridge;
use self::{
    bus::Bus,
    cpu::{Cpu, Mode, control},
    ppu::Ppu,
};


#[macro_use]
mod macros;

mod arm;
mod bus;
pub mod cpu;
pub mod ppu;
mod step;
mod thumb;

pub use self::bus::Access;


/// Architectural exception vectors this core can enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exception {
    /// Undefined instruction: vector 0x04, enters Undefined mode.
    Undefined,

    /// Software interrupt: vector 0x08, enters Supervisor mode.
    SoftwareInterrupt,
}

impl Exception {
    fn vector(&self) -> u32 {
        match self {
            Exception::Undefined => 0x0000_0004,
            Exception::SoftwareInterrupt => 0x0000_0008,
        }
    }

    fn mode(&self) -> Mode {
        match self {
            Exception::Undefined => Mode::Undefined,
            Exception::SoftwareInterrupt => Mode::Supervisor,
        }
    }
}


pub struct Machine {
    pub cpu: Cpu,

    pub bus: Bus,

    pub ppu: Ppu,

    /// Total cycles since reset. Every memory access and internal cycle ends
    /// up here (and, at the same time, in the pixel engine).
    pub cycle_counter: u64,
}

impl Machine {
    pub(crate) fn new(cartridge: Cartridge, bios: &[u8], skip_bios: bool) -> Self {
        let mut machine = Self {
            cpu: Cpu::new(),
            bus: Bus::new(cartridge, bios),
            ppu: Ppu::new(),
            cycle_counter: 0,
        };
        machine.reset(skip_bios);
        machine
    }

    /// Puts the CPU into its architectural reset state and refills the
    /// pipeline.
    ///
    /// With `skip_bios` the banked stack pointers and the PC are set to the
    /// values the BIOS boot code would leave behind, so cartridges can be
    /// started without a BIOS image doing its intro.
    pub(crate) fn reset(&mut self, skip_bios: bool) {
        self.cpu = Cpu::new();

        // System mode, FIQs masked, ARM state.
        self.cpu.cpsr = Mode::System.bits() | control::F;

        // Stack pointers as the BIOS sets them up.
        self.cpu.set_banked_reg(Mode::System, 13, 0x0300_7F00);
        self.cpu.set_banked_reg(Mode::Supervisor, 13, 0x0300_7FE0);
        self.cpu.set_banked_reg(Mode::Irq, 13, 0x0300_7FA0);

        let entry = if skip_bios { 0x0800_0000 } else { 0 };
        self.cpu.set_reg(15, entry);
        info!("Reset: starting execution at {:#010x}", entry);

        self.arm_fetch();
    }

    /// Burns `n` cycles: they are added to the counter and handed to the
    /// pixel engine, which pulls its pixel data from the bus untimed. Time
    /// only ever flows through here.
    pub(crate) fn cycle(&mut self, n: u32) {
        self.cycle_counter += n as u64;
        self.ppu.tick(n, &self.bus);
    }

    /// Enters an exception: banks the return address and the CPSR, switches
    /// mode with IRQs masked, jumps to the vector and refills in ARM state.
    pub(crate) fn exception(&mut self, kind: Exception) {
        let mode = kind.mode();

        // The return address is the instruction after the faulting one:
        // r15 is 2 words ahead, so back up one.
        let width = if self.cpu.thumb_state() { 2 } else { 4 };
        self.cpu.set_banked_reg(mode, 14, self.cpu.reg(15).wrapping_sub(width));
        self.cpu.set_banked_spsr(mode, self.cpu.cpsr);

        self.cpu.cpsr = (self.cpu.cpsr & !(control::M | control::T))
            | mode.bits()
            | control::I;

        self.cpu.set_reg(15, kind.vector());
        self.arm_fetch();
    }
}
