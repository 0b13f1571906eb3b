//! Everything related to memory mapping and bus timing.
//!
//! The bus owns all memory blocks and the wait-state tables. The timed
//! access methods live on `Machine` because an access can touch the whole
//! machine: MMIO writes are routed into the pixel engine's register file,
//! one LCD register write even consults the CPU's program counter, and every
//! timed access burns cycles (which tick the pixel engine).

use log::trace;

use crate::{
    cartridge::Cartridge,
    primitives::Memory,
};
use super::Machine;


/// Timing classification of a bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// First access to an address, pays the full setup cost.
    NonSeq,

    /// Follows the previous access by one bus width; cartridge pages serve
    /// it faster.
    Seq,

    /// Untimed access. Used by the pixel engine to pull pixel data without
    /// advancing the clock.
    Fast,
}

/// Memory map pages, i.e. the values of `(addr >> 24) & 0xFF`.
mod page {
    pub const BIOS: usize = 0x00;
    pub const EWRAM: usize = 0x02;
    pub const IWRAM: usize = 0x03;
    pub const MMIO: usize = 0x04;
    pub const PALRAM: usize = 0x05;
    pub const VRAM: usize = 0x06;
    pub const OAM: usize = 0x07;
    pub const ROM_WS0: usize = 0x08;
    pub const ROM_WS2_HI: usize = 0x0D;
    pub const SRAM_LO: usize = 0x0E;
    pub const SRAM_HI: usize = 0x0F;
}

/// First-access wait states for the cartridge wait-state fields.
const ROM_FIRST_WAITS: [u32; 4] = [4, 3, 2, 8];

/// Second-access wait states per cartridge wait-state region.
const ROM_SECOND_WAITS: [[u32; 2]; 3] = [[2, 1], [4, 1], [8, 1]];


pub struct Bus {
    bios: Memory,
    ewram: Memory,
    iwram: Memory,
    pub(crate) palram: Memory,
    pub(crate) vram: Memory,
    pub(crate) oam: Memory,
    rom: Memory,
    sram: Memory,

    /// The wait-state control register at 0x04000204.
    waitcnt: u16,

    /// Cycle cost per 8/16 bit access: `wait16[kind][page]` with kind 0 =
    /// non-sequential, 1 = sequential.
    wait16: [[u32; 256]; 2],

    /// Cycle cost per 32 bit access, same layout.
    wait32: [[u32; 256]; 2],

    /// When set, the next timed access is billed as non-sequential no matter
    /// what the caller claims. Set via `set_last_access` after stores.
    force_nonseq: bool,
}

impl Bus {
    pub(crate) fn new(cartridge: Cartridge, bios: &[u8]) -> Self {
        let mut bus = Self {
            bios: Memory::with_bytes(0x4000, bios),
            ewram: Memory::zeroed(0x4_0000),
            iwram: Memory::zeroed(0x8000),
            palram: Memory::zeroed(0x400),
            vram: Memory::zeroed(0x1_8000),
            oam: Memory::zeroed(0x400),
            rom: Memory::with_bytes(0x200_0000, cartridge.rom()),
            sram: Memory::zeroed(0x1_0000),
            waitcnt: 0,
            wait16: [[1; 256]; 2],
            wait32: [[1; 256]; 2],
            force_nonseq: false,
        };

        // Fixed costs of the non-cartridge regions. EWRAM sits on a slow
        // 16 bit bus, palette RAM and VRAM are 16 bit wide, everything else
        // serves a full word per access.
        for kind in 0..2 {
            bus.wait16[kind][page::EWRAM] = 2;
            bus.wait32[kind][page::EWRAM] = 4;
            bus.wait32[kind][page::PALRAM] = 2;
            bus.wait32[kind][page::VRAM] = 2;
        }

        bus.update_waits();
        bus
    }

    /// Overrides the access bookkeeping so that the next timed access is
    /// billed with the given kind. Instructions call this when they know
    /// their next memory action cannot be sequential (e.g. the prefetch
    /// following a store).
    pub fn set_last_access(&mut self, kind: Access) {
        self.force_nonseq = kind == Access::NonSeq;
    }

    /// Resolves the billed kind of a timed access (0 = non-sequential,
    /// 1 = sequential) and resets the bookkeeping to sequential.
    fn billed_kind(&mut self, access: Access) -> usize {
        let forced = self.force_nonseq;
        self.force_nonseq = false;
        match access {
            Access::NonSeq => 0,
            _ if forced => 0,
            _ => 1,
        }
    }

    /// Recomputes the cartridge and SRAM wait table entries from the
    /// wait-state control register.
    pub fn update_waits(&mut self) {
        let waitcnt = self.waitcnt as u32;

        for ws in 0..3 {
            let (first_bits, second_bit) = match ws {
                0 => ((waitcnt >> 2) & 0b11, (waitcnt >> 4) & 1),
                1 => ((waitcnt >> 5) & 0b11, (waitcnt >> 7) & 1),
                _ => ((waitcnt >> 8) & 0b11, (waitcnt >> 10) & 1),
            };
            let n = 1 + ROM_FIRST_WAITS[first_bits as usize];
            let s = 1 + ROM_SECOND_WAITS[ws][second_bit as usize];

            // Each wait-state region covers two pages. A 32 bit ROM access
            // is two 16 bit accesses: 1N + 1S when non-sequential, 2S when
            // sequential.
            for p in [page::ROM_WS0 + 2 * ws, page::ROM_WS0 + 2 * ws + 1].iter() {
                self.wait16[0][*p] = n;
                self.wait16[1][*p] = s;
                self.wait32[0][*p] = n + s;
                self.wait32[1][*p] = 2 * s;
            }
        }

        // SRAM is an 8 bit bus; every access pays the first-access cost.
        let sram = 1 + ROM_FIRST_WAITS[(waitcnt & 0b11) as usize];
        for p in [page::SRAM_LO, page::SRAM_HI].iter() {
            self.wait16[0][*p] = sram;
            self.wait16[1][*p] = sram;
            self.wait32[0][*p] = sram;
            self.wait32[1][*p] = sram;
        }
    }

    pub(crate) fn waitcnt(&self) -> u16 {
        self.waitcnt
    }

    pub(crate) fn set_waitcnt_byte(&mut self, idx: usize, value: u8) {
        let shift = idx * 8;
        self.waitcnt = (self.waitcnt & !(0xFF << shift)) | ((value as u16) << shift);
        self.update_waits();
    }

    /// Reads a byte without billing any cycles (the `Fast` access kind).
    /// MMIO is not reachable this way; the pixel engine only ever pulls from
    /// palette RAM and VRAM.
    pub fn fast_read8(&self, addr: u32) -> u8 {
        match ((addr >> 24) & 0xFF) as usize {
            page::BIOS => {
                if (addr & 0x00FF_FFFF) < 0x4000 {
                    self.bios.read8((addr & 0x3FFF) as usize)
                } else {
                    self.read_open_bus(addr) as u8
                }
            }
            page::EWRAM => self.ewram.read8((addr & 0x3_FFFF) as usize),
            page::IWRAM => self.iwram.read8((addr & 0x7FFF) as usize),
            page::PALRAM => self.palram.read8((addr & 0x3FF) as usize),
            page::VRAM => self.vram.read8(Self::vram_offset(addr)),
            page::OAM => self.oam.read8((addr & 0x3FF) as usize),
            page::ROM_WS0..=page::ROM_WS2_HI => self.rom.read8((addr & 0x1FF_FFFF) as usize),
            page::SRAM_LO | page::SRAM_HI => self.read_sram(addr),
            _ => self.read_open_bus(addr) as u8,
        }
    }

    /// Reads an aligned halfword without billing any cycles.
    pub fn fast_read16(&self, addr: u32) -> u16 {
        let addr = addr & !0x1;
        match ((addr >> 24) & 0xFF) as usize {
            page::BIOS => {
                if (addr & 0x00FF_FFFF) < 0x4000 {
                    self.bios.read16((addr & 0x3FFF) as usize)
                } else {
                    self.read_open_bus(addr) as u16
                }
            }
            page::EWRAM => self.ewram.read16((addr & 0x3_FFFF) as usize),
            page::IWRAM => self.iwram.read16((addr & 0x7FFF) as usize),
            page::PALRAM => self.palram.read16((addr & 0x3FF) as usize),
            page::VRAM => self.vram.read16(Self::vram_offset(addr)),
            page::OAM => self.oam.read16((addr & 0x3FF) as usize),
            page::ROM_WS0..=page::ROM_WS2_HI => self.rom.read16((addr & 0x1FF_FFFF) as usize),
            page::SRAM_LO | page::SRAM_HI => {
                // 8 bit bus: the byte shows up on both halves.
                let byte = self.read_sram(addr) as u16;
                byte * 0x0101
            }
            _ => self.read_open_bus(addr) as u16,
        }
    }

    /// Reads an aligned word without billing any cycles.
    pub fn fast_read32(&self, addr: u32) -> u32 {
        let addr = addr & !0x3;
        match ((addr >> 24) & 0xFF) as usize {
            page::BIOS => {
                if (addr & 0x00FF_FFFF) < 0x4000 {
                    self.bios.read32((addr & 0x3FFF) as usize)
                } else {
                    self.read_open_bus(addr)
                }
            }
            page::EWRAM => self.ewram.read32((addr & 0x3_FFFF) as usize),
            page::IWRAM => self.iwram.read32((addr & 0x7FFF) as usize),
            page::PALRAM => self.palram.read32((addr & 0x3FF) as usize),
            page::VRAM => self.vram.read32(Self::vram_offset(addr)),
            page::OAM => self.oam.read32((addr & 0x3FF) as usize),
            page::ROM_WS0..=page::ROM_WS2_HI => self.rom.read32((addr & 0x1FF_FFFF) as usize),
            page::SRAM_LO | page::SRAM_HI => {
                let byte = self.read_sram(addr) as u32;
                byte * 0x0101_0101
            }
            _ => self.read_open_bus(addr),
        }
    }

    /// Maps a VRAM address into the 96 KiB backing block. The 128 KiB page
    /// window mirrors the upper 32 KiB once: 0x18000-0x1FFFF folds onto
    /// 0x10000-0x17FFF.
    fn vram_offset(addr: u32) -> usize {
        let offset = addr & 0x1_FFFF;
        if offset >= 0x1_8000 {
            (0x1_0000 | (offset & 0x7FFF)) as usize
        } else {
            offset as usize
        }
    }

    fn read_sram(&self, addr: u32) -> u8 {
        self.sram.read8((addr & 0xFFFF) as usize)
    }

    /// The value visible on an unmapped read. Real hardware leaks the last
    /// prefetched word here; 0 is close enough for everything we run.
    fn read_open_bus(&self, _addr: u32) -> u32 {
        0
    }
}

impl Machine {
    /// Burns the cycles of a timed access to `addr`. `wide` selects the
    /// 32 bit cost table. `Fast` accesses skip this entirely.
    fn tick_access(&mut self, addr: u32, access: Access, wide: bool) {
        if access == Access::Fast {
            return;
        }

        let kind = self.bus.billed_kind(access);
        let p = ((addr >> 24) & 0xFF) as usize;
        let cost = if wide {
            self.bus.wait32[kind][p]
        } else {
            self.bus.wait16[kind][p]
        };
        self.cycle(cost);
    }

    pub fn read8(&mut self, addr: u32, access: Access) -> u8 {
        let value = match ((addr >> 24) & 0xFF) as usize {
            page::MMIO => self.read_mmio8(addr),
            _ => self.bus.fast_read8(addr),
        };
        self.tick_access(addr, access, false);
        value
    }

    pub fn read16(&mut self, addr: u32, access: Access) -> u16 {
        let addr = addr & !0x1;
        let value = match ((addr >> 24) & 0xFF) as usize {
            page::MMIO => {
                (self.read_mmio8(addr) as u16)
                    | (self.read_mmio8(addr + 1) as u16) << 8
            }
            _ => self.bus.fast_read16(addr),
        };
        self.tick_access(addr, access, false);
        value
    }

    pub fn read32(&mut self, addr: u32, access: Access) -> u32 {
        let addr = addr & !0x3;
        let value = match ((addr >> 24) & 0xFF) as usize {
            page::MMIO => {
                (self.read_mmio8(addr) as u32)
                    | (self.read_mmio8(addr + 1) as u32) << 8
                    | (self.read_mmio8(addr + 2) as u32) << 16
                    | (self.read_mmio8(addr + 3) as u32) << 24
            }
            _ => self.bus.fast_read32(addr),
        };
        self.tick_access(addr, access, true);
        value
    }

    pub fn write8(&mut self, addr: u32, value: u8, access: Access) {
        match ((addr >> 24) & 0xFF) as usize {
            page::EWRAM => self.bus.ewram.write8((addr & 0x3_FFFF) as usize, value),
            page::IWRAM => self.bus.iwram.write8((addr & 0x7FFF) as usize, value),
            page::MMIO => self.write_mmio8(addr, value),
            // Palette RAM, VRAM and OAM sit behind 16 bit ports; plain byte
            // stores never reach them.
            page::PALRAM | page::VRAM | page::OAM => {
                trace!("Dropped 8 bit store to {:#010x}", addr);
            }
            page::SRAM_LO | page::SRAM_HI => {
                self.bus.sram.write8((addr & 0xFFFF) as usize, value);
            }
            _ => {}
        }
        self.tick_access(addr, access, false);
    }

    pub fn write16(&mut self, addr: u32, value: u16, access: Access) {
        let addr = addr & !0x1;
        match ((addr >> 24) & 0xFF) as usize {
            page::EWRAM => self.bus.ewram.write16((addr & 0x3_FFFF) as usize, value),
            page::IWRAM => self.bus.iwram.write16((addr & 0x7FFF) as usize, value),
            page::MMIO => {
                self.write_mmio8(addr, value as u8);
                self.write_mmio8(addr + 1, (value >> 8) as u8);
            }
            page::PALRAM => self.bus.palram.write16((addr & 0x3FF) as usize, value),
            page::VRAM => self.bus.vram.write16(Bus::vram_offset(addr), value),
            page::OAM => self.bus.oam.write16((addr & 0x3FF) as usize, value),
            _ => {}
        }
        self.tick_access(addr, access, false);
    }

    pub fn write32(&mut self, addr: u32, value: u32, access: Access) {
        let addr = addr & !0x3;
        match ((addr >> 24) & 0xFF) as usize {
            page::EWRAM => self.bus.ewram.write32((addr & 0x3_FFFF) as usize, value),
            page::IWRAM => self.bus.iwram.write32((addr & 0x7FFF) as usize, value),
            page::MMIO => {
                self.write_mmio8(addr, value as u8);
                self.write_mmio8(addr + 1, (value >> 8) as u8);
                self.write_mmio8(addr + 2, (value >> 16) as u8);
                self.write_mmio8(addr + 3, (value >> 24) as u8);
            }
            page::PALRAM => self.bus.palram.write32((addr & 0x3FF) as usize, value),
            page::VRAM => self.bus.vram.write32(Bus::vram_offset(addr), value),
            page::OAM => self.bus.oam.write32((addr & 0x3FF) as usize, value),
            _ => {}
        }
        self.tick_access(addr, access, true);
    }

    /// Reads one byte out of the I/O register block.
    fn read_mmio8(&self, addr: u32) -> u8 {
        let offset = addr & 0x00FF_FFFF;
        match offset {
            // The LCD register block is owned by the pixel engine.
            0x000..=0x057 => self.ppu.regs().read_byte(offset),

            0x204 => self.bus.waitcnt() as u8,
            0x205 => (self.bus.waitcnt() >> 8) as u8,

            _ => 0,
        }
    }

    /// Writes one byte into the I/O register block.
    fn write_mmio8(&mut self, addr: u32, value: u8) {
        let offset = addr & 0x00FF_FFFF;
        match offset {
            // The CGB mode bit in the display control register can only be
            // touched by code running inside the BIOS.
            0x000 => {
                let value = if self.cpu.reg(15) >= 0x4000 {
                    value & 0xF7
                } else {
                    value
                };
                self.ppu.regs_mut().write_byte(0x000, value);
            }

            0x001..=0x057 => self.ppu.regs_mut().write_byte(offset, value),

            0x204 => self.bus.set_waitcnt_byte(0, value),
            0x205 => self.bus.set_waitcnt_byte(1, value),

            _ => {}
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::machine::Machine;


    fn test_machine() -> Machine {
        let cartridge = Cartridge::from_bytes(&[]).unwrap();
        Machine::new(cartridge, &[], true)
    }

    #[test]
    fn test_ewram_mask_and_mirror() {
        let mut m = test_machine();
        m.write32(0x0200_0000, 0x1234_5678, Access::NonSeq);
        assert_eq!(m.read32(0x0200_0000, Access::NonSeq), 0x1234_5678);

        // The 256 KiB block mirrors across the page.
        assert_eq!(m.read32(0x0204_0000, Access::NonSeq), 0x1234_5678);

        // The mask is 0x3FFFF: offset 0x4000 is distinct storage, not a
        // mirror of offset 0.
        m.write32(0x0200_4000, 0xAAAA_AAAA, Access::NonSeq);
        assert_eq!(m.read32(0x0200_0000, Access::NonSeq), 0x1234_5678);
    }

    #[test]
    fn test_vram_upper_mirror() {
        let mut m = test_machine();
        m.write16(0x0601_0000, 0xBEEF, Access::NonSeq);

        // 0x18000..0x20000 folds onto 0x10000..0x18000.
        assert_eq!(m.read16(0x0601_8000, Access::NonSeq), 0xBEEF);

        m.write16(0x0601_A222, 0xCAFE, Access::NonSeq);
        assert_eq!(m.read16(0x0601_2222, Access::NonSeq), 0xCAFE);
    }

    #[test]
    fn test_byte_stores_do_not_reach_video_memory() {
        let mut m = test_machine();
        m.write16(0x0500_0000, 0x7FFF, Access::NonSeq);
        m.write8(0x0500_0000, 0x00, Access::NonSeq);
        assert_eq!(m.read16(0x0500_0000, Access::NonSeq), 0x7FFF);

        m.write16(0x0600_0000, 0x1234, Access::NonSeq);
        m.write8(0x0600_0001, 0xFF, Access::NonSeq);
        assert_eq!(m.read16(0x0600_0000, Access::NonSeq), 0x1234);

        m.write16(0x0700_0000, 0x5678, Access::NonSeq);
        m.write8(0x0700_0000, 0xFF, Access::NonSeq);
        assert_eq!(m.read16(0x0700_0000, Access::NonSeq), 0x5678);
    }

    #[test]
    fn test_sram_byte_bus() {
        let mut m = test_machine();
        m.write8(0x0E00_0010, 0xAB, Access::NonSeq);
        assert_eq!(m.read8(0x0E00_0010, Access::NonSeq), 0xAB);

        // Wider reads replicate the byte across the lanes.
        assert_eq!(m.read16(0x0E00_0010, Access::NonSeq), 0xABAB);
        assert_eq!(m.read32(0x0E00_0010, Access::NonSeq), 0xABAB_ABAB);
    }

    #[test]
    fn test_open_bus_reads_zero() {
        let mut m = test_machine();
        // Above the BIOS, below EWRAM.
        assert_eq!(m.read32(0x0000_4000, Access::NonSeq), 0);
        assert_eq!(m.read32(0x0100_0000, Access::NonSeq), 0);
        // Writes there are no-ops.
        m.write32(0x0100_0000, 0xFFFF_FFFF, Access::NonSeq);
        assert_eq!(m.read32(0x0100_0000, Access::NonSeq), 0);
    }

    #[test]
    fn test_unaligned_word_read_is_aligned() {
        let mut m = test_machine();
        m.write32(0x0200_0000, 0xDEAD_BEEF, Access::NonSeq);
        // The bus itself clears the low bits; the rotation happens in the
        // load instructions.
        assert_eq!(m.read32(0x0200_0003, Access::NonSeq), 0xDEAD_BEEF);
        assert_eq!(m.read16(0x0200_0001, Access::NonSeq), 0xBEEF);
    }

    #[test]
    fn test_mmio_reserved_bit_masks() {
        let mut m = test_machine();

        m.write16(0x0400_0048, 0xFFFF, Access::NonSeq); // WININ
        assert_eq!(m.read16(0x0400_0048, Access::NonSeq), 0x3F3F);

        m.write16(0x0400_004A, 0xFFFF, Access::NonSeq); // WINOUT
        assert_eq!(m.read16(0x0400_004A, Access::NonSeq), 0x3F3F);

        m.write16(0x0400_0052, 0xFFFF, Access::NonSeq); // BLDALPHA
        assert_eq!(m.read16(0x0400_0052, Access::NonSeq), 0x1F1F);

        // BG0 control: bit 13 is reserved for BG0/BG1.
        m.write16(0x0400_0008, 0xFFFF, Access::NonSeq);
        assert_eq!(m.read16(0x0400_0008, Access::NonSeq), 0xDFFF);

        // BG2 control keeps all bits.
        m.write16(0x0400_000C, 0xFFFF, Access::NonSeq);
        assert_eq!(m.read16(0x0400_000C, Access::NonSeq), 0xFFFF);

        // VCOUNT is read only.
        m.write16(0x0400_0006, 0x1234, Access::NonSeq);
        assert_eq!(m.read16(0x0400_0006, Access::NonSeq), 0);
    }

    #[test]
    fn test_dispstat_read_only_bits() {
        let mut m = test_machine();
        // The three status flags in the low byte cannot be written; the IRQ
        // enable bits can.
        m.write16(0x0400_0004, 0xFF3F, Access::NonSeq);
        assert_eq!(m.read16(0x0400_0004, Access::NonSeq) & 0x0007, 0);
        assert_eq!(m.read16(0x0400_0004, Access::NonSeq) & 0x0038, 0x0038);
    }

    #[test]
    fn test_dispcnt_cgb_bit_locked_outside_bios() {
        let mut m = test_machine();
        // After reset with skip_bios the PC is in ROM, so bit 3 is masked.
        m.write16(0x0400_0000, 0x0008, Access::NonSeq);
        assert_eq!(m.read16(0x0400_0000, Access::NonSeq) & 0x0008, 0);
    }

    #[test]
    fn test_cartridge_cycle_accounting() {
        let mut m = test_machine();

        // Default WAITCNT = 0: ws0 first access 4 waits, second access 2.
        let before = m.cycle_counter;
        m.read16(0x0800_0000, Access::NonSeq);
        assert_eq!(m.cycle_counter - before, 5);

        let before = m.cycle_counter;
        m.read16(0x0800_0002, Access::Seq);
        assert_eq!(m.cycle_counter - before, 3);

        // 32 bit: N+S non-sequential, 2S sequential.
        let before = m.cycle_counter;
        m.read32(0x0800_0004, Access::NonSeq);
        assert_eq!(m.cycle_counter - before, 8);

        let before = m.cycle_counter;
        m.read32(0x0800_0008, Access::Seq);
        assert_eq!(m.cycle_counter - before, 6);

        // Fastest ROM timing: ws0 first = 2, second = 1.
        m.write16(0x0400_0204, (2 << 2) | (1 << 4), Access::NonSeq);
        let before = m.cycle_counter;
        m.read16(0x0800_0000, Access::NonSeq);
        assert_eq!(m.cycle_counter - before, 3);
        let before = m.cycle_counter;
        m.read16(0x0800_0002, Access::Seq);
        assert_eq!(m.cycle_counter - before, 2);

        // Wait-state 1 pages have their own second-access table.
        let before = m.cycle_counter;
        m.read16(0x0A00_0000, Access::Seq);
        assert_eq!(m.cycle_counter - before, 5);
    }

    #[test]
    fn test_fast_access_is_free() {
        let mut m = test_machine();
        let before = m.cycle_counter;
        m.read32(0x0800_0000, Access::Fast);
        m.read16(0x0600_0000, Access::Fast);
        assert_eq!(m.cycle_counter, before);
    }

    #[test]
    fn test_last_access_override() {
        let mut m = test_machine();

        // Pinned non-sequential: the next access is billed N even though
        // the caller claims S.
        m.bus.set_last_access(Access::NonSeq);
        let before = m.cycle_counter;
        m.read16(0x0800_0000, Access::Seq);
        assert_eq!(m.cycle_counter - before, 5);

        // The pin resets after one access.
        let before = m.cycle_counter;
        m.read16(0x0800_0002, Access::Seq);
        assert_eq!(m.cycle_counter - before, 3);
    }

    #[test]
    fn test_iwram_costs_one_cycle() {
        let mut m = test_machine();
        let before = m.cycle_counter;
        m.read32(0x0300_0000, Access::NonSeq);
        assert_eq!(m.cycle_counter - before, 1);

        let before = m.cycle_counter;
        m.read32(0x0200_0000, Access::NonSeq);
        assert_eq!(m.cycle_counter - before, 4);
    }
}
