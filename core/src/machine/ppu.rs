//! Everything related to the pixel engine (PPU).
//!
//! The pixel engine is a pure cycle sink: the machine pushes every burned
//! cycle into `tick`, the engine counts dots, and at the end of each visible
//! scanline it renders that line into the frame buffer by pulling pixel data
//! from the bus with untimed accesses. It never calls back into the CPU.

use log::trace;

use crate::{
    SCREEN_HEIGHT, SCREEN_WIDTH,
    primitives::PixelColor,
};
use super::bus::Bus;


/// Dots per scanline: 240 visible plus 68 H-blank dots, 4 cycles each.
const DOTS_PER_LINE: u32 = 1232;

/// Number of scanlines including the V-blank lines 160..227.
const NUM_LINES: u16 = 228;

/// The dot within a line at which the H-blank flag rises.
const HBLANK_DOT: u32 = 1006;

/// Base addresses of the bitmap frame buffer and the palette.
const VRAM_BASE: u32 = 0x0600_0000;
const PALRAM_BASE: u32 = 0x0500_0000;


/// The (public) registers of the LCD block at 0x04000000..0x04000058.
///
/// All registers are stored as whole halfwords/words; the bus accesses them
/// byte-wise through `read_byte`/`write_byte`, which also apply the
/// reserved-bit masks. Accessor methods decode the packed fields -- the
/// hardware layout is not expressible as a portable struct, so we don't try.
pub struct LcdRegisters {
    /// `0x00` DISPCNT: video mode in bits 2..0, CGB mode in bit 3 (BIOS
    /// only), frame select in bit 4, layer enables in bits 12..8.
    dispcnt: u16,

    /// `0x02` GREENSWP: undocumented green swap.
    greenswp: u16,

    /// `0x04` DISPSTAT: V-blank/H-blank/V-counter flags in bits 2..0 (read
    /// only), IRQ enables in bits 5..3, LYC in the high byte.
    dispstat: u16,

    /// `0x06` VCOUNT: the current scanline, 0..227. Read only.
    vcount: u16,

    /// `0x08`-`0x0E` BG0-BG3 control.
    bgcnt: [u16; 4],

    /// `0x10`-`0x1E` BG0-BG3 horizontal/vertical scroll. Write only.
    bghofs: [u16; 4],
    bgvofs: [u16; 4],

    /// `0x20`-`0x26` / `0x30`-`0x36` BG2/BG3 affine matrix. Write only.
    bgpa: [u16; 2],
    bgpb: [u16; 2],
    bgpc: [u16; 2],
    bgpd: [u16; 2],

    /// `0x28`/`0x38` and `0x2C`/`0x3C`: BG2/BG3 affine reference points,
    /// 28 bit signed fixed point. Write only.
    bgx: [u32; 2],
    bgy: [u32; 2],

    /// The reference point latches the scanline renderer works from. Writes
    /// to BGxX/BGxY land here too; the hardware reloads them at V-blank.
    internal_x: [u32; 2],
    internal_y: [u32; 2],

    /// `0x40`-`0x46` window bounds. Write only.
    winh: [u16; 2],
    winv: [u16; 2],

    /// `0x48`/`0x4A` window inside/outside enables.
    winin: u16,
    winout: u16,

    /// `0x4C` MOSAIC. Write only.
    mosaic: u16,

    /// `0x50`/`0x52`/`0x54` blending control.
    bldcnt: u16,
    bldalpha: u16,
    bldy: u16,
}

/// Replaces one byte of a halfword register.
fn set16(reg: &mut u16, offset: u32, value: u8) {
    let shift = (offset & 1) * 8;
    *reg = (*reg & !(0xFF << shift)) | ((value as u16) << shift);
}

/// Replaces one byte of a word register.
fn set32(reg: &mut u32, offset: u32, value: u8) {
    let shift = (offset & 3) * 8;
    *reg = (*reg & !(0xFF << shift)) | ((value as u32) << shift);
}

/// Extracts one byte of a halfword register.
fn get16(reg: u16, offset: u32) -> u8 {
    (reg >> ((offset & 1) * 8)) as u8
}

impl LcdRegisters {
    fn new() -> Self {
        Self {
            dispcnt: 0,
            greenswp: 0,
            dispstat: 0,
            vcount: 0,
            bgcnt: [0; 4],
            bghofs: [0; 4],
            bgvofs: [0; 4],
            bgpa: [0; 2],
            bgpb: [0; 2],
            bgpc: [0; 2],
            bgpd: [0; 2],
            bgx: [0; 2],
            bgy: [0; 2],
            internal_x: [0; 2],
            internal_y: [0; 2],
            winh: [0; 2],
            winv: [0; 2],
            winin: 0,
            winout: 0,
            mosaic: 0,
            bldcnt: 0,
            bldalpha: 0,
            bldy: 0,
        }
    }

    /// The video mode from DISPCNT bits 2..0.
    pub fn bg_mode(&self) -> u8 {
        (self.dispcnt & 0b111) as u8
    }

    /// The bitmap frame select bit (DISPCNT bit 4, modes 4 and 5).
    pub fn frame_select(&self) -> bool {
        self.dispcnt & (1 << 4) != 0
    }

    /// The current scanline.
    pub fn vcount(&self) -> u16 {
        self.vcount
    }

    /// The V-count match value (LYC) from the DISPSTAT high byte.
    pub fn lyc(&self) -> u16 {
        self.dispstat >> 8
    }

    pub fn vblank(&self) -> bool {
        self.dispstat & 0b001 != 0
    }

    pub fn hblank(&self) -> bool {
        self.dispstat & 0b010 != 0
    }

    fn set_vblank(&mut self, value: bool) {
        self.dispstat = (self.dispstat & !0b001) | value as u16;
    }

    fn set_hblank(&mut self, value: bool) {
        self.dispstat = (self.dispstat & !0b010) | ((value as u16) << 1);
    }

    fn set_vcount_match(&mut self, value: bool) {
        self.dispstat = (self.dispstat & !0b100) | ((value as u16) << 2);
    }

    /// Reads one byte of the register block. Write-only registers (scroll,
    /// affine parameters, window bounds, mosaic, BLDY) read as 0.
    pub(crate) fn read_byte(&self, offset: u32) -> u8 {
        match offset {
            0x00 | 0x01 => get16(self.dispcnt, offset),
            0x02 | 0x03 => get16(self.greenswp, offset),
            0x04 | 0x05 => get16(self.dispstat, offset),
            0x06 | 0x07 => get16(self.vcount, offset),
            0x08..=0x0F => get16(self.bgcnt[((offset - 0x08) / 2) as usize], offset),
            0x48 | 0x49 => get16(self.winin, offset),
            0x4A | 0x4B => get16(self.winout, offset),
            0x50 | 0x51 => get16(self.bldcnt, offset),
            0x52 | 0x53 => get16(self.bldalpha, offset),
            _ => 0,
        }
    }

    /// Writes one byte of the register block, applying the reserved-bit
    /// masks of the hardware.
    pub(crate) fn write_byte(&mut self, offset: u32, value: u8) {
        match offset {
            0x00 | 0x01 => set16(&mut self.dispcnt, offset, value),
            0x02 | 0x03 => set16(&mut self.greenswp, offset, value),

            // The low DISPSTAT byte keeps its three read-only status flags
            // (and the unused bit 6).
            0x04 => {
                let old = get16(self.dispstat, 0);
                set16(&mut self.dispstat, 0, (old & 0x47) | (value & !0x47));
            }
            0x05 => set16(&mut self.dispstat, 1, value),

            // VCOUNT is read only.
            0x06 | 0x07 => {}

            0x08..=0x0F => {
                let bg = ((offset - 0x08) / 2) as usize;
                // Bit 13 is reserved on BG0/BG1 (no wraparound control).
                let value = if offset & 1 == 1 && bg < 2 { value & 0xDF } else { value };
                set16(&mut self.bgcnt[bg], offset, value);
            }

            0x10..=0x1F => {
                let bg = ((offset - 0x10) / 4) as usize;
                let value = if offset & 1 == 1 { value & 0x01 } else { value };
                if offset & 2 == 0 {
                    set16(&mut self.bghofs[bg], offset, value);
                } else {
                    set16(&mut self.bgvofs[bg], offset, value);
                }
            }

            0x20..=0x27 | 0x30..=0x37 => {
                let bg = ((offset >> 4) - 2) as usize;
                match (offset >> 1) & 0b11 {
                    0 => set16(&mut self.bgpa[bg], offset, value),
                    1 => set16(&mut self.bgpb[bg], offset, value),
                    2 => set16(&mut self.bgpc[bg], offset, value),
                    _ => set16(&mut self.bgpd[bg], offset, value),
                }
            }

            // Reference point writes land in the register and in the
            // renderer's latch.
            0x28..=0x2B | 0x38..=0x3B => {
                let bg = ((offset >> 4) - 2) as usize;
                set32(&mut self.bgx[bg], offset, value);
                set32(&mut self.internal_x[bg], offset, value);
            }
            0x2C..=0x2F | 0x3C..=0x3F => {
                let bg = ((offset >> 4) - 2) as usize;
                set32(&mut self.bgy[bg], offset, value);
                set32(&mut self.internal_y[bg], offset, value);
            }

            0x40..=0x43 => set16(&mut self.winh[((offset - 0x40) / 2) as usize], offset, value),
            0x44..=0x47 => set16(&mut self.winv[((offset - 0x44) / 2) as usize], offset, value),

            0x48 | 0x49 => set16(&mut self.winin, offset, value & 0x3F),
            0x4A | 0x4B => set16(&mut self.winout, offset, value & 0x3F),

            0x4C | 0x4D => set16(&mut self.mosaic, offset, value),

            0x50 => set16(&mut self.bldcnt, 0, value),
            0x51 => set16(&mut self.bldcnt, 1, value & 0x3F),
            0x52 | 0x53 => set16(&mut self.bldalpha, offset, value & 0x1F),
            0x54 | 0x55 => set16(&mut self.bldy, offset, value),

            _ => {}
        }
    }
}


/// The pixel engine.
pub struct Ppu {
    /// All registers. If you want to read registers, use the `regs()` method
    /// instead. That way, we can avoid accidental mutation of any registers.
    registers: LcdRegisters,

    /// The finished frame: 240x160 fully opaque ARGB pixels.
    frame: Box<[u32]>,

    /// Dots spent in the current scanline so far.
    dots: u32,

    /// Set when line 159 has been rendered and V-blank begins; cleared when
    /// the frontend picks the frame up.
    frame_ready: bool,
}

impl Ppu {
    pub(crate) fn new() -> Self {
        Self {
            registers: LcdRegisters::new(),
            frame: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
            dots: 0,
            frame_ready: false,
        }
    }

    /// Returns an immutable reference to all public registers.
    pub fn regs(&self) -> &LcdRegisters {
        &self.registers
    }

    pub(crate) fn regs_mut(&mut self) -> &mut LcdRegisters {
        &mut self.registers
    }

    /// The current frame buffer contents.
    pub fn frame(&self) -> &[u32] {
        &self.frame
    }

    /// Returns whether a frame finished since the last call, clearing the
    /// latch.
    pub(crate) fn take_frame_ready(&mut self) -> bool {
        std::mem::replace(&mut self.frame_ready, false)
    }

    /// Advances the dot counter by the given number of cycles. Crossing the
    /// end of a visible scanline renders that line from the bus.
    pub(crate) fn tick(&mut self, cycles: u32, bus: &Bus) {
        self.dots += cycles;

        while self.dots >= DOTS_PER_LINE {
            self.dots -= DOTS_PER_LINE;

            let line = self.registers.vcount();
            if line < SCREEN_HEIGHT as u16 {
                self.render_scanline(line as u32, bus);
            }

            let mut line = line + 1;
            if line == SCREEN_HEIGHT as u16 {
                trace!("[ppu] entering V-blank");
                self.registers.set_vblank(true);
                self.frame_ready = true;
            }
            if line == NUM_LINES {
                self.registers.set_vblank(false);
                line = 0;
            }

            self.registers.vcount = line;
            self.registers.set_vcount_match(line == self.registers.lyc());
        }

        self.registers.set_hblank(self.dots >= HBLANK_DOT);
    }

    /// Renders one scanline into the frame buffer.
    ///
    /// Only the bitmap modes 3 and 4 are implemented; the tiled and the
    /// small-bitmap modes fall back to the backdrop color.
    fn render_scanline(&mut self, y: u32, bus: &Bus) {
        match self.registers.bg_mode() {
            // Mode 3: one 240x160 direct color frame buffer.
            3 => {
                for x in 0..SCREEN_WIDTH as u32 {
                    let addr = VRAM_BASE + (y * SCREEN_WIDTH as u32 + x) * 2;
                    let color = PixelColor::from_color_halfword(bus.fast_read16(addr));
                    self.frame[(y * SCREEN_WIDTH as u32 + x) as usize] = color.to_argb();
                }
            }

            // Mode 4: 8 bit palette indices, two selectable pages.
            4 => {
                let base = VRAM_BASE + if self.registers.frame_select() { 0xA000 } else { 0 };
                for x in 0..SCREEN_WIDTH as u32 {
                    let index = bus.fast_read8(base + y * SCREEN_WIDTH as u32 + x) as u32;
                    let color = PixelColor::from_color_halfword(
                        bus.fast_read16(PALRAM_BASE + index * 2),
                    );
                    self.frame[(y * SCREEN_WIDTH as u32 + x) as usize] = color.to_argb();
                }
            }

            // Tiled modes and mode 5 are not implemented; show the backdrop
            // color so that anything at all is visible.
            _ => {
                let backdrop = PixelColor::from_color_halfword(bus.fast_read16(PALRAM_BASE));
                let argb = backdrop.to_argb();
                let row = (y * SCREEN_WIDTH as u32) as usize;
                for px in &mut self.frame[row..row + SCREEN_WIDTH] {
                    *px = argb;
                }
            }
        }
    }
}
