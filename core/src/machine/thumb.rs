//! Execution of the Thumb (16 bit) instruction set.
//!
//! Every family here is a compressed view of an ARM behavior from `arm.rs`;
//! the operand decoding differs, the semantics (flags, memory behavior,
//! cycle costs) are shared.

use super::{Access, Exception, Machine};
use super::arm::{alu_add, alu_sub, multiply_cycles};
use crate::machine::cpu::{flags, Shift};


impl Machine {
    /// Format 1: LSL/LSR/ASR by a 5 bit immediate.
    pub(crate) fn thumb_move_shifted(&mut self, instr: u16) {
        let shift = match (instr >> 11) & 0b11 {
            0 => Shift::Lsl,
            1 => Shift::Lsr,
            _ => Shift::Asr,
        };
        let amount = ((instr >> 6) & 0x1F) as u32;
        let rs = ((instr >> 3) & 0x7) as u8;
        let rd = (instr & 0x7) as u8;

        let (value, carry) = self.cpu.barrel_shift(self.cpu.reg(rs), shift, amount, false);
        self.cpu.set_reg(rd, value);

        let n = value >> 31 != 0;
        let z = value == 0;
        set_flags!(self.cpu => n z carry -);
    }

    /// Format 2: ADD/SUB with a register or a 3 bit immediate.
    pub(crate) fn thumb_add_sub(&mut self, instr: u16) {
        let field = ((instr >> 6) & 0x7) as u32;
        let rs = ((instr >> 3) & 0x7) as u8;
        let rd = (instr & 0x7) as u8;

        let op1 = self.cpu.reg(rs);
        let op2 = if instr & (1 << 10) != 0 {
            field
        } else {
            self.cpu.reg(field as u8)
        };

        let (result, c, v) = if instr & (1 << 9) != 0 {
            alu_sub(op1, op2, 1)
        } else {
            alu_add(op1, op2, 0)
        };

        self.cpu.set_reg(rd, result);
        let n = result >> 31 != 0;
        let z = result == 0;
        set_flags!(self.cpu => n z c v);
    }

    /// Format 3: MOV/CMP/ADD/SUB with an 8 bit immediate.
    pub(crate) fn thumb_move_compare_imm(&mut self, instr: u16) {
        let rd = ((instr >> 8) & 0x7) as u8;
        let imm = (instr & 0xFF) as u32;
        let op1 = self.cpu.reg(rd);

        match (instr >> 11) & 0b11 {
            // MOV
            0 => {
                self.cpu.set_reg(rd, imm);
                let n = false;
                let z = imm == 0;
                set_flags!(self.cpu => n z - -);
            }
            // CMP
            1 => {
                let (result, c, v) = alu_sub(op1, imm, 1);
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z c v);
            }
            // ADD
            2 => {
                let (result, c, v) = alu_add(op1, imm, 0);
                self.cpu.set_reg(rd, result);
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z c v);
            }
            // SUB
            _ => {
                let (result, c, v) = alu_sub(op1, imm, 1);
                self.cpu.set_reg(rd, result);
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z c v);
            }
        }
    }

    /// Format 4: the 16 register-to-register ALU operations.
    pub(crate) fn thumb_alu(&mut self, instr: u16) {
        let rs = ((instr >> 3) & 0x7) as u8;
        let rd = (instr & 0x7) as u8;
        let op1 = self.cpu.reg(rd);
        let op2 = self.cpu.reg(rs);
        let carry_in = self.cpu.flag(flags::C) as u32;

        // A helper each for the three flag conventions in this family.
        macro_rules! logical {
            ($result:expr, $write:expr) => {{
                let result: u32 = $result;
                if $write {
                    self.cpu.set_reg(rd, result);
                }
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z - -);
            }};
        }
        macro_rules! arithmetic {
            ($triple:expr, $write:expr) => {{
                let (result, c, v) = $triple;
                if $write {
                    self.cpu.set_reg(rd, result);
                }
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z c v);
            }};
        }
        macro_rules! shifted {
            ($shift:expr) => {{
                // The amount comes from a register: one internal cycle.
                self.cycle(1);
                let (result, carry) = self.cpu.barrel_shift(op1, $shift, op2 & 0xFF, true);
                self.cpu.set_reg(rd, result);
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z carry -);
            }};
        }

        match (instr >> 6) & 0xF {
            0x0 => logical!(op1 & op2, true),                    // AND
            0x1 => logical!(op1 ^ op2, true),                    // EOR
            0x2 => shifted!(Shift::Lsl),                         // LSL
            0x3 => shifted!(Shift::Lsr),                         // LSR
            0x4 => shifted!(Shift::Asr),                         // ASR
            0x5 => arithmetic!(alu_add(op1, op2, carry_in), true), // ADC
            0x6 => arithmetic!(alu_sub(op1, op2, carry_in), true), // SBC
            0x7 => shifted!(Shift::Ror),                         // ROR
            0x8 => logical!(op1 & op2, false),                   // TST
            0x9 => arithmetic!(alu_sub(0, op2, 1), true),        // NEG
            0xA => arithmetic!(alu_sub(op1, op2, 1), false),     // CMP
            0xB => arithmetic!(alu_add(op1, op2, 0), false),     // CMN
            0xC => logical!(op1 | op2, true),                    // ORR
            0xD => {
                // MUL
                self.cycle(multiply_cycles(op1, true));
                let result = op1.wrapping_mul(op2);
                self.cpu.set_reg(rd, result);
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z - -);
            }
            0xE => logical!(op1 & !op2, true),                   // BIC
            _ => logical!(!op2, true),                           // MVN
        }
    }

    /// Format 5: ADD/CMP/MOV on the full register file, and BX.
    pub(crate) fn thumb_hi_register_op(&mut self, instr: u16) {
        let rs = (((instr >> 3) & 0x7) | ((instr & 0x40) >> 3)) as u8;
        let rd = ((instr & 0x7) | ((instr & 0x80) >> 4)) as u8;

        let op1 = self.cpu.reg(rs);
        let op2 = self.cpu.reg(rd);

        match (instr >> 8) & 0b11 {
            // ADD rd, rs without touching the flags.
            0 => {
                self.cpu.set_reg(rd, op2.wrapping_add(op1));
                if rd == 15 {
                    self.thumb_fetch();
                }
            }
            // CMP rd, rs: the only flag-setting high register operation.
            1 => {
                let (result, c, v) = alu_sub(op2, op1, 1);
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z c v);
            }
            // MOV rd, rs.
            2 => {
                self.cpu.set_reg(rd, op1);
                if rd == 15 {
                    self.thumb_fetch();
                }
            }
            // BX rs.
            _ => self.branch_exchange(op1),
        }
    }

    /// Format 6: LDR rd, [PC, #imm].
    pub(crate) fn thumb_pc_relative_load(&mut self, instr: u16) {
        let rd = ((instr >> 8) & 0x7) as u8;
        let imm = ((instr & 0xFF) as u32) << 2;

        // The PC base is forced to word alignment.
        let addr = (self.cpu.reg(15) & !0x2).wrapping_add(imm);
        let value = self.read32(addr, Access::NonSeq);
        self.cycle(1);
        self.cpu.set_reg(rd, value);
    }

    /// Format 7: LDR/STR/LDRB/STRB with a register offset.
    pub(crate) fn thumb_load_store_reg(&mut self, instr: u16) {
        let ro = ((instr >> 6) & 0x7) as u8;
        let rb = ((instr >> 3) & 0x7) as u8;
        let rd = (instr & 0x7) as u8;
        let addr = self.cpu.reg(rb).wrapping_add(self.cpu.reg(ro));

        match (instr >> 10) & 0b11 {
            // STR
            0 => {
                self.write32(addr, self.cpu.reg(rd), Access::NonSeq);
                self.bus.set_last_access(Access::NonSeq);
            }
            // STRB
            1 => {
                self.write8(addr, self.cpu.reg(rd) as u8, Access::NonSeq);
                self.bus.set_last_access(Access::NonSeq);
            }
            // LDR
            2 => {
                let value = self.read_rotated32(addr, Access::NonSeq);
                self.cycle(1);
                self.cpu.set_reg(rd, value);
            }
            // LDRB
            _ => {
                let value = self.read8(addr, Access::NonSeq) as u32;
                self.cycle(1);
                self.cpu.set_reg(rd, value);
            }
        }
    }

    /// Format 8: STRH/LDRSB/LDRH/LDRSH with a register offset.
    pub(crate) fn thumb_load_store_sign(&mut self, instr: u16) {
        let ro = ((instr >> 6) & 0x7) as u8;
        let rb = ((instr >> 3) & 0x7) as u8;
        let rd = (instr & 0x7) as u8;
        let addr = self.cpu.reg(rb).wrapping_add(self.cpu.reg(ro));

        match (instr >> 10) & 0b11 {
            // STRH
            0 => {
                self.write16(addr, self.cpu.reg(rd) as u16, Access::NonSeq);
                self.bus.set_last_access(Access::NonSeq);
            }
            // LDRSB
            1 => {
                let value = self.read8(addr, Access::NonSeq) as i8 as u32;
                self.cycle(1);
                self.cpu.set_reg(rd, value);
            }
            // LDRH, with the misaligned rotation.
            2 => {
                let value = (self.read16(addr, Access::NonSeq) as u32)
                    .rotate_right((addr & 0x1) * 8);
                self.cycle(1);
                self.cpu.set_reg(rd, value);
            }
            // LDRSH; misaligned degrades to a signed byte load.
            _ => {
                let value = if addr & 0x1 != 0 {
                    self.read8(addr, Access::NonSeq) as i8 as u32
                } else {
                    self.read16(addr, Access::NonSeq) as i16 as u32
                };
                self.cycle(1);
                self.cpu.set_reg(rd, value);
            }
        }
    }

    /// Format 9: LDR/STR/LDRB/STRB with a 5 bit immediate offset.
    pub(crate) fn thumb_load_store_imm(&mut self, instr: u16) {
        let offset = ((instr >> 6) & 0x1F) as u32;
        let rb = ((instr >> 3) & 0x7) as u8;
        let rd = (instr & 0x7) as u8;
        let base = self.cpu.reg(rb);

        match (instr >> 11) & 0b11 {
            // STR, word scaled offset.
            0 => {
                self.write32(base.wrapping_add(offset << 2), self.cpu.reg(rd), Access::NonSeq);
                self.bus.set_last_access(Access::NonSeq);
            }
            // LDR
            1 => {
                let value = self.read_rotated32(base.wrapping_add(offset << 2), Access::NonSeq);
                self.cycle(1);
                self.cpu.set_reg(rd, value);
            }
            // STRB
            2 => {
                self.write8(base.wrapping_add(offset), self.cpu.reg(rd) as u8, Access::NonSeq);
                self.bus.set_last_access(Access::NonSeq);
            }
            // LDRB
            _ => {
                let value = self.read8(base.wrapping_add(offset), Access::NonSeq) as u32;
                self.cycle(1);
                self.cpu.set_reg(rd, value);
            }
        }
    }

    /// Format 10: LDRH/STRH with a halfword scaled immediate offset.
    pub(crate) fn thumb_load_store_half(&mut self, instr: u16) {
        let offset = (((instr >> 6) & 0x1F) as u32) << 1;
        let rb = ((instr >> 3) & 0x7) as u8;
        let rd = (instr & 0x7) as u8;
        let addr = self.cpu.reg(rb).wrapping_add(offset);

        if instr & (1 << 11) != 0 {
            let value = (self.read16(addr, Access::NonSeq) as u32).rotate_right((addr & 0x1) * 8);
            self.cycle(1);
            self.cpu.set_reg(rd, value);
        } else {
            self.write16(addr, self.cpu.reg(rd) as u16, Access::NonSeq);
            self.bus.set_last_access(Access::NonSeq);
        }
    }

    /// Format 11: LDR/STR relative to the stack pointer.
    pub(crate) fn thumb_sp_relative(&mut self, instr: u16) {
        let rd = ((instr >> 8) & 0x7) as u8;
        let imm = ((instr & 0xFF) as u32) << 2;
        let addr = self.cpu.reg(13).wrapping_add(imm);

        if instr & (1 << 11) != 0 {
            let value = self.read_rotated32(addr, Access::NonSeq);
            self.cycle(1);
            self.cpu.set_reg(rd, value);
        } else {
            self.write32(addr, self.cpu.reg(rd), Access::NonSeq);
            self.bus.set_last_access(Access::NonSeq);
        }
    }

    /// Format 12: ADD rd, PC/SP, #imm (load address).
    pub(crate) fn thumb_load_address(&mut self, instr: u16) {
        let rd = ((instr >> 8) & 0x7) as u8;
        let imm = ((instr & 0xFF) as u32) << 2;

        let base = if instr & (1 << 11) != 0 {
            self.cpu.reg(13)
        } else {
            self.cpu.reg(15) & !0x2
        };
        self.cpu.set_reg(rd, base.wrapping_add(imm));
    }

    /// Format 13: ADD SP, #±imm.
    pub(crate) fn thumb_adjust_sp(&mut self, instr: u16) {
        let imm = ((instr & 0x7F) as u32) << 2;
        let sp = self.cpu.reg(13);
        let sp = if instr & (1 << 7) != 0 {
            sp.wrapping_sub(imm)
        } else {
            sp.wrapping_add(imm)
        };
        self.cpu.set_reg(13, sp);
    }

    /// Format 14: PUSH/POP, optionally with LR/PC.
    pub(crate) fn thumb_push_pop(&mut self, instr: u16) {
        let load = instr & (1 << 11) != 0;
        let pc_lr = instr & (1 << 8) != 0;
        let list = (instr & 0xFF) as u32;
        let count = list.count_ones() + pc_lr as u32;

        if load {
            // POP: ascending from SP.
            let mut addr = self.cpu.reg(13);
            let mut access = Access::NonSeq;

            for r in 0..8u8 {
                if list & (1 << r) == 0 {
                    continue;
                }
                let value = self.read32(addr, access);
                access = Access::Seq;
                addr = addr.wrapping_add(4);
                self.cpu.set_reg(r, value);
            }

            let target = if pc_lr {
                let target = self.read32(addr, access);
                addr = addr.wrapping_add(4);
                Some(target)
            } else {
                None
            };

            self.cpu.set_reg(13, addr);
            self.cycle(1);

            if let Some(target) = target {
                self.cpu.set_reg(15, target & !0x1);
                self.thumb_fetch();
            }
        } else {
            // PUSH: the block ends just below the old SP; stores still run
            // at ascending addresses.
            let base = self.cpu.reg(13).wrapping_sub(4 * count);
            self.cpu.set_reg(13, base);

            let mut addr = base;
            let mut access = Access::NonSeq;
            for r in 0..8u8 {
                if list & (1 << r) == 0 {
                    continue;
                }
                self.write32(addr, self.cpu.reg(r), access);
                access = Access::Seq;
                addr = addr.wrapping_add(4);
            }
            if pc_lr {
                self.write32(addr, self.cpu.reg(14), access);
            }

            self.bus.set_last_access(Access::NonSeq);
        }
    }

    /// Format 15: LDMIA/STMIA with base writeback.
    pub(crate) fn thumb_multiple(&mut self, instr: u16) {
        let load = instr & (1 << 11) != 0;
        let rb = ((instr >> 8) & 0x7) as u8;
        let list = (instr & 0xFF) as u32;
        let base = self.cpu.reg(rb);

        if list == 0 {
            // Empty list: transfer r15, move the base by 16 words. Same
            // quirk as the ARM encoding.
            if load {
                let target = self.read32(base, Access::NonSeq);
                self.cycle(1);
                self.cpu.set_reg(rb, base.wrapping_add(0x40));
                self.cpu.set_reg(15, target & !0x1);
                self.thumb_fetch();
            } else {
                self.write32(base, self.cpu.reg(15).wrapping_add(2), Access::NonSeq);
                self.cpu.set_reg(rb, base.wrapping_add(0x40));
                self.bus.set_last_access(Access::NonSeq);
            }
            return;
        }

        let new_base = base.wrapping_add(4 * list.count_ones());

        if load {
            // Writeback first: a loaded base register wins.
            self.cpu.set_reg(rb, new_base);

            let mut addr = base;
            let mut access = Access::NonSeq;
            for r in 0..8u8 {
                if list & (1 << r) == 0 {
                    continue;
                }
                let value = self.read32(addr, access);
                access = Access::Seq;
                addr = addr.wrapping_add(4);
                self.cpu.set_reg(r, value);
            }
            self.cycle(1);
        } else {
            let mut addr = base;
            let mut access = Access::NonSeq;
            let mut first = true;
            for r in 0..8u8 {
                if list & (1 << r) == 0 {
                    continue;
                }
                let value = if r == rb {
                    if first { base } else { new_base }
                } else {
                    self.cpu.reg(r)
                };
                self.write32(addr, value, access);
                access = Access::Seq;
                addr = addr.wrapping_add(4);
                first = false;
            }
            self.cpu.set_reg(rb, new_base);
            self.bus.set_last_access(Access::NonSeq);
        }
    }

    /// Format 16: conditional branch, reusing the ARM condition table.
    pub(crate) fn thumb_cond_branch(&mut self, instr: u16) {
        if !self.cpu.eval_condition(((instr >> 8) & 0xF) as u32) {
            return;
        }

        let offset = (((instr & 0xFF) as i8) as i32) << 1;
        let target = self.cpu.reg(15).wrapping_add(offset as u32);
        self.cpu.set_reg(15, target);
        self.thumb_fetch();
    }

    pub(crate) fn thumb_software_interrupt(&mut self) {
        self.exception(Exception::SoftwareInterrupt);
    }

    /// The unallocated holes of the Thumb encoding. They are software
    /// visible, so they take the undefined instruction exception like the
    /// ARM undefined pattern does.
    pub(crate) fn thumb_undefined(&mut self, _instr: u16) {
        self.exception(Exception::Undefined);
    }

    /// Format 18: unconditional branch with an 11 bit offset.
    pub(crate) fn thumb_branch(&mut self, instr: u16) {
        let offset = ((((instr & 0x7FF) as i32) << 21) >> 20) as u32;
        let target = self.cpu.reg(15).wrapping_add(offset);
        self.cpu.set_reg(15, target);
        self.thumb_fetch();
    }

    /// Format 19: the two-instruction long branch with link. The first half
    /// stages the upper offset bits in r14, the second half branches and
    /// leaves the return address (with bit 0 set) in r14.
    pub(crate) fn thumb_long_branch(&mut self, instr: u16) {
        let offset = (instr & 0x7FF) as u32;

        if instr & (1 << 11) == 0 {
            let high = ((((offset as i32) << 21) >> 9) as u32).wrapping_add(self.cpu.reg(15));
            self.cpu.set_reg(14, high);
        } else {
            let target = self.cpu.reg(14).wrapping_add(offset << 1);
            let ret = self.cpu.reg(15).wrapping_sub(2) | 0x1;
            self.cpu.set_reg(14, ret);
            self.cpu.set_reg(15, target);
            self.thumb_fetch();
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cartridge::Cartridge,
        machine::cpu::control,
    };


    fn test_machine() -> Machine {
        let cartridge = Cartridge::from_bytes(&[]).unwrap();
        let mut m = Machine::new(cartridge, &[], true);
        m.cpu.cpsr |= control::T;
        m
    }

    /// Places the instruction in IWRAM and executes it through the normal
    /// fetch path.
    fn exec(m: &mut Machine, instr: u16) {
        m.write16(0x0300_0000, instr, Access::Fast);
        m.cpu.cpsr |= control::T;
        m.cpu.set_reg(15, 0x0300_0000);
        m.thumb_fetch();
        m.step().unwrap();
    }

    #[test]
    fn test_move_shifted_register() {
        let mut m = test_machine();
        m.cpu.set_reg(1, 0x8000_0001);

        // LSL r0, r1, #4
        exec(&mut m, 0x0108);
        assert_eq!(m.cpu.reg(0), 0x0000_0010);
        assert!(!m.cpu.flag(flags::N));

        // LSR r0, r1, #1: carry from bit 0.
        exec(&mut m, 0x0848);
        assert_eq!(m.cpu.reg(0), 0x4000_0000);
        assert!(m.cpu.flag(flags::C));

        // ASR r0, r1, #0 means ASR #32.
        exec(&mut m, 0x1048);
        assert_eq!(m.cpu.reg(0), 0xFFFF_FFFF);
        assert!(m.cpu.flag(flags::N));
    }

    #[test]
    fn test_add_sub_forms() {
        let mut m = test_machine();
        m.cpu.set_reg(0, 10);
        m.cpu.set_reg(1, 3);

        // ADD r2, r0, r1
        exec(&mut m, 0x1842);
        assert_eq!(m.cpu.reg(2), 13);
        assert!(m.cpu.flag(flags::C) == false);

        // SUB r0, r1, #2
        exec(&mut m, 0x1E88);
        assert_eq!(m.cpu.reg(0), 1);
        assert!(m.cpu.flag(flags::C));
    }

    #[test]
    fn test_move_compare_immediate() {
        let mut m = test_machine();

        // MOV r0, #42
        exec(&mut m, 0x202A);
        assert_eq!(m.cpu.reg(0), 42);
        assert!(!m.cpu.flag(flags::Z));

        // CMP r0, #42: equal sets Z and C.
        exec(&mut m, 0x282A);
        assert!(m.cpu.flag(flags::Z));
        assert!(m.cpu.flag(flags::C));

        // SUB r0, #43 wraps below zero.
        exec(&mut m, 0x382B);
        assert_eq!(m.cpu.reg(0), 0xFFFF_FFFF);
        assert!(!m.cpu.flag(flags::C));
    }

    #[test]
    fn test_alu_operations() {
        let mut m = test_machine();

        m.cpu.set_reg(0, 0b1100);
        m.cpu.set_reg(1, 0b1010);

        // AND r0, r1
        exec(&mut m, 0x4008);
        assert_eq!(m.cpu.reg(0), 0b1000);

        // NEG r0, r1
        exec(&mut m, 0x4248);
        assert_eq!(m.cpu.reg(0), 0b1010u32.wrapping_neg());
        assert!(m.cpu.flag(flags::N));

        // MUL r0, r1 = -10 * 10.
        m.cpu.set_reg(0, 0xFFFF_FFF6);
        m.cpu.set_reg(1, 10);
        exec(&mut m, 0x4348);
        assert_eq!(m.cpu.reg(0), 100u32.wrapping_neg());

        // LSL r0, r1 by register amount.
        m.cpu.set_reg(0, 1);
        m.cpu.set_reg(1, 8);
        exec(&mut m, 0x4088);
        assert_eq!(m.cpu.reg(0), 0x100);
    }

    #[test]
    fn test_hi_register_ops() {
        let mut m = test_machine();

        // MOV r8, r0
        m.cpu.set_reg(0, 0x1234);
        exec(&mut m, 0x4680);
        assert_eq!(m.cpu.reg(8), 0x1234);

        // CMP r8, r9 with equal values sets Z without writing.
        m.cpu.set_reg(9, 0x1234);
        exec(&mut m, 0x45C8);
        assert!(m.cpu.flag(flags::Z));

        // ADD r1, r8 (low destination, high source).
        m.cpu.set_reg(1, 1);
        exec(&mut m, 0x4441);
        assert_eq!(m.cpu.reg(1), 0x1235);
    }

    #[test]
    fn test_pc_relative_load() {
        let mut m = test_machine();
        m.write32(0x0300_0008, 0xCAFE_BABE, Access::Fast);

        // LDR r0, [PC, #4]: base is the aligned r15 = 0x03000004.
        exec(&mut m, 0x4801);
        assert_eq!(m.cpu.reg(0), 0xCAFE_BABE);
    }

    #[test]
    fn test_load_store_register_offset() {
        let mut m = test_machine();
        m.cpu.set_reg(1, 0x0200_0000);
        m.cpu.set_reg(2, 0x10);
        m.cpu.set_reg(0, 0xDEAD_BEEF);

        // STR r0, [r1, r2]
        exec(&mut m, 0x5088);
        assert_eq!(m.read32(0x0200_0010, Access::Fast), 0xDEAD_BEEF);

        // LDRB r3, [r1, r2]
        exec(&mut m, 0x5C8B);
        assert_eq!(m.cpu.reg(3), 0xEF);
    }

    #[test]
    fn test_load_store_sign_extended() {
        let mut m = test_machine();
        m.cpu.set_reg(1, 0x0200_0020);
        m.cpu.set_reg(2, 0);
        m.cpu.set_reg(0, 0x8765);

        // STRH r0, [r1, r2]
        exec(&mut m, 0x5288);
        assert_eq!(m.read16(0x0200_0020, Access::Fast), 0x8765);

        // LDRH r3, [r1, r2]
        exec(&mut m, 0x5A8B);
        assert_eq!(m.cpu.reg(3), 0x8765);

        // LDRSH r3, [r1, r2]
        exec(&mut m, 0x5E8B);
        assert_eq!(m.cpu.reg(3), 0xFFFF_8765);

        // LDRSB r3, [r1, r2]
        exec(&mut m, 0x568B);
        assert_eq!(m.cpu.reg(3), 0x65);
    }

    #[test]
    fn test_load_store_immediate_offset() {
        let mut m = test_machine();
        m.cpu.set_reg(1, 0x0200_0040);
        m.cpu.set_reg(0, 0x0102_0304);

        // STR r0, [r1, #4]
        exec(&mut m, 0x6048);
        assert_eq!(m.read32(0x0200_0044, Access::Fast), 0x0102_0304);

        // LDR r2, [r1, #4]
        exec(&mut m, 0x684A);
        assert_eq!(m.cpu.reg(2), 0x0102_0304);

        // STRB r0, [r1, #1]
        exec(&mut m, 0x7048);
        assert_eq!(m.read8(0x0200_0041, Access::Fast), 0x04);
    }

    #[test]
    fn test_load_store_halfword_and_sp_relative() {
        let mut m = test_machine();
        m.cpu.set_reg(1, 0x0200_0060);
        m.cpu.set_reg(0, 0xBEEF);

        // STRH r0, [r1, #2]
        exec(&mut m, 0x8048);
        assert_eq!(m.read16(0x0200_0062, Access::Fast), 0xBEEF);

        // LDRH r2, [r1, #2]
        exec(&mut m, 0x884A);
        assert_eq!(m.cpu.reg(2), 0xBEEF);

        // SP relative store/load at [sp, #4].
        m.cpu.set_reg(13, 0x0300_1000);
        m.cpu.set_reg(0, 0x5555_AAAA);
        exec(&mut m, 0x9001); // STR r0, [sp, #4]
        assert_eq!(m.read32(0x0300_1004, Access::Fast), 0x5555_AAAA);
        exec(&mut m, 0x9A01); // LDR r2, [sp, #4]
        assert_eq!(m.cpu.reg(2), 0x5555_AAAA);
    }

    #[test]
    fn test_load_address_and_adjust_sp() {
        let mut m = test_machine();
        m.cpu.set_reg(13, 0x0300_2000);

        // ADD r0, PC, #8: aligned r15 + 8.
        exec(&mut m, 0xA002);
        assert_eq!(m.cpu.reg(0), 0x0300_000C);

        // ADD r1, SP, #16
        exec(&mut m, 0xA904);
        assert_eq!(m.cpu.reg(1), 0x0300_2010);

        // SUB SP, #8 and ADD SP, #8.
        exec(&mut m, 0xB082);
        assert_eq!(m.cpu.reg(13), 0x0300_1FF8);
        exec(&mut m, 0xB002);
        assert_eq!(m.cpu.reg(13), 0x0300_2000);
    }

    #[test]
    fn test_push_pop_roundtrip() {
        let mut m = test_machine();
        m.cpu.set_reg(13, 0x0300_1000);
        m.cpu.set_reg(0, 0xAAAA_0000);
        m.cpu.set_reg(1, 0xBBBB_1111);
        m.cpu.set_reg(14, 0x0300_0101);

        // PUSH {r0, r1, lr}
        exec(&mut m, 0xB503);
        assert_eq!(m.cpu.reg(13), 0x0300_0FF4);
        assert_eq!(m.read32(0x0300_0FF4, Access::Fast), 0xAAAA_0000);
        assert_eq!(m.read32(0x0300_0FF8, Access::Fast), 0xBBBB_1111);
        assert_eq!(m.read32(0x0300_0FFC, Access::Fast), 0x0300_0101);

        // POP {r2, r3, pc}: the PC target's bit 0 is dropped.
        exec(&mut m, 0xBD0C);
        assert_eq!(m.cpu.reg(2), 0xAAAA_0000);
        assert_eq!(m.cpu.reg(3), 0xBBBB_1111);
        assert_eq!(m.cpu.reg(13), 0x0300_1000);
        assert!(m.cpu.thumb_state());
        assert_eq!(m.cpu.reg(15), 0x0300_0102);
    }

    #[test]
    fn test_multiple_load_store() {
        let mut m = test_machine();
        m.cpu.set_reg(0, 0x0200_0100);
        m.cpu.set_reg(1, 0x1111_1111);
        m.cpu.set_reg(2, 0x2222_2222);

        // STMIA r0!, {r1, r2}
        exec(&mut m, 0xC006);
        assert_eq!(m.cpu.reg(0), 0x0200_0108);
        assert_eq!(m.read32(0x0200_0100, Access::Fast), 0x1111_1111);
        assert_eq!(m.read32(0x0200_0104, Access::Fast), 0x2222_2222);

        // LDMIA r3!, {r4, r5}
        m.cpu.set_reg(3, 0x0200_0100);
        exec(&mut m, 0xCB30);
        assert_eq!(m.cpu.reg(3), 0x0200_0108);
        assert_eq!(m.cpu.reg(4), 0x1111_1111);
        assert_eq!(m.cpu.reg(5), 0x2222_2222);
    }

    #[test]
    fn test_conditional_branch() {
        let mut m = test_machine();

        // Set Z: CMP r0, #0 with r0 = 0.
        m.cpu.set_reg(0, 0);
        exec(&mut m, 0x2800);
        assert!(m.cpu.flag(flags::Z));

        // BEQ +4: target = r15 + 4 = 0x03000008.
        exec(&mut m, 0xD002);
        assert_eq!(m.cpu.reg(15), 0x0300_000A);

        // BNE +4 must fall through: r15 stays at the next fetch position.
        exec(&mut m, 0xD102);
        assert_eq!(m.cpu.reg(15), 0x0300_0004);
    }

    #[test]
    fn test_unconditional_branch() {
        let mut m = test_machine();

        // B -4: target = r15 - 4 = 0x03000000, i.e. branch to self.
        exec(&mut m, 0xE7FE);
        assert_eq!(m.cpu.reg(15), 0x0300_0002);
    }

    #[test]
    fn test_long_branch_with_link() {
        let mut m = test_machine();
        m.write16(0x0300_0000, 0xF000, Access::Fast);
        m.write16(0x0300_0002, 0xF801, Access::Fast);
        m.cpu.set_reg(15, 0x0300_0000);
        m.thumb_fetch();

        // First half: r14 = r15 + (0 << 12) = 0x03000004.
        m.step().unwrap();
        assert_eq!(m.cpu.reg(14), 0x0300_0004);

        // Second half: branch to r14 + 2, return address with bit 0 set.
        m.step().unwrap();
        assert_eq!(m.cpu.reg(14), 0x0300_0005);
        assert_eq!(m.cpu.reg(15), 0x0300_0006 + 2);
    }

    #[test]
    fn test_unallocated_encoding_takes_exception() {
        let mut m = test_machine();

        // 0xBE00 sits in the unallocated space around PUSH/POP.
        exec(&mut m, 0xBE00);
        assert_eq!(m.cpu.mode(), crate::machine::cpu::Mode::Undefined);
        assert!(!m.cpu.thumb_state());
        // The banked return address points at the following instruction.
        assert_eq!(m.cpu.reg(14), 0x0300_0002);
        assert_eq!(m.cpu.reg(15), 0x0000_0004 + 4);
    }

    #[test]
    fn test_thumb_swi() {
        let mut m = test_machine();

        // SWI 5
        exec(&mut m, 0xDF05);
        assert!(!m.cpu.thumb_state());
        assert_eq!(m.cpu.mode(), crate::machine::cpu::Mode::Supervisor);
        // The return address is the following Thumb instruction.
        assert_eq!(m.cpu.reg(14), 0x0300_0002);
        assert_eq!(m.cpu.reg(15), 0x0000_0008 + 4);
    }
}
