//! Execution of the ARM (32 bit) instruction set.

use super::{Access, Exception, Machine};
use crate::machine::cpu::{control, flags, Mode, Shift};


/// `a + b + carry_in`, returning `(result, carry, overflow)`.
pub(crate) fn alu_add(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool) {
    let wide = a as u64 + b as u64 + carry_in as u64;
    let result = wide as u32;
    let carry = wide > u32::max_value() as u64;
    let overflow = (!(a ^ b) & (a ^ result)) >> 31 != 0;
    (result, carry, overflow)
}

/// `a - b - 1 + carry_in` via `a + !b + carry_in`; the carry-out is the ARM
/// "no borrow" convention (set when `a >= b` for a plain subtraction).
pub(crate) fn alu_sub(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool) {
    alu_add(a, !b, carry_in)
}

/// Internal cycles of the multiplier array: the Booth steps terminate early
/// when the top of the multiplier is all zeroes (or all ones, for the signed
/// forms).
pub(crate) fn multiply_cycles(rs: u32, signed: bool) -> u32 {
    let rs = if signed && rs >> 31 != 0 { !rs } else { rs };
    match rs {
        0x0000_0000..=0x0000_00FF => 1,
        0x0000_0100..=0x0000_FFFF => 2,
        0x0001_0000..=0x00FF_FFFF => 3,
        _ => 4,
    }
}


impl Machine {
    /// Reads a register for an operand. When the operand is consumed one
    /// internal cycle into the instruction (register specified shifts), r15
    /// reads one word further ahead than usual; `adjust` carries that.
    fn operand_reg(&self, rn: u8, adjust: u32) -> u32 {
        let value = self.cpu.reg(rn);
        if rn == 15 { value.wrapping_add(adjust) } else { value }
    }

    /// The value a store instruction pushes out for a register. r15 is
    /// stored one word ahead of its visible value (PC + 12 relative to the
    /// instruction).
    fn store_value(&self, rn: u8) -> u32 {
        self.operand_reg(rn, 4)
    }

    /// Reads a word with the misaligned-load behavior: the aligned word is
    /// rotated right by 8 bits per low address bit.
    pub(crate) fn read_rotated32(&mut self, addr: u32, access: Access) -> u32 {
        self.read32(addr, access).rotate_right((addr & 0x3) * 8)
    }

    /// Computes the effective address of a load/store, applying index mode
    /// and writeback. Post-indexing always writes the offset base back;
    /// pre-indexing only with the W bit.
    fn transfer_address(&mut self, rn: u8, offset: u32, pre: bool, up: bool, writeback: bool) -> u32 {
        let base = self.operand_reg(rn, 0);
        let offset_base = if up {
            base.wrapping_add(offset)
        } else {
            base.wrapping_sub(offset)
        };

        let addr = if pre { offset_base } else { base };
        if !pre || writeback {
            self.cpu.set_reg(rn, offset_base);
        }

        addr
    }

    /// BX: branches to a register value, switching between ARM and Thumb
    /// state based on bit 0 of the target.
    pub(crate) fn arm_branch_exchange(&mut self, instr: u32) {
        let target = self.cpu.reg((instr & 0xF) as u8);
        self.branch_exchange(target);
    }

    /// The shared tail of the two BX encodings (ARM and Thumb).
    pub(crate) fn branch_exchange(&mut self, target: u32) {
        if target & 0x1 != 0 {
            self.cpu.cpsr |= control::T;
            self.cpu.set_reg(15, target & !0x1);
            self.thumb_fetch();
        } else {
            self.cpu.cpsr &= !control::T;
            self.cpu.set_reg(15, target & !0x3);
            self.arm_fetch();
        }
    }

    /// B/BL: PC relative branch, optionally leaving the return address in
    /// r14.
    pub(crate) fn arm_branch(&mut self, instr: u32) {
        // 24 bit signed word offset.
        let offset = (((instr & 0x00FF_FFFF) << 8) as i32 >> 6) as u32;

        if instr & (1 << 24) != 0 {
            self.cpu.set_reg(14, self.cpu.reg(15).wrapping_sub(4));
        }

        self.cpu.set_reg(15, self.cpu.reg(15).wrapping_add(offset));
        self.arm_fetch();
    }

    pub(crate) fn arm_software_interrupt(&mut self) {
        self.exception(Exception::SoftwareInterrupt);
    }

    pub(crate) fn arm_undefined(&mut self, _instr: u32) {
        self.exception(Exception::Undefined);
    }

    /// The 16 data processing opcodes.
    pub(crate) fn arm_data_processing(&mut self, instr: u32) {
        let opcode = (instr >> 21) & 0xF;
        let s = instr & (1 << 20) != 0;
        let rn = ((instr >> 16) & 0xF) as u8;
        let rd = ((instr >> 12) & 0xF) as u8;

        // Operand 2: a rotated 8 bit immediate or a barrel shifted register.
        // `pc_adjust` is 4 when a register specified shift delays the
        // operand reads by one cycle.
        let (op2, shifter_carry, pc_adjust) = if instr & (1 << 25) != 0 {
            let rot = ((instr >> 8) & 0xF) * 2;
            let value = (instr & 0xFF).rotate_right(rot);
            let carry = if rot == 0 {
                self.cpu.flag(flags::C)
            } else {
                value >> 31 != 0
            };
            (value, carry, 0)
        } else {
            let rm = (instr & 0xF) as u8;
            let shift = Shift::from_bits(instr >> 5);
            let by_reg = instr & (1 << 4) != 0;

            let (amount, pc_adjust) = if by_reg {
                // Reading the amount from a register costs one internal
                // cycle before the ALU operates.
                self.cycle(1);
                let rs = ((instr >> 8) & 0xF) as u8;
                (self.cpu.reg(rs) & 0xFF, 4)
            } else {
                ((instr >> 7) & 0x1F, 0)
            };

            let value = self.operand_reg(rm, pc_adjust);
            let (shifted, carry) = self.cpu.barrel_shift(value, shift, amount, by_reg);
            (shifted, carry, pc_adjust)
        };

        let op1 = self.operand_reg(rn, pc_adjust);
        let carry_in = self.cpu.flag(flags::C) as u32;

        // `arith` carries (carry, overflow) for the arithmetic opcodes; the
        // logical ones take the shifter carry and leave V alone.
        let (result, writes_rd, arith) = match opcode {
            0x0 => (op1 & op2, true, None),                       // AND
            0x1 => (op1 ^ op2, true, None),                       // EOR
            0x2 => with_flags(alu_sub(op1, op2, 1), true),        // SUB
            0x3 => with_flags(alu_sub(op2, op1, 1), true),        // RSB
            0x4 => with_flags(alu_add(op1, op2, 0), true),        // ADD
            0x5 => with_flags(alu_add(op1, op2, carry_in), true), // ADC
            0x6 => with_flags(alu_sub(op1, op2, carry_in), true), // SBC
            0x7 => with_flags(alu_sub(op2, op1, carry_in), true), // RSC
            0x8 => (op1 & op2, false, None),                      // TST
            0x9 => (op1 ^ op2, false, None),                      // TEQ
            0xA => with_flags(alu_sub(op1, op2, 1), false),       // CMP
            0xB => with_flags(alu_add(op1, op2, 0), false),       // CMN
            0xC => (op1 | op2, true, None),                       // ORR
            0xD => (op2, true, None),                             // MOV
            0xE => (op1 & !op2, true, None),                      // BIC
            _ => (!op2, true, None),                              // MVN
        };

        if writes_rd {
            self.cpu.set_reg(rd, result);
        }

        if s {
            if rd == 15 && writes_rd {
                // SUBS pc, lr and friends: return from an exception by
                // restoring the saved status register.
                self.cpu.cpsr = self.cpu.spsr();
            } else {
                let n = result >> 31 != 0;
                let z = result == 0;
                match arith {
                    Some((c, v)) => { set_flags!(self.cpu => n z c v); }
                    None => {
                        let c = shifter_carry;
                        set_flags!(self.cpu => n z c -);
                    }
                }
            }
        }

        if writes_rd && rd == 15 {
            self.refill_pipeline();
        }
    }

    /// LDR/STR/LDRB/STRB.
    pub(crate) fn arm_single_transfer(&mut self, instr: u32) {
        let pre = instr & (1 << 24) != 0;
        let up = instr & (1 << 23) != 0;
        let byte = instr & (1 << 22) != 0;
        let writeback = instr & (1 << 21) != 0;
        let load = instr & (1 << 20) != 0;
        let rn = ((instr >> 16) & 0xF) as u8;
        let rd = ((instr >> 12) & 0xF) as u8;

        let offset = if instr & (1 << 25) != 0 {
            // Register offset, barrel shifted by an immediate amount.
            let rm = (instr & 0xF) as u8;
            let shift = Shift::from_bits(instr >> 5);
            let amount = (instr >> 7) & 0x1F;
            let (value, _) = self.cpu.barrel_shift(self.cpu.reg(rm), shift, amount, false);
            value
        } else {
            instr & 0xFFF
        };

        // Writeback lands before the loaded value, so a load into the base
        // register keeps the loaded value.
        let addr = self.transfer_address(rn, offset, pre, up, writeback);

        if load {
            let value = if byte {
                self.read8(addr, Access::NonSeq) as u32
            } else {
                self.read_rotated32(addr, Access::NonSeq)
            };
            self.cycle(1);

            self.cpu.set_reg(rd, value);
            if rd == 15 {
                self.refill_pipeline();
            }
        } else {
            let value = self.store_value(rd);
            if byte {
                self.write8(addr, value as u8, Access::NonSeq);
            } else {
                self.write32(addr, value, Access::NonSeq);
            }
            self.bus.set_last_access(Access::NonSeq);
        }
    }

    /// LDRH/STRH/LDRSB/LDRSH.
    pub(crate) fn arm_halfword_transfer(&mut self, instr: u32) {
        let pre = instr & (1 << 24) != 0;
        let up = instr & (1 << 23) != 0;
        let writeback = instr & (1 << 21) != 0;
        let load = instr & (1 << 20) != 0;
        let rn = ((instr >> 16) & 0xF) as u8;
        let rd = ((instr >> 12) & 0xF) as u8;

        let offset = if instr & (1 << 22) != 0 {
            ((instr >> 4) & 0xF0) | (instr & 0xF)
        } else {
            self.cpu.reg((instr & 0xF) as u8)
        };

        let addr = self.transfer_address(rn, offset, pre, up, writeback);

        if load {
            let value = match (instr >> 5) & 0b11 {
                // LDRH: a misaligned address rotates the halfword, like the
                // word rotation rule.
                1 => (self.read16(addr, Access::NonSeq) as u32).rotate_right((addr & 0x1) * 8),

                // LDRSB.
                2 => self.read8(addr, Access::NonSeq) as i8 as u32,

                // LDRSH; on a misaligned address the ARMv4 core degrades it
                // to a signed byte load.
                _ => {
                    if addr & 0x1 != 0 {
                        self.read8(addr, Access::NonSeq) as i8 as u32
                    } else {
                        self.read16(addr, Access::NonSeq) as i16 as u32
                    }
                }
            };
            self.cycle(1);

            self.cpu.set_reg(rd, value);
            if rd == 15 {
                self.refill_pipeline();
            }
        } else {
            // Only STRH exists in the store direction of this space.
            self.write16(addr, self.store_value(rd) as u16, Access::NonSeq);
            self.bus.set_last_access(Access::NonSeq);
        }
    }

    /// SWP/SWPB: an atomic read followed by a write to the same address.
    pub(crate) fn arm_swap(&mut self, instr: u32) {
        let byte = instr & (1 << 22) != 0;
        let rn = ((instr >> 16) & 0xF) as u8;
        let rd = ((instr >> 12) & 0xF) as u8;
        let rm = (instr & 0xF) as u8;

        let addr = self.cpu.reg(rn);
        let value = if byte {
            let old = self.read8(addr, Access::NonSeq) as u32;
            self.write8(addr, self.cpu.reg(rm) as u8, Access::NonSeq);
            old
        } else {
            let old = self.read_rotated32(addr, Access::NonSeq);
            self.write32(addr, self.cpu.reg(rm), Access::NonSeq);
            old
        };
        self.cycle(1);
        self.bus.set_last_access(Access::NonSeq);

        self.cpu.set_reg(rd, value);
        if rd == 15 {
            self.refill_pipeline();
        }
    }

    /// MUL/MLA and the four 64 bit multiply forms.
    pub(crate) fn arm_multiply(&mut self, instr: u32) {
        let long = instr & (1 << 23) != 0;
        let accumulate = instr & (1 << 21) != 0;
        let s = instr & (1 << 20) != 0;
        let rs = self.cpu.reg(((instr >> 8) & 0xF) as u8);
        let rm = self.cpu.reg((instr & 0xF) as u8);

        if long {
            let signed = instr & (1 << 22) != 0;
            let rd_hi = ((instr >> 16) & 0xF) as u8;
            let rd_lo = ((instr >> 12) & 0xF) as u8;

            let mut result = if signed {
                (rm as i32 as i64).wrapping_mul(rs as i32 as i64) as u64
            } else {
                (rm as u64).wrapping_mul(rs as u64)
            };
            if accumulate {
                let acc = ((self.cpu.reg(rd_hi) as u64) << 32) | self.cpu.reg(rd_lo) as u64;
                result = result.wrapping_add(acc);
            }

            self.cycle(multiply_cycles(rs, signed) + 1 + accumulate as u32);

            self.cpu.set_reg(rd_hi, (result >> 32) as u32);
            self.cpu.set_reg(rd_lo, result as u32);

            if s {
                let n = result >> 63 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z - -);
            }
        } else {
            let rd = ((instr >> 16) & 0xF) as u8;
            let rn = ((instr >> 12) & 0xF) as u8;

            let mut result = rm.wrapping_mul(rs);
            if accumulate {
                result = result.wrapping_add(self.cpu.reg(rn));
            }

            self.cycle(multiply_cycles(rs, true) + accumulate as u32);

            self.cpu.set_reg(rd, result);

            if s {
                let n = result >> 31 != 0;
                let z = result == 0;
                set_flags!(self.cpu => n z - -);
            }
        }
    }

    /// LDM/STM.
    pub(crate) fn arm_block_transfer(&mut self, instr: u32) {
        let pre = instr & (1 << 24) != 0;
        let up = instr & (1 << 23) != 0;
        let s = instr & (1 << 22) != 0;
        let writeback = instr & (1 << 21) != 0;
        let load = instr & (1 << 20) != 0;
        let rn = ((instr >> 16) & 0xF) as u8;
        let mut list = instr & 0xFFFF;

        let base = self.cpu.reg(rn);

        // An empty register list transfers just r15 but moves the base by a
        // full 16 registers.
        let empty = list == 0;
        if empty {
            list = 1 << 15;
        }
        let count = if empty { 16 } else { list.count_ones() };

        let pc_in_list = list & (1 << 15) != 0;

        // Transfers always run at ascending addresses with the lowest
        // numbered register at the lowest address; for the decrementing
        // forms we precompute that lowest address.
        let lowest = match (up, pre) {
            (true, false) => base,
            (true, true) => base.wrapping_add(4),
            (false, false) => base.wrapping_sub(4 * count).wrapping_add(4),
            (false, true) => base.wrapping_sub(4 * count),
        };
        let new_base = if up {
            base.wrapping_add(4 * count)
        } else {
            base.wrapping_sub(4 * count)
        };

        // The S bit transfers the User bank, except on an LDM that loads
        // r15, where it restores CPSR from the SPSR instead.
        let user_bank = s && !(load && pc_in_list);

        // The user-bank form doesn't write back; an empty list always
        // adjusts the base.
        let writeback = (writeback || empty) && !user_bank;

        if load {
            // Writeback first: a loaded base wins over the written-back
            // address.
            if writeback {
                self.cpu.set_reg(rn, new_base);
            }

            let mut addr = lowest;
            let mut access = Access::NonSeq;
            for r in 0..16u8 {
                if list & (1 << r) == 0 {
                    continue;
                }
                let value = self.read32(addr, access);
                access = Access::Seq;
                addr = addr.wrapping_add(4);

                if user_bank {
                    self.cpu.set_user_reg(r, value);
                } else {
                    self.cpu.set_reg(r, value);
                }
            }
            self.cycle(1);

            if pc_in_list {
                if s {
                    self.cpu.cpsr = self.cpu.spsr();
                }
                self.refill_pipeline();
            }
        } else {
            let mut addr = lowest;
            let mut access = Access::NonSeq;
            let mut first = true;
            for r in 0..16u8 {
                if list & (1 << r) == 0 {
                    continue;
                }

                let value = if r == rn {
                    // Storing the base register: the first slot sees the
                    // original value, later slots the written-back one.
                    if first || !writeback { base } else { new_base }
                } else if user_bank {
                    self.cpu.user_reg(r)
                } else {
                    self.store_value(r)
                };

                self.write32(addr, value, access);
                access = Access::Seq;
                addr = addr.wrapping_add(4);
                first = false;
            }

            if writeback {
                self.cpu.set_reg(rn, new_base);
            }
            self.bus.set_last_access(Access::NonSeq);
        }
    }

    /// MRS: PSR to register.
    pub(crate) fn arm_mrs(&mut self, instr: u32) {
        let rd = ((instr >> 12) & 0xF) as u8;
        let value = if instr & (1 << 22) != 0 {
            self.cpu.spsr()
        } else {
            self.cpu.cpsr
        };
        self.cpu.set_reg(rd, value);
    }

    /// MSR: register or immediate to PSR, under the four field mask bits.
    pub(crate) fn arm_msr(&mut self, instr: u32) {
        let value = if instr & (1 << 25) != 0 {
            (instr & 0xFF).rotate_right(((instr >> 8) & 0xF) * 2)
        } else {
            self.cpu.reg((instr & 0xF) as u8)
        };

        let mut mask = 0u32;
        if instr & (1 << 16) != 0 { mask |= 0x0000_00FF; } // control
        if instr & (1 << 17) != 0 { mask |= 0x0000_FF00; } // extension
        if instr & (1 << 18) != 0 { mask |= 0x00FF_0000; } // status
        if instr & (1 << 19) != 0 { mask |= 0xFF00_0000; } // flags

        if instr & (1 << 22) != 0 {
            self.cpu.set_spsr((self.cpu.spsr() & !mask) | (value & mask));
        } else {
            // User code may only touch the flags, and nobody can flip the T
            // bit through MSR.
            if self.cpu.mode() == Mode::User {
                mask &= 0xFF00_0000;
            }
            mask &= !control::T;
            self.cpu.cpsr = (self.cpu.cpsr & !mask) | (value & mask);
        }
    }
}

/// Repacks an ALU helper result for the data processing dispatch table.
fn with_flags(
    (result, carry, overflow): (u32, bool, bool),
    writes_rd: bool,
) -> (u32, bool, Option<(bool, bool)>) {
    (result, writes_rd, Some((carry, overflow)))
}
