//! The fetch/decode/execute loop and the prefetch pipeline discipline.

use log::error;

use super::{Access, Machine};
use crate::{
    Disruption,
    instr::{arm_decode, thumb_decode, ArmClass, ThumbClass},
};


impl Machine {
    /// Refills the ARM pipeline: reads the two words at r15 and r15+4 (one
    /// non-sequential, one sequential access) into the prefetch slots and
    /// advances r15 by 4.
    ///
    /// Afterwards the usual steady state holds: slot 0 holds the word at
    /// r15-4, slot 1 the word at r15.
    pub(crate) fn arm_fetch(&mut self) {
        let pc = self.cpu.reg(15) & !0x3;
        self.cpu.pipeline[0] = self.read32(pc, Access::NonSeq);
        self.cpu.pipeline[1] = self.read32(pc.wrapping_add(4), Access::Seq);
        self.cpu.set_reg(15, pc.wrapping_add(4));
    }

    /// Returns the next ARM instruction from the pipeline and prefetches one
    /// word (the standard 1S cost every instruction pays). During the
    /// returned instruction's execution, r15 reads as its address + 8.
    fn arm_fetch_next(&mut self) -> u32 {
        let instr = self.cpu.pipeline[0];
        self.cpu.pipeline[0] = self.cpu.pipeline[1];

        let pc = self.cpu.reg(15).wrapping_add(4);
        self.cpu.pipeline[1] = self.read32(pc, Access::Seq);
        self.cpu.set_reg(15, pc);

        instr
    }

    /// The Thumb analogue of `arm_fetch`, operating on halfwords.
    pub(crate) fn thumb_fetch(&mut self) {
        let pc = self.cpu.reg(15) & !0x1;
        self.cpu.pipeline[0] = self.read16(pc, Access::NonSeq) as u32;
        self.cpu.pipeline[1] = self.read16(pc.wrapping_add(2), Access::Seq) as u32;
        self.cpu.set_reg(15, pc.wrapping_add(2));
    }

    /// The Thumb analogue of `arm_fetch_next`. During the returned
    /// instruction's execution, r15 reads as its address + 4.
    fn thumb_fetch_next(&mut self) -> u16 {
        let instr = self.cpu.pipeline[0] as u16;
        self.cpu.pipeline[0] = self.cpu.pipeline[1];

        let pc = self.cpu.reg(15).wrapping_add(2);
        self.cpu.pipeline[1] = self.read16(pc, Access::Seq) as u32;
        self.cpu.set_reg(15, pc);

        instr
    }

    /// Refills the pipeline in whatever state the T bit says. Has to be
    /// called after every write to r15.
    pub(crate) fn refill_pipeline(&mut self) {
        if self.cpu.thumb_state() {
            self.thumb_fetch();
        } else {
            self.arm_fetch();
        }
    }

    /// Executes one (the next) instruction.
    pub(crate) fn step(&mut self) -> Result<(), Disruption> {
        if self.cpu.thumb_state() {
            let instr = self.thumb_fetch_next();
            self.thumb_exec(instr)
        } else {
            let instr = self.arm_fetch_next();

            // A failed condition consumes only the prefetch cost, which
            // `arm_fetch_next` already billed.
            if !self.cpu.eval_condition(instr >> 28) {
                return Ok(());
            }

            self.arm_exec(instr)
        }
    }

    fn arm_exec(&mut self, instr: u32) -> Result<(), Disruption> {
        match arm_decode(instr) {
            Some(ArmClass::BranchExchange) => self.arm_branch_exchange(instr),
            Some(ArmClass::BlockTransfer) => self.arm_block_transfer(instr),
            Some(ArmClass::Branch) => self.arm_branch(instr),
            Some(ArmClass::SoftwareInterrupt) => self.arm_software_interrupt(),
            Some(ArmClass::Undefined) => self.arm_undefined(instr),
            Some(ArmClass::SingleTransfer) => self.arm_single_transfer(instr),
            Some(ArmClass::Swap) => self.arm_swap(instr),
            Some(ArmClass::Multiply) => self.arm_multiply(instr),
            Some(ArmClass::HalfwordTransfer) => self.arm_halfword_transfer(instr),
            Some(ArmClass::StatusToRegister) => self.arm_mrs(instr),
            Some(ArmClass::RegisterToStatus) => self.arm_msr(instr),
            Some(ArmClass::DataProcessing) => self.arm_data_processing(instr),
            None => {
                terminate!(
                    "Cannot decode ARM instruction {:#010x} in position {:#010x} after \
                        {} cycles",
                    instr,
                    self.cpu.reg(15).wrapping_sub(8),
                    self.cycle_counter,
                );
            }
        }

        Ok(())
    }

    fn thumb_exec(&mut self, instr: u16) -> Result<(), Disruption> {
        match thumb_decode(instr) {
            Some(ThumbClass::MoveShifted) => self.thumb_move_shifted(instr),
            Some(ThumbClass::AddSub) => self.thumb_add_sub(instr),
            Some(ThumbClass::MoveCompareImm) => self.thumb_move_compare_imm(instr),
            Some(ThumbClass::Alu) => self.thumb_alu(instr),
            Some(ThumbClass::HiRegisterOp) => self.thumb_hi_register_op(instr),
            Some(ThumbClass::PcRelativeLoad) => self.thumb_pc_relative_load(instr),
            Some(ThumbClass::LoadStoreReg) => self.thumb_load_store_reg(instr),
            Some(ThumbClass::LoadStoreSign) => self.thumb_load_store_sign(instr),
            Some(ThumbClass::LoadStoreImm) => self.thumb_load_store_imm(instr),
            Some(ThumbClass::LoadStoreHalf) => self.thumb_load_store_half(instr),
            Some(ThumbClass::SpRelative) => self.thumb_sp_relative(instr),
            Some(ThumbClass::LoadAddress) => self.thumb_load_address(instr),
            Some(ThumbClass::AdjustSp) => self.thumb_adjust_sp(instr),
            Some(ThumbClass::PushPop) => self.thumb_push_pop(instr),
            Some(ThumbClass::Multiple) => self.thumb_multiple(instr),
            Some(ThumbClass::CondBranch) => self.thumb_cond_branch(instr),
            Some(ThumbClass::SoftwareInterrupt) => self.thumb_software_interrupt(),
            Some(ThumbClass::Branch) => self.thumb_branch(instr),
            Some(ThumbClass::LongBranch) => self.thumb_long_branch(instr),

            // The unallocated Thumb space is architecturally undefined, not
            // a decoder failure.
            None => self.thumb_undefined(instr),
        }

        Ok(())
    }
}
