//! The interpreter loop.
//!
//! Executes one instruction per iteration: trap check, fetch, decode, branch
//! resolution, then the vector lane loop with register read, EX, MEM and
//! write-back stages. This is a functional model — every operand is read
//! from the committed register file and each instruction retires in a single
//! cycle per lane.

use std::sync::atomic::Ordering;

use crate::alu::{bitfield, crc, lanes, pack, sat};
use crate::float::{as_f32, as_u32, f32_is_nan, lane_max, lane_min, F16x2, F8x4};
use crate::ram::MemError;

use super::decode::{decode, Branch, Decoded, ExOp, MemOp, PackedMode};
use super::trace::TraceRecord;
use super::{
    Cpu, SimError, LOG2_NUM_VECTOR_LANES, MMIO_BASE, NUM_VECTOR_LANES, REG_LR, REG_PC, REG_VL,
    REG_Z, TRAP_BASE,
};

/// Effective vector length: the requested length capped by the physical lane
/// count, halved for folding operations.
#[inline]
fn actual_vector_len(requested: u32, folding: bool) -> u32 {
    let len = requested.min(NUM_VECTOR_LANES as u32);
    if folding {
        len >> 1
    } else {
        len
    }
}

impl Cpu {
    /// Run the core from `start_addr` until the program exits, an external
    /// termination is requested or `max_cycles` is reached (−1 = no limit).
    ///
    /// Returns the guest exit code. Memory faults unwind here and carry a
    /// register dump.
    pub fn run(&mut self, start_addr: u32, max_cycles: i64) -> Result<u32, SimError> {
        self.start_time = Some(std::time::Instant::now());

        self.syscalls.clear();
        self.regs[REG_PC] = start_addr;
        self.fetched_instr_count = 0;
        self.vector_loop_count = 0;
        self.cycle_count = 0;

        let result = self.run_loop(max_cycles);

        self.stop_time = Some(std::time::Instant::now());
        if let Some(trace) = self.trace.as_mut() {
            trace.flush();
        }

        match result {
            Ok(()) => Ok(self.syscalls.exit_code()),
            Err(fault) => Err(SimError {
                fault,
                dump: self.register_dump(),
            }),
        }
    }

    fn run_loop(&mut self, max_cycles: i64) -> Result<(), MemError> {
        while !self.syscalls.terminate() && !self.terminate_requested.load(Ordering::Relaxed) {
            // Host service call window: invoking an address in the trap band
            // calls the routine and simulates a return through LR.
            if self.regs[REG_PC] & 0xFFFF_0000 == TRAP_BASE {
                let routine = (self.regs[REG_PC] - TRAP_BASE) >> 2;
                self.syscalls
                    .call(routine, &mut self.regs, &mut self.ram)?;
                self.regs[REG_PC] = self.regs[REG_LR];
                continue;
            }

            // IF/ID.
            let pc = self.regs[REG_PC];
            let iword = self.ram.load32(pc)?;
            self.fetched_instr_count += 1;
            let d = decode(iword);

            // Branches resolve here, before execution.
            let next_pc = match d.branch {
                Branch::None => pc.wrapping_add(4),
                Branch::Cond { cond, reg, offset } => {
                    if cond.holds(self.regs[reg as usize]) {
                        pc.wrapping_add(offset)
                    } else {
                        pc.wrapping_add(4)
                    }
                }
                Branch::Jump { base, offset, link } => {
                    // Base slot 31 selects PC-relative addressing.
                    let base_addr = if base == 31 {
                        pc
                    } else {
                        self.regs[base as usize]
                    };
                    if link {
                        self.regs[REG_LR] = pc.wrapping_add(4);
                    }
                    base_addr.wrapping_add(offset)
                }
            };

            // Vector parameters are sampled once, before the first lane.
            let vector_len = if d.vector_op {
                actual_vector_len(self.regs[REG_VL], d.folding)
            } else {
                0
            };
            let stride = if d.vector_op {
                if d.stride_is_imm {
                    d.imm
                } else {
                    self.regs[d.src_b.no as usize]
                }
            } else {
                0
            };
            let mut addr_offset = 0u32;

            let num_loops = if d.vector_op { vector_len } else { 1 };
            for idx in 0..num_loops {
                self.perf.add_ref(self.regs[REG_PC]);

                // RF: read the committed register files.
                let src_a = if d.src_a.vector {
                    let lane = if d.folding { vector_len + idx } else { idx };
                    self.vregs[d.src_a.no as usize][lane as usize]
                } else {
                    self.regs[d.src_a.no as usize]
                };
                let reg_b_data = if d.src_b.vector {
                    self.vregs[d.src_b.no as usize][idx as usize]
                } else {
                    self.regs[d.src_b.no as usize]
                };
                let src_b = if d.src_b_is_stride {
                    addr_offset
                } else if d.src_b_is_imm {
                    d.imm
                } else {
                    reg_b_data
                };
                let src_c = if d.src_c.vector {
                    self.vregs[d.src_c.no as usize][idx as usize]
                } else {
                    self.regs[d.src_c.no as usize]
                };

                if let Some(trace) = self.trace.as_mut() {
                    trace.append(&TraceRecord {
                        valid: true,
                        src_a_valid: d.src_a_used,
                        src_b_valid: d.src_b_used,
                        src_c_valid: d.src_c_used,
                        pc,
                        src_a,
                        src_b,
                        src_c,
                    });
                }

                // EX: address generation for memory ops, kernel dispatch
                // otherwise.
                let ex_result = if d.mem_op.is_some() {
                    src_a.wrapping_add(src_b.wrapping_mul(d.packed.scale_factor()))
                } else {
                    self.execute_ex(&d, src_a, src_b, src_c)
                };

                // MEM.
                let result = match d.mem_op {
                    MemOp::None | MemOp::Ldea => ex_result,
                    MemOp::Reserved => 0,
                    MemOp::Load8 => self.ram.load8_signed(ex_result)?,
                    MemOp::LoadU8 => self.ram.load8(ex_result)?,
                    MemOp::Load16 => self.ram.load16_signed(ex_result)?,
                    MemOp::LoadU16 => self.ram.load16(ex_result)?,
                    MemOp::Load32 => self.ram.load32(ex_result)?,
                    MemOp::Store8 => {
                        self.ram.store8(ex_result, src_c)?;
                        0
                    }
                    MemOp::Store16 => {
                        self.ram.store16(ex_result, src_c)?;
                        0
                    }
                    MemOp::Store32 => {
                        self.ram.store32(ex_result, src_c)?;
                        0
                    }
                };

                // WB: the zero register never commits; the PC is not
                // reachable as a destination slot.
                if d.dst.no != REG_Z as u8 {
                    if d.dst.vector {
                        self.vregs[d.dst.no as usize][idx as usize] = result;
                    } else {
                        self.regs[d.dst.no as usize] = result;
                    }
                }

                addr_offset = addr_offset.wrapping_add(stride);

                self.cycle_count += 1;
                if max_cycles >= 0 && self.cycle_count as i64 >= max_cycles {
                    self.terminate_requested.store(true, Ordering::Relaxed);
                    break;
                }
                self.update_clkcnt()?;
            }

            if d.vector_op {
                self.vector_loop_count += num_loops as u64;
            }

            self.regs[REG_PC] = next_pc;
        }
        Ok(())
    }

    /// Publish the cycle counter into the MMIO band.
    fn update_clkcnt(&mut self) -> Result<(), MemError> {
        if self.has_mmio {
            self.ram.store32(MMIO_BASE, self.cycle_count as u32)?;
            self.ram
                .store32(MMIO_BASE + 4, (self.cycle_count >> 32) as u32)?;
        }
        Ok(())
    }

    /// System register exchange. The read happens first; the write (taken
    /// when source A is not the zero register) would follow, but no system
    /// register is writable at present.
    fn xchgsr(&self, _write_value: u32, b: u32, _write_is_z: bool) -> u32 {
        match b {
            // Feature flags: vector, packed, float and saturating modules.
            0x00 => 0x0000_000F,
            0x01..=0x0F => 0,
            0x10 => NUM_VECTOR_LANES as u32,
            0x11 => LOG2_NUM_VECTOR_LANES,
            _ => 0,
        }
    }

    /// EX-stage dispatch over operation × packed mode.
    fn execute_ex(&self, d: &Decoded, a: u32, b: u32, c: u32) -> u32 {
        use PackedMode::{Byte, HalfWord};
        match d.ex_op {
            ExOp::XchgSr => self.xchgsr(a, b, d.src_a.no == REG_Z as u8),

            ExOp::AddPc | ExOp::AddPcHi => a.wrapping_add(b),
            ExOp::Ldi => b,

            // The bitwise family interprets the packed mode as operand
            // complement selectors.
            ExOp::Or => match d.packed {
                PackedMode::Byte => a | !b,
                PackedMode::HalfWord => !a | b,
                PackedMode::Alt => !a | !b,
                PackedMode::None => a | b,
            },
            ExOp::And => match d.packed {
                PackedMode::Byte => a & !b,
                PackedMode::HalfWord => !a & b,
                PackedMode::Alt => !a & !b,
                PackedMode::None => a & b,
            },
            ExOp::Xor => match d.packed {
                PackedMode::Byte => a ^ !b,
                PackedMode::HalfWord => !a ^ b,
                PackedMode::Alt => !a ^ !b,
                PackedMode::None => a ^ b,
            },

            ExOp::Add => match d.packed {
                Byte => lanes::add8x4(a, b),
                HalfWord => lanes::add16x2(a, b),
                _ => lanes::add32(a, b),
            },
            ExOp::Sub => match d.packed {
                Byte => lanes::sub8x4(a, b),
                HalfWord => lanes::sub16x2(a, b),
                _ => lanes::sub32(a, b),
            },

            ExOp::Seq => match d.packed {
                Byte => lanes::set8x4(a, b, |x, y| x == y),
                HalfWord => lanes::set16x2(a, b, |x, y| x == y),
                _ => lanes::set32(a, b, |x, y| x == y),
            },
            ExOp::Sne => match d.packed {
                Byte => lanes::set8x4(a, b, |x, y| x != y),
                HalfWord => lanes::set16x2(a, b, |x, y| x != y),
                _ => lanes::set32(a, b, |x, y| x != y),
            },
            ExOp::Slt => match d.packed {
                Byte => lanes::set8x4(a, b, |x, y| (x as i8) < (y as i8)),
                HalfWord => lanes::set16x2(a, b, |x, y| (x as i16) < (y as i16)),
                _ => lanes::set32(a, b, |x, y| (x as i32) < (y as i32)),
            },
            ExOp::SltU => match d.packed {
                Byte => lanes::set8x4(a, b, |x, y| x < y),
                HalfWord => lanes::set16x2(a, b, |x, y| x < y),
                _ => lanes::set32(a, b, |x, y| x < y),
            },
            ExOp::Sle => match d.packed {
                Byte => lanes::set8x4(a, b, |x, y| (x as i8) <= (y as i8)),
                HalfWord => lanes::set16x2(a, b, |x, y| (x as i16) <= (y as i16)),
                _ => lanes::set32(a, b, |x, y| (x as i32) <= (y as i32)),
            },
            ExOp::SleU => match d.packed {
                Byte => lanes::set8x4(a, b, |x, y| x <= y),
                HalfWord => lanes::set16x2(a, b, |x, y| x <= y),
                _ => lanes::set32(a, b, |x, y| x <= y),
            },

            // MIN/MAX are a compare-mask select of the operands.
            ExOp::Min => match d.packed {
                Byte => lanes::sel32(a, b, lanes::set8x4(a, b, |x, y| (x as i8) < (y as i8))),
                HalfWord => lanes::sel32(a, b, lanes::set16x2(a, b, |x, y| (x as i16) < (y as i16))),
                _ => lanes::sel32(a, b, lanes::set32(a, b, |x, y| (x as i32) < (y as i32))),
            },
            ExOp::Max => match d.packed {
                Byte => lanes::sel32(a, b, lanes::set8x4(a, b, |x, y| (x as i8) > (y as i8))),
                HalfWord => lanes::sel32(a, b, lanes::set16x2(a, b, |x, y| (x as i16) > (y as i16))),
                _ => lanes::sel32(a, b, lanes::set32(a, b, |x, y| (x as i32) > (y as i32))),
            },
            ExOp::MinU => match d.packed {
                Byte => lanes::sel32(a, b, lanes::set8x4(a, b, |x, y| x < y)),
                HalfWord => lanes::sel32(a, b, lanes::set16x2(a, b, |x, y| x < y)),
                _ => lanes::sel32(a, b, lanes::set32(a, b, |x, y| x < y)),
            },
            ExOp::MaxU => match d.packed {
                Byte => lanes::sel32(a, b, lanes::set8x4(a, b, |x, y| x > y)),
                HalfWord => lanes::sel32(a, b, lanes::set16x2(a, b, |x, y| x > y)),
                _ => lanes::sel32(a, b, lanes::set32(a, b, |x, y| x > y)),
            },

            ExOp::Ebf => match d.packed {
                Byte => bitfield::ebf8x4(a, b),
                HalfWord => bitfield::ebf16x2(a, b),
                _ => bitfield::ebf32(a, b),
            },
            ExOp::Ebfu => match d.packed {
                Byte => bitfield::ebfu8x4(a, b),
                HalfWord => bitfield::ebfu16x2(a, b),
                _ => bitfield::ebfu32(a, b),
            },
            ExOp::Mkbf => match d.packed {
                Byte => bitfield::mkbf8x4(a, b),
                HalfWord => bitfield::mkbf16x2(a, b),
                _ => bitfield::mkbf32(a, b),
            },
            ExOp::Ibf => match d.packed {
                Byte => bitfield::ibf8x4(a, b, c),
                HalfWord => bitfield::ibf16x2(a, b, c),
                _ => bitfield::ibf32(a, b, c),
            },

            ExOp::Shuf => lanes::shuf32(a, b),

            // SEL rotates its operand roles by packed mode.
            ExOp::Sel => match d.packed {
                PackedMode::Byte => lanes::sel32(b, a, c),
                PackedMode::HalfWord => lanes::sel32(c, b, a),
                PackedMode::Alt => lanes::sel32(b, c, a),
                PackedMode::None => lanes::sel32(a, b, c),
            },

            ExOp::Clz => match d.packed {
                Byte => lanes::clz8x4(a),
                HalfWord => lanes::clz16x2(a),
                _ => lanes::clz32(a),
            },
            ExOp::Popcnt => match d.packed {
                Byte => lanes::popcnt8x4(a),
                HalfWord => lanes::popcnt16x2(a),
                _ => lanes::popcnt32(a),
            },
            ExOp::Rev => match d.packed {
                Byte => lanes::rev8x4(a),
                HalfWord => lanes::rev16x2(a),
                _ => lanes::rev32(a),
            },

            ExOp::Pack => match d.packed {
                Byte => pack::pack8x4(a, b),
                HalfWord => pack::pack16x2(a, b),
                _ => pack::pack32(a, b),
            },
            ExOp::PackS => match d.packed {
                Byte => pack::packs8x4(a, b),
                HalfWord => pack::packs16x2(a, b),
                _ => pack::packs32(a, b),
            },
            ExOp::PackSU => match d.packed {
                Byte => pack::packsu8x4(a, b),
                HalfWord => pack::packsu16x2(a, b),
                _ => pack::packsu32(a, b),
            },
            ExOp::PackHi => match d.packed {
                Byte => pack::packhi8x4(a, b),
                HalfWord => pack::packhi16x2(a, b),
                _ => pack::packhi32(a, b),
            },
            ExOp::PackHiR => match d.packed {
                Byte => pack::packhir8x4(a, b),
                HalfWord => pack::packhir16x2(a, b),
                _ => pack::packhir32(a, b),
            },
            ExOp::PackHiUR => match d.packed {
                Byte => pack::packhiur8x4(a, b),
                HalfWord => pack::packhiur16x2(a, b),
                _ => pack::packhiur32(a, b),
            },

            ExOp::Adds => match d.packed {
                Byte => sat::saturating_op_8x4(a, b, |x, y| x + y),
                HalfWord => sat::saturating_op_16x2(a, b, |x, y| x + y),
                _ => sat::saturating_op_32(a, b, |x, y| x + y),
            },
            ExOp::AddsU => match d.packed {
                Byte => sat::saturating_op_u8x4(a, b, |x, y| x + y),
                HalfWord => sat::saturating_op_u16x2(a, b, |x, y| x + y),
                _ => sat::saturating_op_u32(a, b, |x, y| x + y),
            },
            ExOp::Subs => match d.packed {
                Byte => sat::saturating_op_8x4(a, b, |x, y| x - y),
                HalfWord => sat::saturating_op_16x2(a, b, |x, y| x - y),
                _ => sat::saturating_op_32(a, b, |x, y| x - y),
            },
            ExOp::SubsU => match d.packed {
                Byte => sat::saturating_op_u8x4(a, b, |x, y| x.wrapping_sub(y)),
                HalfWord => sat::saturating_op_u16x2(a, b, |x, y| x.wrapping_sub(y)),
                _ => sat::saturating_op_u32(a, b, |x, y| x.wrapping_sub(y)),
            },
            ExOp::Addh => match d.packed {
                Byte => sat::halving_op_8x4(a, b, |x, y| x + y),
                HalfWord => sat::halving_op_16x2(a, b, |x, y| x + y),
                _ => sat::halving_op_32(a, b, |x, y| x + y),
            },
            ExOp::AddhU => match d.packed {
                Byte => sat::halving_op_u8x4(a, b, |x, y| x + y),
                HalfWord => sat::halving_op_u16x2(a, b, |x, y| x + y),
                _ => sat::halving_op_u32(a, b, |x, y| x + y),
            },
            ExOp::Addhr => match d.packed {
                Byte => sat::halving_op_8x4(a, b, |x, y| x + y + 1),
                HalfWord => sat::halving_op_16x2(a, b, |x, y| x + y + 1),
                _ => sat::halving_op_32(a, b, |x, y| x + y + 1),
            },
            ExOp::AddhUr => match d.packed {
                Byte => sat::halving_op_u8x4(a, b, |x, y| x + y + 1),
                HalfWord => sat::halving_op_u16x2(a, b, |x, y| x + y + 1),
                _ => sat::halving_op_u32(a, b, |x, y| x + y + 1),
            },
            ExOp::Subh => match d.packed {
                Byte => sat::halving_op_8x4(a, b, |x, y| x - y),
                HalfWord => sat::halving_op_16x2(a, b, |x, y| x - y),
                _ => sat::halving_op_32(a, b, |x, y| x - y),
            },
            ExOp::SubhU => match d.packed {
                Byte => sat::halving_op_u8x4(a, b, |x, y| x.wrapping_sub(y)),
                HalfWord => sat::halving_op_u16x2(a, b, |x, y| x.wrapping_sub(y)),
                _ => sat::halving_op_u32(a, b, |x, y| x.wrapping_sub(y)),
            },
            ExOp::Subhr => match d.packed {
                Byte => sat::halving_op_8x4(a, b, |x, y| x - y + 1),
                HalfWord => sat::halving_op_16x2(a, b, |x, y| x - y + 1),
                _ => sat::halving_op_32(a, b, |x, y| x - y + 1),
            },
            ExOp::SubhUr => match d.packed {
                Byte => sat::halving_op_u8x4(a, b, |x, y| x.wrapping_sub(y).wrapping_add(1)),
                HalfWord => sat::halving_op_u16x2(a, b, |x, y| x.wrapping_sub(y).wrapping_add(1)),
                _ => sat::halving_op_u32(a, b, |x, y| x.wrapping_sub(y).wrapping_add(1)),
            },

            ExOp::Mul => match d.packed {
                Byte => lanes::mul8x4(a, b),
                HalfWord => lanes::mul16x2(a, b),
                _ => lanes::mul32(a, b),
            },
            ExOp::MulHi => match d.packed {
                Byte => lanes::mulhi8x4(a, b),
                HalfWord => lanes::mulhi16x2(a, b),
                _ => lanes::mulhi32(a, b),
            },
            ExOp::MulHiU => match d.packed {
                Byte => lanes::mulhiu8x4(a, b),
                HalfWord => lanes::mulhiu16x2(a, b),
                _ => lanes::mulhiu32(a, b),
            },
            ExOp::MulQ => match d.packed {
                Byte => sat::saturating_op_8x4(a, b, |x, y| (x * y) >> 7),
                HalfWord => sat::saturating_op_16x2(a, b, |x, y| (x * y) >> 15),
                _ => sat::saturating_op_32(a, b, |x, y| (x * y) >> 31),
            },
            ExOp::MulQR => match d.packed {
                Byte => sat::saturating_op_8x4(a, b, |x, y| (x * y + (1 << 6)) >> 7),
                HalfWord => sat::saturating_op_16x2(a, b, |x, y| (x * y + (1 << 14)) >> 15),
                _ => sat::saturating_op_32(a, b, |x, y| (x * y + (1 << 30)) >> 31),
            },
            ExOp::Madd => match d.packed {
                Byte => lanes::madd8x4(a, b, c),
                HalfWord => lanes::madd16x2(a, b, c),
                _ => lanes::madd32(a, b, c),
            },

            ExOp::Div => match d.packed {
                Byte => lanes::div8x4(a, b),
                HalfWord => lanes::div16x2(a, b),
                _ => lanes::div32(a, b),
            },
            ExOp::DivU => match d.packed {
                Byte => lanes::divu8x4(a, b),
                HalfWord => lanes::divu16x2(a, b),
                _ => lanes::divu32(a, b),
            },
            ExOp::Rem => match d.packed {
                Byte => lanes::rem8x4(a, b),
                HalfWord => lanes::rem16x2(a, b),
                _ => lanes::rem32(a, b),
            },
            ExOp::RemU => match d.packed {
                Byte => lanes::remu8x4(a, b),
                HalfWord => lanes::remu16x2(a, b),
                _ => lanes::remu32(a, b),
            },

            ExOp::Itof => match d.packed {
                Byte => F8x4::itof(a, b).packf(),
                HalfWord => F16x2::itof(a, b).packf(),
                _ => as_u32((a as i32 as f32) * (-(b as i32 as f32)).exp2()),
            },
            ExOp::Utof => match d.packed {
                Byte => F8x4::utof(a, b).packf(),
                HalfWord => F16x2::utof(a, b).packf(),
                _ => as_u32((a as f32) * (-(b as i32 as f32)).exp2()),
            },
            ExOp::Ftoi => match d.packed {
                Byte => F8x4::from_word(a).packi(b),
                HalfWord => F16x2::from_word(a).packi(b),
                _ => (as_f32(a) * (b as i32 as f32).exp2()) as i32 as u32,
            },
            ExOp::Ftou => match d.packed {
                Byte => F8x4::from_word(a).packu(b),
                HalfWord => F16x2::from_word(a).packu(b),
                _ => (as_f32(a) * (b as i32 as f32).exp2()) as u32,
            },
            ExOp::Ftoir => match d.packed {
                Byte => F8x4::from_word(a).packir(b),
                HalfWord => F16x2::from_word(a).packir(b),
                _ => (as_f32(a) * (b as i32 as f32).exp2()).round_ties_even() as i32 as u32,
            },
            ExOp::Ftour => match d.packed {
                Byte => F8x4::from_word(a).packur(b),
                HalfWord => F16x2::from_word(a).packur(b),
                _ => (as_f32(a) * (b as i32 as f32).exp2()).round_ties_even() as u32,
            },

            ExOp::FPack => match d.packed {
                Byte => 0,
                HalfWord => F8x4::from_f16x4(F16x2::from_word(a), F16x2::from_word(b)).packf(),
                _ => F16x2::from_f32x2(as_f32(a), as_f32(b)).packf(),
            },
            ExOp::FUnpl => match d.packed {
                Byte => 0,
                HalfWord => {
                    let v = F8x4::from_word(a);
                    F16x2::from_f32x2(v.lane(0), v.lane(2)).packf()
                }
                _ => as_u32(F16x2::from_word(a).lane(0)),
            },
            ExOp::FUnph => match d.packed {
                Byte => 0,
                HalfWord => {
                    let v = F8x4::from_word(a);
                    F16x2::from_f32x2(v.lane(1), v.lane(3)).packf()
                }
                _ => as_u32(F16x2::from_word(a).lane(1)),
            },

            ExOp::FAdd => match d.packed {
                Byte => (F8x4::from_word(a) + F8x4::from_word(b)).packf(),
                HalfWord => (F16x2::from_word(a) + F16x2::from_word(b)).packf(),
                _ => as_u32(as_f32(a) + as_f32(b)),
            },
            ExOp::FSub => match d.packed {
                Byte => (F8x4::from_word(a) - F8x4::from_word(b)).packf(),
                HalfWord => (F16x2::from_word(a) - F16x2::from_word(b)).packf(),
                _ => as_u32(as_f32(a) - as_f32(b)),
            },
            ExOp::FMul => match d.packed {
                Byte => (F8x4::from_word(a) * F8x4::from_word(b)).packf(),
                HalfWord => (F16x2::from_word(a) * F16x2::from_word(b)).packf(),
                _ => as_u32(as_f32(a) * as_f32(b)),
            },
            ExOp::FDiv => match d.packed {
                Byte => (F8x4::from_word(a) / F8x4::from_word(b)).packf(),
                HalfWord => (F16x2::from_word(a) / F16x2::from_word(b)).packf(),
                _ => as_u32(as_f32(a) / as_f32(b)),
            },
            ExOp::FSqrt => match d.packed {
                Byte => F8x4::from_word(a).sqrt().packf(),
                HalfWord => F16x2::from_word(a).sqrt().packf(),
                _ => as_u32(as_f32(a).sqrt()),
            },
            ExOp::FMin => match d.packed {
                Byte => F8x4::min(F8x4::from_word(a), F8x4::from_word(b)).packf(),
                HalfWord => F16x2::min(F16x2::from_word(a), F16x2::from_word(b)).packf(),
                _ => as_u32(lane_min(as_f32(a), as_f32(b))),
            },
            ExOp::FMax => match d.packed {
                Byte => F8x4::max(F8x4::from_word(a), F8x4::from_word(b)).packf(),
                HalfWord => F16x2::max(F16x2::from_word(a), F16x2::from_word(b)).packf(),
                _ => as_u32(lane_max(as_f32(a), as_f32(b))),
            },

            ExOp::FSeq => match d.packed {
                Byte => F8x4::from_word(a).fseq(F8x4::from_word(b)),
                HalfWord => F16x2::from_word(a).fseq(F16x2::from_word(b)),
                _ => lanes::set32(a, b, |x, y| as_f32(x) == as_f32(y)),
            },
            ExOp::FSne => match d.packed {
                Byte => F8x4::from_word(a).fsne(F8x4::from_word(b)),
                HalfWord => F16x2::from_word(a).fsne(F16x2::from_word(b)),
                _ => lanes::set32(a, b, |x, y| as_f32(x) != as_f32(y)),
            },
            ExOp::FSlt => match d.packed {
                // The byte-packed float unit encodes FSLT as FSLE.
                Byte => F8x4::from_word(a).fsle(F8x4::from_word(b)),
                HalfWord => F16x2::from_word(a).fslt(F16x2::from_word(b)),
                _ => lanes::set32(a, b, |x, y| as_f32(x) < as_f32(y)),
            },
            ExOp::FSle => match d.packed {
                Byte => F8x4::from_word(a).fsle(F8x4::from_word(b)),
                HalfWord => F16x2::from_word(a).fsle(F16x2::from_word(b)),
                _ => lanes::set32(a, b, |x, y| as_f32(x) <= as_f32(y)),
            },
            ExOp::FSUnord => match d.packed {
                Byte => F8x4::from_word(a).fsunord(F8x4::from_word(b)),
                HalfWord => F16x2::from_word(a).fsunord(F16x2::from_word(b)),
                _ => lanes::set32(a, b, |x, y| f32_is_nan(x) || f32_is_nan(y)),
            },
            ExOp::FSOrd => match d.packed {
                Byte => F8x4::from_word(a).fsord(F8x4::from_word(b)),
                HalfWord => F16x2::from_word(a).fsord(F16x2::from_word(b)),
                _ => lanes::set32(a, b, |x, y| !f32_is_nan(x) && !f32_is_nan(y)),
            },

            // The CRC families interpret the packed mode as the data width.
            ExOp::Crc32C => match d.packed {
                Byte => crc::crc32c_16(c, a),
                HalfWord => crc::crc32c_32(c, a),
                _ => crc::crc32c_8(c, a),
            },
            ExOp::Crc32 => match d.packed {
                Byte => crc::crc32_16(c, a),
                HalfWord => crc::crc32_32(c, a),
                _ => crc::crc32_8(c, a),
            },

            ExOp::CCtrl => c,
            ExOp::Wait | ExOp::Sync => 0,
            ExOp::Reserved => 0,
        }
    }
}
