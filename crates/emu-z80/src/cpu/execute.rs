//! Instruction execution for the Z80.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use emu_core::{Bus, Fault};

use crate::alu;
use crate::flags::{CF, HF, NF, PF, SF, XF, YF, ZF, parity, sz53, sz53p};
use crate::registers::Reg16;

use super::Z80;

/// Flags byte shared by the IO block instructions (INI/IND/OUTI/OUTD and
/// their repeat forms): S, Z, Y, X from the new B; N from bit 7 of the
/// transferred byte; H and C from the 9-bit helper sum `k`; parity of
/// `(k & 7) ^ B`.
fn io_block_flags(b: u8, value: u8, k: u16) -> u8 {
    let mut f = sz53(b);
    if value & 0x80 != 0 {
        f |= NF;
    }
    if k > 0xFF {
        f |= HF | CF;
    }
    if parity((k as u8 & 7) ^ b) {
        f |= PF;
    }
    f
}

impl Z80 {
    // =========================================================================
    // Base table
    // =========================================================================

    /// Execute one instruction whose first opcode byte is `op`, returning
    /// its T-state cost. Prefix bytes fetch their sub-opcode and dispatch
    /// into the CB, ED or DD/FD tables.
    pub(super) fn execute<B: Bus>(&mut self, bus: &mut B, op: u8) -> Result<u32, Fault> {
        match op {
            // NOP
            0x00 => Ok(4),

            // LD rr, nn (01=BC, 11=DE, 21=HL, 31=SP)
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.fetch_word(bus)?;
                self.set_rp(op >> 4, value);
                Ok(10)
            }

            // LD (BC), A
            0x02 => {
                self.write_byte(bus, self.regs.bc(), self.regs.a)?;
                Ok(7)
            }

            // INC rr (03=BC, 13=DE, 23=HL, 33=SP) - no flags
            0x03 | 0x13 | 0x23 | 0x33 => {
                let rp = (op >> 4) & 3;
                self.set_rp(rp, self.rp(rp).wrapping_add(1));
                Ok(6)
            }

            // INC r (04=B, 0C=C, 14=D, 1C=E, 24=H, 2C=L, 3C=A)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let result = alu::inc8(self.r8(r));
                self.set_r8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                Ok(4)
            }

            // DEC r (05=B, 0D=C, 15=D, 1D=E, 25=H, 2D=L, 3D=A)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let result = alu::dec8(self.r8(r));
                self.set_r8(r, result.value);
                self.regs.f = (self.regs.f & CF) | result.flags;
                Ok(4)
            }

            // LD r, n (06=B, 0E=C, 16=D, 1E=E, 26=H, 2E=L, 3E=A)
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let value = self.fetch_byte(bus)?;
                self.set_r8((op >> 3) & 7, value);
                Ok(7)
            }

            // RLCA
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | carry;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                Ok(4)
            }

            // EX AF, AF'
            0x08 => {
                self.regs.swap_af();
                Ok(4)
            }

            // ADD HL, rr (09=BC, 19=DE, 29=HL, 39=SP)
            0x09 | 0x19 | 0x29 | 0x39 => {
                let (result, flags) = alu::add16(self.regs.hl(), self.rp((op >> 4) & 3));
                self.regs.set_hl(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                Ok(11)
            }

            // LD A, (BC)
            0x0A => {
                self.regs.a = self.read_byte(bus, self.regs.bc())?;
                Ok(7)
            }

            // DEC rr (0B=BC, 1B=DE, 2B=HL, 3B=SP) - no flags
            0x0B | 0x1B | 0x2B | 0x3B => {
                let rp = (op >> 4) & 3;
                self.set_rp(rp, self.rp(rp).wrapping_sub(1));
                Ok(6)
            }

            // RRCA
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | (carry << 7);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                Ok(4)
            }

            // DJNZ d - B decremented without touching flags
            0x10 => {
                let disp = self.fetch_disp(bus)?;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_add(disp as u16);
                    Ok(13)
                } else {
                    Ok(8)
                }
            }

            // LD (DE), A
            0x12 => {
                self.write_byte(bus, self.regs.de(), self.regs.a)?;
                Ok(7)
            }

            // RLA
            0x17 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | (self.regs.f & CF);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                Ok(4)
            }

            // JR d
            0x18 => {
                let disp = self.fetch_disp(bus)?;
                self.regs.pc = self.regs.pc.wrapping_add(disp as u16);
                Ok(12)
            }

            // LD A, (DE)
            0x1A => {
                self.regs.a = self.read_byte(bus, self.regs.de())?;
                Ok(7)
            }

            // RRA
            0x1F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | ((self.regs.f & CF) << 7);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
                Ok(4)
            }

            // JR cc, d (20=NZ, 28=Z, 30=NC, 38=C)
            0x20 | 0x28 | 0x30 | 0x38 => {
                let disp = self.fetch_disp(bus)?;
                if self.condition((op >> 3) & 3) {
                    self.regs.pc = self.regs.pc.wrapping_add(disp as u16);
                    Ok(12)
                } else {
                    Ok(7)
                }
            }

            // LD (nn), HL
            0x22 => {
                let addr = self.fetch_word(bus)?;
                self.write_word(bus, addr, self.regs.hl())?;
                Ok(16)
            }

            // DAA
            0x27 => {
                let result = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = result.value;
                self.regs.f = result.flags;
                Ok(4)
            }

            // LD HL, (nn)
            0x2A => {
                let addr = self.fetch_word(bus)?;
                let value = self.read_word(bus, addr)?;
                self.regs.set_hl(value);
                Ok(16)
            }

            // CPL
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF | CF)) | HF | NF | (self.regs.a & (YF | XF));
                Ok(4)
            }

            // LD (nn), A
            0x32 => {
                let addr = self.fetch_word(bus)?;
                self.write_byte(bus, addr, self.regs.a)?;
                Ok(13)
            }

            // INC (HL)
            0x34 => {
                let addr = self.regs.hl();
                let result = alu::inc8(self.read_byte(bus, addr)?);
                self.write_byte(bus, addr, result.value)?;
                self.regs.f = (self.regs.f & CF) | result.flags;
                Ok(11)
            }

            // DEC (HL)
            0x35 => {
                let addr = self.regs.hl();
                let result = alu::dec8(self.read_byte(bus, addr)?);
                self.write_byte(bus, addr, result.value)?;
                self.regs.f = (self.regs.f & CF) | result.flags;
                Ok(11)
            }

            // LD (HL), n
            0x36 => {
                let value = self.fetch_byte(bus)?;
                self.write_byte(bus, self.regs.hl(), value)?;
                Ok(10)
            }

            // SCF
            0x37 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | CF;
                Ok(4)
            }

            // LD A, (nn)
            0x3A => {
                let addr = self.fetch_word(bus)?;
                self.regs.a = self.read_byte(bus, addr)?;
                Ok(13)
            }

            // CCF - H takes the old carry
            0x3F => {
                let old_carry = self.regs.f & CF;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if old_carry != 0 { HF } else { CF };
                Ok(4)
            }

            // HALT
            0x76 => {
                self.regs.halted = true;
                Ok(4)
            }

            // LD r, r' / LD r, (HL) / LD (HL), r
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let value = self.read_byte(bus, self.regs.hl())?;
                    self.set_r8(dst, value);
                    Ok(7)
                } else if dst == 6 {
                    self.write_byte(bus, self.regs.hl(), self.r8(src))?;
                    Ok(7)
                } else {
                    let value = self.r8(src);
                    self.set_r8(dst, value);
                    Ok(4)
                }
            }

            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP A, r/(HL)
            0x80..=0xBF => {
                let (value, t) = self.alu_operand(bus, op)?;
                self.alu_a((op >> 3) & 7, value);
                Ok(t)
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = self.pop(bus)?;
                    Ok(11)
                } else {
                    Ok(5)
                }
            }

            // POP rr (C1=BC, D1=DE, E1=HL, F1=AF)
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop(bus)?;
                self.set_rp_af((op >> 4) & 3, value);
                Ok(10)
            }

            // JP cc, nn - operand bytes consumed either way
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let target = self.fetch_word(bus)?;
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = target;
                }
                Ok(10)
            }

            // JP nn
            0xC3 => {
                self.regs.pc = self.fetch_word(bus)?;
                Ok(10)
            }

            // CALL cc, nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let target = self.fetch_word(bus)?;
                if self.condition((op >> 3) & 7) {
                    self.push(bus, self.regs.pc)?;
                    self.regs.pc = target;
                    Ok(17)
                } else {
                    Ok(10)
                }
            }

            // PUSH rr (C5=BC, D5=DE, E5=HL, F5=AF)
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                self.push(bus, self.rp_af((op >> 4) & 3))?;
                Ok(11)
            }

            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let value = self.fetch_byte(bus)?;
                self.alu_a((op >> 3) & 7, value);
                Ok(7)
            }

            // RST p (p = 00, 08, 10, 18, 20, 28, 30, 38)
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.push(bus, self.regs.pc)?;
                self.regs.pc = u16::from(op & 0x38);
                Ok(11)
            }

            // RET
            0xC9 => {
                self.regs.pc = self.pop(bus)?;
                Ok(10)
            }

            // CALL nn
            0xCD => {
                let target = self.fetch_word(bus)?;
                self.push(bus, self.regs.pc)?;
                self.regs.pc = target;
                Ok(17)
            }

            // OUT (n), A - A drives the high address bits
            0xD3 => {
                let port = u16::from(self.regs.a) << 8 | u16::from(self.fetch_byte(bus)?);
                self.out_port(bus, port, self.regs.a)?;
                Ok(11)
            }

            // EXX
            0xD9 => {
                self.regs.swap_bcdehl();
                Ok(4)
            }

            // IN A, (n) - no flags
            0xDB => {
                let port = u16::from(self.regs.a) << 8 | u16::from(self.fetch_byte(bus)?);
                self.regs.a = self.in_port(bus, port)?;
                Ok(11)
            }

            // EX (SP), HL
            0xE3 => {
                let from_stack = self.read_word(bus, self.regs.sp)?;
                self.write_word(bus, self.regs.sp, self.regs.hl())?;
                self.regs.set_hl(from_stack);
                Ok(19)
            }

            // JP (HL)
            0xE9 => {
                self.regs.pc = self.regs.hl();
                Ok(4)
            }

            // EX DE, HL
            0xEB => {
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
                Ok(4)
            }

            // DI / EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                Ok(4)
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                Ok(4)
            }

            // LD SP, HL
            0xF9 => {
                self.regs.sp = self.regs.hl();
                Ok(6)
            }

            // Prefixed tables
            0xCB => {
                let sub = self.fetch_opcode(bus)?;
                self.execute_cb(bus, sub)
            }
            0xED => {
                let sub = self.fetch_opcode(bus)?;
                self.execute_ed(bus, sub)
            }
            0xDD => {
                let sub = self.fetch_opcode(bus)?;
                self.execute_index(bus, sub, Reg16::Ix)
            }
            0xFD => {
                let sub = self.fetch_opcode(bus)?;
                self.execute_index(bus, sub, Reg16::Iy)
            }
        }
    }

    /// 8-bit ALU source operand by 3-bit encoding: a register, or the byte
    /// at (HL) for code 6. Returns the value and the instruction cost.
    fn alu_operand<B: Bus>(&mut self, bus: &mut B, op: u8) -> Result<(u8, u32), Fault> {
        if op & 7 == 6 {
            Ok((self.read_byte(bus, self.regs.hl())?, 7))
        } else {
            Ok((self.r8(op), 4))
        }
    }

    /// Apply ALU operation `kind` (the bits 5-3 encoding: ADD, ADC, SUB,
    /// SBC, AND, XOR, OR, CP) to the accumulator.
    fn alu_a(&mut self, kind: u8, value: u8) {
        let carry = self.regs.f & CF != 0;
        let result = match kind & 7 {
            0 => alu::add8(self.regs.a, value, false),
            1 => alu::add8(self.regs.a, value, carry),
            2 => alu::sub8(self.regs.a, value, false),
            3 => alu::sub8(self.regs.a, value, carry),
            4 => alu::and8(self.regs.a, value),
            5 => alu::xor8(self.regs.a, value),
            6 => alu::or8(self.regs.a, value),
            7 => alu::cp8(self.regs.a, value),
            _ => unreachable!(),
        };
        if kind & 7 != 7 {
            self.regs.a = result.value;
        }
        self.regs.f = result.flags;
    }

    // =========================================================================
    // CB table: rotates, shifts, BIT/RES/SET
    // =========================================================================

    fn execute_cb<B: Bus>(&mut self, bus: &mut B, op: u8) -> Result<u32, Fault> {
        let operand = op & 7;
        match op {
            // Rotates and shifts (RLC, RRC, RL, RR, SLA, SRA, SRL)
            0x00..=0x3F => {
                let kind = (op >> 3) & 7;
                if kind == 6 {
                    // SLL is outside the supported set
                    return Err(Fault::InvalidOpcode);
                }
                let carry = self.regs.f & CF != 0;
                let apply = |value: u8| match kind {
                    0 => alu::rlc8(value),
                    1 => alu::rrc8(value),
                    2 => alu::rl8(value, carry),
                    3 => alu::rr8(value, carry),
                    4 => alu::sla8(value),
                    5 => alu::sra8(value),
                    7 => alu::srl8(value),
                    _ => unreachable!(),
                };
                if operand == 6 {
                    let addr = self.regs.hl();
                    let result = apply(self.read_byte(bus, addr)?);
                    self.write_byte(bus, addr, result.value)?;
                    self.regs.f = result.flags;
                    Ok(15)
                } else {
                    let result = apply(self.r8(operand));
                    self.set_r8(operand, result.value);
                    self.regs.f = result.flags;
                    Ok(8)
                }
            }

            // BIT n, r/(HL) - carry is untouched
            0x40..=0x7F => {
                let n = (op >> 3) & 7;
                // For (HL), real hardware leaks the internal memptr high
                // byte into X/Y; this core takes them from the tested byte.
                let (value, t) = if operand == 6 {
                    (self.read_byte(bus, self.regs.hl())?, 12)
                } else {
                    (self.r8(operand), 8)
                };
                let set = value & (1 << n) != 0;
                let mut f = (self.regs.f & CF) | HF | (value & (YF | XF));
                if !set {
                    f |= ZF | PF;
                }
                if n == 7 && set {
                    f |= SF;
                }
                self.regs.f = f;
                Ok(t)
            }

            // RES n, r/(HL) - no flags
            0x80..=0xBF => {
                let mask = !(1u8 << ((op >> 3) & 7));
                if operand == 6 {
                    let addr = self.regs.hl();
                    let value = self.read_byte(bus, addr)? & mask;
                    self.write_byte(bus, addr, value)?;
                    Ok(15)
                } else {
                    self.set_r8(operand, self.r8(operand) & mask);
                    Ok(8)
                }
            }

            // SET n, r/(HL) - no flags
            0xC0..=0xFF => {
                let bit = 1u8 << ((op >> 3) & 7);
                if operand == 6 {
                    let addr = self.regs.hl();
                    let value = self.read_byte(bus, addr)? | bit;
                    self.write_byte(bus, addr, value)?;
                    Ok(15)
                } else {
                    self.set_r8(operand, self.r8(operand) | bit);
                    Ok(8)
                }
            }
        }
    }

    // =========================================================================
    // ED table: extended instructions
    // =========================================================================

    fn execute_ed<B: Bus>(&mut self, bus: &mut B, op: u8) -> Result<u32, Fault> {
        match op {
            // IN r, (C)
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x78 => {
                let value = self.in_port(bus, self.regs.bc())?;
                self.set_r8((op >> 3) & 7, value);
                self.regs.f = (self.regs.f & CF) | sz53p(value);
                Ok(12)
            }

            // OUT (C), r
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x79 => {
                self.out_port(bus, self.regs.bc(), self.r8((op >> 3) & 7))?;
                Ok(12)
            }

            // SBC HL, rr (42=BC, 52=DE, 62=HL, 72=SP)
            0x42 | 0x52 | 0x62 | 0x72 => {
                let (result, flags) = alu::sbc16(
                    self.regs.hl(),
                    self.rp((op >> 4) & 3),
                    self.regs.f & CF != 0,
                );
                self.regs.set_hl(result);
                self.regs.f = flags;
                Ok(15)
            }

            // ADC HL, rr (4A=BC, 5A=DE, 6A=HL, 7A=SP)
            0x4A | 0x5A | 0x6A | 0x7A => {
                let (result, flags) = alu::adc16(
                    self.regs.hl(),
                    self.rp((op >> 4) & 3),
                    self.regs.f & CF != 0,
                );
                self.regs.set_hl(result);
                self.regs.f = flags;
                Ok(15)
            }

            // LD (nn), rr
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch_word(bus)?;
                self.write_word(bus, addr, self.rp((op >> 4) & 3))?;
                Ok(20)
            }

            // LD rr, (nn)
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch_word(bus)?;
                let value = self.read_word(bus, addr)?;
                self.set_rp((op >> 4) & 3, value);
                Ok(20)
            }

            // NEG - flags as SUB with operands (0, A)
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let result = alu::sub8(0, self.regs.a, false);
                self.regs.a = result.value;
                self.regs.f = result.flags;
                Ok(8)
            }

            // RETN
            0x45 | 0x55 | 0x65 | 0x75 => {
                self.regs.pc = self.pop(bus)?;
                self.regs.iff1 = self.regs.iff2;
                Ok(14)
            }

            // RETI
            0x4D | 0x5D | 0x6D | 0x7D => {
                self.regs.pc = self.pop(bus)?;
                Ok(14)
            }

            // IM 0/1/2
            0x46 | 0x4E | 0x66 | 0x6E => {
                self.regs.im = 0;
                Ok(8)
            }
            0x56 | 0x76 => {
                self.regs.im = 1;
                Ok(8)
            }
            0x5E | 0x7E => {
                self.regs.im = 2;
                Ok(8)
            }

            // LD I, A / LD R, A
            0x47 => {
                self.regs.i = self.regs.a;
                Ok(9)
            }
            0x4F => {
                self.regs.r = self.regs.a;
                Ok(9)
            }

            // LD A, I / LD A, R - P/V is a copy of IFF2
            0x57 => {
                let value = self.regs.i;
                self.regs.a = value;
                self.ld_a_ir_flags(value);
                Ok(9)
            }
            0x5F => {
                let value = self.regs.r;
                self.regs.a = value;
                self.ld_a_ir_flags(value);
                Ok(9)
            }

            // RRD - low nibbles rotate right through A and (HL)
            0x67 => {
                let addr = self.regs.hl();
                let mem = self.read_byte(bus, addr)?;
                let a = self.regs.a;
                self.regs.a = (a & 0xF0) | (mem & 0x0F);
                self.write_byte(bus, addr, (a << 4) | (mem >> 4))?;
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                Ok(18)
            }

            // RLD - low nibbles rotate left through A and (HL)
            0x6F => {
                let addr = self.regs.hl();
                let mem = self.read_byte(bus, addr)?;
                let a = self.regs.a;
                self.regs.a = (a & 0xF0) | (mem >> 4);
                self.write_byte(bus, addr, (mem << 4) | (a & 0x0F))?;
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                Ok(18)
            }

            // LDI / LDD
            0xA0 => {
                self.block_ld(bus, 1)?;
                Ok(16)
            }
            0xA8 => {
                self.block_ld(bus, -1)?;
                Ok(16)
            }

            // LDIR / LDDR - rewind PC so the next step refetches
            0xB0 => {
                if self.block_ld(bus, 1)? {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }
            0xB8 => {
                if self.block_ld(bus, -1)? {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }

            // CPI / CPD
            0xA1 => {
                self.block_cp(bus, 1)?;
                Ok(16)
            }
            0xA9 => {
                self.block_cp(bus, -1)?;
                Ok(16)
            }

            // CPIR / CPDR - repeat while BC != 0 and no match
            0xB1 => {
                let (more, matched) = self.block_cp(bus, 1)?;
                if more && !matched {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }
            0xB9 => {
                let (more, matched) = self.block_cp(bus, -1)?;
                if more && !matched {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }

            // INI / IND
            0xA2 => {
                self.block_in(bus, 1)?;
                Ok(16)
            }
            0xAA => {
                self.block_in(bus, -1)?;
                Ok(16)
            }

            // INIR / INDR - repeat while B != 0
            0xB2 => {
                if self.block_in(bus, 1)? {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }
            0xBA => {
                if self.block_in(bus, -1)? {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }

            // OUTI / OUTD
            0xA3 => {
                self.block_out(bus, 1)?;
                Ok(16)
            }
            0xAB => {
                self.block_out(bus, -1)?;
                Ok(16)
            }

            // OTIR / OTDR - repeat while B != 0
            0xB3 => {
                if self.block_out(bus, 1)? {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }
            0xBB => {
                if self.block_out(bus, -1)? {
                    self.regs.pc = self.regs.pc.wrapping_sub(2);
                    Ok(21)
                } else {
                    Ok(16)
                }
            }

            // Retired and unused ED opcodes
            _ => Err(Fault::InvalidOpcode),
        }
    }

    fn ld_a_ir_flags(&mut self, value: u8) {
        self.regs.f =
            (self.regs.f & CF) | sz53(value) | if self.regs.iff2 { PF } else { 0 };
    }

    /// One LDI/LDD iteration. Returns true while BC != 0 after the
    /// decrement (the repeat condition).
    fn block_ld<B: Bus>(&mut self, bus: &mut B, dir: i8) -> Result<bool, Fault> {
        let value = self.read_byte(bus, self.regs.hl())?;
        self.write_byte(bus, self.regs.de(), value)?;
        let delta = dir as u16;
        self.regs.set_hl(self.regs.hl().wrapping_add(delta));
        self.regs.set_de(self.regs.de().wrapping_add(delta));
        self.regs.set_bc(self.regs.bc().wrapping_sub(1));
        let n = value.wrapping_add(self.regs.a);
        self.regs.f = (self.regs.f & (SF | ZF | CF))
            | (n & XF)
            | if n & 0x02 != 0 { YF } else { 0 }
            | if self.regs.bc() != 0 { PF } else { 0 };
        Ok(self.regs.bc() != 0)
    }

    /// One CPI/CPD iteration. Returns (BC != 0, comparison matched).
    fn block_cp<B: Bus>(&mut self, bus: &mut B, dir: i8) -> Result<(bool, bool), Fault> {
        let value = self.read_byte(bus, self.regs.hl())?;
        let result = self.regs.a.wrapping_sub(value);
        let hf = (self.regs.a & 0x0F) < (value & 0x0F);
        let n = result.wrapping_sub(u8::from(hf));
        self.regs.set_hl(self.regs.hl().wrapping_add(dir as u16));
        self.regs.set_bc(self.regs.bc().wrapping_sub(1));
        self.regs.f = (self.regs.f & CF)
            | NF
            | if result == 0 { ZF } else { 0 }
            | if result & 0x80 != 0 { SF } else { 0 }
            | if hf { HF } else { 0 }
            | (n & XF)
            | if n & 0x02 != 0 { YF } else { 0 }
            | if self.regs.bc() != 0 { PF } else { 0 };
        Ok((self.regs.bc() != 0, result == 0))
    }

    /// One INI/IND iteration: port BC into (HL), then B and HL step.
    /// Returns true while B != 0 after the decrement.
    fn block_in<B: Bus>(&mut self, bus: &mut B, dir: i8) -> Result<bool, Fault> {
        let value = self.in_port(bus, self.regs.bc())?;
        self.write_byte(bus, self.regs.hl(), value)?;
        self.regs.b = self.regs.b.wrapping_sub(1);
        self.regs.set_hl(self.regs.hl().wrapping_add(dir as u16));
        let adjusted_c = if dir >= 0 {
            self.regs.c.wrapping_add(1)
        } else {
            self.regs.c.wrapping_sub(1)
        };
        let k = u16::from(value) + u16::from(adjusted_c);
        self.regs.f = io_block_flags(self.regs.b, value, k);
        Ok(self.regs.b != 0)
    }

    /// One OUTI/OUTD iteration: (HL) out to port BC with the decremented
    /// B, then HL steps. Returns true while B != 0.
    fn block_out<B: Bus>(&mut self, bus: &mut B, dir: i8) -> Result<bool, Fault> {
        let value = self.read_byte(bus, self.regs.hl())?;
        self.regs.b = self.regs.b.wrapping_sub(1);
        self.out_port(bus, self.regs.bc(), value)?;
        self.regs.set_hl(self.regs.hl().wrapping_add(dir as u16));
        let k = u16::from(value) + u16::from(self.regs.l);
        self.regs.f = io_block_flags(self.regs.b, value, k);
        Ok(self.regs.b != 0)
    }

    // =========================================================================
    // DD/FD table: IX/IY instructions
    // =========================================================================

    /// Execute a DD- or FD-prefixed instruction; `iz` names the index
    /// register the prefix rebinds HL to.
    fn execute_index<B: Bus>(&mut self, bus: &mut B, op: u8, iz: Reg16) -> Result<u32, Fault> {
        match op {
            // ADD iz, rr (09=BC, 19=DE, 29=iz, 39=SP)
            0x09 | 0x19 | 0x29 | 0x39 => {
                let operand = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => self.regs.get16(iz),
                    3 => self.regs.sp,
                    _ => unreachable!(),
                };
                let (result, flags) = alu::add16(self.regs.get16(iz), operand);
                self.regs.set16(iz, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                Ok(15)
            }

            // LD iz, nn
            0x21 => {
                let value = self.fetch_word(bus)?;
                self.regs.set16(iz, value);
                Ok(14)
            }

            // LD (nn), iz
            0x22 => {
                let addr = self.fetch_word(bus)?;
                self.write_word(bus, addr, self.regs.get16(iz))?;
                Ok(20)
            }

            // INC iz / DEC iz - no flags
            0x23 => {
                self.regs.set16(iz, self.regs.get16(iz).wrapping_add(1));
                Ok(10)
            }
            0x2B => {
                self.regs.set16(iz, self.regs.get16(iz).wrapping_sub(1));
                Ok(10)
            }

            // LD iz, (nn)
            0x2A => {
                let addr = self.fetch_word(bus)?;
                let value = self.read_word(bus, addr)?;
                self.regs.set16(iz, value);
                Ok(20)
            }

            // INC (iz+d) / DEC (iz+d)
            0x34 => {
                let addr = self.indexed_addr(bus, self.regs.get16(iz))?;
                let result = alu::inc8(self.read_byte(bus, addr)?);
                self.write_byte(bus, addr, result.value)?;
                self.regs.f = (self.regs.f & CF) | result.flags;
                Ok(23)
            }
            0x35 => {
                let addr = self.indexed_addr(bus, self.regs.get16(iz))?;
                let result = alu::dec8(self.read_byte(bus, addr)?);
                self.write_byte(bus, addr, result.value)?;
                self.regs.f = (self.regs.f & CF) | result.flags;
                Ok(23)
            }

            // LD (iz+d), n - displacement byte precedes the immediate
            0x36 => {
                let addr = self.indexed_addr(bus, self.regs.get16(iz))?;
                let value = self.fetch_byte(bus)?;
                self.write_byte(bus, addr, value)?;
                Ok(19)
            }

            // LD r, (iz+d)
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x7E => {
                let addr = self.indexed_addr(bus, self.regs.get16(iz))?;
                let value = self.read_byte(bus, addr)?;
                self.set_r8((op >> 3) & 7, value);
                Ok(19)
            }

            // LD (iz+d), r
            0x70..=0x75 | 0x77 => {
                let addr = self.indexed_addr(bus, self.regs.get16(iz))?;
                self.write_byte(bus, addr, self.r8(op & 7))?;
                Ok(19)
            }

            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP A, (iz+d)
            0x86 | 0x8E | 0x96 | 0x9E | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                let addr = self.indexed_addr(bus, self.regs.get16(iz))?;
                let value = self.read_byte(bus, addr)?;
                self.alu_a((op >> 3) & 7, value);
                Ok(19)
            }

            // POP iz / PUSH iz
            0xE1 => {
                let value = self.pop(bus)?;
                self.regs.set16(iz, value);
                Ok(14)
            }
            0xE5 => {
                self.push(bus, self.regs.get16(iz))?;
                Ok(15)
            }

            // EX (SP), iz
            0xE3 => {
                let from_stack = self.read_word(bus, self.regs.sp)?;
                self.write_word(bus, self.regs.sp, self.regs.get16(iz))?;
                self.regs.set16(iz, from_stack);
                Ok(23)
            }

            // JP (iz)
            0xE9 => {
                self.regs.pc = self.regs.get16(iz);
                Ok(8)
            }

            // LD SP, iz
            0xF9 => {
                self.regs.sp = self.regs.get16(iz);
                Ok(10)
            }

            // DDCB/FDCB space, half-register opcodes, and everything else
            _ => Err(Fault::InvalidOpcode),
        }
    }
}
