//! Z80 CPU core with instruction-level execution.

#![allow(clippy::cast_possible_truncation)] // Intentional truncation for low byte extraction.
#![allow(clippy::cast_possible_wrap)] // Intentional i8 casts for displacements.

use emu_core::{Bus, Cpu, Fault};

use crate::flags::{CF, PF, SF, ZF};
use crate::registers::{Reg8, Reg16, Registers};

/// Z80 CPU.
///
/// The CPU does not own the bus. Instead, the bus is passed to `step()` on
/// each call, so the embedder can share it with other components between
/// instructions. One `step()` runs exactly one instruction to completion
/// and returns its documented T-state cost.
pub struct Z80 {
    /// Register file, including the shadow set.
    pub regs: Registers,

    /// Sticky fatal error. Once set, every `step()` returns it unchanged.
    fault: Option<Fault>,
}

impl Z80 {
    /// Create a Z80 with every register zeroed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            fault: None,
        }
    }

    /// The sticky fault, if one has been raised.
    #[must_use]
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Execute one instruction.
    ///
    /// Returns the T-states consumed. A halted CPU consumes 4 T-states per
    /// step without fetching. Errors are sticky: the first invalid opcode
    /// or embedder bus fault is returned from this and every later call
    /// until `reset()`.
    ///
    /// # Errors
    ///
    /// [`Fault::InvalidOpcode`] for opcodes outside the supported set,
    /// [`Fault::Bus`] when the embedder raises its fault signal from a bus
    /// callback (the instruction is abandoned mid-flight; registers it has
    /// already written stay written).
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<u32, Fault> {
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        if self.regs.halted {
            return Ok(4);
        }

        let result = self
            .fetch_opcode(bus)
            .and_then(|opcode| self.execute(bus, opcode));
        if let Err(fault) = result {
            self.fault = Some(fault);
        }
        result
    }

    /// Reset to the power-on state: registers zeroed, halt latch and
    /// sticky fault cleared. The embedder's bus is untouched.
    pub fn reset(&mut self) {
        self.regs = Registers::default();
        self.fault = None;
    }

    /// True if the CPU has executed HALT and not been reset.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.regs.halted
    }

    /// Read an 8-bit register by name.
    #[must_use]
    pub fn reg8(&self, name: Reg8, shadow: bool) -> u8 {
        self.regs.get8(name, shadow)
    }

    /// Write an 8-bit register by name.
    pub fn set_reg8(&mut self, name: Reg8, value: u8, shadow: bool) {
        self.regs.set8(name, value, shadow);
    }

    /// Read a 16-bit register or pair by name.
    #[must_use]
    pub fn reg16(&self, name: Reg16) -> u16 {
        self.regs.get16(name)
    }

    /// Write a 16-bit register or pair by name.
    pub fn set_reg16(&mut self, name: Reg16, value: u16) {
        self.regs.set16(name, value);
    }
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

// Bus access. Every call polls the embedder's fault signal; a raised
// signal abandons the current instruction via `?`.
impl Z80 {
    fn poll<B: Bus>(&self, bus: &B) -> Result<(), Fault> {
        if bus.fault() { Err(Fault::Bus) } else { Ok(()) }
    }

    fn read_byte<B: Bus>(&self, bus: &mut B, addr: u16) -> Result<u8, Fault> {
        let value = bus.mem_read(addr);
        self.poll(bus)?;
        Ok(value)
    }

    fn write_byte<B: Bus>(&self, bus: &mut B, addr: u16, value: u8) -> Result<(), Fault> {
        bus.mem_write(addr, value);
        self.poll(bus)
    }

    fn in_port<B: Bus>(&self, bus: &mut B, port: u16) -> Result<u8, Fault> {
        let value = bus.io_read(port);
        self.poll(bus)?;
        Ok(value)
    }

    fn out_port<B: Bus>(&self, bus: &mut B, port: u16, value: u8) -> Result<(), Fault> {
        bus.io_write(port, value);
        self.poll(bus)
    }

    /// Word read: low byte at `addr`, high byte at `addr + 1`, wrapping.
    fn read_word<B: Bus>(&self, bus: &mut B, addr: u16) -> Result<u16, Fault> {
        let lo = self.read_byte(bus, addr)?;
        let hi = self.read_byte(bus, addr.wrapping_add(1))?;
        Ok(u16::from(hi) << 8 | u16::from(lo))
    }

    /// Word write: low byte first, at the lower address.
    fn write_word<B: Bus>(&self, bus: &mut B, addr: u16, value: u16) -> Result<(), Fault> {
        self.write_byte(bus, addr, value as u8)?;
        self.write_byte(bus, addr.wrapping_add(1), (value >> 8) as u8)
    }
}

// Fetch and addressing. These are the only paths that advance PC for
// opcode and operand bytes; jumps and calls assign PC directly.
impl Z80 {
    /// Increment R (lower 7 bits only), once per M1 opcode byte.
    fn inc_r(&mut self) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
    }

    fn fetch_byte<B: Bus>(&mut self, bus: &mut B) -> Result<u8, Fault> {
        let value = self.read_byte(bus, self.regs.pc)?;
        self.regs.pc = self.regs.pc.wrapping_add(1);
        Ok(value)
    }

    pub(crate) fn fetch_opcode<B: Bus>(&mut self, bus: &mut B) -> Result<u8, Fault> {
        let opcode = self.fetch_byte(bus)?;
        self.inc_r();
        Ok(opcode)
    }

    fn fetch_word<B: Bus>(&mut self, bus: &mut B) -> Result<u16, Fault> {
        let lo = self.fetch_byte(bus)?;
        let hi = self.fetch_byte(bus)?;
        Ok(u16::from(hi) << 8 | u16::from(lo))
    }

    fn fetch_disp<B: Bus>(&mut self, bus: &mut B) -> Result<i8, Fault> {
        Ok(self.fetch_byte(bus)? as i8)
    }

    /// Effective address for `(IX+d)` / `(IY+d)`: fetches the displacement
    /// and sign-extends it onto the index base, wrapping mod 65536.
    fn indexed_addr<B: Bus>(&mut self, bus: &mut B, base: u16) -> Result<u16, Fault> {
        let disp = self.fetch_disp(bus)?;
        Ok(base.wrapping_add(disp as u16))
    }

    /// Push a word: high byte at SP-1, low byte at SP-2.
    fn push<B: Bus>(&mut self, bus: &mut B, value: u16) -> Result<(), Fault> {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write_byte(bus, self.regs.sp, (value >> 8) as u8)?;
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.write_byte(bus, self.regs.sp, value as u8)
    }

    /// Pop a word: low byte at SP, high byte at SP+1.
    fn pop<B: Bus>(&mut self, bus: &mut B) -> Result<u16, Fault> {
        let lo = self.read_byte(bus, self.regs.sp)?;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.read_byte(bus, self.regs.sp)?;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        Ok(u16::from(hi) << 8 | u16::from(lo))
    }
}

// Decode helpers shared by the dispatch tables.
impl Z80 {
    /// Get register by 3-bit encoding (bits 5-3 or 2-0 of the opcode).
    fn r8(&self, code: u8) -> u8 {
        match code & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            6 => 0, // (HL) - handled specially by every caller
            7 => self.regs.a,
            _ => unreachable!(),
        }
    }

    /// Set register by 3-bit encoding.
    fn set_r8(&mut self, code: u8, value: u8) {
        match code & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            6 => {} // (HL) - handled specially by every caller
            7 => self.regs.a = value,
            _ => unreachable!(),
        }
    }

    /// Get register pair by 2-bit encoding (SP in slot 3).
    fn rp(&self, code: u8) -> u16 {
        match code & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            3 => self.regs.sp,
            _ => unreachable!(),
        }
    }

    /// Set register pair by 2-bit encoding.
    fn set_rp(&mut self, code: u8, value: u16) {
        match code & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            3 => self.regs.sp = value,
            _ => unreachable!(),
        }
    }

    /// Get register pair for PUSH/POP (AF in slot 3).
    fn rp_af(&self, code: u8) -> u16 {
        match code & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            3 => self.regs.af(),
            _ => unreachable!(),
        }
    }

    /// Set register pair for PUSH/POP.
    fn set_rp_af(&mut self, code: u8, value: u16) {
        match code & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            3 => self.regs.set_af(value),
            _ => unreachable!(),
        }
    }

    /// Evaluate condition code (NZ, Z, NC, C, PO, PE, P, M).
    fn condition(&self, cc: u8) -> bool {
        match cc & 7 {
            0 => self.regs.f & ZF == 0,
            1 => self.regs.f & ZF != 0,
            2 => self.regs.f & CF == 0,
            3 => self.regs.f & CF != 0,
            4 => self.regs.f & PF == 0,
            5 => self.regs.f & PF != 0,
            6 => self.regs.f & SF == 0,
            7 => self.regs.f & SF != 0,
            _ => unreachable!(),
        }
    }
}

// Instruction execution split into a separate file for readability
mod execute;

impl<B: Bus> Cpu<B> for Z80 {
    fn step(&mut self, bus: &mut B) -> Result<u32, Fault> {
        Self::step(self, bus)
    }

    fn reset(&mut self) {
        Self::reset(self);
    }

    fn pc(&self) -> u16 {
        self.regs.pc
    }

    fn is_halted(&self) -> bool {
        Self::is_halted(self)
    }
}
