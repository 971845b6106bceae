//! The interpreter: fetch/dispatch over the fixed register file, plus the
//! FFI bridge for host calls.
//!
//! Memory is one flat block owned by the VM: a guard word, the stack, a
//! padding band (stack accesses landing there raise `StackOverflow`), the
//! heap, and the installed module data segments. Addresses are offsets into
//! this block; 0 is never a valid address.
//!
//! Runtime failures return a tagged [`VmError`] with registers and memory
//! left consistent, so the host may unwind and start a fresh invocation.

use crate::bytecode::{Instr, Vmi};
use crate::callconv::{arg_locations, return_register, ArgLoc};
use crate::error::VmError;
use crate::heap::Heap;
use crate::program::Program;
use crate::registers::Reg;
use std::collections::HashMap;
use tsn_core::{
    split_moduletype, Context, FuncId, Function, HostPort, ImplicitArg, ModuleId, Signature,
};

/// Sizing knobs for one VM instance.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub stack_size: u64,
    pub mem_size: u64,
    /// Width of the guard band past the stack; accesses inside it raise
    /// `StackOverflow`.
    pub stack_padding: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_size: 1 << 20,
            mem_size: 16 << 20,
            stack_padding: 8,
        }
    }
}

/// One VM instance: registers, memory, heap, and installed module data.
#[derive(Debug)]
pub struct Vm {
    regs: [u64; Reg::COUNT],
    mem: Vec<u8>,
    stack_base: u64,
    pad_start: u64,
    pad_end: u64,
    heap: Heap,
    module_base: HashMap<ModuleId, u64>,
    /// Lines emitted by the `print` builtin, in order.
    pub output: Vec<String>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let stack_base = 16u64;
        let pad_start = stack_base + config.stack_size;
        let pad_end = pad_start + config.stack_padding;
        let heap_base = pad_end.next_multiple_of(8);
        let mem_size = config.mem_size.max(heap_base + 4096);

        let mut vm = Vm {
            regs: [0; Reg::COUNT],
            mem: vec![0; mem_size as usize],
            stack_base,
            pad_start,
            pad_end,
            heap: Heap::new(heap_base, mem_size - heap_base),
            module_base: HashMap::new(),
            output: Vec::new(),
        };
        vm.regs[Reg::Sp as usize] = stack_base;
        vm
    }

    /// Copy every module's data segment into the top of memory and shrink
    /// the heap accordingly. Call once, after compilation and before `call`.
    pub fn install_modules(&mut self, ctx: &Context) {
        let mut top = self.mem.len() as u64;
        for module in ctx.modules.iter() {
            if module.data.is_empty() {
                self.module_base.insert(module.id, top);
                continue;
            }
            let len = module.data.len() as u64;
            top = (top - len) & !7;
            self.mem[top as usize..(top + len) as usize].copy_from_slice(&module.data);
            self.module_base.insert(module.id, top);
        }
        let heap_base = self.pad_end.next_multiple_of(8);
        self.heap = Heap::new(heap_base, top.saturating_sub(heap_base));
    }

    pub fn reg(&self, r: Reg) -> u64 {
        self.regs[r as usize]
    }

    pub fn set_reg(&mut self, r: Reg, v: u64) {
        if r != Reg::Zero {
            self.regs[r as usize] = v;
        }
    }

    /// Invoke a function by id: arguments are raw words placed per the
    /// calling convention, the return value is read from the convention's
    /// return register.
    pub fn call(
        &mut self,
        ctx: &Context,
        program: &Program,
        fid: FuncId,
        args: &[u64],
    ) -> Result<u64, VmError> {
        let func = ctx
            .funcs
            .get(fid)
            .ok_or(VmError::InvalidFunctionId { id: fid })?;
        let sig = self.signature_of(ctx, func)?;
        let locs = arg_locations(ctx, &sig);
        for (value, loc) in args.iter().zip(&locs) {
            match loc {
                ArgLoc::Reg(r) => self.set_reg(*r, *value),
                // overflow arguments sit at the bottom of the callee frame
                ArgLoc::Stack(off) => {
                    let sp = self.reg(Reg::Sp);
                    self.store(sp + *off as u64, 8, *value)?;
                }
            }
        }

        if func.is_host() {
            self.bridge_host_call(ctx, func, &sig)?;
        } else {
            let entry = func.entry().ok_or(VmError::InvalidFunctionId { id: fid })?;
            let prev_ip = self.reg(Reg::Ip);
            let prev_ra = self.reg(Reg::Ra);
            self.set_reg(Reg::Ra, 0);
            self.set_reg(Reg::Ip, entry);
            let result = self.run(ctx, program);
            self.set_reg(Reg::Ip, prev_ip);
            self.set_reg(Reg::Ra, prev_ra);
            result?;
        }

        Ok(match return_register(ctx, &sig) {
            Some(r) => self.reg(r),
            None => 0,
        })
    }

    fn signature_of(&self, ctx: &Context, func: &Function) -> Result<Signature, VmError> {
        ctx.types
            .get(func.sig_type)
            .and_then(|t| t.sig.clone())
            .ok_or(VmError::InvalidFunctionId { id: func.id })
    }

    fn check_addr(&self, addr: u64, size: u64) -> Result<(), VmError> {
        if addr < self.pad_end && addr + size > self.pad_start {
            return Err(VmError::StackOverflow { addr });
        }
        if addr == 0 || addr + size > self.mem.len() as u64 {
            return Err(VmError::InvalidMemoryAccess { addr });
        }
        Ok(())
    }

    fn load(&self, addr: u64, size: u64) -> Result<u64, VmError> {
        self.check_addr(addr, size)?;
        let a = addr as usize;
        Ok(match size {
            1 => self.mem[a] as u64,
            2 => u16::from_le_bytes(self.mem[a..a + 2].try_into().unwrap()) as u64,
            4 => u32::from_le_bytes(self.mem[a..a + 4].try_into().unwrap()) as u64,
            _ => u64::from_le_bytes(self.mem[a..a + 8].try_into().unwrap()),
        })
    }

    fn store(&mut self, addr: u64, size: u64, value: u64) -> Result<(), VmError> {
        self.check_addr(addr, size)?;
        let a = addr as usize;
        match size {
            1 => self.mem[a] = value as u8,
            2 => self.mem[a..a + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            4 => self.mem[a..a + 4].copy_from_slice(&(value as u32).to_le_bytes()),
            _ => self.mem[a..a + 8].copy_from_slice(&value.to_le_bytes()),
        }
        Ok(())
    }

    fn f32_of(&self, r: Reg) -> f32 {
        f32::from_bits(self.reg(r) as u32)
    }

    fn f64_of(&self, r: Reg) -> f64 {
        f64::from_bits(self.reg(r))
    }

    fn set_f32(&mut self, r: Reg, v: f32) {
        self.set_reg(r, v.to_bits() as u64);
    }

    fn set_f64(&mut self, r: Reg, v: f64) {
        self.set_reg(r, v.to_bits());
    }

    /// Execute until `term`. `$ip` must already point at the entry.
    pub fn run(&mut self, ctx: &Context, program: &Program) -> Result<(), VmError> {
        loop {
            let ip = self.reg(Reg::Ip);
            let instr = *program
                .code
                .get(ip as usize)
                .ok_or(VmError::InvalidInstruction { at: ip })?;
            match self.step(ctx, &instr, ip)? {
                Flow::Next => self.set_reg(Reg::Ip, ip + 1),
                Flow::Jump(target) => self.set_reg(Reg::Ip, target),
                Flow::Halt => return Ok(()),
            }
        }
    }

    fn step(&mut self, ctx: &Context, i: &Instr, ip: u64) -> Result<Flow, VmError> {
        let (r1, r2, r3, imm) = (i.r1, i.r2, i.r3, i.imm);
        let g = |vm: &Vm, r: Reg| vm.reg(r);

        match i.op {
            Vmi::Null => {}
            Vmi::Term => return Ok(Flow::Halt),

            Vmi::Ld8 => {
                let v = self.load(self.reg(r2).wrapping_add(imm), 1)?;
                self.set_reg(r1, v);
            }
            Vmi::Ld16 => {
                let v = self.load(self.reg(r2).wrapping_add(imm), 2)?;
                self.set_reg(r1, v);
            }
            Vmi::Ld32 => {
                let v = self.load(self.reg(r2).wrapping_add(imm), 4)?;
                self.set_reg(r1, v);
            }
            Vmi::Ld64 => {
                let v = self.load(self.reg(r2).wrapping_add(imm), 8)?;
                self.set_reg(r1, v);
            }
            Vmi::St8 => self.store(self.reg(r2).wrapping_add(imm), 1, self.reg(r1))?,
            Vmi::St16 => self.store(self.reg(r2).wrapping_add(imm), 2, self.reg(r1))?,
            Vmi::St32 => self.store(self.reg(r2).wrapping_add(imm), 4, self.reg(r1))?,
            Vmi::St64 => self.store(self.reg(r2).wrapping_add(imm), 8, self.reg(r1))?,

            Vmi::Mptr => {
                let module = self.reg(Reg::V3) as ModuleId;
                let base = *self
                    .module_base
                    .get(&module)
                    .ok_or(VmError::InvalidModuleId { module })?;
                self.set_reg(r1, base + imm);
            }
            Vmi::Mtfp | Vmi::Mffp => {
                let v = self.reg(r1);
                self.set_reg(r2, v);
            }

            // signed integer arithmetic
            Vmi::Add => self.set_reg(r1, (g(self, r2) as i64).wrapping_add(g(self, r3) as i64) as u64),
            Vmi::Addi => self.set_reg(r1, (g(self, r2) as i64).wrapping_add(imm as i64) as u64),
            Vmi::Sub => self.set_reg(r1, (g(self, r2) as i64).wrapping_sub(g(self, r3) as i64) as u64),
            Vmi::Subi => self.set_reg(r1, (g(self, r2) as i64).wrapping_sub(imm as i64) as u64),
            Vmi::Subir => self.set_reg(r1, (imm as i64).wrapping_sub(g(self, r2) as i64) as u64),
            Vmi::Mul => self.set_reg(r1, (g(self, r2) as i64).wrapping_mul(g(self, r3) as i64) as u64),
            Vmi::Muli => self.set_reg(r1, (g(self, r2) as i64).wrapping_mul(imm as i64) as u64),
            Vmi::Div => {
                let b = g(self, r3) as i64;
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, (g(self, r2) as i64).wrapping_div(b) as u64);
            }
            Vmi::Divi => {
                if imm as i64 == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, (g(self, r2) as i64).wrapping_div(imm as i64) as u64);
            }
            Vmi::Divir => {
                let b = g(self, r2) as i64;
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, (imm as i64).wrapping_div(b) as u64);
            }
            Vmi::Mod => {
                let b = g(self, r3) as i64;
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, (g(self, r2) as i64).wrapping_rem(b) as u64);
            }
            Vmi::Modi => {
                if imm as i64 == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, (g(self, r2) as i64).wrapping_rem(imm as i64) as u64);
            }
            Vmi::Modir => {
                let b = g(self, r2) as i64;
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, (imm as i64).wrapping_rem(b) as u64);
            }
            Vmi::Neg => self.set_reg(r1, (g(self, r2) as i64).wrapping_neg() as u64),

            // unsigned integer arithmetic
            Vmi::Addu => self.set_reg(r1, g(self, r2).wrapping_add(g(self, r3))),
            Vmi::Addui => self.set_reg(r1, g(self, r2).wrapping_add(imm)),
            Vmi::Subu => self.set_reg(r1, g(self, r2).wrapping_sub(g(self, r3))),
            Vmi::Subui => self.set_reg(r1, g(self, r2).wrapping_sub(imm)),
            Vmi::Subuir => self.set_reg(r1, imm.wrapping_sub(g(self, r2))),
            Vmi::Mulu => self.set_reg(r1, g(self, r2).wrapping_mul(g(self, r3))),
            Vmi::Mului => self.set_reg(r1, g(self, r2).wrapping_mul(imm)),
            Vmi::Divu => {
                let b = g(self, r3);
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, g(self, r2) / b);
            }
            Vmi::Divui => {
                if imm == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, g(self, r2) / imm);
            }
            Vmi::Divuir => {
                let b = g(self, r2);
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, imm / b);
            }
            Vmi::Modu => {
                let b = g(self, r3);
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, g(self, r2) % b);
            }
            Vmi::Modui => {
                if imm == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, g(self, r2) % imm);
            }
            Vmi::Moduir => {
                let b = g(self, r2);
                if b == 0 {
                    return Err(VmError::DivideByZero { at: ip });
                }
                self.set_reg(r1, imm % b);
            }

            // conversions, in place
            Vmi::CvtIf => {
                let v = self.reg(r1) as i64;
                self.set_f32(r1, v as f32);
            }
            Vmi::CvtId => {
                let v = self.reg(r1) as i64;
                self.set_f64(r1, v as f64);
            }
            Vmi::CvtIu | Vmi::CvtUi => {}
            Vmi::CvtUf => {
                let v = self.reg(r1);
                self.set_f32(r1, v as f32);
            }
            Vmi::CvtUd => {
                let v = self.reg(r1);
                self.set_f64(r1, v as f64);
            }
            Vmi::CvtFi => {
                let v = self.f32_of(r1);
                self.set_reg(r1, v as i64 as u64);
            }
            Vmi::CvtFu => {
                let v = self.f32_of(r1);
                self.set_reg(r1, v as u64);
            }
            Vmi::CvtFd => {
                let v = self.f32_of(r1);
                self.set_f64(r1, v as f64);
            }
            Vmi::CvtDi => {
                let v = self.f64_of(r1);
                self.set_reg(r1, v as i64 as u64);
            }
            Vmi::CvtDu => {
                let v = self.f64_of(r1);
                self.set_reg(r1, v as u64);
            }
            Vmi::CvtDf => {
                let v = self.f64_of(r1);
                self.set_f32(r1, v as f32);
            }

            // f32 arithmetic
            Vmi::Fadd => {
                let v = self.f32_of(r2) + self.f32_of(r3);
                self.set_f32(r1, v);
            }
            Vmi::Faddi => {
                let v = self.f32_of(r2) + f32::from_bits(imm as u32);
                self.set_f32(r1, v);
            }
            Vmi::Fsub => {
                let v = self.f32_of(r2) - self.f32_of(r3);
                self.set_f32(r1, v);
            }
            Vmi::Fsubi => {
                let v = self.f32_of(r2) - f32::from_bits(imm as u32);
                self.set_f32(r1, v);
            }
            Vmi::Fsubir => {
                let v = f32::from_bits(imm as u32) - self.f32_of(r2);
                self.set_f32(r1, v);
            }
            Vmi::Fmul => {
                let v = self.f32_of(r2) * self.f32_of(r3);
                self.set_f32(r1, v);
            }
            Vmi::Fmuli => {
                let v = self.f32_of(r2) * f32::from_bits(imm as u32);
                self.set_f32(r1, v);
            }
            Vmi::Fdiv => {
                let v = self.f32_of(r2) / self.f32_of(r3);
                self.set_f32(r1, v);
            }
            Vmi::Fdivi => {
                let v = self.f32_of(r2) / f32::from_bits(imm as u32);
                self.set_f32(r1, v);
            }
            Vmi::Fdivir => {
                let v = f32::from_bits(imm as u32) / self.f32_of(r2);
                self.set_f32(r1, v);
            }
            Vmi::Fmod => {
                let v = self.f32_of(r2) % self.f32_of(r3);
                self.set_f32(r1, v);
            }
            Vmi::Fmodi => {
                let v = self.f32_of(r2) % f32::from_bits(imm as u32);
                self.set_f32(r1, v);
            }
            Vmi::Fmodir => {
                let v = f32::from_bits(imm as u32) % self.f32_of(r2);
                self.set_f32(r1, v);
            }
            Vmi::Negf => {
                let v = -self.f32_of(r2);
                self.set_f32(r1, v);
            }

            // f64 arithmetic
            Vmi::Dadd => {
                let v = self.f64_of(r2) + self.f64_of(r3);
                self.set_f64(r1, v);
            }
            Vmi::Daddi => {
                let v = self.f64_of(r2) + f64::from_bits(imm);
                self.set_f64(r1, v);
            }
            Vmi::Dsub => {
                let v = self.f64_of(r2) - self.f64_of(r3);
                self.set_f64(r1, v);
            }
            Vmi::Dsubi => {
                let v = self.f64_of(r2) - f64::from_bits(imm);
                self.set_f64(r1, v);
            }
            Vmi::Dsubir => {
                let v = f64::from_bits(imm) - self.f64_of(r2);
                self.set_f64(r1, v);
            }
            Vmi::Dmul => {
                let v = self.f64_of(r2) * self.f64_of(r3);
                self.set_f64(r1, v);
            }
            Vmi::Dmuli => {
                let v = self.f64_of(r2) * f64::from_bits(imm);
                self.set_f64(r1, v);
            }
            Vmi::Ddiv => {
                let v = self.f64_of(r2) / self.f64_of(r3);
                self.set_f64(r1, v);
            }
            Vmi::Ddivi => {
                let v = self.f64_of(r2) / f64::from_bits(imm);
                self.set_f64(r1, v);
            }
            Vmi::Ddivir => {
                let v = f64::from_bits(imm) / self.f64_of(r2);
                self.set_f64(r1, v);
            }
            Vmi::Dmod => {
                let v = self.f64_of(r2) % self.f64_of(r3);
                self.set_f64(r1, v);
            }
            Vmi::Dmodi => {
                let v = self.f64_of(r2) % f64::from_bits(imm);
                self.set_f64(r1, v);
            }
            Vmi::Dmodir => {
                let v = f64::from_bits(imm) % self.f64_of(r2);
                self.set_f64(r1, v);
            }
            Vmi::Negd => {
                let v = -self.f64_of(r2);
                self.set_f64(r1, v);
            }

            // signed comparison
            Vmi::Lt => self.set_reg(r1, ((g(self, r2) as i64) < g(self, r3) as i64) as u64),
            Vmi::Lti => self.set_reg(r1, ((g(self, r2) as i64) < imm as i64) as u64),
            Vmi::Lte => self.set_reg(r1, ((g(self, r2) as i64) <= g(self, r3) as i64) as u64),
            Vmi::Ltei => self.set_reg(r1, ((g(self, r2) as i64) <= imm as i64) as u64),
            Vmi::Gt => self.set_reg(r1, ((g(self, r2) as i64) > g(self, r3) as i64) as u64),
            Vmi::Gti => self.set_reg(r1, ((g(self, r2) as i64) > imm as i64) as u64),
            Vmi::Gte => self.set_reg(r1, ((g(self, r2) as i64) >= g(self, r3) as i64) as u64),
            Vmi::Gtei => self.set_reg(r1, ((g(self, r2) as i64) >= imm as i64) as u64),
            Vmi::Cmp => self.set_reg(r1, (g(self, r2) as i64 == g(self, r3) as i64) as u64),
            Vmi::Cmpi => self.set_reg(r1, (g(self, r2) as i64 == imm as i64) as u64),
            Vmi::Ncmp => self.set_reg(r1, (g(self, r2) as i64 != g(self, r3) as i64) as u64),
            Vmi::Ncmpi => self.set_reg(r1, (g(self, r2) as i64 != imm as i64) as u64),

            // unsigned comparison
            Vmi::Ult => self.set_reg(r1, (g(self, r2) < g(self, r3)) as u64),
            Vmi::Ulti => self.set_reg(r1, (g(self, r2) < imm) as u64),
            Vmi::Ulte => self.set_reg(r1, (g(self, r2) <= g(self, r3)) as u64),
            Vmi::Ultei => self.set_reg(r1, (g(self, r2) <= imm) as u64),
            Vmi::Ugt => self.set_reg(r1, (g(self, r2) > g(self, r3)) as u64),
            Vmi::Ugti => self.set_reg(r1, (g(self, r2) > imm) as u64),
            Vmi::Ugte => self.set_reg(r1, (g(self, r2) >= g(self, r3)) as u64),
            Vmi::Ugtei => self.set_reg(r1, (g(self, r2) >= imm) as u64),
            Vmi::Ucmp => self.set_reg(r1, (g(self, r2) == g(self, r3)) as u64),
            Vmi::Ucmpi => self.set_reg(r1, (g(self, r2) == imm) as u64),
            Vmi::Uncmp => self.set_reg(r1, (g(self, r2) != g(self, r3)) as u64),
            Vmi::Uncmpi => self.set_reg(r1, (g(self, r2) != imm) as u64),

            // f32 comparison
            Vmi::Flt => self.set_reg(r1, (self.f32_of(r2) < self.f32_of(r3)) as u64),
            Vmi::Flti => self.set_reg(r1, (self.f32_of(r2) < f32::from_bits(imm as u32)) as u64),
            Vmi::Flte => self.set_reg(r1, (self.f32_of(r2) <= self.f32_of(r3)) as u64),
            Vmi::Fltei => self.set_reg(r1, (self.f32_of(r2) <= f32::from_bits(imm as u32)) as u64),
            Vmi::Fgt => self.set_reg(r1, (self.f32_of(r2) > self.f32_of(r3)) as u64),
            Vmi::Fgti => self.set_reg(r1, (self.f32_of(r2) > f32::from_bits(imm as u32)) as u64),
            Vmi::Fgte => self.set_reg(r1, (self.f32_of(r2) >= self.f32_of(r3)) as u64),
            Vmi::Fgtei => self.set_reg(r1, (self.f32_of(r2) >= f32::from_bits(imm as u32)) as u64),
            Vmi::Fcmp => self.set_reg(r1, (self.f32_of(r2) == self.f32_of(r3)) as u64),
            Vmi::Fcmpi => self.set_reg(r1, (self.f32_of(r2) == f32::from_bits(imm as u32)) as u64),
            Vmi::Fncmp => self.set_reg(r1, (self.f32_of(r2) != self.f32_of(r3)) as u64),
            Vmi::Fncmpi => self.set_reg(r1, (self.f32_of(r2) != f32::from_bits(imm as u32)) as u64),

            // f64 comparison
            Vmi::Dlt => self.set_reg(r1, (self.f64_of(r2) < self.f64_of(r3)) as u64),
            Vmi::Dlti => self.set_reg(r1, (self.f64_of(r2) < f64::from_bits(imm)) as u64),
            Vmi::Dlte => self.set_reg(r1, (self.f64_of(r2) <= self.f64_of(r3)) as u64),
            Vmi::Dltei => self.set_reg(r1, (self.f64_of(r2) <= f64::from_bits(imm)) as u64),
            Vmi::Dgt => self.set_reg(r1, (self.f64_of(r2) > self.f64_of(r3)) as u64),
            Vmi::Dgti => self.set_reg(r1, (self.f64_of(r2) > f64::from_bits(imm)) as u64),
            Vmi::Dgte => self.set_reg(r1, (self.f64_of(r2) >= self.f64_of(r3)) as u64),
            Vmi::Dgtei => self.set_reg(r1, (self.f64_of(r2) >= f64::from_bits(imm)) as u64),
            Vmi::Dcmp => self.set_reg(r1, (self.f64_of(r2) == self.f64_of(r3)) as u64),
            Vmi::Dcmpi => self.set_reg(r1, (self.f64_of(r2) == f64::from_bits(imm)) as u64),
            Vmi::Dncmp => self.set_reg(r1, (self.f64_of(r2) != self.f64_of(r3)) as u64),
            Vmi::Dncmpi => self.set_reg(r1, (self.f64_of(r2) != f64::from_bits(imm)) as u64),

            // boolean
            Vmi::And => self.set_reg(r1, (g(self, r2) != 0 && g(self, r3) != 0) as u64),
            Vmi::Andi => self.set_reg(r1, (g(self, r2) != 0 && imm != 0) as u64),
            Vmi::Or => self.set_reg(r1, (g(self, r2) != 0 || g(self, r3) != 0) as u64),
            Vmi::Ori => self.set_reg(r1, (g(self, r2) != 0 || imm != 0) as u64),

            // bitwise
            Vmi::Band => self.set_reg(r1, g(self, r2) & g(self, r3)),
            Vmi::Bandi => self.set_reg(r1, g(self, r2) & imm),
            Vmi::Bor => self.set_reg(r1, g(self, r2) | g(self, r3)),
            Vmi::Bori => self.set_reg(r1, g(self, r2) | imm),
            Vmi::Xor => self.set_reg(r1, g(self, r2) ^ g(self, r3)),
            Vmi::Xori => self.set_reg(r1, g(self, r2) ^ imm),
            Vmi::Sl => self.set_reg(r1, g(self, r2) << (g(self, r3) & 63)),
            Vmi::Sli => self.set_reg(r1, g(self, r2) << (imm & 63)),
            Vmi::Slir => self.set_reg(r1, imm << (g(self, r2) & 63)),
            Vmi::Sr => self.set_reg(r1, g(self, r2) >> (g(self, r3) & 63)),
            Vmi::Sri => self.set_reg(r1, g(self, r2) >> (imm & 63)),
            Vmi::Srir => self.set_reg(r1, imm >> (g(self, r2) & 63)),

            // control flow
            Vmi::Beqz => {
                if self.reg(r1) == 0 {
                    return Ok(Flow::Jump(imm));
                }
            }
            Vmi::Bneqz => {
                if self.reg(r1) != 0 {
                    return Ok(Flow::Jump(imm));
                }
            }
            Vmi::Bgtz => {
                if (self.reg(r1) as i64) > 0 {
                    return Ok(Flow::Jump(imm));
                }
            }
            Vmi::Bgtez => {
                if (self.reg(r1) as i64) >= 0 {
                    return Ok(Flow::Jump(imm));
                }
            }
            Vmi::Bltz => {
                if (self.reg(r1) as i64) < 0 {
                    return Ok(Flow::Jump(imm));
                }
            }
            Vmi::Bltez => {
                if (self.reg(r1) as i64) <= 0 {
                    return Ok(Flow::Jump(imm));
                }
            }
            Vmi::Jmp => return Ok(Flow::Jump(imm)),
            Vmi::Jmpr => return Ok(Flow::Jump(self.reg(r1))),
            Vmi::Jal => {
                let id = imm as FuncId;
                let func = ctx
                    .funcs
                    .get(id)
                    .ok_or(VmError::InvalidFunctionId { id })?;
                if func.is_host() {
                    let sig = self.signature_of(ctx, func)?;
                    self.bridge_host_call(ctx, func, &sig)?;
                } else {
                    let entry = func.entry().ok_or(VmError::InvalidFunctionId { id })?;
                    self.set_reg(Reg::Ra, ip + 1);
                    return Ok(Flow::Jump(entry));
                }
            }
            Vmi::Jalr => {
                let cb = self.reg(r1);
                if cb == 0 {
                    return Err(VmError::InvalidCallback);
                }
                let fp = self.load(cb + tsn_core::ffi::RAW_CALLBACK_PTR_OFFSET, 8)?;
                if fp == 0 {
                    return Err(VmError::InvalidCallback);
                }
                let id = self.load(fp + tsn_core::ffi::FUNCTION_POINTER_ID_OFFSET, 4)? as FuncId;
                let func = ctx.funcs.get(id).ok_or(VmError::InvalidCallback)?;
                if func.is_host() {
                    let sig = self.signature_of(ctx, func)?;
                    self.bridge_host_call(ctx, func, &sig)?;
                } else {
                    let entry = func.entry().ok_or(VmError::InvalidCallback)?;
                    self.set_reg(Reg::Ra, ip + 1);
                    return Ok(Flow::Jump(entry));
                }
            }

            // vector families exist in the encoding but have no interpreter
            // support
            _ => return Err(VmError::InvalidInstruction { at: ip }),
        }
        Ok(Flow::Next)
    }

    /// Marshal a host call per the calling convention and descriptor.
    fn bridge_host_call(
        &mut self,
        ctx: &Context,
        func: &Function,
        sig: &Signature,
    ) -> Result<(), VmError> {
        let symbol = match &func.access_kind {
            tsn_core::FuncAccess::Host { symbol } => symbol.clone(),
            _ => return Err(VmError::InvalidFunctionId { id: func.id }),
        };
        let desc = ctx
            .host
            .get(&symbol)
            .ok_or(VmError::UnknownHostSymbol {
                symbol: symbol.clone(),
            })?
            .clone();

        let locs = arg_locations(ctx, sig);
        let subtype_id = ctx.types.subtype();
        let mut words: Vec<u64> = Vec::with_capacity(sig.args.len());
        let mut ret_slot: Option<u64> = None;

        for (arg, loc) in sig.args.iter().zip(&locs) {
            let raw = match loc {
                ArgLoc::Reg(r) => self.reg(*r),
                // the caller spilled these past its own frame, which is
                // where `$sp` points during the bridged call
                ArgLoc::Stack(off) => self.load(self.reg(Reg::Sp) + *off as u64, 8)?,
            };
            if arg.implicit == ImplicitArg::RetPtr {
                ret_slot = Some(raw);
                continue;
            }
            let mut tp = arg.tp;
            if ctx.types.resolve_alias(tp) == subtype_id {
                let (module, type_id) = split_moduletype(self.reg(Reg::V3));
                let resolved = ctx
                    .modules
                    .get(module)
                    .and_then(|m| m.types.iter().find(|&&t| t == type_id));
                if resolved.is_none() {
                    return Err(VmError::NoSubtypeProvided {
                        func: func.name.clone(),
                    });
                }
                tp = type_id;
            }
            let t = ctx.types.get(tp);
            let primitive = t
                .map(|t| t.flags.is_primitive || t.flags.is_function || t.flags.is_host)
                .unwrap_or(true);
            if !primitive && !arg.is_ptr {
                return Err(VmError::CannotPassStructByValue {
                    func: func.name.clone(),
                    tp: t.map(|t| t.name.clone()).unwrap_or_default(),
                });
            }
            words.push(raw);
        }

        let result = (desc.shim)(self, &words).map_err(|message| VmError::HostError {
            func: func.name.clone(),
            message,
        })?;

        let ret = ctx.types.get(sig.return_type);
        let ret_size = ret.map(|t| t.size).unwrap_or(0);
        if ret_size > 0 {
            if sig.returns_on_stack {
                if let Some(addr) = ret_slot {
                    self.store(addr, 8, result)?;
                }
            } else if let Some(rr) = return_register(ctx, sig) {
                self.set_reg(rr, 0);
                self.set_reg(rr, result);
            }
        }
        Ok(())
    }
}

/// Control-flow outcome of one instruction.
enum Flow {
    Next,
    Jump(u64),
    Halt,
}

impl HostPort for Vm {
    fn read(&self, addr: u64, buf: &mut [u8]) -> Result<(), String> {
        let len = buf.len() as u64;
        self.check_addr(addr, len).map_err(|e| e.to_string())?;
        buf.copy_from_slice(&self.mem[addr as usize..(addr + len) as usize]);
        Ok(())
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), String> {
        let len = bytes.len() as u64;
        self.check_addr(addr, len).map_err(|e| e.to_string())?;
        self.mem[addr as usize..(addr + len) as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn alloc(&mut self, size: u64) -> Result<u64, String> {
        self.heap
            .alloc(size)
            .ok_or_else(|| format!("heap exhausted allocating {size} bytes"))
    }

    fn free(&mut self, addr: u64) -> Result<(), String> {
        if self.heap.free(addr) {
            Ok(())
        } else {
            Err(format!("free of unallocated address {addr:#x}"))
        }
    }

    fn emit(&mut self, text: &str) {
        self.output.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(code: Vec<Instr>) -> Result<Vm, VmError> {
        let ctx = Context::new();
        let mut program = Program::new();
        let entry = program.code.len() as u64;
        program.code.extend(code);
        let mut vm = Vm::new(VmConfig::default());
        vm.set_reg(Reg::Ra, 0);
        vm.set_reg(Reg::Ip, entry);
        vm.run(&ctx, &program)?;
        Ok(vm)
    }

    #[test]
    fn test_integer_arithmetic() {
        let vm = exec(vec![
            Instr::new(Vmi::Addi).r1(Reg::S0).r2(Reg::Zero).imm(40),
            Instr::new(Vmi::Addi).r1(Reg::S1).r2(Reg::S0).imm(2),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
        ])
        .unwrap();
        assert_eq!(vm.reg(Reg::S1), 42);
    }

    #[test]
    fn test_signed_modulo_matches_platform_semantics() {
        let vm = exec(vec![
            Instr::new(Vmi::Addi).r1(Reg::S0).r2(Reg::Zero).imm(-7i64 as u64),
            Instr::new(Vmi::Modi).r1(Reg::S1).r2(Reg::S0).imm(3),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
        ])
        .unwrap();
        assert_eq!(vm.reg(Reg::S1) as i64, -1);
    }

    #[test]
    fn test_float_double_arithmetic() {
        let vm = exec(vec![
            Instr::new(Vmi::Daddi).r1(Reg::F0).r2(Reg::F1).imm_d(1.25),
            Instr::new(Vmi::Dmuli).r1(Reg::F2).r2(Reg::F0).imm_d(4.0),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
        ])
        .unwrap();
        assert_eq!(f64::from_bits(vm.reg(Reg::F2)), 5.0);
    }

    #[test]
    fn test_division_by_zero_is_tagged() {
        let err = exec(vec![
            Instr::new(Vmi::Div).r1(Reg::S0).r2(Reg::S1).r3(Reg::S2),
        ])
        .unwrap_err();
        assert!(matches!(err, VmError::DivideByZero { .. }));
    }

    #[test]
    fn test_zero_register_is_immutable() {
        let vm = exec(vec![
            Instr::new(Vmi::Addi).r1(Reg::Zero).r2(Reg::Zero).imm(99),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
        ])
        .unwrap();
        assert_eq!(vm.reg(Reg::Zero), 0);
    }

    #[test]
    fn test_stack_load_store() {
        let vm = exec(vec![
            Instr::new(Vmi::Addi).r1(Reg::S0).r2(Reg::Zero).imm(7),
            Instr::new(Vmi::St64).r1(Reg::S0).r2(Reg::Sp).imm(8),
            Instr::new(Vmi::Ld64).r1(Reg::S1).r2(Reg::Sp).imm(8),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
        ])
        .unwrap();
        assert_eq!(vm.reg(Reg::S1), 7);
    }

    #[test]
    fn test_stack_overflow_hits_guard_band() {
        let config = VmConfig {
            stack_size: 64,
            mem_size: 1 << 16,
            stack_padding: 8,
        };
        let ctx = Context::new();
        let mut program = Program::new();
        program.code.push(Instr::new(Vmi::St64).r1(Reg::S0).r2(Reg::Sp).imm(64));
        program.code.push(Instr::new(Vmi::Jmpr).r1(Reg::Ra));
        let mut vm = Vm::new(config);
        vm.set_reg(Reg::Ip, 1);
        let err = vm.run(&ctx, &program).unwrap_err();
        assert!(matches!(err, VmError::StackOverflow { .. }));
    }

    #[test]
    fn test_branches() {
        let vm = exec(vec![
            // s0 = 5; if s0 != 0 jump over the poison write
            Instr::new(Vmi::Addi).r1(Reg::S0).r2(Reg::Zero).imm(5),
            Instr::new(Vmi::Bneqz).r1(Reg::S0).imm(4),
            Instr::new(Vmi::Addi).r1(Reg::S1).r2(Reg::Zero).imm(99),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
            Instr::new(Vmi::Addi).r1(Reg::S1).r2(Reg::Zero).imm(1),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
        ])
        .unwrap();
        assert_eq!(vm.reg(Reg::S1), 1);
    }

    #[test]
    fn test_vector_opcodes_are_invalid_at_runtime() {
        let err = exec(vec![Instr::new(Vmi::V2fAdd).r1(Reg::F0).r2(Reg::F1)]).unwrap_err();
        assert!(matches!(err, VmError::InvalidInstruction { .. }));
    }

    #[test]
    fn test_cvt_roundtrip() {
        let vm = exec(vec![
            Instr::new(Vmi::Addi).r1(Reg::S0).r2(Reg::Zero).imm(3),
            Instr::new(Vmi::Mtfp).r1(Reg::S0).r2(Reg::F0),
            Instr::new(Vmi::CvtId).r1(Reg::F0),
            Instr::new(Vmi::Dmuli).r1(Reg::F0).r2(Reg::F0).imm_d(0.5),
            Instr::new(Vmi::CvtDi).r1(Reg::F0),
            Instr::new(Vmi::Mffp).r1(Reg::F0).r2(Reg::S1),
            Instr::new(Vmi::Jmpr).r1(Reg::Ra),
        ])
        .unwrap();
        assert_eq!(vm.reg(Reg::S1), 1);
    }
}
