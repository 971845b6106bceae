//! The bytecode instruction set and its fixed-width encoding.
//!
//! Instructions encode to two 64-bit words: the first holds the opcode in
//! the low 9 bits followed by three 7-bit register fields; the second holds
//! the inline immediate (integer, unsigned, or IEEE-754 bits, depending on
//! the opcode). `decode(encode(i)) == i` for every instruction.
//!
//! The table carries the full vector families even though the interpreter
//! only dispatches the scalar subset; encoding stability is part of the
//! contract.

use crate::registers::Reg;

macro_rules! vm_instructions {
    ($($name:ident = $text:literal),+ $(,)?) => {
        /// Bytecode opcode. Discriminants are sequential and stable.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Vmi {
            $($name),+
        }

        impl Vmi {
            pub const COUNT: u16 = 0 $(+ { let _ = $text; 1 })+;

            pub fn from_u16(v: u16) -> Option<Vmi> {
                const ALL: &[Vmi] = &[$(Vmi::$name),+];
                ALL.get(v as usize).copied()
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Vmi::$name => $text),+
                }
            }
        }
    };
}

vm_instructions! {
    Null = "null", Term = "term",
    // memory
    Ld8 = "ld8", Ld16 = "ld16", Ld32 = "ld32", Ld64 = "ld64",
    St8 = "st8", St16 = "st16", St32 = "st32", St64 = "st64",
    Mptr = "mptr", Mtfp = "mtfp", Mffp = "mffp",
    // 2D vectors
    V2fSet = "v2fset", V2fSets = "v2fsets", V2fSetsi = "v2fsetsi",
    V2dSet = "v2dset", V2dSets = "v2dsets", V2dSetsi = "v2dsetsi",
    V2fAdd = "v2fadd", V2fAdds = "v2fadds", V2fAddsi = "v2faddsi",
    V2dAdd = "v2dadd", V2dAdds = "v2dadds", V2dAddsi = "v2daddsi",
    V2fSub = "v2fsub", V2fSubs = "v2fsubs", V2fSubsi = "v2fsubsi",
    V2dSub = "v2dsub", V2dSubs = "v2dsubs", V2dSubsi = "v2dsubsi",
    V2fMul = "v2fmul", V2fMuls = "v2fmuls", V2fMulsi = "v2fmulsi",
    V2dMul = "v2dmul", V2dMuls = "v2dmuls", V2dMulsi = "v2dmulsi",
    V2fDiv = "v2fdiv", V2fDivs = "v2fdivs", V2fDivsi = "v2fdivsi",
    V2dDiv = "v2ddiv", V2dDivs = "v2ddivs", V2dDivsi = "v2ddivsi",
    V2fMod = "v2fmod", V2fMods = "v2fmods", V2fModsi = "v2fmodsi",
    V2dMod = "v2dmod", V2dMods = "v2dmods", V2dModsi = "v2dmodsi",
    V2fNeg = "v2fneg", V2dNeg = "v2dneg",
    V2fDot = "v2fdot", V2dDot = "v2ddot",
    V2fMag = "v2fmag", V2dMag = "v2dmag",
    V2fMagSq = "v2fmagsq", V2dMagSq = "v2dmagsq",
    V2fNorm = "v2fnorm", V2dNorm = "v2dnorm",
    // 3D vectors
    V3fSet = "v3fset", V3fSets = "v3fsets", V3fSetsi = "v3fsetsi",
    V3dSet = "v3dset", V3dSets = "v3dsets", V3dSetsi = "v3dsetsi",
    V3fAdd = "v3fadd", V3fAdds = "v3fadds", V3fAddsi = "v3faddsi",
    V3dAdd = "v3dadd", V3dAdds = "v3dadds", V3dAddsi = "v3daddsi",
    V3fSub = "v3fsub", V3fSubs = "v3fsubs", V3fSubsi = "v3fsubsi",
    V3dSub = "v3dsub", V3dSubs = "v3dsubs", V3dSubsi = "v3dsubsi",
    V3fMul = "v3fmul", V3fMuls = "v3fmuls", V3fMulsi = "v3fmulsi",
    V3dMul = "v3dmul", V3dMuls = "v3dmuls", V3dMulsi = "v3dmulsi",
    V3fDiv = "v3fdiv", V3fDivs = "v3fdivs", V3fDivsi = "v3fdivsi",
    V3dDiv = "v3ddiv", V3dDivs = "v3ddivs", V3dDivsi = "v3ddivsi",
    V3fMod = "v3fmod", V3fMods = "v3fmods", V3fModsi = "v3fmodsi",
    V3dMod = "v3dmod", V3dMods = "v3dmods", V3dModsi = "v3dmodsi",
    V3fNeg = "v3fneg", V3dNeg = "v3dneg",
    V3fDot = "v3fdot", V3dDot = "v3ddot",
    V3fMag = "v3fmag", V3dMag = "v3dmag",
    V3fMagSq = "v3fmagsq", V3dMagSq = "v3dmagsq",
    V3fNorm = "v3fnorm", V3dNorm = "v3dnorm",
    V3fCross = "v3fcross", V3dCross = "v3dcross",
    // 4D vectors
    V4fSet = "v4fset", V4fSets = "v4fsets", V4fSetsi = "v4fsetsi",
    V4dSet = "v4dset", V4dSets = "v4dsets", V4dSetsi = "v4dsetsi",
    V4fAdd = "v4fadd", V4fAdds = "v4fadds", V4fAddsi = "v4faddsi",
    V4dAdd = "v4dadd", V4dAdds = "v4dadds", V4dAddsi = "v4daddsi",
    V4fSub = "v4fsub", V4fSubs = "v4fsubs", V4fSubsi = "v4fsubsi",
    V4dSub = "v4dsub", V4dSubs = "v4dsubs", V4dSubsi = "v4dsubsi",
    V4fMul = "v4fmul", V4fMuls = "v4fmuls", V4fMulsi = "v4fmulsi",
    V4dMul = "v4dmul", V4dMuls = "v4dmuls", V4dMulsi = "v4dmulsi",
    V4fDiv = "v4fdiv", V4fDivs = "v4fdivs", V4fDivsi = "v4fdivsi",
    V4dDiv = "v4ddiv", V4dDivs = "v4ddivs", V4dDivsi = "v4ddivsi",
    V4fMod = "v4fmod", V4fMods = "v4fmods", V4fModsi = "v4fmodsi",
    V4dMod = "v4dmod", V4dMods = "v4dmods", V4dModsi = "v4dmodsi",
    V4fNeg = "v4fneg", V4dNeg = "v4dneg",
    V4fDot = "v4fdot", V4dDot = "v4ddot",
    V4fMag = "v4fmag", V4dMag = "v4dmag",
    V4fMagSq = "v4fmagsq", V4dMagSq = "v4dmagsq",
    V4fNorm = "v4fnorm", V4dNorm = "v4dnorm",
    V4fCross = "v4fcross", V4dCross = "v4dcross",
    // signed integer arithmetic
    Add = "add", Addi = "addi",
    Sub = "sub", Subi = "subi", Subir = "subir",
    Mul = "mul", Muli = "muli",
    Div = "div", Divi = "divi", Divir = "divir",
    Mod = "mod", Modi = "modi", Modir = "modir",
    Neg = "neg",
    // unsigned integer arithmetic
    Addu = "addu", Addui = "addui",
    Subu = "subu", Subui = "subui", Subuir = "subuir",
    Mulu = "mulu", Mului = "mului",
    Divu = "divu", Divui = "divui", Divuir = "divuir",
    Modu = "modu", Modui = "modui", Moduir = "moduir",
    // numeric conversions (in place)
    CvtIf = "cvt_if", CvtId = "cvt_id", CvtIu = "cvt_iu",
    CvtUf = "cvt_uf", CvtUd = "cvt_ud", CvtUi = "cvt_ui",
    CvtFi = "cvt_fi", CvtFu = "cvt_fu", CvtFd = "cvt_fd",
    CvtDi = "cvt_di", CvtDu = "cvt_du", CvtDf = "cvt_df",
    // f32 arithmetic
    Fadd = "fadd", Faddi = "faddi",
    Fsub = "fsub", Fsubi = "fsubi", Fsubir = "fsubir",
    Fmul = "fmul", Fmuli = "fmuli",
    Fdiv = "fdiv", Fdivi = "fdivi", Fdivir = "fdivir",
    Fmod = "fmod", Fmodi = "fmodi", Fmodir = "fmodir",
    Negf = "negf",
    // f64 arithmetic
    Dadd = "dadd", Daddi = "daddi",
    Dsub = "dsub", Dsubi = "dsubi", Dsubir = "dsubir",
    Dmul = "dmul", Dmuli = "dmuli",
    Ddiv = "ddiv", Ddivi = "ddivi", Ddivir = "ddivir",
    Dmod = "dmod", Dmodi = "dmodi", Dmodir = "dmodir",
    Negd = "negd",
    // signed comparison
    Lt = "lt", Lti = "lti", Lte = "lte", Ltei = "ltei",
    Gt = "gt", Gti = "gti", Gte = "gte", Gtei = "gtei",
    Cmp = "cmp", Cmpi = "cmpi", Ncmp = "ncmp", Ncmpi = "ncmpi",
    // unsigned comparison
    Ult = "ult", Ulti = "ulti", Ulte = "ulte", Ultei = "ultei",
    Ugt = "ugt", Ugti = "ugti", Ugte = "ugte", Ugtei = "ugtei",
    Ucmp = "ucmp", Ucmpi = "ucmpi", Uncmp = "uncmp", Uncmpi = "uncmpi",
    // f32 comparison
    Flt = "flt", Flti = "flti", Flte = "flte", Fltei = "fltei",
    Fgt = "fgt", Fgti = "fgti", Fgte = "fgte", Fgtei = "fgtei",
    Fcmp = "fcmp", Fcmpi = "fcmpi", Fncmp = "fncmp", Fncmpi = "fncmpi",
    // f64 comparison
    Dlt = "dlt", Dlti = "dlti", Dlte = "dlte", Dltei = "dltei",
    Dgt = "dgt", Dgti = "dgti", Dgte = "dgte", Dgtei = "dgtei",
    Dcmp = "dcmp", Dcmpi = "dcmpi", Dncmp = "dncmp", Dncmpi = "dncmpi",
    // boolean
    And = "and", Andi = "andi", Or = "or", Ori = "ori",
    // bitwise
    Band = "band", Bandi = "bandi", Bor = "bor", Bori = "bori",
    Xor = "xor", Xori = "xori",
    Sl = "sl", Sli = "sli", Slir = "slir",
    Sr = "sr", Sri = "sri", Srir = "srir",
    // control flow
    Beqz = "beqz", Bneqz = "bneqz", Bgtz = "bgtz", Bgtez = "bgtez",
    Bltz = "bltz", Bltez = "bltez",
    Jmp = "jmp", Jmpr = "jmpr", Jal = "jal", Jalr = "jalr",
}

const OP_BITS: u64 = 9;
const REG_BITS: u64 = 7;
const OP_MASK: u64 = (1 << OP_BITS) - 1;
const REG_MASK: u64 = (1 << REG_BITS) - 1;

/// One decoded bytecode instruction. Unused register fields are `zero` and
/// an unused immediate is 0 so equality is exact across an encode/decode
/// round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub op: Vmi,
    pub r1: Reg,
    pub r2: Reg,
    pub r3: Reg,
    pub imm: u64,
}

impl Instr {
    pub fn new(op: Vmi) -> Self {
        Instr {
            op,
            r1: Reg::Zero,
            r2: Reg::Zero,
            r3: Reg::Zero,
            imm: 0,
        }
    }

    pub fn r1(mut self, r: Reg) -> Self {
        self.r1 = r;
        self
    }

    pub fn r2(mut self, r: Reg) -> Self {
        self.r2 = r;
        self
    }

    pub fn r3(mut self, r: Reg) -> Self {
        self.r3 = r;
        self
    }

    pub fn imm(mut self, v: u64) -> Self {
        self.imm = v;
        self
    }

    pub fn imm_f(mut self, v: f32) -> Self {
        self.imm = v.to_bits() as u64;
        self
    }

    pub fn imm_d(mut self, v: f64) -> Self {
        self.imm = v.to_bits();
        self
    }

    /// Encode to the two-word wire format.
    pub fn encode(&self) -> [u64; 2] {
        let word = (self.op as u64 & OP_MASK)
            | ((self.r1 as u64 & REG_MASK) << OP_BITS)
            | ((self.r2 as u64 & REG_MASK) << (OP_BITS + REG_BITS))
            | ((self.r3 as u64 & REG_MASK) << (OP_BITS + 2 * REG_BITS));
        [word, self.imm]
    }

    /// Decode from the wire format. `None` for an unknown opcode or register
    /// field.
    pub fn decode(words: [u64; 2]) -> Option<Instr> {
        let op = Vmi::from_u16((words[0] & OP_MASK) as u16)?;
        let r1 = Reg::from_u8(((words[0] >> OP_BITS) & REG_MASK) as u8)?;
        let r2 = Reg::from_u8(((words[0] >> (OP_BITS + REG_BITS)) & REG_MASK) as u8)?;
        let r3 = Reg::from_u8(((words[0] >> (OP_BITS + 2 * REG_BITS)) & REG_MASK) as u8)?;
        Some(Instr {
            op,
            r1,
            r2,
            r3,
            imm: words[1],
        })
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<8}", self.op.name())?;
        if self.r1 != Reg::Zero || self.r2 != Reg::Zero || self.r3 != Reg::Zero {
            write!(f, " {} {} {}", self.r1, self.r2, self.r3)?;
        }
        if self.imm != 0 {
            write!(f, " {:#x}", self.imm)?;
        }
        Ok(())
    }
}
