//! The fixed register file.
//!
//! Small-integer addressable, 7 bits in the encoding. `zero` is read-only
//! and always 0. Argument and return registers are caller-saved; `s*` and
//! `f*` are callee-saved. `ip`, `ra`, and `sp` are the execution context.

macro_rules! registers {
    ($($name:ident = $idx:literal / $text:literal),+ $(,)?) => {
        /// One register of the VM register file.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Reg {
            $($name = $idx),+
        }

        impl Reg {
            pub const COUNT: usize = 0 $(+ { let _ = $idx; 1 })+;

            pub fn from_u8(v: u8) -> Option<Reg> {
                match v {
                    $($idx => Some(Reg::$name),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Reg::$name => $text),+
                }
            }
        }
    };
}

registers! {
    Zero = 0 / "zero",
    // return values
    V0 = 1 / "v0", V1 = 2 / "v1", V2 = 3 / "v2", V3 = 4 / "v3",
    Vf0 = 5 / "vf0", Vf1 = 6 / "vf1", Vf2 = 7 / "vf2", Vf3 = 8 / "vf3",
    // integer/pointer arguments
    A0 = 9 / "a0", A1 = 10 / "a1", A2 = 11 / "a2", A3 = 12 / "a3",
    A4 = 13 / "a4", A5 = 14 / "a5", A6 = 15 / "a6", A7 = 16 / "a7",
    A8 = 17 / "a8", A9 = 18 / "a9", A10 = 19 / "a10", A11 = 20 / "a11",
    A12 = 21 / "a12", A13 = 22 / "a13", A14 = 23 / "a14", A15 = 24 / "a15",
    // floating-point arguments
    Fa0 = 25 / "fa0", Fa1 = 26 / "fa1", Fa2 = 27 / "fa2", Fa3 = 28 / "fa3",
    Fa4 = 29 / "fa4", Fa5 = 30 / "fa5", Fa6 = 31 / "fa6", Fa7 = 32 / "fa7",
    Fa8 = 33 / "fa8", Fa9 = 34 / "fa9", Fa10 = 35 / "fa10", Fa11 = 36 / "fa11",
    Fa12 = 37 / "fa12", Fa13 = 38 / "fa13", Fa14 = 39 / "fa14", Fa15 = 40 / "fa15",
    // callee-saved general purpose
    S0 = 41 / "s0", S1 = 42 / "s1", S2 = 43 / "s2", S3 = 44 / "s3",
    S4 = 45 / "s4", S5 = 46 / "s5", S6 = 47 / "s6", S7 = 48 / "s7",
    S8 = 49 / "s8", S9 = 50 / "s9", S10 = 51 / "s10", S11 = 52 / "s11",
    S12 = 53 / "s12", S13 = 54 / "s13", S14 = 55 / "s14", S15 = 56 / "s15",
    // callee-saved floating point
    F0 = 57 / "f0", F1 = 58 / "f1", F2 = 59 / "f2", F3 = 60 / "f3",
    F4 = 61 / "f4", F5 = 62 / "f5", F6 = 63 / "f6", F7 = 64 / "f7",
    F8 = 65 / "f8", F9 = 66 / "f9", F10 = 67 / "f10", F11 = 68 / "f11",
    F12 = 69 / "f12", F13 = 70 / "f13", F14 = 71 / "f14", F15 = 72 / "f15",
    // execution context
    Ip = 73 / "ip",
    Ra = 74 / "ra",
    Sp = 75 / "sp",
}

impl Reg {
    /// Nth integer argument register.
    pub fn arg(n: usize) -> Option<Reg> {
        if n < 16 {
            Reg::from_u8(Reg::A0 as u8 + n as u8)
        } else {
            None
        }
    }

    /// Nth floating-point argument register.
    pub fn farg(n: usize) -> Option<Reg> {
        if n < 16 {
            Reg::from_u8(Reg::Fa0 as u8 + n as u8)
        } else {
            None
        }
    }

    /// Nth callee-saved GP register.
    pub fn saved(n: usize) -> Option<Reg> {
        if n < 16 {
            Reg::from_u8(Reg::S0 as u8 + n as u8)
        } else {
            None
        }
    }

    /// Nth callee-saved FP register.
    pub fn fsaved(n: usize) -> Option<Reg> {
        if n < 16 {
            Reg::from_u8(Reg::F0 as u8 + n as u8)
        } else {
            None
        }
    }

    pub fn is_fp(self) -> bool {
        matches!(self,
            Reg::Vf0 | Reg::Vf1 | Reg::Vf2 | Reg::Vf3)
            || (Reg::Fa0 as u8..=Reg::Fa15 as u8).contains(&(self as u8))
            || (Reg::F0 as u8..=Reg::F15 as u8).contains(&(self as u8))
    }

    pub fn is_arg(self) -> bool {
        (Reg::A0 as u8..=Reg::Fa15 as u8).contains(&(self as u8))
    }

    /// Clobbered across calls: return and argument registers.
    pub fn is_volatile(self) -> bool {
        (Reg::V0 as u8..=Reg::Fa15 as u8).contains(&(self as u8))
    }

    /// Preserved across calls: `s*` and `f*`.
    pub fn is_callee_saved(self) -> bool {
        (Reg::S0 as u8..=Reg::F15 as u8).contains(&(self as u8))
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_count_and_roundtrip() {
        assert_eq!(Reg::COUNT, 76);
        for i in 0..Reg::COUNT as u8 {
            let r = Reg::from_u8(i).unwrap();
            assert_eq!(r as u8, i);
        }
        assert!(Reg::from_u8(76).is_none());
    }

    #[test]
    fn test_partitions() {
        assert!(Reg::A3.is_volatile());
        assert!(Reg::Fa3.is_fp());
        assert!(Reg::S9.is_callee_saved());
        assert!(Reg::F1.is_callee_saved() && Reg::F1.is_fp());
        assert!(!Reg::Zero.is_volatile());
        assert!(!Reg::Sp.is_callee_saved());
    }

    #[test]
    fn test_argument_helpers() {
        assert_eq!(Reg::arg(0), Some(Reg::A0));
        assert_eq!(Reg::arg(15), Some(Reg::A15));
        assert_eq!(Reg::arg(16), None);
        assert_eq!(Reg::farg(2), Some(Reg::Fa2));
        assert_eq!(Reg::saved(13), Some(Reg::S13));
    }
}
