//! Tagged runtime errors raised by the interpreter and FFI bridge.
//!
//! The interpreter returns these to its caller; the VM's register and memory
//! state stays consistent so the host can unwind and start a fresh
//! invocation.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// A stack access landed in the guard band past the stack region.
    StackOverflow { addr: u64 },
    /// `mptr` or a subtype resolution named a module that does not exist.
    InvalidModuleId { module: u32 },
    /// Fetched an instruction the interpreter does not implement.
    InvalidInstruction { at: u64 },
    /// `jal` named an unknown function id.
    InvalidFunctionId { id: u32 },
    /// `jalr` found a null or torn raw callback.
    InvalidCallback,
    /// A host call received a struct argument by value.
    CannotPassStructByValue { func: String, tp: String },
    /// A subtype-typed argument was used without a moduletype id in `$v3`.
    NoSubtypeProvided { func: String },
    /// Memory access outside the VM's memory block.
    InvalidMemoryAccess { addr: u64 },
    /// Integer division or modulo by zero.
    DivideByZero { at: u64 },
    /// A host function reported failure through the bridge.
    HostError { func: String, message: String },
    /// The host symbol a function was registered under is missing.
    UnknownHostSymbol { symbol: String },
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::StackOverflow { addr } => {
                write!(f, "stack overflow at address {addr:#x}")
            }
            VmError::InvalidModuleId { module } => {
                write!(f, "invalid module id {module}")
            }
            VmError::InvalidInstruction { at } => {
                write!(f, "invalid instruction at {at:#x}")
            }
            VmError::InvalidFunctionId { id } => {
                write!(f, "invalid function id {id}")
            }
            VmError::InvalidCallback => write!(f, "invalid callback"),
            VmError::CannotPassStructByValue { func, tp } => {
                write!(f, "cannot pass struct of type '{tp}' by value to '{func}'")
            }
            VmError::NoSubtypeProvided { func } => {
                write!(f, "no subtype provided for call to '{func}'")
            }
            VmError::InvalidMemoryAccess { addr } => {
                write!(f, "invalid memory access at {addr:#x}")
            }
            VmError::DivideByZero { at } => write!(f, "division by zero at {at:#x}"),
            VmError::HostError { func, message } => {
                write!(f, "host function '{func}' failed: {message}")
            }
            VmError::UnknownHostSymbol { symbol } => {
                write!(f, "no host binding registered for symbol '{symbol}'")
            }
        }
    }
}

impl std::error::Error for VmError {}
