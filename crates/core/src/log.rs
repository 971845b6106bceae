//! Coded diagnostics.
//!
//! Every message the pipeline produces carries a stable code with a
//! single-letter prefix (`C` compiler, `P` parser/frontend, `I` I/O,
//! `G` generic), a severity, a source range, and human text. Messages are
//! collected on the [`CompileLog`]; compilation never throws them.

use crate::src_ref::SrcRef;
use serde::Serialize;
use std::fmt;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Warning,
    Error,
}

/// Stable message codes.
///
/// The numeric value is part of the tool's surface (it appears in dumps and
/// driver output), so variants are given explicit discriminants and never
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageCode {
    // C: semantic errors from the compiler
    CImportCycle = 1001,
    CNoValidConversion = 1002,
    CAmbiguousCall = 1003,
    CNoSuchFunction = 1004,
    CNoSuchType = 1005,
    CNoSuchProperty = 1006,
    CUndefinedIdentifier = 1007,
    CPropertyHasNoDefaultConstructor = 1008,
    CMissingReturnValue = 1009,
    CPropertyNotWritable = 1010,
    CInvalidIndexAssignment = 1011,
    CNotCallable = 1012,
    CInvalidOperands = 1013,
    CDuplicateName = 1014,
    CTemplateArgumentMismatch = 1015,
    CInvalidThis = 1016,
    CBreakOutsideLoop = 1017,
    CContinueOutsideLoop = 1018,
    CModuleNotReady = 1019,

    // P: messages relayed from the frontend
    PMalformedAst = 2001,

    // I: file and format errors from the driver
    IFileNotFound = 3001,
    IInvalidFormat = 3002,

    // G: generic/internal
    GInternal = 4001,
    GInfo = 4002,
}

impl MessageCode {
    /// Prefix letter identifying the producing stage.
    pub fn prefix(&self) -> char {
        match *self as u32 {
            1000..=1999 => 'C',
            2000..=2999 => 'P',
            3000..=3999 => 'I',
            _ => 'G',
        }
    }

    /// Formatted code, e.g. `C1002`.
    pub fn code(&self) -> String {
        format!("{}{}", self.prefix(), *self as u32)
    }
}

/// One collected diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub code: MessageCode,
    pub kind: LogKind,
    pub range: SrcRef,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            LogKind::Info => "info",
            LogKind::Warning => "warning",
            LogKind::Error => "error",
        };
        write!(
            f,
            "{} {} at {}: {}",
            kind,
            self.code.code(),
            self.range,
            self.message
        )
    }
}

/// Collector for pipeline diagnostics.
///
/// Errors are counted separately so stages can ask "did anything fail" without
/// walking the list.
#[derive(Debug, Default)]
pub struct CompileLog {
    entries: Vec<LogEntry>,
    error_count: usize,
}

impl CompileLog {
    pub fn new() -> Self {
        CompileLog::default()
    }

    pub fn submit(&mut self, kind: LogKind, code: MessageCode, range: SrcRef, message: String) {
        if kind == LogKind::Error {
            self.error_count += 1;
        }
        self.entries.push(LogEntry {
            code,
            kind,
            range,
            message,
        });
    }

    pub fn info(&mut self, code: MessageCode, range: SrcRef, message: impl Into<String>) {
        self.submit(LogKind::Info, code, range, message.into());
    }

    pub fn warn(&mut self, code: MessageCode, range: SrcRef, message: impl Into<String>) {
        self.submit(LogKind::Warning, code, range, message.into());
    }

    pub fn err(&mut self, code: MessageCode, range: SrcRef, message: impl Into<String>) {
        self.submit(LogKind::Error, code, range, message.into());
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }
}
