//! The built-in host library.
//!
//! Every context gets these four symbols: `print`, `alloc`, `free`, and the
//! `$makefunc` closure helper. They are ordinary host descriptors; binding
//! manifests can add more on top.

use tsn_core::ffi::{
    FnDescriptor, HostPort, FUNCTION_POINTER_DATA_OFFSET, FUNCTION_POINTER_ID_OFFSET,
    FUNCTION_POINTER_SIZE,
};
use tsn_core::{FfiKind, FfiParam, HostRegistry};

const MAX_STRING: u64 = 64 * 1024;

fn read_cstring(port: &dyn HostPort, mut addr: u64) -> Result<String, String> {
    let mut bytes = Vec::new();
    let mut buf = [0u8; 1];
    while (bytes.len() as u64) < MAX_STRING {
        port.read(addr, &mut buf)?;
        if buf[0] == 0 {
            break;
        }
        bytes.push(buf[0]);
        addr += 1;
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn print_shim(port: &mut dyn HostPort, args: &[u64]) -> Result<u64, String> {
    let addr = *args.first().ok_or("print: missing argument")?;
    let text = read_cstring(port, addr)?;
    port.emit(&text);
    Ok(0)
}

fn alloc_shim(port: &mut dyn HostPort, args: &[u64]) -> Result<u64, String> {
    let size = *args.first().ok_or("alloc: missing argument")?;
    port.alloc(size)
}

fn free_shim(port: &mut dyn HostPort, args: &[u64]) -> Result<u64, String> {
    let addr = *args.first().ok_or("free: missing argument")?;
    port.free(addr)?;
    Ok(0)
}

/// Allocate a `function_pointer { u32 id; u64 data }` for a closure and
/// return its address. The caller stores it into a `raw_callback` slot.
fn makefunc_shim(port: &mut dyn HostPort, args: &[u64]) -> Result<u64, String> {
    if args.len() < 3 {
        return Err("$makefunc: expected (function_id, data, data_size)".into());
    }
    let (fn_id, data) = (args[0], args[1]);
    let fp = port.alloc(FUNCTION_POINTER_SIZE)?;
    port.write(fp + FUNCTION_POINTER_ID_OFFSET, &(fn_id as u32).to_le_bytes())?;
    port.write(fp + FUNCTION_POINTER_DATA_OFFSET, &data.to_le_bytes())?;
    Ok(fp)
}

/// Register the built-in descriptors.
pub fn install_builtin_descriptors(host: &mut HostRegistry) {
    let ptr = FfiParam {
        kind: FfiKind::Ptr,
        is_ptr: false,
    };
    let uint = FfiParam {
        kind: FfiKind::Uint,
        is_ptr: false,
    };

    host.register(FnDescriptor {
        symbol: "print".into(),
        ret: FfiKind::Void,
        params: vec![ptr],
        shim: print_shim,
    });
    host.register(FnDescriptor {
        symbol: "alloc".into(),
        ret: FfiKind::Ptr,
        params: vec![uint],
        shim: alloc_shim,
    });
    host.register(FnDescriptor {
        symbol: "free".into(),
        ret: FfiKind::Void,
        params: vec![ptr],
        shim: free_shim,
    });
    host.register(FnDescriptor {
        symbol: "$makefunc".into(),
        ret: FfiKind::Ptr,
        params: vec![uint, ptr, uint],
        shim: makefunc_shim,
    });
}
