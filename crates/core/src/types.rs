//! Data types and the interning registry.
//!
//! Types are owned by the [`TypeRegistry`] arena and referenced by
//! [`TypeId`] everywhere else. Fully-qualified names are unique within a
//! registry; interning is total over the name, so asking twice for the same
//! name always yields the same id.

use crate::function::FuncId;
use serde::Serialize;
use std::collections::HashMap;

/// Index into the type arena. Id 0 is reserved and never refers to a real
/// type.
pub type TypeId = u32;

/// Access modifier on types, properties, and functions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Public,
    Private,
    /// Host-only: visible to trusted (native) code but not to scripts.
    Trusted,
}

/// Per-type capability flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeFlags {
    pub is_pod: bool,
    pub is_trivially_constructible: bool,
    pub is_trivially_copyable: bool,
    pub is_trivially_destructible: bool,
    pub is_primitive: bool,
    pub is_floating_point: bool,
    pub is_integral: bool,
    pub is_unsigned: bool,
    pub is_function: bool,
    pub is_template: bool,
    pub is_alias: bool,
    pub is_host: bool,
    pub is_anonymous: bool,
}

/// An inherited base type with its byte offset within the derived object.
#[derive(Debug, Clone, Serialize)]
pub struct TypeBase {
    pub tp: TypeId,
    pub offset: u32,
    pub access: Access,
}

/// Flags on a property.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PropFlags {
    pub is_static: bool,
    pub is_pointer: bool,
    pub can_read: bool,
    pub can_write: bool,
}

/// A named property of a structural type.
#[derive(Debug, Clone, Serialize)]
pub struct TypeProp {
    pub name: String,
    pub tp: TypeId,
    pub offset: u32,
    pub access: Access,
    pub getter: Option<FuncId>,
    pub setter: Option<FuncId>,
    pub flags: PropFlags,
}

/// Why an argument exists in a signature. Everything except `None` is
/// inserted by the compiler rather than written by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplicitArg {
    #[default]
    None,
    FuncPtr,
    RetPtr,
    EctxPtr,
    ThisPtr,
    CaptureDataPtr,
    ModuletypeId,
    Value,
    Pointer,
}

/// One argument of a function-signature type.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SigArg {
    pub tp: TypeId,
    /// Passed by pointer/reference rather than by value.
    pub is_ptr: bool,
    pub implicit: ImplicitArg,
}

impl SigArg {
    pub fn value(tp: TypeId) -> Self {
        SigArg {
            tp,
            is_ptr: false,
            implicit: ImplicitArg::None,
        }
    }

    pub fn pointer(tp: TypeId) -> Self {
        SigArg {
            tp,
            is_ptr: true,
            implicit: ImplicitArg::None,
        }
    }

    pub fn implicit(tp: TypeId, implicit: ImplicitArg) -> Self {
        SigArg {
            tp,
            is_ptr: true,
            implicit,
        }
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit != ImplicitArg::None
    }
}

/// The call shape carried by a function-signature type. The argument list
/// includes the compiler-inserted implicit arguments, in call order, ahead of
/// the user-visible ones.
#[derive(Debug, Clone, Serialize)]
pub struct Signature {
    pub return_type: TypeId,
    /// Large / non-trivially-copyable returns go through an implicit
    /// `ret_ptr` argument instead of a register.
    pub returns_on_stack: bool,
    /// The return value is a pointer into existing storage (e.g. a property
    /// getter returning a reference).
    pub returns_pointer: bool,
    pub args: Vec<SigArg>,
}

impl Signature {
    /// Arguments the caller writes explicitly, skipping implicit ones.
    pub fn explicit_args(&self) -> impl Iterator<Item = &SigArg> {
        self.args.iter().filter(|a| !a.is_implicit())
    }

    pub fn find_implicit(&self, which: ImplicitArg) -> Option<usize> {
        self.args.iter().position(|a| a.implicit == which)
    }
}

/// Template metadata. The declaration AST lives in a compiler-side table
/// keyed by `ast_key`; the registry only needs the parameter names to build
/// instantiated names.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub params: Vec<String>,
    pub ast_key: u32,
}

/// Numeric class used to pick arithmetic opcodes and conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumClass {
    Sint,
    Uint,
    F32,
    F64,
}

/// A data type.
#[derive(Debug, Clone, Serialize)]
pub struct Type {
    pub id: TypeId,
    pub name: String,
    pub fqn: String,
    pub size: u32,
    pub access: Access,
    pub flags: TypeFlags,
    pub bases: Vec<TypeBase>,
    pub props: Vec<TypeProp>,
    pub methods: Vec<FuncId>,
    pub dtor: Option<FuncId>,
    pub sig: Option<Signature>,
    pub template: Option<TemplateInfo>,
    pub alias_of: Option<TypeId>,
}

impl Type {
    /// A bare structural type with nothing attached yet.
    pub fn structure(name: impl Into<String>, fqn: impl Into<String>) -> Self {
        Type {
            id: 0,
            name: name.into(),
            fqn: fqn.into(),
            size: 0,
            access: Access::Public,
            flags: TypeFlags::default(),
            bases: Vec::new(),
            props: Vec::new(),
            methods: Vec::new(),
            dtor: None,
            sig: None,
            template: None,
            alias_of: None,
        }
    }

    pub fn prop(&self, name: &str) -> Option<&TypeProp> {
        self.props.iter().find(|p| p.name == name)
    }

    /// Numeric class for opcode selection. Only meaningful for numeric
    /// primitives; everything else is treated as an unsigned word (pointers).
    pub fn num_class(&self) -> NumClass {
        if self.flags.is_floating_point {
            if self.size == 8 {
                NumClass::F64
            } else {
                NumClass::F32
            }
        } else if self.flags.is_integral && !self.flags.is_unsigned {
            NumClass::Sint
        } else {
            NumClass::Uint
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.flags.is_integral || self.flags.is_floating_point
    }
}

/// The eleven built-in numeric/boolean primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl Primitive {
    pub const ALL: [Primitive; 11] = [
        Primitive::Bool,
        Primitive::I8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::U8,
        Primitive::U16,
        Primitive::U32,
        Primitive::U64,
        Primitive::F32,
        Primitive::F64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            Primitive::Bool | Primitive::I8 | Primitive::U8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
        }
    }

    fn flags(&self) -> TypeFlags {
        let fp = matches!(self, Primitive::F32 | Primitive::F64);
        let unsigned = matches!(
            self,
            Primitive::Bool | Primitive::U8 | Primitive::U16 | Primitive::U32 | Primitive::U64
        );
        TypeFlags {
            is_pod: true,
            is_trivially_constructible: true,
            is_trivially_copyable: true,
            is_trivially_destructible: true,
            is_primitive: true,
            is_floating_point: fp,
            is_integral: !fp,
            is_unsigned: unsigned,
            ..TypeFlags::default()
        }
    }
}

/// Canonical store of every type in a context.
#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<Type>,
    by_fqn: HashMap<String, TypeId>,
    prim: [TypeId; 11],
    void_id: TypeId,
    data_id: TypeId,
    string_id: TypeId,
    error_id: TypeId,
    subtype_id: TypeId,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut reg = TypeRegistry {
            // slot 0 stays unused so id 0 can mean "no type"
            types: vec![Type::structure("", "")],
            by_fqn: HashMap::new(),
            prim: [0; 11],
            void_id: 0,
            data_id: 0,
            string_id: 0,
            error_id: 0,
            subtype_id: 0,
        };

        for (i, p) in Primitive::ALL.iter().enumerate() {
            let mut t = Type::structure(p.name(), p.name());
            t.size = p.size();
            t.flags = p.flags();
            reg.prim[i] = reg.intern(t);
        }

        let mut void = Type::structure("void", "void");
        void.flags.is_primitive = true;
        void.flags.is_pod = true;
        reg.void_id = reg.intern(void);

        // opaque pointer; behaves as an unsigned word
        let mut data = Type::structure("data", "data");
        data.size = 8;
        data.flags = TypeFlags {
            is_pod: true,
            is_trivially_constructible: true,
            is_trivially_copyable: true,
            is_trivially_destructible: true,
            is_primitive: true,
            is_integral: true,
            is_unsigned: true,
            ..TypeFlags::default()
        };
        reg.data_id = reg.intern(data);

        // immutable string handle (pointer into module data or the VM heap)
        let mut string = Type::structure("string", "string");
        string.size = 8;
        string.flags.is_host = true;
        string.flags.is_trivially_copyable = true;
        string.flags.is_trivially_destructible = true;
        reg.string_id = reg.intern(string);

        // sentinel type carried by values produced from failed lookups;
        // expression lowering treats it as a silent no-op
        let error = Type::structure("$error", "$error");
        reg.error_id = reg.intern(error);

        // template parameter placeholder, resolved at instantiation
        let mut subtype = Type::structure("subtype", "subtype");
        subtype.size = 8;
        reg.subtype_id = reg.intern(subtype);

        reg
    }

    pub fn primitive(&self, p: Primitive) -> TypeId {
        self.prim[Primitive::ALL.iter().position(|q| *q == p).unwrap()]
    }

    pub fn void(&self) -> TypeId {
        self.void_id
    }

    pub fn data(&self) -> TypeId {
        self.data_id
    }

    pub fn string(&self) -> TypeId {
        self.string_id
    }

    pub fn error(&self) -> TypeId {
        self.error_id
    }

    pub fn subtype(&self) -> TypeId {
        self.subtype_id
    }

    /// Number of live types, reserved slot included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.len() <= 1
    }

    pub fn get(&self, id: TypeId) -> Option<&Type> {
        if id == 0 {
            return None;
        }
        self.types.get(id as usize)
    }

    pub fn get_mut(&mut self, id: TypeId) -> Option<&mut Type> {
        if id == 0 {
            return None;
        }
        self.types.get_mut(id as usize)
    }

    pub fn lookup(&self, fqn: &str) -> Option<TypeId> {
        self.by_fqn.get(fqn).copied()
    }

    /// Intern a type by fully-qualified name. If a type with the same name
    /// already exists the existing id is returned and `t` is discarded, which
    /// makes interning idempotent.
    pub fn intern(&mut self, mut t: Type) -> TypeId {
        if let Some(&id) = self.by_fqn.get(&t.fqn) {
            return id;
        }
        let id = self.types.len() as TypeId;
        t.id = id;
        self.by_fqn.insert(t.fqn.clone(), id);
        self.types.push(t);
        id
    }

    /// Intern a function-signature type. The name encodes the return type and
    /// the full argument list (implicit tags included), so distinct call
    /// shapes never collide.
    pub fn signature_type(&mut self, sig: Signature) -> TypeId {
        let fqn = self.signature_fqn(&sig);
        if let Some(&id) = self.by_fqn.get(&fqn) {
            return id;
        }
        let mut t = Type::structure(fqn.clone(), fqn);
        // a callable value is a raw_callback struct: one pointer
        t.size = 8;
        t.flags.is_function = true;
        t.flags.is_trivially_copyable = true;
        t.sig = Some(sig);
        self.intern(t)
    }

    /// Intern an alias for an existing type.
    pub fn alias(&mut self, name: &str, fqn: &str, target: TypeId) -> TypeId {
        if let Some(&id) = self.by_fqn.get(fqn) {
            return id;
        }
        let src = self
            .get(target)
            .cloned()
            .unwrap_or_else(|| Type::structure(name, fqn));
        let mut t = src;
        t.name = name.to_string();
        t.fqn = fqn.to_string();
        t.flags.is_alias = true;
        t.alias_of = Some(target);
        t.template = None;
        self.intern(t)
    }

    /// Follow alias links to the canonical type id.
    pub fn resolve_alias(&self, id: TypeId) -> TypeId {
        let mut cur = id;
        while let Some(t) = self.get(cur) {
            match t.alias_of {
                Some(next) if next != cur => cur = next,
                _ => break,
            }
        }
        cur
    }

    fn signature_fqn(&self, sig: &Signature) -> String {
        let ret = self
            .get(sig.return_type)
            .map(|t| t.fqn.clone())
            .unwrap_or_else(|| "void".into());
        let args: Vec<String> = sig
            .args
            .iter()
            .map(|a| {
                let tn = self
                    .get(a.tp)
                    .map(|t| t.fqn.clone())
                    .unwrap_or_else(|| "?".into());
                let tag = match a.implicit {
                    ImplicitArg::None => "",
                    ImplicitArg::FuncPtr => "$fn:",
                    ImplicitArg::RetPtr => "$ret:",
                    ImplicitArg::EctxPtr => "$ectx:",
                    ImplicitArg::ThisPtr => "$this:",
                    ImplicitArg::CaptureDataPtr => "$ctx:",
                    ImplicitArg::ModuletypeId => "$mtid:",
                    ImplicitArg::Value => "$val:",
                    ImplicitArg::Pointer => "$ptr:",
                };
                let star = if a.is_ptr && a.implicit == ImplicitArg::None {
                    "*"
                } else {
                    ""
                };
                format!("{tag}{tn}{star}")
            })
            .collect();
        format!("{}({})", ret, args.join(","))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Type> {
        self.types.iter().skip(1)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        TypeRegistry::new()
    }
}
