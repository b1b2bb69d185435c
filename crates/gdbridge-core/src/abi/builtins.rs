use gdbridge_sys::interface::symbols;
use gdbridge_sys::*;

use super::lookup;
use crate::error::InitError;

/// Constructor index of the default constructor for every builtin type.
pub const CTOR_DEFAULT: i32 = 0;
/// Constructor index of the copy constructor for every builtin type.
pub const CTOR_COPY: i32 = 1;

/// Lifecycle functions of one variant type.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLifecycle {
    pub construct_default: Option<PtrConstructor>,
    pub construct_copy: Option<PtrConstructor>,
    pub destroy: Option<PtrDestructor>,
    pub from_type: Option<VariantFromTypeConstructorFn>,
    pub to_type: Option<TypeFromVariantConstructorFn>,
}

/// Constructors beyond default/copy that the runtime itself needs.
#[derive(Debug, Clone, Copy)]
pub struct ConversionConstructors {
    /// `String(StringName)`
    pub string_from_name: PtrConstructor,
    /// `String(NodePath)`
    pub string_from_path: PtrConstructor,
    /// `StringName(String)`
    pub name_from_string: PtrConstructor,
    /// `NodePath(String)`
    pub path_from_string: PtrConstructor,
    /// `Callable(Object, StringName)`
    pub callable_from_method: PtrConstructor,
    /// `Signal(Object, StringName)`
    pub signal_from_name: PtrConstructor,
}

/// Element accessors of one packed array type.
#[derive(Debug, Clone, Copy)]
pub struct PackedIndex {
    pub index: PackedArrayOperatorIndexFn,
    pub index_const: PackedArrayOperatorIndexConstFn,
}

pub(super) unsafe fn load_all(
    get_constructor: VariantGetPtrConstructorFn,
    get_destructor: VariantGetPtrDestructorFn,
    get_from_type: GetVariantFromTypeConstructorFn,
    get_to_type: GetVariantToTypeConstructorFn,
) -> Result<[BuiltinLifecycle; VariantType::COUNT], InitError> {
    let mut table = [BuiltinLifecycle::default(); VariantType::COUNT];

    // Nil has no representation and Object is handled by pointer.
    for ty in VariantType::ALL.into_iter().skip(1) {
        let raw = ty.as_raw();
        let entry = &mut table[raw as usize];

        entry.from_type = unsafe { get_from_type(raw) };
        entry.to_type = unsafe { get_to_type(raw) };
        if entry.from_type.is_none() {
            return Err(InitError::MissingBuiltin {
                ty,
                what: "from-type variant constructor",
            });
        }
        if entry.to_type.is_none() {
            return Err(InitError::MissingBuiltin {
                ty,
                what: "to-type variant constructor",
            });
        }

        if ty == VariantType::Object {
            continue;
        }

        entry.construct_default = unsafe { get_constructor(raw, CTOR_DEFAULT) };
        entry.construct_copy = unsafe { get_constructor(raw, CTOR_COPY) };
        entry.destroy = unsafe { get_destructor(raw) };

        if ty.is_heap_backed() {
            if entry.destroy.is_none() {
                return Err(InitError::MissingBuiltin {
                    ty,
                    what: "destructor",
                });
            }
            if entry.construct_copy.is_none() {
                return Err(InitError::MissingBuiltin {
                    ty,
                    what: "copy constructor",
                });
            }
        }
    }

    Ok(table)
}

pub(super) unsafe fn load_packed_index(
    resolver: GetProcAddressFn,
) -> Result<[PackedIndex; 10], InitError> {
    let mut resolved = Vec::with_capacity(symbols::PACKED_ELEMENT_STEMS.len());
    for stem in symbols::PACKED_ELEMENT_STEMS {
        let name = symbols::packed_array_index(stem, false);
        let Some(index) = (unsafe { lookup(resolver, &name) }) else {
            return Err(InitError::MissingSymbol(name));
        };
        let name = symbols::packed_array_index(stem, true);
        let Some(index_const) = (unsafe { lookup(resolver, &name) }) else {
            return Err(InitError::MissingSymbol(name));
        };
        resolved.push(unsafe {
            PackedIndex {
                index: std::mem::transmute::<unsafe extern "C" fn(), PackedArrayOperatorIndexFn>(
                    index,
                ),
                index_const: std::mem::transmute::<
                    unsafe extern "C" fn(),
                    PackedArrayOperatorIndexConstFn,
                >(index_const),
            }
        });
    }

    resolved
        .try_into()
        .map_err(|_| InitError::MissingSymbol("packed array accessors".to_string()))
}

pub(super) unsafe fn load_conversions(
    get_constructor: VariantGetPtrConstructorFn,
) -> Result<ConversionConstructors, InitError> {
    let get = |ty: VariantType, index: i32, what: &'static str| {
        unsafe { get_constructor(ty.as_raw(), index) }.ok_or(InitError::MissingBuiltin { ty, what })
    };

    Ok(ConversionConstructors {
        string_from_name: get(VariantType::String, 2, "StringName constructor")?,
        string_from_path: get(VariantType::String, 3, "NodePath constructor")?,
        name_from_string: get(VariantType::StringName, 2, "String constructor")?,
        path_from_string: get(VariantType::NodePath, 2, "String constructor")?,
        callable_from_method: get(VariantType::Callable, 2, "object-method constructor")?,
        signal_from_name: get(VariantType::Signal, 2, "object-name constructor")?,
    })
}
