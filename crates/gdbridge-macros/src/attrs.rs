//! Attribute parsing for the gdbridge macros.

use syn::{Attribute, Ident, LitStr, Path};

/// How `HostClass::init` is produced.
#[derive(Debug, Default)]
pub enum InitAttr {
    /// No `init`: the user implements nothing and gets a compile error.
    #[default]
    Missing,
    /// `init`: base field from the argument, every other field defaulted.
    Generated,
    /// `init = path`: forwards to a user function.
    Custom(Path),
}

/// Parsed `#[class(...)]` attributes on a host class.
#[derive(Debug, Default)]
pub struct ClassAttrs {
    /// Engine class the host class is built on.
    pub base: Option<Path>,
    /// Registered host class this one embeds.
    pub extends: Option<Path>,
    /// Override of the registered class name.
    pub name: Option<String>,
    pub init: InitAttr,
    /// Skip the empty `HostHooks` impl.
    pub manual_hooks: bool,
}

impl ClassAttrs {
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut result = Self::default();

        for attr in attrs {
            if !attr.path().is_ident("class") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("base") {
                    result.base = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("extends") {
                    result.extends = Some(meta.value()?.parse()?);
                } else if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    result.name = Some(value.value());
                } else if meta.path.is_ident("init") {
                    result.init = if meta.input.peek(syn::Token![=]) {
                        InitAttr::Custom(meta.value()?.parse()?)
                    } else {
                        InitAttr::Generated
                    };
                } else if meta.path.is_ident("manual_hooks") {
                    result.manual_hooks = true;
                } else {
                    return Err(meta.error(format!(
                        "unknown class attribute: {}",
                        meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                    )));
                }
                Ok(())
            })?;
        }

        Ok(result)
    }
}

/// Kind of an item inside a `#[host_methods]` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Virtual,
    Signal,
}

/// Parsed `#[method]`, `#[virtual_method]` or `#[signal]` on an item.
#[derive(Debug)]
pub struct MemberAttrs {
    pub kind: MemberKind,
    /// Registered name, when it differs from the Rust name.
    pub name: Option<String>,
}

impl MemberAttrs {
    /// Finds the one member attribute on an item, `None` for plain items.
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Option<Self>> {
        let mut result: Option<Self> = None;

        for attr in attrs {
            let kind = if attr.path().is_ident("method") {
                MemberKind::Method
            } else if attr.path().is_ident("virtual_method") {
                MemberKind::Virtual
            } else if attr.path().is_ident("signal") {
                MemberKind::Signal
            } else {
                continue;
            };
            if result.is_some() {
                return Err(syn::Error::new_spanned(
                    attr,
                    "an item takes at most one of #[method], #[virtual_method] and #[signal]",
                ));
            }

            let mut member = Self { kind, name: None };
            if !matches!(attr.meta, syn::Meta::Path(_)) {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("name") {
                        let value: LitStr = meta.value()?.parse()?;
                        member.name = Some(value.value());
                        Ok(())
                    } else {
                        Err(meta.error(format!(
                            "unknown member attribute: {}",
                            meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                        )))
                    }
                })?;
            }
            result = Some(member);
        }

        Ok(result)
    }
}

/// Parsed `#[property(...)]` on a `#[host_methods]` block.
#[derive(Debug)]
pub struct PropertyAttrs {
    pub name: LitStr,
    pub getter: Option<Ident>,
    pub setter: Option<Ident>,
    /// `hint = Range, hint_string = "0,10"`.
    pub hint: Option<(Ident, LitStr)>,
}

impl PropertyAttrs {
    pub fn from_attr(attr: &Attribute) -> syn::Result<Self> {
        let mut name = None;
        let mut getter = None;
        let mut setter = None;
        let mut hint = None;
        let mut hint_string = None;

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = Some(meta.value()?.parse::<LitStr>()?);
            } else if meta.path.is_ident("get") {
                getter = Some(meta.value()?.parse::<Ident>()?);
            } else if meta.path.is_ident("set") {
                setter = Some(meta.value()?.parse::<Ident>()?);
            } else if meta.path.is_ident("hint") {
                hint = Some(meta.value()?.parse::<Ident>()?);
            } else if meta.path.is_ident("hint_string") {
                hint_string = Some(meta.value()?.parse::<LitStr>()?);
            } else {
                return Err(meta.error(format!(
                    "unknown property attribute: {}",
                    meta.path.get_ident().map(|i| i.to_string()).unwrap_or_default()
                )));
            }
            Ok(())
        })?;

        let Some(name) = name else {
            return Err(syn::Error::new_spanned(attr, "property requires `name = \"...\"`"));
        };
        if getter.is_none() && setter.is_none() {
            return Err(syn::Error::new_spanned(attr, "property requires `get`, `set` or both"));
        }
        let hint = match (hint, hint_string) {
            (Some(hint), Some(text)) => Some((hint, text)),
            (Some(hint), None) => Some((hint, LitStr::new("", proc_macro2::Span::call_site()))),
            (None, Some(text)) => {
                return Err(syn::Error::new_spanned(text, "`hint_string` requires `hint`"));
            }
            (None, None) => None,
        };

        Ok(Self {
            name,
            getter,
            setter,
            hint,
        })
    }
}

/// Whether `attr` is consumed by `#[host_methods]` and must not reach rustc.
pub fn is_member_attr(attr: &Attribute) -> bool {
    ["method", "virtual_method", "signal"]
        .iter()
        .any(|name| attr.path().is_ident(name))
}
