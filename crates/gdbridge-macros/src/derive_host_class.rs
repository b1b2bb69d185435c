//! Implementation of `#[derive(HostClass)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, Type, parse_macro_input};

use crate::attrs::{ClassAttrs, InitAttr};

pub fn derive_host_class_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_host_class_inner(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_host_class_inner(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let attrs = ClassAttrs::from_attrs(&input.attrs)?;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "host classes cannot be generic: the engine knows one class per name",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => fields.named.iter().collect::<Vec<_>>(),
            Fields::Unit => Vec::new(),
            Fields::Unnamed(_) => {
                return Err(syn::Error::new_spanned(
                    name,
                    "HostClass requires a struct with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(name, "HostClass can only be derived for structs")),
    };

    let class_name = attrs.name.clone().unwrap_or_else(|| name.to_string());

    let (base_ty, parent_host) = match (&attrs.base, &attrs.extends) {
        (Some(_), Some(extends)) => {
            return Err(syn::Error::new_spanned(
                extends,
                "`extends` takes the engine base from the parent host class; drop `base`",
            ));
        }
        (Some(base), None) => (quote! { #base }, quote! {}),
        (None, Some(parent)) => (
            quote! { <#parent as ::gdbridge::__private::HostClass>::Base },
            quote! {
                const PARENT_HOST: ::core::option::Option<&'static str> =
                    ::core::option::Option::Some(<#parent as ::gdbridge::__private::HostClass>::CLASS_NAME);
            },
        ),
        (None, None) => {
            return Err(syn::Error::new_spanned(
                name,
                "missing #[class(base = EngineClass)] or #[class(extends = HostClass)]",
            ));
        }
    };

    let parent_field = match &attrs.extends {
        Some(parent) => Some(find_parent_field(name, &fields, parent)?),
        None => None,
    };

    let init = generate_init(name, &attrs, &fields, parent_field)?;
    let projection = match (parent_field, &attrs.extends) {
        (Some(field), Some(parent)) => generate_projection(field, parent),
        _ => quote! {},
    };

    let hooks = if attrs.manual_hooks {
        quote! {}
    } else {
        quote! {
            impl ::gdbridge::__private::HostHooks for #name {}
        }
    };

    Ok(quote! {
        impl ::gdbridge::__private::HostClass for #name {
            type Base = #base_ty;
            const CLASS_NAME: &'static str = #class_name;
            #parent_host

            #init

            #projection
        }

        #hooks
    })
}

fn has_attr(field: &Field, name: &str) -> bool {
    field.attrs.iter().any(|attr| attr.path().is_ident(name))
}

fn is_base_type(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path.path.segments.last().is_some_and(|segment| segment.ident == "Base"),
        _ => false,
    }
}

fn same_type(ty: &Type, path: &syn::Path) -> bool {
    match ty {
        Type::Path(ty) => match (ty.path.segments.last(), path.segments.last()) {
            (Some(a), Some(b)) => a.ident == b.ident,
            _ => false,
        },
        _ => false,
    }
}

fn find_parent_field<'a>(
    name: &syn::Ident,
    fields: &[&'a Field],
    parent: &syn::Path,
) -> syn::Result<&'a Field> {
    fields
        .iter()
        .copied()
        .find(|field| has_attr(field, "parent"))
        .or_else(|| fields.iter().copied().find(|field| same_type(&field.ty, parent)))
        .ok_or_else(|| {
            syn::Error::new_spanned(name, "`extends` needs a field holding the parent host class (mark it #[parent])")
        })
}

fn generate_init(
    name: &syn::Ident,
    attrs: &ClassAttrs,
    fields: &[&Field],
    parent_field: Option<&Field>,
) -> syn::Result<TokenStream2> {
    let body = match &attrs.init {
        InitAttr::Missing => {
            return Err(syn::Error::new_spanned(
                name,
                "missing #[class(init)] or #[class(init = path)]: the engine needs to build instances",
            ));
        }
        InitAttr::Custom(path) => quote! { #path(base) },
        InitAttr::Generated => {
            let base_field = match parent_field {
                Some(_) => None,
                None => Some(
                    fields
                        .iter()
                        .copied()
                        .find(|field| has_attr(field, "base"))
                        .or_else(|| fields.iter().copied().find(|field| is_base_type(&field.ty)))
                        .ok_or_else(|| {
                            syn::Error::new_spanned(name, "generated init needs a `Base<...>` field (mark it #[base])")
                        })?,
                ),
            };

            let inits = fields.iter().map(|field| {
                let ident = &field.ident;
                let is = |other: Option<&Field>| other.is_some_and(|other| std::ptr::eq(other, *field));
                if is(base_field) {
                    quote! { #ident: base }
                } else if is(parent_field) {
                    let ty = &field.ty;
                    quote! { #ident: <#ty as ::gdbridge::__private::HostClass>::init(base) }
                } else {
                    quote! { #ident: ::core::default::Default::default() }
                }
            });
            quote! { Self { #(#inits,)* } }
        }
    };

    Ok(quote! {
        fn init(base: ::gdbridge::Base<Self::Base>) -> Self {
            #body
        }
    })
}

/// Lets trampolines of the parent class reach the embedded parent.
fn generate_projection(field: &Field, parent: &syn::Path) -> TokenStream2 {
    let ident = &field.ident;
    quote! {
        fn project(&self, target: ::core::any::TypeId) -> ::core::option::Option<&dyn ::core::any::Any> {
            if target == ::core::any::TypeId::of::<Self>() {
                ::core::option::Option::Some(self as &dyn ::core::any::Any)
            } else {
                <#parent as ::gdbridge::__private::HostClass>::project(&self.#ident, target)
            }
        }

        fn project_mut(&mut self, target: ::core::any::TypeId) -> ::core::option::Option<&mut dyn ::core::any::Any> {
            if target == ::core::any::TypeId::of::<Self>() {
                ::core::option::Option::Some(self as &mut dyn ::core::any::Any)
            } else {
                <#parent as ::gdbridge::__private::HostClass>::project_mut(&mut self.#ident, target)
            }
        }
    }
}
