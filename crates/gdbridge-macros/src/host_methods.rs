//! Implementation of the `#[host_methods]` attribute.
//!
//! The annotated impl block is kept as written, minus the member attributes.
//! A second impl block carries one `extern "C"` entry point per member and
//! the `HostMethods` impl that hands them to the class builder.

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    FnArg, ForeignItemFn, Ident, ImplItem, ImplItemFn, ItemImpl, LitStr, Pat, ReturnType, Signature,
    Type, parse_macro_input,
};

use crate::attrs::{MemberAttrs, MemberKind, PropertyAttrs, is_member_attr};

pub fn host_methods_impl(args: TokenStream, input: TokenStream) -> TokenStream {
    let args = TokenStream2::from(args);
    let input = parse_macro_input!(input as ItemImpl);

    match host_methods_inner(args, input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// How a member borrows the instance.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Shared,
    Exclusive,
}

struct Argument {
    name: String,
    ty: Type,
}

/// A `#[method]` or `#[virtual_method]`.
struct Callable {
    ident: Ident,
    registered: String,
    access: Access,
    arguments: Vec<Argument>,
    output: Option<Type>,
}

struct SignalDecl {
    registered: String,
    arguments: Vec<Argument>,
}

fn host_methods_inner(args: TokenStream2, mut input: ItemImpl) -> syn::Result<TokenStream2> {
    if !args.is_empty() {
        return Err(syn::Error::new_spanned(args, "#[host_methods] takes no arguments"));
    }
    if let Some((_, path, _)) = &input.trait_ {
        return Err(syn::Error::new_spanned(path, "#[host_methods] goes on an inherent impl block"));
    }
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&input.generics, "host classes cannot be generic"));
    }

    let mut properties = Vec::new();
    let mut kept_attrs = Vec::new();
    for attr in std::mem::take(&mut input.attrs) {
        if attr.path().is_ident("property") {
            properties.push(PropertyAttrs::from_attr(&attr)?);
        } else {
            kept_attrs.push(attr);
        }
    }
    input.attrs = kept_attrs;

    let mut methods = Vec::new();
    let mut virtuals = Vec::new();
    let mut signals = Vec::new();
    let mut items = Vec::with_capacity(input.items.len());

    for item in std::mem::take(&mut input.items) {
        match item {
            ImplItem::Fn(mut function) => {
                match MemberAttrs::from_attrs(&function.attrs)? {
                    Some(member) if member.kind == MemberKind::Signal => {
                        return Err(syn::Error::new_spanned(
                            &function.sig,
                            "signals are declared without a body: `fn name(arg: Type);`",
                        ));
                    }
                    Some(member) => {
                        let callable = parse_callable(&function, member.name)?;
                        if member.kind == MemberKind::Virtual {
                            virtuals.push(callable);
                        } else {
                            methods.push(callable);
                        }
                        function.attrs.retain(|attr| !is_member_attr(attr));
                    }
                    None => {}
                }
                items.push(ImplItem::Fn(function));
            }
            ImplItem::Verbatim(tokens) => match syn::parse2::<ForeignItemFn>(tokens.clone()) {
                Ok(declaration) => match MemberAttrs::from_attrs(&declaration.attrs)? {
                    Some(member) if member.kind == MemberKind::Signal => {
                        let signal = parse_signal(&declaration.sig, member.name)?;
                        items.push(ImplItem::Verbatim(generate_emitter(&declaration, &signal)));
                        signals.push(signal);
                    }
                    _ => {
                        return Err(syn::Error::new_spanned(
                            &declaration.sig,
                            "a function without a body must be a #[signal]",
                        ));
                    }
                },
                Err(_) => items.push(ImplItem::Verbatim(tokens)),
            },
            other => items.push(other),
        }
    }
    input.items = items;

    let self_ty = &input.self_ty;
    let entry_points = methods
        .iter()
        .map(generate_method_entries)
        .chain(virtuals.iter().map(generate_virtual_entry));
    let registration = generate_registration(self_ty, &methods, &virtuals, &signals, &properties)?;

    Ok(quote! {
        #input

        impl #self_ty {
            #(#entry_points)*
        }

        #registration
    })
}

fn parse_arguments<'a>(inputs: impl Iterator<Item = &'a FnArg>) -> syn::Result<Vec<Argument>> {
    inputs
        .filter_map(|input| match input {
            FnArg::Typed(typed) => Some(typed),
            FnArg::Receiver(_) => None,
        })
        .enumerate()
        .map(|(index, typed)| {
            if matches!(&*typed.ty, Type::Reference(_)) {
                return Err(syn::Error::new_spanned(
                    &typed.ty,
                    "host method arguments are owned values; borrowed arguments cannot outlive the call",
                ));
            }
            let name = match &*typed.pat {
                Pat::Ident(ident) => ident.ident.to_string().trim_start_matches('_').to_string(),
                _ => format!("arg{index}"),
            };
            Ok(Argument {
                name,
                ty: (*typed.ty).clone(),
            })
        })
        .collect()
}

fn parse_callable(function: &ImplItemFn, name: Option<String>) -> syn::Result<Callable> {
    let sig = &function.sig;
    let access = match sig.receiver() {
        Some(receiver) if receiver.reference.is_some() => {
            if receiver.mutability.is_some() {
                Access::Exclusive
            } else {
                Access::Shared
            }
        }
        Some(receiver) => {
            return Err(syn::Error::new_spanned(
                receiver,
                "host methods borrow the instance: take `&self` or `&mut self`",
            ));
        }
        None => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "host methods need a `&self` or `&mut self` receiver",
            ));
        }
    };
    if sig.asyncness.is_some() || !sig.generics.params.is_empty() || sig.variadic.is_some() {
        return Err(syn::Error::new_spanned(
            sig,
            "host methods cannot be async, generic or variadic",
        ));
    }

    let output = match &sig.output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) => Some((**ty).clone()),
    };

    Ok(Callable {
        ident: sig.ident.clone(),
        registered: name.unwrap_or_else(|| sig.ident.to_string()),
        access,
        arguments: parse_arguments(sig.inputs.iter())?,
        output,
    })
}

fn parse_signal(sig: &Signature, name: Option<String>) -> syn::Result<SignalDecl> {
    if sig.receiver().is_some() {
        return Err(syn::Error::new_spanned(sig, "signals take no receiver"));
    }
    if !matches!(sig.output, ReturnType::Default) {
        return Err(syn::Error::new_spanned(&sig.output, "signals return nothing"));
    }
    for input in &sig.inputs {
        if let FnArg::Typed(typed) = input
            && !matches!(&*typed.pat, Pat::Ident(_))
        {
            return Err(syn::Error::new_spanned(&typed.pat, "signal arguments need plain names"));
        }
    }
    Ok(SignalDecl {
        registered: name.unwrap_or_else(|| sig.ident.to_string()),
        arguments: parse_arguments(sig.inputs.iter())?,
    })
}

fn return_type(output: &Option<Type>) -> TokenStream2 {
    match output {
        Some(ty) => quote! { #ty },
        None => quote! { () },
    }
}

/// The body of a pointer-call entry: decode every argument in place, run.
fn ptrcall_body(callable: &Callable) -> TokenStream2 {
    let ident = &callable.ident;
    let registered = &callable.registered;
    let ret = return_type(&callable.output);
    let trampoline = match callable.access {
        Access::Exclusive => quote! { ptr_trampoline_mut },
        Access::Shared => quote! { ptr_trampoline_ref },
    };
    let decode = callable.arguments.iter().enumerate().map(|(index, argument)| {
        let local = format_ident!("__arg{}", index);
        let ty = &argument.ty;
        quote! { let #local = ::gdbridge::__private::shim::ptr_arg::<#ty>(args, #index); }
    });
    let locals = (0..callable.arguments.len()).map(|index| format_ident!("__arg{}", index));

    quote! {
        let _ = args;
        unsafe {
            ::gdbridge::__private::shim::#trampoline::<Self, #ret>(#registered, instance, ret, |this| {
                #(#decode)*
                this.#ident(#(#locals),*)
            })
        }
    }
}

fn generate_method_entries(callable: &Callable) -> TokenStream2 {
    let ptrcall = format_ident!("__gdbridge_ptrcall_{}", callable.ident);
    let varcall = format_ident!("__gdbridge_varcall_{}", callable.ident);
    let ident = &callable.ident;
    let registered = &callable.registered;
    let ret = return_type(&callable.output);
    let arity = callable.arguments.len();
    let trampoline = match callable.access {
        Access::Exclusive => quote! { varcall_trampoline_mut },
        Access::Shared => quote! { varcall_trampoline_ref },
    };
    let decode = callable.arguments.iter().enumerate().map(|(index, argument)| {
        let local = format_ident!("__arg{}", index);
        let ty = &argument.ty;
        quote! { let #local = ::gdbridge::__private::shim::decode_arg::<#ty>(args, #index)?; }
    });
    let locals = (0..arity).map(|index| format_ident!("__arg{}", index));
    let ptrcall_body = ptrcall_body(callable);

    quote! {
        #[doc(hidden)]
        unsafe extern "C" fn #ptrcall(
            _method_userdata: *mut ::core::ffi::c_void,
            instance: ::gdbridge::__private::sys::ClassInstancePtr,
            args: *const ::gdbridge::__private::sys::ConstTypePtr,
            ret: ::gdbridge::__private::sys::TypePtr,
        ) {
            #ptrcall_body
        }

        #[doc(hidden)]
        #[allow(clippy::let_unit_value)]
        unsafe extern "C" fn #varcall(
            _method_userdata: *mut ::core::ffi::c_void,
            instance: ::gdbridge::__private::sys::ClassInstancePtr,
            args: *const ::gdbridge::__private::sys::ConstVariantPtr,
            count: ::gdbridge::__private::sys::Int,
            ret: ::gdbridge::__private::sys::VariantPtr,
            error: *mut ::gdbridge::__private::sys::CallErrorRaw,
        ) {
            unsafe {
                ::gdbridge::__private::shim::#trampoline::<Self>(
                    #registered,
                    instance,
                    args,
                    count,
                    ret,
                    error,
                    #arity,
                    |this, args| {
                        let _ = args;
                        #(#decode)*
                        let result: #ret = this.#ident(#(#locals),*);
                        ::core::result::Result::Ok(::gdbridge::__private::Variant::from(&result))
                    },
                )
            }
        }
    }
}

fn generate_virtual_entry(callable: &Callable) -> TokenStream2 {
    let entry = format_ident!("__gdbridge_virtual_{}", callable.ident);
    let body = ptrcall_body(callable);

    quote! {
        #[doc(hidden)]
        unsafe extern "C" fn #entry(
            instance: ::gdbridge::__private::sys::ClassInstancePtr,
            args: *const ::gdbridge::__private::sys::ConstTypePtr,
            ret: ::gdbridge::__private::sys::TypePtr,
        ) {
            #body
        }
    }
}

/// Replaces a bodiless `#[signal] fn spun(turns: i64);` with
/// `fn spun(object: &impl ObjectRef<Object>, turns: i64) -> Result<(), CallError>`, emitting the
/// signal on `object`.
fn generate_emitter(declaration: &ForeignItemFn, signal: &SignalDecl) -> TokenStream2 {
    let attrs = declaration.attrs.iter().filter(|attr| !is_member_attr(attr));
    let vis = &declaration.vis;
    let ident = &declaration.sig.ident;
    let registered = &signal.registered;
    let params = declaration.sig.inputs.iter();
    let values = declaration.sig.inputs.iter().filter_map(|input| match input {
        FnArg::Typed(typed) => match &*typed.pat {
            Pat::Ident(ident) => {
                let ident = &ident.ident;
                Some(quote! { &::gdbridge::__private::Variant::from(&#ident) })
            }
            _ => None,
        },
        FnArg::Receiver(_) => None,
    });

    quote! {
        #(#attrs)*
        #vis fn #ident<EmitTarget>(
            object: &EmitTarget,
            #(#params),*
        ) -> ::core::result::Result<(), ::gdbridge::__private::CallError>
        where
            EmitTarget: ::gdbridge::__private::ObjectRef<::gdbridge::__private::Object> + ?Sized,
        {
            ::gdbridge::__private::ObjectExt::emit_signal(object, #registered, &[#(#values),*])
        }
    }
}

fn argument_infos(arguments: &[Argument]) -> impl Iterator<Item = TokenStream2> + '_ {
    arguments.iter().map(|argument| {
        let name = &argument.name;
        let ty = &argument.ty;
        quote! { .argument(::gdbridge::__private::ArgumentInfo::of::<#ty>(#name)) }
    })
}

fn generate_registration(
    self_ty: &Type,
    methods: &[Callable],
    virtuals: &[Callable],
    signals: &[SignalDecl],
    properties: &[PropertyAttrs],
) -> syn::Result<TokenStream2> {
    let virtual_calls = virtuals.iter().map(|callable| {
        let registered = &callable.registered;
        let entry = format_ident!("__gdbridge_virtual_{}", callable.ident);
        quote! { builder.virtual_method(#registered, Self::#entry); }
    });

    let method_calls = methods.iter().map(|callable| {
        let registered = &callable.registered;
        let ptrcall = format_ident!("__gdbridge_ptrcall_{}", callable.ident);
        let varcall = format_ident!("__gdbridge_varcall_{}", callable.ident);
        let arguments = argument_infos(&callable.arguments);
        let returns = callable.output.as_ref().map(|ty| quote! { .returns::<#ty>() });
        let constant = (callable.access == Access::Shared).then(|| quote! { .constant() });
        quote! {
            builder.method(
                ::gdbridge::__private::MethodDescriptor::new(#registered, Self::#varcall, Self::#ptrcall)
                    #(#arguments)*
                    #returns
                    #constant
            );
        }
    });

    let signal_calls = signals.iter().map(|signal| {
        let registered = &signal.registered;
        let arguments = argument_infos(&signal.arguments);
        quote! {
            builder.signal(::gdbridge::__private::SignalDescriptor::new(#registered) #(#arguments)*);
        }
    });

    let property_calls = properties
        .iter()
        .map(|property| generate_property(property, methods))
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl ::gdbridge::__private::HostMethods for #self_ty {
            fn register_methods(builder: &mut ::gdbridge::__private::ClassBuilder<Self>) {
                let _ = &builder;
                #(#virtual_calls)*
                #(#method_calls)*
                #(#property_calls)*
                #(#signal_calls)*
            }
        }
    })
}

/// A property's type comes from its getter's return, else its setter's
/// single argument.
fn generate_property(property: &PropertyAttrs, methods: &[Callable]) -> syn::Result<TokenStream2> {
    let find = |ident: &Ident| {
        methods.iter().find(|callable| callable.ident == *ident).ok_or_else(|| {
            syn::Error::new_spanned(ident, format!("`{ident}` is not a #[method] of this block"))
        })
    };
    let getter = property.getter.as_ref().map(find).transpose()?;
    let setter = property.setter.as_ref().map(find).transpose()?;

    let ty = match (getter, setter) {
        (Some(getter), _) => match (&getter.output, getter.arguments.is_empty()) {
            (Some(ty), true) => ty.clone(),
            _ => {
                return Err(syn::Error::new_spanned(
                    &getter.ident,
                    "a property getter takes no arguments and returns the value",
                ));
            }
        },
        (None, Some(setter)) => match setter.arguments.as_slice() {
            [argument] => argument.ty.clone(),
            _ => {
                return Err(syn::Error::new_spanned(
                    &setter.ident,
                    "a property setter takes exactly the new value",
                ));
            }
        },
        (None, None) => return Err(syn::Error::new(Span::call_site(), "property without accessors")),
    };

    let name = &property.name;
    let getter = getter.map(|callable| {
        let registered = LitStr::new(&callable.registered, callable.ident.span());
        quote! { .getter(#registered) }
    });
    let setter = setter.map(|callable| {
        let registered = LitStr::new(&callable.registered, callable.ident.span());
        quote! { .setter(#registered) }
    });
    let hint = property.hint.as_ref().map(|(hint, text)| {
        quote! { .hint(::gdbridge::__private::PropertyHint::#hint, #text) }
    });

    Ok(quote! {
        builder.property(
            ::gdbridge::__private::PropertyDescriptor::of::<#ty>(#name) #getter #setter #hint
        );
    })
}
