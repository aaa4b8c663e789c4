use hotmod_api::abi::{FUNCTION_PREFIX, SIGNATURE_PREFIX};
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, FnArg, ItemFn, ReturnType, Type};

/// Exports a typed function so the host can look it up by name.
///
/// # Usage
///
/// ```ignore
/// use hotmod_sdk::prelude::*;
///
/// #[export]
/// fn greet(name: String) -> String {
///     format!("hello {}", name)
/// }
/// ```
///
/// Next to the function itself this generates:
///
/// ```ignore
/// #[no_mangle]
/// pub extern "C" fn hotmod_sig_greet() -> RawBuffer { /* encoded Signature */ }
///
/// #[no_mangle]
/// pub unsafe extern "C" fn hotmod_fn_greet(args_ptr: *const u8, args_len: usize) -> RawBuffer {
///     /* decode args, call greet, encode results */
/// }
/// ```
///
/// Parameters must be owned types implementing `FromValue`; the return
/// type must implement `IntoValues`.
#[proc_macro_attribute]
pub fn export(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[export] takes no arguments",
        )
        .to_compile_error()
        .into();
    }

    let function = parse_macro_input!(item as ItemFn);
    match expand_export(&function) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_export(function: &ItemFn) -> syn::Result<TokenStream2> {
    let sig = &function.sig;

    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "exported functions cannot be async",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "exported functions cannot be generic",
        ));
    }

    let mut params = Vec::new();
    for input in &sig.inputs {
        match input {
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(
                    receiver,
                    "exported functions cannot take self",
                ));
            }
            FnArg::Typed(pat) => {
                if let Type::Reference(reference) = pat.ty.as_ref() {
                    return Err(syn::Error::new_spanned(
                        reference,
                        "exported functions take owned parameters",
                    ));
                }
                params.push(pat.ty.as_ref().clone());
            }
        }
    }

    let output = match &sig.output {
        ReturnType::Default => quote!(()),
        ReturnType::Type(_, ty) => quote!(#ty),
    };

    let ident = &sig.ident;
    let fn_type = quote!(fn(#(#params),*) -> #output);
    let signature_symbol = format_ident!("{}{}", SIGNATURE_PREFIX, ident);
    let call_symbol = format_ident!("{}{}", FUNCTION_PREFIX, ident);

    Ok(quote! {
        #function

        #[doc(hidden)]
        #[no_mangle]
        pub extern "C" fn #signature_symbol() -> ::hotmod_sdk::abi::RawBuffer {
            ::hotmod_sdk::__private::signature(#ident as #fn_type)
        }

        #[doc(hidden)]
        #[no_mangle]
        pub unsafe extern "C" fn #call_symbol(
            args_ptr: *const u8,
            args_len: usize,
        ) -> ::hotmod_sdk::abi::RawBuffer {
            unsafe { ::hotmod_sdk::__private::invoke(#ident as #fn_type, args_ptr, args_len) }
        }
    })
}
