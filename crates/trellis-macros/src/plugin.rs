use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{Ident, ItemFn, LitStr, parse_macro_input};

/// Implementation of the `#[plugin("id")]` attribute macro.
pub fn plugin(attr: TokenStream, item: TokenStream) -> TokenStream {
    let id = parse_macro_input!(attr as LitStr);
    let func = parse_macro_input!(item as ItemFn);

    if let Err(e) = validate(&id, &func) {
        return e.into_compile_error().into();
    }

    let fn_name = &func.sig.ident;
    let static_name = Ident::new(
        &format!("_TRELLIS_PLUGIN_{}", fn_name.to_string().to_uppercase()),
        Span::call_site(),
    );

    quote! {
        #func

        #[::trellis_framework::linkme::distributed_slice(::trellis_framework::PLUGIN_REGISTRY)]
        #[linkme(crate = ::trellis_framework::linkme)]
        static #static_name: fn() -> ::trellis_framework::PluginDescriptor = || {
            ::trellis_framework::PluginDescriptor::new(#id, #fn_name)
                .with_path(::core::module_path!())
        };
    }
    .into()
}

fn validate(id: &LitStr, func: &ItemFn) -> syn::Result<()> {
    let value = id.value();
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(syn::Error::new(
            id.span(),
            "plugin id must be non-empty and contain no whitespace",
        ));
    }
    if let Some(asyncness) = &func.sig.asyncness {
        return Err(syn::Error::new_spanned(
            asyncness,
            "plugin register functions are synchronous; move async work into `InitDescriptor::init`",
        ));
    }
    if !func.sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &func.sig.generics,
            "plugin register functions cannot be generic",
        ));
    }
    if func.sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &func.sig.inputs,
            "expected `fn(env: &mut RegistrationEnv)`",
        ));
    }
    Ok(())
}
