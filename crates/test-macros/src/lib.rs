//! Test attribute for async integration tests against the shared database.
//!
//! Apply `#[shared_runtime_test]` to an async test function. It expands to a
//! synchronous `#[test]` whose body runs on the shared Tokio runtime exposed
//! by `crate::common::test_db::run_test`, so async teardown (pool shutdown,
//! container cleanup) completes while the runtime is still alive.
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, ItemFn, Meta};

/// Marks an async function as a test executed on the shared database runtime.
#[proc_macro_attribute]
pub fn shared_runtime_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    parse_macro_input!(attr as syn::parse::Nothing);

    let input_fn = parse_macro_input!(item as ItemFn);

    if input_fn.sig.asyncness.is_none() {
        return syn::Error::new(
            input_fn.sig.span(),
            "shared_runtime_test requires an async function",
        )
        .to_compile_error()
        .into();
    }

    if !input_fn.sig.inputs.is_empty() {
        return syn::Error::new(
            input_fn.sig.inputs.span(),
            "shared_runtime_test functions take no arguments",
        )
        .to_compile_error()
        .into();
    }

    if !input_fn.sig.generics.params.is_empty() {
        return syn::Error::new(
            input_fn.sig.generics.span(),
            "shared_runtime_test functions cannot be generic",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input_fn;

    let name = sig.ident;
    let output = sig.output;

    // Strip any stray re-application of the attribute itself.
    let filtered_attrs = attrs.into_iter().filter(
        |attr| !matches!(attr.meta, Meta::Path(ref path) if path.is_ident("shared_runtime_test")),
    );

    TokenStream::from(quote! {
        #(#filtered_attrs)*
        #[test]
        #vis fn #name() #output {
            crate::common::test_db::run_test(async #block)
        }
    })
}
