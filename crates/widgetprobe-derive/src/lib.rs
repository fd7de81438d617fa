//! widgetprobe Derive Macros: typed custom proxy classes
//!
//! A custom proxy class gives a remote type a name in test code. Deriving
//! [`CustomProxy`] on a marker type implements `widgetprobe::CustomProxy`,
//! which the registry turns into a class under an emulator base.
//!
//! ```ignore
//! use widgetprobe::{CustomProxy, ProbeContext};
//!
//! // Matches remote objects whose type name is `Calculator`
//! #[derive(CustomProxy)]
//! struct Calculator;
//!
//! // Class `MainWindow`, selected with the node name `QMainWindow`
//! #[derive(CustomProxy)]
//! #[proxy(name = "MainWindow", query_name = "QMainWindow")]
//! struct Window;
//!
//! let context = ProbeContext::new_mocked();
//! let registry = context.registry();
//! let base = registry.make_default_emulator_base();
//! registry.define_custom::<Calculator>(&base);
//! registry.define_custom::<Window>(&base);
//! ```
//!
//! # Attributes
//!
//! - `#[proxy(name = "...")]` - class name matched against remote type
//!   names (defaults to the type's identifier, unchanged)
//! - `#[proxy(query_name = "...")]` - node name used when selecting
//!   instances of the class (defaults to the class name)

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, DeriveInput, LitStr};

/// Derive `widgetprobe::CustomProxy` for a marker type.
///
/// See the crate documentation for the `#[proxy(...)]` attributes.
#[proc_macro_derive(CustomProxy, attributes(proxy))]
pub fn derive_custom_proxy(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_custom_proxy(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_custom_proxy(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let ident = &input.ident;
    let attributes = ProxyAttributes::parse(&input.attrs)?;
    let class_name = attributes.name.unwrap_or_else(|| ident.to_string());
    let type_query_name = match attributes.query_name {
        Some(query_name) => quote! { ::core::option::Option::Some(#query_name) },
        None => quote! { ::core::option::Option::None },
    };
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::widgetprobe::CustomProxy for #ident #ty_generics #where_clause {
            fn class_name() -> &'static str {
                #class_name
            }

            fn type_query_name() -> ::core::option::Option<&'static str> {
                #type_query_name
            }
        }
    })
}

/// Values collected from every `#[proxy(...)]` attribute
#[derive(Debug, Default, PartialEq, Eq)]
struct ProxyAttributes {
    name: Option<String>,
    query_name: Option<String>,
}

impl ProxyAttributes {
    fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut parsed = Self::default();
        for attr in attrs.iter().filter(|attr| attr.path().is_ident("proxy")) {
            attr.parse_nested_meta(|meta| {
                let slot = if meta.path.is_ident("name") {
                    &mut parsed.name
                } else if meta.path.is_ident("query_name") {
                    &mut parsed.query_name
                } else {
                    return Err(meta.error("expected `name` or `query_name`"));
                };
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(syn::Error::new(value.span(), "value must not be empty"));
                }
                *slot = Some(value.value());
                Ok(())
            })?;
        }
        Ok(parsed)
    }
}
