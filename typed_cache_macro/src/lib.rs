use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemStruct, LitInt};

/// Implement `CachedObject` for a struct, optionally with a default TTL.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// #[typed_cache(ttl = 300)]
/// struct CeremonySession {
///     challenge: String,
/// }
/// ```
///
/// The generated type hash covers the struct name and every field name and type, so
/// changing the layout of a cached struct never reads back stale bytes written by an
/// older build.
#[proc_macro_attribute]
pub fn typed_cache(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut ttl_seconds: Option<u64> = None;
    let ttl_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("ttl") {
            let lit: LitInt = meta.value()?.parse()?;
            ttl_seconds = Some(lit.base10_parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported typed_cache argument, expected `ttl = <seconds>`"))
        }
    });
    parse_macro_input!(args with ttl_parser);

    let struct_def = parse_macro_input!(input as ItemStruct);
    let struct_name = &struct_def.ident;
    let struct_hash = structural_hash(&struct_def);

    let ttl_impl = match ttl_seconds {
        Some(ttl) => quote! {
            fn default_ttl() -> Option<std::time::Duration> {
                Some(std::time::Duration::from_secs(#ttl))
            }
        },
        None => quote! {
            fn default_ttl() -> Option<std::time::Duration> {
                None
            }
        },
    };

    let expanded = quote! {
        #struct_def

        impl crate::cache::object::CachedObject for #struct_name {
            fn cache_type_hash() -> u64 {
                #struct_hash
            }

            fn cache_prefix() -> &'static str {
                stringify!(#struct_name)
            }

            #ttl_impl
        }
    };

    TokenStream::from(expanded)
}

fn structural_hash(input: &ItemStruct) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    input.ident.to_string().hash(&mut hasher);

    for param in &input.generics.params {
        format!("{:?}", param).hash(&mut hasher);
    }

    match &input.fields {
        syn::Fields::Named(fields) => {
            for field in &fields.named {
                if let Some(ident) = &field.ident {
                    ident.to_string().hash(&mut hasher);
                }
                format!("{:?}", field.ty).hash(&mut hasher);
            }
        }
        syn::Fields::Unnamed(fields) => {
            for (index, field) in fields.unnamed.iter().enumerate() {
                index.hash(&mut hasher);
                format!("{:?}", field.ty).hash(&mut hasher);
            }
        }
        syn::Fields::Unit => {}
    }

    hasher.finish()
}
