use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

mod func_meta;
use func_meta::{parse_func_info, parse_params};

/// Registers a `Default` flow function type under `#[flow_func(name = ...)]`
/// so `FuncRegistry::with_builtins` can create it.
#[proc_macro_derive(FlowFunc, attributes(flow_func, param))]
pub fn derive_flow_func(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let func_info = match parse_func_info(&input) {
        Ok(info) => info,
        Err(e) => return e.write_errors().into(),
    };
    let params = match parse_params(&input) {
        Ok(params) => params,
        Err(e) => return e.write_errors().into(),
    };

    let struct_name = &input.ident;
    let func_name = &func_info.name;
    let description = func_info.description.clone().unwrap_or_default();

    let param_schemas = params.iter().filter_map(|field| {
        let param_name = field.ident.as_ref()?.to_string();
        let type_name = extract_type_name(&field.ty);
        let default = match &field.default {
            Some(value) => quote! { Some(#value.to_string()) },
            None => quote! { None },
        };

        Some(quote! {
            crate::registry::ParameterSchema {
                name: #param_name.to_string(),
                param_type: #type_name.to_string(),
                default: #default,
            }
        })
    });

    let lowered = struct_name.to_string().to_lowercase();
    let mod_name = syn::Ident::new(&format!("__flow_func_registration_{}", lowered), struct_name.span());
    let factory_fn_name = syn::Ident::new(&format!("create_metadata_{}", lowered), struct_name.span());

    let expanded = quote! {
        mod #mod_name {
            use super::*;

            fn #factory_fn_name() -> crate::registry::FuncMetadata {
                crate::registry::FuncMetadata {
                    name: #func_name.to_string(),
                    description: #description.to_string(),
                    parameters: vec![#(#param_schemas),*],
                    factory: || Box::new(#struct_name::default()),
                }
            }

            ::inventory::submit! {
                crate::registry::FuncMetadataFactoryWrapper(#factory_fn_name)
            }
        }
    };

    TokenStream::from(expanded)
}

fn extract_type_name(ty: &syn::Type) -> &'static str {
    let type_str = quote!(#ty).to_string();

    if type_str.contains("f64") || type_str.contains("f32") {
        "number"
    } else if type_str.contains("u32") || type_str.contains("i32")
        || type_str.contains("u64") || type_str.contains("i64")
        || type_str.contains("usize") || type_str.contains("isize") {
        "integer"
    } else if type_str.contains("String") || type_str.contains("str") {
        "string"
    } else if type_str.contains("bool") {
        "boolean"
    } else {
        "unknown"
    }
}
