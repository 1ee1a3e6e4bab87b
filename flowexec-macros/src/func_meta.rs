use darling::{FromAttributes, FromField};
use syn::{DeriveInput, Fields};

/// Parsed attributes from #[flow_func(...)]
#[derive(Debug, FromAttributes)]
#[darling(attributes(flow_func))]
pub struct FlowFuncArgs {
    pub name: String,

    #[darling(default)]
    pub description: Option<String>,
}

/// Parsed attributes from #[param(...)]
#[derive(Debug, FromField)]
#[darling(attributes(param))]
pub struct ParamField {
    pub ident: Option<syn::Ident>,
    pub ty: syn::Type,

    #[darling(default)]
    pub default: Option<String>,
}

pub fn parse_func_info(input: &DeriveInput) -> darling::Result<FlowFuncArgs> {
    FlowFuncArgs::from_attributes(&input.attrs)
}

pub fn parse_params(input: &DeriveInput) -> darling::Result<Vec<ParamField>> {
    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => return Ok(Vec::new()),
        },
        _ => {
            return Err(darling::Error::custom("FlowFunc can only be derived for structs")
                .with_span(&input.ident));
        }
    };

    fields
        .iter()
        .filter(|f| f.attrs.iter().any(|attr| attr.path().is_ident("param")))
        .map(ParamField::from_field)
        .collect()
}
