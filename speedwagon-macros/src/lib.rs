use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, GenericArgument, Lit, PathArguments, Type};

/// Derives `speedwagon_sdk::WorkflowDefinition` for a workflow's options struct.
///
/// ```ignore
/// #[derive(WorkflowDefinition)]
/// #[workflow(id = "file_inventory", name = "File Inventory", description = "...")]
/// struct Options {
///     #[field(label = "Input", description = "Folder to scan", type = "directory")]
///     input: PathBuf,
/// }
/// ```
#[proc_macro_derive(WorkflowDefinition, attributes(workflow, field))]
pub fn derive_workflow_definition(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let workflow_meta = match extract_workflow_meta(&input.attrs) {
        Ok(meta) => meta,
        Err(e) => return e.to_compile_error().into(),
    };

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return syn::Error::new_spanned(&input.ident, "WorkflowDefinition only supports named fields")
                    .to_compile_error()
                    .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&input.ident, "WorkflowDefinition only supports structs")
                .to_compile_error()
                .into()
        }
    };

    let mut option_tokens = Vec::new();
    let mut extract_tokens = Vec::new();

    for f in fields {
        let Some(ident) = f.ident.as_ref() else { continue };
        let name = ident.to_string();

        let meta = match extract_field_meta(&f.attrs) {
            Ok(meta) => meta,
            Err(e) => return e.to_compile_error().into(),
        };

        let label = meta.label.clone().unwrap_or_else(|| name.clone());
        let description = meta.description.clone();
        let required = !is_option_type(&f.ty);
        let option_type = match meta.option_type_tokens() {
            Some(tokens) => tokens,
            None => infer_option_type(&f.ty),
        };
        let default = match &meta.default {
            Some(val) => quote! { Some(speedwagon_sdk::serde_json::Value::String(#val.to_string())) },
            None => quote! { None },
        };

        option_tokens.push(quote! {
            speedwagon_sdk::JobOption {
                name: #name.to_string(),
                label: #label.to_string(),
                description: #description.to_string(),
                option_type: #option_type,
                required: #required,
                default: #default,
            }
        });

        extract_tokens.push(quote! {
            #ident: speedwagon_sdk::FromOptionValue::from_option_value(#name, args.get(#name))?
        });
    }

    let struct_name = &input.ident;
    let workflow_id = &workflow_meta.id;
    let workflow_name = &workflow_meta.name;
    let workflow_desc = &workflow_meta.description;

    let expanded = quote! {
        impl speedwagon_sdk::WorkflowDefinition for #struct_name {
            fn metadata() -> speedwagon_sdk::WorkflowMetadata {
                speedwagon_sdk::WorkflowMetadata {
                    id: #workflow_id.to_string(),
                    name: #workflow_name.to_string(),
                    description: #workflow_desc.to_string(),
                }
            }

            fn job_options() -> Vec<speedwagon_sdk::JobOption> {
                vec![#(#option_tokens),*]
            }

            fn from_job_arguments(
                args: &speedwagon_sdk::JobArguments,
            ) -> Result<Self, speedwagon_sdk::ConfigurationError> {
                Ok(Self {
                    #(#extract_tokens),*
                })
            }
        }
    };

    TokenStream::from(expanded)
}

struct WorkflowMeta {
    id: String,
    name: String,
    description: String,
}

fn lit_str(meta: &syn::meta::ParseNestedMeta) -> syn::Result<String> {
    let value = meta.value()?;
    let lit: Lit = value.parse()?;
    match lit {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(other, "expected a string literal")),
    }
}

/// A numeric bound written as a string, e.g. `min = "1"`
fn lit_i64(meta: &syn::meta::ParseNestedMeta) -> syn::Result<i64> {
    let raw = lit_str(meta)?;
    raw.trim()
        .parse::<i64>()
        .map_err(|_| meta.error(format!("'{}' is not a whole number", raw)))
}

fn extract_workflow_meta(attrs: &[Attribute]) -> syn::Result<WorkflowMeta> {
    for attr in attrs {
        if attr.path().is_ident("workflow") {
            let mut id = String::new();
            let mut name = String::new();
            let mut description = String::new();

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    id = lit_str(&meta)?;
                } else if meta.path.is_ident("name") {
                    name = lit_str(&meta)?;
                } else if meta.path.is_ident("description") {
                    description = lit_str(&meta)?;
                } else {
                    return Err(meta.error("unknown workflow attribute"));
                }
                Ok(())
            })?;

            if id.is_empty() {
                return Err(syn::Error::new_spanned(attr, "#[workflow] needs an id"));
            }
            if name.is_empty() {
                name = id.clone();
            }

            return Ok(WorkflowMeta { id, name, description });
        }
    }

    Err(syn::Error::new(
        proc_macro2::Span::call_site(),
        "Missing #[workflow(...)] attribute",
    ))
}

#[derive(Default)]
struct FieldMeta {
    label: Option<String>,
    description: String,
    option_type: Option<String>,
    min: Option<i64>,
    max: Option<i64>,
    pattern: Option<String>,
    choices: Option<String>,
    default: Option<String>,
}

impl FieldMeta {
    fn option_type_tokens(&self) -> Option<proc_macro2::TokenStream> {
        let ty = self.option_type.as_deref()?;
        let tokens = match ty {
            "number" => {
                let min = self.min.map(|m| quote! { Some(#m) }).unwrap_or(quote! { None });
                let max = self.max.map(|m| quote! { Some(#m) }).unwrap_or(quote! { None });
                quote! { speedwagon_sdk::OptionType::Number { min: #min, max: #max } }
            }
            "boolean" => quote! { speedwagon_sdk::OptionType::Boolean },
            "choice" => {
                let choices: Vec<String> = self
                    .choices
                    .as_deref()
                    .unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                quote! { speedwagon_sdk::OptionType::Choice { options: vec![#(#choices.to_string()),*] } }
            }
            "directory" => quote! { speedwagon_sdk::OptionType::DirectorySelect },
            "file" => {
                let pattern = self
                    .pattern
                    .as_ref()
                    .map(|p| quote! { Some(#p.to_string()) })
                    .unwrap_or(quote! { None });
                quote! { speedwagon_sdk::OptionType::FileSelect { pattern: #pattern } }
            }
            _ => quote! { speedwagon_sdk::OptionType::Text },
        };
        Some(tokens)
    }
}

fn extract_field_meta(attrs: &[Attribute]) -> syn::Result<FieldMeta> {
    let mut meta_out = FieldMeta::default();

    for attr in attrs {
        if !attr.path().is_ident("field") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("label") {
                meta_out.label = Some(lit_str(&meta)?);
            } else if meta.path.is_ident("description") {
                meta_out.description = lit_str(&meta)?;
            } else if meta.path.is_ident("type") {
                meta_out.option_type = Some(lit_str(&meta)?);
            } else if meta.path.is_ident("min") {
                meta_out.min = Some(lit_i64(&meta)?);
            } else if meta.path.is_ident("max") {
                meta_out.max = Some(lit_i64(&meta)?);
            } else if meta.path.is_ident("pattern") {
                meta_out.pattern = Some(lit_str(&meta)?);
            } else if meta.path.is_ident("choices") {
                meta_out.choices = Some(lit_str(&meta)?);
            } else if meta.path.is_ident("default") {
                meta_out.default = Some(lit_str(&meta)?);
            } else {
                return Err(meta.error("unknown field attribute"));
            }
            Ok(())
        })?;
    }

    Ok(meta_out)
}

fn infer_option_type(ty: &Type) -> proc_macro2::TokenStream {
    // Check if it's Option<T>
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(GenericArgument::Type(inner_ty)) = args.args.first() {
                        return infer_option_type_inner(inner_ty);
                    }
                }
            } else {
                return infer_option_type_inner(ty);
            }
        }
    }

    quote! { speedwagon_sdk::OptionType::Text }
}

fn infer_option_type_inner(ty: &Type) -> proc_macro2::TokenStream {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return match segment.ident.to_string().as_str() {
                "PathBuf" => quote! { speedwagon_sdk::OptionType::FileSelect { pattern: None } },
                "bool" => quote! { speedwagon_sdk::OptionType::Boolean },
                "usize" | "i64" => {
                    quote! { speedwagon_sdk::OptionType::Number { min: None, max: None } }
                }
                _ => quote! { speedwagon_sdk::OptionType::Text },
            };
        }
    }
    quote! { speedwagon_sdk::OptionType::Text }
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}
