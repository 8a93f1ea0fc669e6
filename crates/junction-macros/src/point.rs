//! `#[derive(ExtensionPoint)]` implementation.
//!
//! # Container attributes `#[extension_point(...)]`
//!
//! | Key | Example | Description |
//! |-----|---------|-------------|
//! | `name` | `"order.placed"` | Overrides `point_name()` |
//! | `crate` | `"::junction::core"` | Path the generated code uses for the core crate |
//!
//! # Field attributes `#[extension_point(...)]`
//!
//! | Key | Description |
//! |-----|-------------|
//! | `interruptible` | Marks the embedded `InterruptibleState` (structs only, at most one) |

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, Index, Member, Path, spanned::Spanned};

// ============================================================================
// Attribute structures
// ============================================================================

/// Container-level `#[extension_point(…)]` options.
struct PointAttrs {
    name: Option<syn::LitStr>,
    krate: Path,
}

// ============================================================================
// Entry point
// ============================================================================

pub fn derive_extension_point(input: &DeriveInput) -> syn::Result<TokenStream> {
    let attrs = parse_container_attrs(&input.attrs)?;

    let state_field = match &input.data {
        Data::Struct(data) => find_state_field(&data.fields)?,
        Data::Enum(data) => {
            for variant in &data.variants {
                for field in &variant.fields {
                    if is_marked(&field.attrs)? {
                        return Err(syn::Error::new(
                            field.span(),
                            "#[extension_point(interruptible)] is only supported on struct fields",
                        ));
                    }
                }
            }
            None
        }
        Data::Union(_) => {
            return Err(syn::Error::new(
                input.span(),
                "ExtensionPoint cannot be derived for unions",
            ));
        }
    };

    Ok(generate(input, &attrs, state_field.as_ref()))
}

// ============================================================================
// Attribute parsing
// ============================================================================

fn parse_container_attrs(attrs: &[Attribute]) -> syn::Result<PointAttrs> {
    let mut name = None;
    let mut krate = None;

    for attr in attrs {
        if !attr.path().is_ident("extension_point") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = Some(meta.value()?.parse::<syn::LitStr>()?);
            } else if meta.path.is_ident("crate") {
                let path = meta.value()?.parse::<syn::LitStr>()?;
                krate = Some(path.parse::<Path>()?);
            } else {
                return Err(meta.error("unknown extension_point attribute, expected `name` or `crate`"));
            }
            Ok(())
        })?;
    }

    if let Some(name) = &name
        && name.value().trim().is_empty()
    {
        return Err(syn::Error::new(name.span(), "extension point name must not be empty"));
    }

    Ok(PointAttrs {
        name,
        krate: krate.unwrap_or_else(|| syn::parse_quote!(::junction_core)),
    })
}

fn is_marked(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut marked = false;

    for attr in attrs {
        if !attr.path().is_ident("extension_point") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("interruptible") {
                marked = true;
                Ok(())
            } else {
                Err(meta.error("unknown field attribute, expected `interruptible`"))
            }
        })?;
    }

    Ok(marked)
}

fn find_state_field(fields: &Fields) -> syn::Result<Option<Member>> {
    let mut found: Option<Member> = None;

    for (index, field) in fields.iter().enumerate() {
        if !is_marked(&field.attrs)? {
            continue;
        }
        if found.is_some() {
            return Err(syn::Error::new(
                field.span(),
                "only one field may be marked #[extension_point(interruptible)]",
            ));
        }
        found = Some(match &field.ident {
            Some(ident) => Member::Named(ident.clone()),
            None => Member::Unnamed(Index::from(index)),
        });
    }

    Ok(found)
}

// ============================================================================
// Code generation
// ============================================================================

fn generate(input: &DeriveInput, attrs: &PointAttrs, state_field: Option<&Member>) -> TokenStream {
    let name = &input.ident;
    let krate = &attrs.krate;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let point_name_impl = attrs.name.as_ref().map(|lit| {
        quote! {
            fn point_name() -> &'static str {
                #lit
            }
        }
    });

    let (interruption_impl, interruptible_impl) = match state_field {
        Some(field) => (
            quote! {
                fn interruption(&self) -> ::std::option::Option<&#krate::InterruptibleState> {
                    ::std::option::Option::Some(&self.#field)
                }

                fn interruption_mut(&mut self) -> ::std::option::Option<&mut #krate::InterruptibleState> {
                    ::std::option::Option::Some(&mut self.#field)
                }
            },
            quote! {
                impl #impl_generics #krate::Interruptible for #name #ty_generics #where_clause {}
            },
        ),
        None => (quote! {}, quote! {}),
    };

    quote! {
        impl #impl_generics #krate::ExtensionPoint for #name #ty_generics #where_clause {
            #point_name_impl
            #interruption_impl
        }

        #interruptible_impl
    }
}
