use proc_macro2::TokenStream;
use quote::quote;
use syn::ext::IdentExt;
use syn::{parse_quote, Data, DataStruct, DeriveInput, Fields};

use crate::attrs::{ContainerAttrs, FieldAttrs};

pub fn derive(input: DeriveInput) -> syn::Result<TokenStream> {
    let container = ContainerAttrs::parse(&input.attrs)?;
    let ident = &input.ident;

    let fields: Vec<&syn::Field> = match &input.data {
        Data::Struct(DataStruct {
            fields: Fields::Named(named),
            ..
        }) => named.named.iter().collect(),
        Data::Struct(DataStruct {
            fields: Fields::Unit,
            ..
        }) => Vec::new(),
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "Reflect can only be derived for structs with named fields",
            ))
        }
    };

    let mut generics = input.generics.clone();
    for param in generics.type_params_mut() {
        param.bounds.push(parse_quote!(::graphkit::Reflect));
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let base_name = container.name.clone().unwrap_or_else(|| ident.to_string());
    let type_params: Vec<_> = input.generics.type_params().map(|p| &p.ident).collect();
    let name = if container.anonymous {
        quote!(::std::option::Option::None)
    } else if type_params.is_empty() {
        quote!(::std::option::Option::Some(::std::borrow::Cow::Borrowed(#base_name)))
    } else {
        // Page<User> is named PageUser
        quote! {
            ::std::option::Option::Some(::std::borrow::Cow::Owned({
                let mut name = ::std::string::String::from(#base_name);
                #( name.push_str(&<#type_params as ::graphkit::Reflect>::shape().type_name()); )*
                name
            }))
        }
    };
    let description = opt_str(container.description.as_deref());

    let mut shapes = Vec::with_capacity(fields.len());
    let mut inserts = Vec::with_capacity(fields.len());

    for field in fields {
        let attrs = FieldAttrs::parse(&field.attrs)?;
        if attrs.skip || attrs.serde_skip {
            continue;
        }
        let Some(field_ident) = &field.ident else {
            continue;
        };
        let ident_str = field_ident.unraw().to_string();
        let ty = &field.ty;

        let serde_name = attrs
            .serde_rename
            .clone()
            .or_else(|| container.rename_all.map(|rule| rule.apply(&ident_str)));
        let serde_name = opt_str(serde_name.as_deref());
        let graphql_name = opt_str(attrs.graphql_name.as_deref());
        let field_description = opt_str(attrs.description.as_deref());
        let default = opt_str(attrs.default.as_deref());
        let required = attrs.required;
        let serde_flatten = attrs.serde_flatten;
        let embedded = attrs.embed || attrs.serde_flatten;

        shapes.push(quote! {
            ::graphkit::reflect::FieldShape {
                ident: #ident_str,
                serde_name: #serde_name,
                graphql_name: #graphql_name,
                required: #required,
                description: #field_description,
                default: #default,
                embedded: #embedded,
                serde_flatten: #serde_flatten,
                shape: <#ty as ::graphkit::Reflect>::shape,
            }
        });

        inserts.push(if embedded {
            quote!(record.absorb(::graphkit::Reflect::reflect(&self.#field_ident));)
        } else {
            quote!(record.insert(#ident_str, ::graphkit::Reflect::reflect(&self.#field_ident));)
        });
    }

    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::graphkit::Reflect for #ident #ty_generics #where_clause {
            fn shape() -> ::graphkit::reflect::Shape {
                ::graphkit::reflect::Shape::Record(::graphkit::reflect::RecordShape {
                    name: #name,
                    description: #description,
                    fields: ::std::vec![#(#shapes),*],
                })
            }

            #[allow(unused_mut)]
            fn reflect(&self) -> ::graphkit::reflect::Reflected {
                let mut record = ::graphkit::reflect::Record::new();
                #(#inserts)*
                ::graphkit::reflect::Reflected::from_record(record)
            }
        }
    })
}

fn opt_str(value: Option<&str>) -> TokenStream {
    match value {
        Some(s) => quote!(::std::option::Option::Some(#s)),
        None => quote!(::std::option::Option::None),
    }
}
