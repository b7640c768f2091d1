use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{Data, DeriveInput, Field, Fields, Ident};

fn is_skipped(field: &Field) -> bool {
    field.attrs.iter().any(|attr| attr.path.is_ident("skip"))
}

#[proc_macro_derive(ObjectTraversal, attributes(skip))]
pub fn derive_object_traversal(token_stream: TokenStream) -> TokenStream {
    let ast = match syn::parse::<DeriveInput>(token_stream) {
        Ok(ast) => ast,
        Err(err) => return err.to_compile_error().into(),
    };

    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = ast.generics.split_for_impl();

    let body = match &ast.data {
        Data::Struct(data) => {
            let visits = data
                .fields
                .iter()
                .enumerate()
                .filter(|(_, field)| !is_skipped(field))
                .map(|(idx, field)| match &field.ident {
                    Some(ident) => quote! { ::kiln_utils::ObjectTraversal::traverse(&mut self.#ident, walker)?; },
                    None => {
                        let idx = syn::Index::from(idx);
                        quote! { ::kiln_utils::ObjectTraversal::traverse(&mut self.#idx, walker)?; }
                    }
                });

            quote! { #(#visits)* }
        }

        Data::Enum(data) => {
            let arms = data.variants.iter().map(|variant| {
                let variant_name = &variant.ident;

                match &variant.fields {
                    Fields::Named(named) => {
                        let visited: Vec<&Ident> = named
                            .named
                            .iter()
                            .filter(|field| !is_skipped(field))
                            .filter_map(|field| field.ident.as_ref())
                            .collect();

                        quote! {
                            #name::#variant_name { #(#visited,)* .. } => {
                                #(::kiln_utils::ObjectTraversal::traverse(#visited, walker)?;)*
                            }
                        }
                    }

                    Fields::Unnamed(unnamed) => {
                        let mut bindings = vec![];
                        let mut visited = vec![];

                        for (idx, field) in unnamed.unnamed.iter().enumerate() {
                            if is_skipped(field) {
                                bindings.push(quote! { _ });
                            } else {
                                let ident = Ident::new(&format!("f{}", idx), Span::call_site());
                                bindings.push(quote! { #ident });
                                visited.push(ident);
                            }
                        }

                        quote! {
                            #name::#variant_name(#(#bindings),*) => {
                                #(::kiln_utils::ObjectTraversal::traverse(#visited, walker)?;)*
                            }
                        }
                    }

                    Fields::Unit => quote! { #name::#variant_name => {} },
                }
            });

            quote! {
                match self {
                    #(#arms),*
                }
            }
        }

        Data::Union(_) => {
            return syn::Error::new_spanned(name, "ObjectTraversal cannot be derived for unions")
                .to_compile_error()
                .into();
        }
    };

    let q = quote! {
        impl #impl_generics ::kiln_utils::ObjectTraversal for #name #ty_generics #where_clause {
            fn traverse<W: ::kiln_utils::ObjectWalker>(
                &mut self,
                walker: &mut W,
            ) -> ::std::result::Result<(), W::Error> {
                #body
                ::std::result::Result::Ok(())
            }
        }
    };

    q.into()
}
