//! `#[derive(WireType)]`: generates the `WireObject`/`WireType` impls nucleus-core's type map
//! expects, so a message struct only has to list its fields once instead of hand-writing
//! serialize/deserialize/size glue for every type that crosses the wire.
//!
//! Field types are dispatched to a fixed set of `WriteCursor`/`ReadCursor` primitives. A field
//! of a type this macro doesn't recognize is a compile error at the derive site, not a silent
//! fallback, since there is no sensible generic wire representation to fall back to.

extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::Ident as Ident2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

#[proc_macro_derive(WireType)]
pub fn derive_wire_type(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let ident = input.ident.clone();

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => panic!("#[derive(WireType)] only supports structs with named fields"),
        },
        _ => panic!("#[derive(WireType)] only supports structs"),
    };

    let mut serialize_stmts = Vec::new();
    let mut deserialize_stmts = Vec::new();
    let mut size_exprs = Vec::new();
    let mut field_idents = Vec::new();

    for field in fields {
        let name = field.ident.clone().expect("named field");
        let (ser, deser, size) = field_codec(&name, &field.ty);
        serialize_stmts.push(ser);
        deserialize_stmts.push(deser);
        size_exprs.push(size);
        field_idents.push(name);
    }

    let wire_name_const = quote! { concat!(module_path!(), "::", stringify!(#ident)) };

    let expanded = quote! {
        impl nucleus_core::serialize::WireObject for #ident {
            fn wire_name(&self) -> &'static str {
                <#ident as nucleus_core::serialize::WireType>::WIRE_NAME
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }

        impl nucleus_core::serialize::WireType for #ident {
            const WIRE_NAME: &'static str = #wire_name_const;

            fn wire_serialize(&self, cursor: &mut nucleus_core::serialize::WriteCursor) -> nucleus_core::serialize::Result<()> {
                #(#serialize_stmts)*
                Ok(())
            }

            fn wire_deserialize(cursor: &mut nucleus_core::serialize::ReadCursor) -> nucleus_core::serialize::Result<Self> {
                #(#deserialize_stmts)*
                Ok(#ident { #(#field_idents),* })
            }

            fn wire_size(&self) -> usize {
                0usize #(+ #size_exprs)*
            }
        }
    };

    expanded.into()
}

/// Returns (serialize statement, deserialize statement, size expression) for one struct field.
fn field_codec(
    name: &Ident2,
    ty: &Type,
) -> (proc_macro2::TokenStream, proc_macro2::TokenStream, proc_macro2::TokenStream) {
    let type_name = quote!(#ty).to_string().replace(' ', "");

    match type_name.as_str() {
        "u8" => (
            quote! { cursor.write_u8(self.#name)?; },
            quote! { let #name = cursor.read_u8()?; },
            quote! { 1usize },
        ),
        "bool" => (
            quote! { cursor.write_bool(self.#name)?; },
            quote! { let #name = cursor.read_bool()?; },
            quote! { 1usize },
        ),
        "u32" => (
            quote! { cursor.write_u32(self.#name)?; },
            quote! { let #name = cursor.read_u32()?; },
            quote! { 4usize },
        ),
        "u64" => (
            quote! { cursor.write_u64(self.#name)?; },
            quote! { let #name = cursor.read_u64()?; },
            quote! { 8usize },
        ),
        "i64" => (
            quote! { cursor.write_i64(self.#name)?; },
            quote! { let #name = cursor.read_i64()?; },
            quote! { 8usize },
        ),
        "String" => (
            quote! { cursor.write_string(&self.#name)?; },
            quote! { let #name = cursor.read_string()?; },
            quote! { 4usize + self.#name.len() },
        ),
        "Vec<u8>" => {
            let len_ident = format_ident!("{}_len", name);
            (
                quote! {
                    cursor.write_u32(self.#name.len() as u32)?;
                    cursor.write_bytes(&self.#name)?;
                },
                quote! {
                    let #len_ident = cursor.read_u32()? as usize;
                    let #name = cursor.read_bytes(#len_ident)?.to_vec();
                },
                quote! { 4usize + self.#name.len() },
            )
        }
        other => panic!(
            "#[derive(WireType)] does not know how to encode field `{}` of type `{}`; supported types are \
             u8, bool, u32, u64, i64, String, Vec<u8>",
            name, other
        ),
    }
}
