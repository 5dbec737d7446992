use syn::meta::ParseNestedMeta;
use syn::{token, Attribute, Expr, ExprLit, Lit, LitStr, Meta, Token};

use crate::case::RenameRule;

#[derive(Default)]
pub struct ContainerAttrs {
    pub name: Option<String>,
    pub anonymous: bool,
    pub description: Option<String>,
    pub rename_all: Option<RenameRule>,
}

#[derive(Default)]
pub struct FieldAttrs {
    pub serde_rename: Option<String>,
    pub serde_skip: bool,
    pub serde_flatten: bool,
    pub graphql_name: Option<String>,
    pub required: bool,
    pub skip: bool,
    pub embed: bool,
    pub description: Option<String>,
    pub default: Option<String>,
}

impl ContainerAttrs {
    pub fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = Self {
            description: doc_string(attrs),
            ..Self::default()
        };

        for attr in attrs {
            if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename_all") {
                        let rule = if meta.input.peek(Token![=]) {
                            Some(meta.value()?.parse::<LitStr>()?)
                        } else {
                            let mut picked = None;
                            meta.parse_nested_meta(|inner| {
                                let lit: LitStr = inner.value()?.parse()?;
                                if inner.path.is_ident("deserialize") || picked.is_none() {
                                    picked = Some(lit);
                                }
                                Ok(())
                            })?;
                            picked
                        };
                        if let Some(lit) = rule {
                            out.rename_all = Some(RenameRule::parse(&lit.value()).ok_or_else(
                                || syn::Error::new(lit.span(), "unknown rename_all rule"),
                            )?);
                        }
                        return Ok(());
                    }
                    skip_value(&meta)
                })?;
            } else if attr.path().is_ident("graphql") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("name") {
                        out.name = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else if meta.path.is_ident("anonymous") {
                        out.anonymous = true;
                    } else if meta.path.is_ident("description") {
                        out.description = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else {
                        return Err(meta.error("unsupported graphql container attribute"));
                    }
                    Ok(())
                })?;
            }
        }

        Ok(out)
    }
}

impl FieldAttrs {
    pub fn parse(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut out = Self {
            description: doc_string(attrs),
            ..Self::default()
        };

        for attr in attrs {
            if attr.path().is_ident("serde") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("rename") {
                        if meta.input.peek(Token![=]) {
                            out.serde_rename = Some(meta.value()?.parse::<LitStr>()?.value());
                        } else {
                            meta.parse_nested_meta(|inner| {
                                let lit: LitStr = inner.value()?.parse()?;
                                if inner.path.is_ident("deserialize") || out.serde_rename.is_none() {
                                    out.serde_rename = Some(lit.value());
                                }
                                Ok(())
                            })?;
                        }
                        Ok(())
                    } else if meta.path.is_ident("skip") {
                        out.serde_skip = true;
                        Ok(())
                    } else if meta.path.is_ident("flatten") {
                        out.serde_flatten = true;
                        Ok(())
                    } else {
                        skip_value(&meta)
                    }
                })?;
            } else if attr.path().is_ident("graphql") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("name") {
                        out.graphql_name = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else if meta.path.is_ident("required") {
                        out.required = true;
                    } else if meta.path.is_ident("skip") {
                        out.skip = true;
                    } else if meta.path.is_ident("embed") {
                        out.embed = true;
                    } else if meta.path.is_ident("description") {
                        out.description = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else if meta.path.is_ident("default") {
                        out.default = Some(meta.value()?.parse::<LitStr>()?.value());
                    } else {
                        return Err(meta.error("unsupported graphql field attribute"));
                    }
                    Ok(())
                })?;
            }
        }

        Ok(out)
    }
}

/// Consumes a serde option we do not interpret (`default`, `with = ".."`, `bound(..)`).
fn skip_value(meta: &ParseNestedMeta<'_>) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        meta.value()?.parse::<Expr>()?;
    } else if meta.input.peek(token::Paren) {
        meta.parse_nested_meta(|inner| skip_value(&inner))?;
    }
    Ok(())
}

fn doc_string(attrs: &[Attribute]) -> Option<String> {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => Some(s.value().trim().to_string()),
                _ => None,
            },
            _ => None,
        })
        .collect();

    let joined = lines.join("\n").trim().to_string();
    (!joined.is_empty()).then_some(joined)
}
