//! Path template interpolation and query string encoding.

use crate::descriptor::ParameterEncoder;
use crate::{ClientError, Parameters, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;
use std::collections::BTreeSet;

/// Characters escaped by URI component encoding.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a value as a URI component.
pub fn encode_uri_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

enum Token<'a> {
    Literal(&'a str),
    Dynamic { key: &'a str, optional: bool },
}

/// Split a template into literal runs and `{key}` / `{key?}` tokens.
fn tokenize(template: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|offset| open + offset) else {
            break;
        };

        let inner = &rest[open + 1..close];
        let (key, optional) = match inner.strip_suffix('?') {
            Some(key) => (key, true),
            None => (inner, false),
        };

        if key.is_empty() || key.contains('?') {
            tokens.push(Token::Literal(&rest[..=close]));
        } else {
            if open > 0 {
                tokens.push(Token::Literal(&rest[..open]));
            }
            tokens.push(Token::Dynamic { key, optional });
        }
        rest = &rest[close + 1..];
    }

    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    tokens
}

/// Render a scalar parameter the way it appears in a URL.
pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Array(_) | Value::Object(_))
}

/// Interpolate `template` with `params` and append the leftover parameters
/// as a query string.
pub(crate) fn resolve(
    template: &str,
    mut params: Parameters,
    aliases: &std::collections::BTreeMap<String, String>,
    encoder: &ParameterEncoder,
) -> Result<String> {
    let mut path = String::with_capacity(template.len());
    let mut consumed = BTreeSet::new();

    for token in tokenize(template) {
        match token {
            Token::Literal(text) => path.push_str(text),
            Token::Dynamic { key, optional } => match params.get(key) {
                Some(value) if is_scalar(value) => {
                    path.push_str(&encoder.encode(&scalar_to_string(value)));
                    consumed.insert(key.to_string());
                }
                _ if optional => {
                    if path.ends_with('/') {
                        path.pop();
                    }
                }
                _ => {
                    path.push('{');
                    path.push_str(key);
                    path.push('}');
                }
            },
        }
    }

    if let Some(open) = path.find('{')
        && let Some(close) = path[open..].find('}')
    {
        return Err(ClientError::MissingPathParameter {
            parameter: path[open + 1..open + close].to_string(),
            template: template.to_string(),
        });
    }

    for key in &consumed {
        params.remove(key);
    }

    let mut query = Parameters::new();
    for (key, value) in params {
        if value.is_null() {
            continue;
        }
        let key = aliases.get(&key).cloned().unwrap_or(key);
        query.insert(key, value);
    }

    let query_string = to_query_string(&query, encoder);
    if !query_string.is_empty() {
        path.push(if path.contains('?') { '&' } else { '?' });
        path.push_str(&query_string);
    }

    if !path.is_empty() && !path.starts_with('/') {
        path.insert(0, '/');
    }
    Ok(path)
}

/// Encode parameters as `key=value` pairs joined by `&`.
///
/// Arrays expand to `key[]=v` pairs and objects to `key[sub]=v` pairs.
pub fn to_query_string(params: &Parameters, encoder: &ParameterEncoder) -> String {
    params
        .iter()
        .map(|(key, value)| match value {
            Value::Array(_) | Value::Object(_) => build_recursive(key, value, "", encoder),
            scalar => format!(
                "{}={}",
                encoder.encode(key),
                encoder.encode(&scalar_to_string(scalar))
            ),
        })
        .filter(|pair| !pair.is_empty())
        .collect::<Vec<_>>()
        .join("&")
}

fn build_recursive(key: &str, value: &Value, suffix: &str, encoder: &ParameterEncoder) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| build_recursive(key, item, &format!("{suffix}[]"), encoder))
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("&"),
        Value::Object(fields) => fields
            .iter()
            .map(|(nested_key, nested)| {
                let nested_suffix = format!("{suffix}[{nested_key}]");
                match nested {
                    Value::Array(_) | Value::Object(_) => {
                        build_recursive(key, nested, &nested_suffix, encoder)
                    }
                    scalar => format!(
                        "{}={}",
                        encoder.encode(&format!("{key}{nested_suffix}")),
                        encoder.encode(&scalar_to_string(scalar))
                    ),
                }
            })
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("&"),
        scalar => format!(
            "{}={}",
            encoder.encode(&format!("{key}{suffix}")),
            encoder.encode(&scalar_to_string(scalar))
        ),
    }
}
