//! XML → document normalization.
//!
//! Mapping rules:
//! - The root element becomes `{ "<root>": <value> }`.
//! - An element with neither attributes nor child elements becomes its trimmed text
//!   (`null` when the text is empty).
//! - Any other element becomes a mapping: attributes under `@<name>`, child elements
//!   under their local name (repeated names collapse into a sequence in document
//!   order), and non-whitespace text under `#text`.

use roxmltree::{Document as XmlTree, Node, ParsingOptions};
use serde_json::{Map, Value};

use crate::error::XmlError;
use crate::Document;

/// Reserved key prefix for XML attributes.
pub const ATTRIBUTE_PREFIX: &str = "@";

/// Reserved key for element text mixed with attributes or children.
pub const TEXT_KEY: &str = "#text";

/// Parse an XML payload into a generic document.
pub fn parse_document(input: &str) -> Result<Document, XmlError> {
    // E-utilities responses carry a DOCTYPE declaration.
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let tree = XmlTree::parse_with_options(input, options)?;
    let root = tree.root_element();

    let mut map = Map::new();
    map.insert(root.tag_name().name().to_string(), element_to_value(&root));
    Ok(Value::Object(map))
}

fn element_to_value(node: &Node) -> Value {
    let has_attributes = node.attributes().next().is_some();
    let has_children = node.children().any(|c| c.is_element());

    let text: String = node
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect();
    let text = text.trim();

    if !has_attributes && !has_children {
        return if text.is_empty() {
            Value::Null
        } else {
            Value::String(text.to_string())
        };
    }

    let mut obj = Map::new();
    for attr in node.attributes() {
        obj.insert(
            format!("{}{}", ATTRIBUTE_PREFIX, attr.name()),
            Value::String(attr.value().to_string()),
        );
    }

    for child in node.children().filter(|c| c.is_element()) {
        insert_property(&mut obj, child.tag_name().name(), element_to_value(&child));
    }

    if !text.is_empty() {
        obj.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
    }

    Value::Object(obj)
}

fn insert_property(map: &mut Map<String, Value>, name: &str, value: Value) {
    match map.entry(name.to_string()) {
        serde_json::map::Entry::Vacant(v) => {
            v.insert(value);
        }
        serde_json::map::Entry::Occupied(mut o) => match o.get_mut() {
            Value::Array(arr) => arr.push(value),
            existing => {
                let old = existing.take();
                *existing = Value::Array(vec![old, value]);
            }
        },
    }
}
