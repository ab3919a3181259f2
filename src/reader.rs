//! Namespace-aware XML reading
//!
//! A source document is read into an [`Element`] tree and then dispatched by
//! namespace: the root element, and every element whose namespace differs
//! from its parent's, is handed with its subtree to the handler registered
//! for that namespace. Elements sharing their parent's namespace belong to
//! the parent's handler.

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use crate::error::{ConfigError, Result};
use crate::namespace::NamespaceHandler;
use crate::resource::{Definition, DefinitionResource};

/// An attribute with its resolved namespace (empty when unqualified)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub namespace: String,
    pub name: String,
    pub value: String,
}

/// An element and its subtree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    namespace: String,
    name: String,
    attributes: Vec<Attribute>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            namespace: String::new(),
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Namespace URI, or `""` for an element outside any namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Local name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of an unqualified attribute
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.namespace.is_empty() && a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Concatenated character data directly inside this element
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Children in the given namespace, in document order
    pub fn children_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.namespace == namespace)
    }
}

/// Routes elements to namespace handlers
pub trait ElementDispatcher {
    fn handler_for(&self, namespace: &str) -> Option<&dyn NamespaceHandler>;
}

/// State shared with handlers while one source is parsed.
///
/// Handlers see the resource as it stood before this source and collect
/// their definitions into a batch that is merged once the source completes.
pub struct ParseContext<'a> {
    resource: &'a DefinitionResource,
    source_label: &'a str,
    entries: Vec<Definition>,
}

impl<'a> ParseContext<'a> {
    pub fn new(resource: &'a DefinitionResource, source_label: &'a str) -> Self {
        Self {
            resource,
            source_label,
            entries: Vec::new(),
        }
    }

    pub fn resource(&self) -> &DefinitionResource {
        self.resource
    }

    pub fn source_label(&self) -> &str {
        self.source_label
    }

    /// Record a definition; its origin defaults to the current source
    pub fn define(&mut self, mut definition: Definition) {
        if definition.origin.is_empty() {
            definition.origin = self.source_label.to_string();
        }
        self.entries.push(definition);
    }

    /// Definitions recorded so far for this source
    pub fn pending(&self) -> &[Definition] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Definition> {
        self.entries
    }
}

/// Reads one XML source and dispatches it by namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlReader;

impl XmlReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read<R: BufRead>(
        &self,
        input: R,
        dispatcher: &dyn ElementDispatcher,
        ctx: &mut ParseContext<'_>,
    ) -> Result<()> {
        let root = self.parse_tree(input, ctx.source_label())?;
        dispatch(&root, None, dispatcher, ctx)
    }

    /// Read a whole document into an element tree
    pub fn parse_tree<R: BufRead>(&self, input: R, label: &str) -> Result<Element> {
        let mut reader = NsReader::from_reader(input);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let position = reader.buffer_position();
            let (resolved, event) = reader
                .read_resolved_event_into(&mut buf)
                .map_err(|e| ConfigError::malformed(label, format!("{} (near byte {})", e, position)))?;
            let namespace = owned_namespace(resolved);

            match event {
                Event::Start(start) => {
                    let element = open_element(&reader, &start, namespace, label)?;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = open_element(&reader, &start, namespace, label)?;
                    close_element(element, &mut stack, &mut root, label)?;
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| {
                        ConfigError::malformed(label, format!("unmatched end tag near byte {}", position))
                    })?;
                    close_element(element, &mut stack, &mut root, label)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ConfigError::malformed(label, e.to_string()))?;
                    append_text(&mut stack, &text, label)?;
                }
                Event::CData(data) => {
                    let text = std::str::from_utf8(&data)
                        .map_err(|e| ConfigError::malformed(label, format!("invalid UTF-8 in CDATA: {}", e)))?
                        .to_string();
                    append_text(&mut stack, &text, label)?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if let Some(open) = stack.last() {
            return Err(ConfigError::malformed(
                label,
                format!("unexpected end of document, <{}> is not closed", open.name),
            ));
        }
        root.ok_or_else(|| ConfigError::malformed(label, "document has no root element"))
    }
}

fn owned_namespace(resolved: ResolveResult<'_>) -> std::result::Result<String, String> {
    match resolved {
        ResolveResult::Bound(ns) => Ok(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        ResolveResult::Unbound => Ok(String::new()),
        ResolveResult::Unknown(prefix) => Err(String::from_utf8_lossy(&prefix).into_owned()),
    }
}

fn utf8(bytes: &[u8], label: &str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ConfigError::malformed(label, format!("invalid UTF-8 in name: {}", e)))
}

fn open_element<R>(
    reader: &NsReader<R>,
    start: &BytesStart<'_>,
    namespace: std::result::Result<String, String>,
    label: &str,
) -> Result<Element> {
    let namespace = namespace
        .map_err(|prefix| ConfigError::malformed(label, format!("unbound namespace prefix '{}'", prefix)))?;
    let name = utf8(start.local_name().as_ref(), label)?;

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ConfigError::malformed(label, format!("bad attribute on <{}>: {}", name, e)))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (resolved, local) = reader.resolve_attribute(attr.key);
        let attr_namespace = owned_namespace(resolved).map_err(|prefix| {
            ConfigError::malformed(label, format!("unbound namespace prefix '{}' on <{}>", prefix, name))
        })?;
        let value = attr
            .unescape_value()
            .map_err(|e| ConfigError::malformed(label, format!("bad attribute value on <{}>: {}", name, e)))?;
        attributes.push(Attribute {
            namespace: attr_namespace,
            name: utf8(local.as_ref(), label)?,
            value: value.into_owned(),
        });
    }

    Ok(Element {
        namespace,
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    })
}

fn close_element(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
    label: &str,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_some() {
        return Err(ConfigError::malformed(
            label,
            format!("more than one root element, found <{}>", element.name),
        ));
    } else {
        *root = Some(element);
    }
    Ok(())
}

fn append_text(stack: &mut [Element], text: &str, label: &str) -> Result<()> {
    match stack.last_mut() {
        Some(current) => {
            current.text.push_str(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(ConfigError::malformed(label, "character data outside the root element")),
    }
}

fn dispatch(
    element: &Element,
    parent_namespace: Option<&str>,
    dispatcher: &dyn ElementDispatcher,
    ctx: &mut ParseContext<'_>,
) -> Result<()> {
    if parent_namespace != Some(element.namespace()) {
        let handler = dispatcher
            .handler_for(element.namespace())
            .filter(|h| h.can_parse(element.namespace()))
            .ok_or_else(|| ConfigError::UnknownNamespace {
                source_label: ctx.source_label().to_string(),
                namespace: element.namespace().to_string(),
                element: element.name().to_string(),
            })?;
        handler.parse_element(ctx, element)?;
    }
    for child in element.children() {
        dispatch(child, Some(element.namespace()), dispatcher, ctx)?;
    }
    Ok(())
}
