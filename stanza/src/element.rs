//! The tree node type (`Element`/`Node`) and its builder DSL.

use std::collections::HashMap;
use std::fmt;

/// A single attribute: a local name, an optional namespace, and a value.
///
/// Attribute order is insertion order, matching the contract that a node's
/// attribute list is a linear, order-preserving list (not a map).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub namespace: Option<String>,
    pub value: String,
}

/// A child of an [`Element`]: either text or a nested element.
#[derive(Debug, Clone)]
pub enum Node {
    Text(String),
    Element(Element),
}

/// A tree node restricted to the XMPP stanza profile: a name, a namespace, an
/// ordered attribute list, and an ordered, possibly-mixed list of children.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    namespace: String,
    attrs: Vec<Attribute>,
    nodes: Vec<Node>,
}

impl Element {
    /// Creates an empty element with no attributes or children.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            namespace: namespace.into(),
            attrs: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Starts a [`Builder`] for an element with this name and namespace.
    pub fn builder(name: impl Into<String>, namespace: impl Into<String>) -> Builder {
        Builder::new(name, namespace)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ns(&self) -> &str {
        &self.namespace
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_ns(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
    }

    /// All attributes, in insertion order.
    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Looks up an unnamespaced attribute's value.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.namespace.is_none() && a.name == key)
            .map(|a| a.value.as_str())
    }

    /// Looks up a namespaced attribute's value.
    pub fn attr_ns(&self, key: &str, namespace: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.namespace.as_deref() == Some(namespace) && a.name == key)
            .map(|a| a.value.as_str())
    }

    /// Sets (or overwrites in place) an unnamespaced attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set_attr_impl(key.into(), None, value.into());
    }

    /// Sets (or overwrites in place) a namespaced attribute.
    pub fn set_attr_ns(
        &mut self,
        key: impl Into<String>,
        namespace: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.set_attr_impl(key.into(), Some(namespace.into()), value.into());
    }

    fn set_attr_impl(&mut self, name: String, namespace: Option<String>, value: String) {
        if let Some(existing) = self
            .attrs
            .iter_mut()
            .find(|a| a.namespace == namespace && a.name == name)
        {
            existing.value = value;
        } else {
            self.attrs.push(Attribute {
                name,
                namespace,
                value,
            });
        }
    }

    /// Removes an unnamespaced attribute, returning its prior value.
    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let idx = self
            .attrs
            .iter()
            .position(|a| a.namespace.is_none() && a.name == key)?;
        Some(self.attrs.remove(idx).value)
    }

    /// All child nodes (text and elements), in document order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// An iterator over child elements only, in document order.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// The first child element matching `(name, namespace)`.
    pub fn get_child(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.children()
            .find(|c| c.name == name && c.namespace == namespace)
    }

    /// Mutable access to the first child element matching `(name, namespace)`.
    pub fn get_child_mut(&mut self, name: &str, namespace: &str) -> Option<&mut Element> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Element(e) if e.name == name && e.namespace == namespace => Some(e),
            _ => None,
        })
    }

    /// Removes and returns the first child element matching `(name, namespace)`.
    pub fn remove_child(&mut self, name: &str, namespace: &str) -> Option<Element> {
        let idx = self.nodes.iter().position(|n| match n {
            Node::Element(e) => e.name == name && e.namespace == namespace,
            Node::Text(_) => false,
        })?;
        match self.nodes.remove(idx) {
            Node::Element(e) => Some(e),
            Node::Text(_) => unreachable!(),
        }
    }

    /// Appends a child element.
    pub fn append_child(&mut self, child: Element) -> &mut Element {
        self.nodes.push(Node::Element(child));
        match self.nodes.last_mut().unwrap() {
            Node::Element(e) => e,
            Node::Text(_) => unreachable!(),
        }
    }

    /// Appends a text node.
    pub fn append_text_node(&mut self, text: impl Into<String>) {
        self.nodes.push(Node::Text(text.into()));
    }

    /// Replaces all text-node children with a single text node carrying
    /// `text`, leaving element children untouched. Matches the builder's
    /// `set-content` operation.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.nodes.retain(|n| !matches!(n, Node::Text(_)));
        self.nodes.push(Node::Text(text.into()));
    }

    /// The concatenation, in document order, of all direct text-node
    /// children.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for n in &self.nodes {
            if let Node::Text(t) = n {
                out.push_str(t);
            }
        }
        out
    }

    /// Takes ownership of all children, leaving this element's node list
    /// empty.
    pub fn take_nodes(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.nodes)
    }

    /// A multi-line indented rendering for debugging; not a wire format.
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.pretty_into(&mut out, 0);
        out
    }

    fn pretty_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        if !self.namespace.is_empty() {
            out.push_str(" xmlns='");
            out.push_str(&self.namespace);
            out.push('\'');
        }
        for a in &self.attrs {
            out.push(' ');
            if let Some(ns) = &a.namespace {
                out.push_str(ns);
                out.push(':');
            }
            out.push_str(&a.name);
            out.push_str("='");
            out.push_str(&a.value);
            out.push('\'');
        }
        if self.nodes.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");
        for n in &self.nodes {
            match n {
                Node::Text(t) => {
                    if !t.trim().is_empty() {
                        out.push_str(&"  ".repeat(depth + 1));
                        out.push_str(t.trim());
                        out.push('\n');
                    }
                }
                Node::Element(e) => e.pretty_into(out, depth + 1),
            }
        }
        out.push_str(&indent);
        out.push_str("</");
        out.push_str(&self.name);
        out.push_str(">\n");
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name || self.namespace != other.namespace {
            return false;
        }
        let mut a: Vec<_> = self
            .attrs
            .iter()
            .map(|x| (x.name.clone(), x.namespace.clone(), x.value.clone()))
            .collect();
        let mut b: Vec<_> = other
            .attrs
            .iter()
            .map(|x| (x.name.clone(), x.namespace.clone(), x.value.clone()))
            .collect();
        a.sort();
        b.sort();
        if a != b {
            return false;
        }
        if self.text().trim() != other.text().trim() {
            return false;
        }
        let ac: Vec<&Element> = self.children().collect();
        let bc: Vec<&Element> = other.children().collect();
        ac.len() == bc.len() && ac.iter().zip(bc.iter()).all(|(x, y)| x == y)
    }
}

impl Eq for Element {}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

/// A stack-based builder realising the operation set {open-child,
/// open-child-ns, attr, attr-ns, set-content, close-child, capture-pointer,
/// assign-to}. Positional operations apply to the element currently on top
/// of the stack; `open_child`/`open_child_ns` push a new top, `close_child`
/// pops it back into its parent's children.
pub struct Builder {
    stack: Vec<Element>,
    index_stack: Vec<usize>,
    captures: HashMap<String, Vec<usize>>,
}

impl Builder {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Builder {
            stack: vec![Element::new(name, namespace)],
            index_stack: Vec::new(),
            captures: HashMap::new(),
        }
    }

    fn top(&mut self) -> &mut Element {
        self.stack.last_mut().expect("builder stack is never empty")
    }

    /// `attr key value`.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.top().set_attr(key, value);
        self
    }

    /// `attr-ns key ns value`.
    pub fn attr_ns(
        mut self,
        key: impl Into<String>,
        namespace: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.top().set_attr_ns(key, namespace, value);
        self
    }

    /// `set-content text`.
    pub fn set_content(mut self, text: impl Into<String>) -> Self {
        self.top().set_text(text);
        self
    }

    /// `open-child name`, inheriting the current element's namespace.
    pub fn open_child(self, name: impl Into<String>) -> Self {
        let ns = self.stack.last().unwrap().ns().to_owned();
        self.open_child_ns(name, ns)
    }

    /// `open-child-ns name ns`.
    pub fn open_child_ns(mut self, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let idx = self.stack.last().unwrap().nodes().len();
        self.index_stack.push(idx);
        self.stack.push(Element::new(name, namespace));
        self
    }

    /// `capture-pointer label`: remembers the path to the currently open
    /// child so it can be retrieved from the finished tree via
    /// [`Built::get`] (the builder's `assign-to` counterpart).
    pub fn capture_pointer(mut self, label: impl Into<String>) -> Self {
        self.captures.insert(label.into(), self.index_stack.clone());
        self
    }

    /// `close-child`: pops the current child, appending it to its parent.
    pub fn close_child(mut self) -> Self {
        let child = self
            .stack
            .pop()
            .expect("close_child called without a matching open_child");
        self.index_stack.pop();
        self.stack
            .last_mut()
            .expect("close_child closed the root element")
            .nodes
            .push(Node::Element(child));
        self
    }

    /// Finishes the builder. Panics if a child opened with `open_child`/
    /// `open_child_ns` was never closed.
    pub fn build(mut self) -> Built {
        assert_eq!(
            self.stack.len(),
            1,
            "builder finished with an unclosed child"
        );
        Built {
            element: self.stack.pop().unwrap(),
            captures: self.captures,
        }
    }
}

/// The result of [`Builder::build`]: the finished element plus any labels
/// registered via `capture_pointer`.
pub struct Built {
    element: Element,
    captures: HashMap<String, Vec<usize>>,
}

impl Built {
    /// `assign-to label`: resolves a previously captured pointer against the
    /// finished tree.
    pub fn get(&self, label: &str) -> Option<&Element> {
        let path = self.captures.get(label)?;
        let mut cur = &self.element;
        for &idx in path {
            cur = match cur.nodes.get(idx)? {
                Node::Element(e) => e,
                Node::Text(_) => return None,
            };
        }
        Some(cur)
    }

    pub fn into_element(self) -> Element {
        self.element
    }

    pub fn element(&self) -> &Element {
        &self.element
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_nested_tree() {
        let built = Element::builder("iq", "jabber:client")
            .attr("type", "get")
            .attr("id", "abc")
            .open_child_ns("query", "jabber:iq:auth")
            .capture_pointer("query")
            .open_child("username")
            .set_content("romeo")
            .close_child()
            .close_child()
            .build();

        let el = built.element();
        assert_eq!(el.name(), "iq");
        assert_eq!(el.attr("type"), Some("get"));
        let query = built.get("query").unwrap();
        assert_eq!(query.name(), "query");
        assert_eq!(query.ns(), "jabber:iq:auth");
        let username = query.get_child("username", "jabber:iq:auth").unwrap();
        assert_eq!(username.text(), "romeo");
    }

    #[test]
    fn equality_ignores_attribute_order_and_trims_text() {
        let a = Element::builder("presence", "jabber:client")
            .attr("to", "a@b")
            .attr("id", "1")
            .set_content("  hi  ")
            .build()
            .into_element();
        let b = Element::builder("presence", "jabber:client")
            .attr("id", "1")
            .attr("to", "a@b")
            .set_content("hi")
            .build()
            .into_element();
        assert_eq!(a, b);
    }

    #[test]
    fn equality_respects_child_order() {
        let a = Element::builder("x", "urn:a")
            .open_child("one")
            .close_child()
            .open_child("two")
            .close_child()
            .build()
            .into_element();
        let b = Element::builder("x", "urn:a")
            .open_child("two")
            .close_child()
            .open_child("one")
            .close_child()
            .build()
            .into_element();
        assert_ne!(a, b);
    }
}
