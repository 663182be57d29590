//! In-memory document used by the mock page.
//!
//! Elements live in an arena and are addressed by index. Selector support is
//! deliberately small: comma-separated compound selectors built from a tag or
//! `*`, `#id`, `.class`, `[attr]` and `[attr="value"]`. Combinators are not
//! understood and match nothing.

use crate::driver::ElementHandle;
use crate::locator::{
    text_matches, BoundingBox, ElementState, Locator, LocatorRoot, LocatorStep, Relation,
    TEST_ID_ATTRIBUTE,
};
use std::collections::{BTreeMap, HashSet};

/// Element description used to build a mock document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockElement {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
    children: Vec<MockElement>,
}

impl MockElement {
    /// Element with the given tag
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            visible: true,
            children: Vec::new(),
        }
    }

    /// Shorthand for `<tag data-testid="id">`
    #[must_use]
    pub fn with_test_id(tag: impl Into<String>, test_id: impl Into<String>) -> Self {
        Self::new(tag).attr(TEST_ID_ATTRIBUTE, test_id)
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the element's own text
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Render the element without a box
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Append a child
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
    visible: bool,
    value: String,
    styles: BTreeMap<String, String>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Arena-backed document
#[derive(Debug, Clone, Default)]
pub struct MockDom {
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

impl MockDom {
    /// Empty document
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every element
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    /// Append `element` (and its subtree) under `parent`, or at the top level
    pub fn append(&mut self, element: MockElement, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        let value = element.attributes.get("value").cloned().unwrap_or_default();
        self.nodes.push(Node {
            tag: element.tag,
            attributes: element.attributes,
            text: element.text,
            visible: element.visible,
            value,
            styles: BTreeMap::new(),
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(index),
            None => self.roots.push(index),
        }
        for child in element.children {
            self.append(child, Some(index));
        }
        index
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the document is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All elements in document (pre-)order
    #[must_use]
    pub fn document_order(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.collect_subtree(root, &mut out);
        }
        out
    }

    fn collect_subtree(&self, index: usize, out: &mut Vec<usize>) {
        out.push(index);
        for &child in &self.nodes[index].children {
            self.collect_subtree(child, out);
        }
    }

    fn descendants(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::new();
        for &child in &self.nodes[index].children {
            self.collect_subtree(child, &mut out);
        }
        out
    }

    /// Own text followed by every descendant's text
    #[must_use]
    pub fn text_content(&self, index: usize) -> String {
        let mut text = self.nodes[index].text.clone();
        for child in self.descendants(index) {
            let child_text = &self.nodes[child].text;
            if !child_text.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(child_text);
            }
        }
        text
    }

    /// Attribute value
    #[must_use]
    pub fn attribute(&self, index: usize, name: &str) -> Option<&str> {
        self.nodes[index].attributes.get(name).map(String::as_str)
    }

    /// Rendered: the element and all its ancestors are visible
    #[must_use]
    pub fn is_visible(&self, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            if !self.nodes[i].visible {
                return false;
            }
            current = self.nodes[i].parent;
        }
        true
    }

    /// Show or hide an element
    pub fn set_visible(&mut self, index: usize, visible: bool) {
        self.nodes[index].visible = visible;
    }

    /// Current form value
    #[must_use]
    pub fn value(&self, index: usize) -> &str {
        &self.nodes[index].value
    }

    /// Replace the form value
    pub fn set_value(&mut self, index: usize, value: &str) {
        self.nodes[index].value = value.to_string();
    }

    /// Inline style property, empty when unset
    #[must_use]
    pub fn style(&self, index: usize, property: &str) -> String {
        self.nodes[index]
            .styles
            .get(property)
            .cloned()
            .unwrap_or_default()
    }

    /// Set an inline style property; empty removes it
    pub fn set_style(&mut self, index: usize, property: &str, value: &str) {
        let styles = &mut self.nodes[index].styles;
        if value.is_empty() {
            styles.remove(property);
        } else {
            styles.insert(property.to_string(), value.to_string());
        }
    }

    /// First element carrying `data-testid="test_id"`
    #[must_use]
    pub fn find_test_id(&self, test_id: &str) -> Option<usize> {
        self.document_order()
            .into_iter()
            .find(|&i| self.attribute(i, TEST_ID_ATTRIBUTE) == Some(test_id))
    }

    /// Handle describing element `index`
    #[must_use]
    pub fn handle(&self, index: usize) -> ElementHandle {
        let node = &self.nodes[index];
        let mut handle = ElementHandle::new(format!("mock-{index}"), node.tag.clone());
        handle.text_content = Some(self.text_content(index));
        if self.is_visible(index) {
            handle.bounding_box = Some(BoundingBox::new(0.0, index as f32 * 24.0, 200.0, 24.0));
        }
        handle
    }

    /// Arena index encoded in a handle id
    #[must_use]
    pub fn index_of(handle: &ElementHandle) -> Option<usize> {
        handle.id.strip_prefix("mock-")?.parse().ok()
    }

    /// Whether element `index` matches a selector list
    #[must_use]
    pub fn matches(&self, index: usize, selector: &str) -> bool {
        selector
            .split(',')
            .filter_map(Compound::parse)
            .any(|compound| compound.matches(&self.nodes[index]))
    }

    /// Resolve a locator to arena indices in document order
    #[must_use]
    pub fn resolve(&self, locator: &Locator) -> Vec<usize> {
        let all = self.document_order();
        let mut els: Vec<usize> = match locator.root() {
            LocatorRoot::TestId(id) => all
                .into_iter()
                .filter(|&i| self.attribute(i, TEST_ID_ATTRIBUTE) == Some(id.as_str()))
                .collect(),
            LocatorRoot::All => all,
            LocatorRoot::Css(selector) => all
                .into_iter()
                .filter(|&i| self.matches(i, selector))
                .collect(),
        };

        for step in locator.steps() {
            els = self.apply_step(els, step);
        }
        els
    }

    fn apply_step(&self, els: Vec<usize>, step: &LocatorStep) -> Vec<usize> {
        match step {
            LocatorStep::HasText { text, mode } => els
                .into_iter()
                .filter(|&i| text_matches(&self.text_content(i), text, *mode))
                .collect(),
            LocatorStep::Attribute { name, value } => els
                .into_iter()
                .filter(|&i| self.attribute(i, name) == Some(value.as_str()))
                .collect(),
            LocatorStep::Class(class) => els
                .into_iter()
                .filter(|&i| {
                    self.attribute(i, "class")
                        .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
                })
                .collect(),
            LocatorStep::Nth(n) => els.get(*n).copied().into_iter().collect(),
            LocatorStep::First => els.first().copied().into_iter().collect(),
            LocatorStep::Last => els.last().copied().into_iter().collect(),
            LocatorStep::Related { relation, selector } => {
                self.apply_relation(els, *relation, selector)
            }
            LocatorStep::State(state) => els
                .into_iter()
                .filter(|&i| self.in_state(i, *state))
                .collect(),
        }
    }

    fn apply_relation(&self, els: Vec<usize>, relation: Relation, selector: &str) -> Vec<usize> {
        match relation {
            Relation::Parent => els
                .into_iter()
                .filter(|&i| {
                    self.nodes[i]
                        .parent
                        .is_some_and(|p| self.matches(p, selector))
                })
                .collect(),
            Relation::Ancestor => els
                .into_iter()
                .filter(|&i| {
                    let mut current = self.nodes[i].parent;
                    while let Some(p) = current {
                        if self.matches(p, selector) {
                            return true;
                        }
                        current = self.nodes[p].parent;
                    }
                    false
                })
                .collect(),
            Relation::Child => unique(els.into_iter().flat_map(|i| {
                self.nodes[i]
                    .children
                    .iter()
                    .copied()
                    .filter(|&c| self.matches(c, selector))
                    .collect::<Vec<_>>()
            })),
            Relation::Sibling => unique(els.into_iter().flat_map(|i| {
                self.following_siblings(i)
                    .into_iter()
                    .filter(|&s| self.matches(s, selector))
                    .collect::<Vec<_>>()
            })),
            Relation::Descendant => unique(els.into_iter().flat_map(|i| {
                self.descendants(i)
                    .into_iter()
                    .filter(|&d| self.matches(d, selector))
                    .collect::<Vec<_>>()
            })),
        }
    }

    fn following_siblings(&self, index: usize) -> Vec<usize> {
        let siblings = match self.nodes[index].parent {
            Some(p) => &self.nodes[p].children,
            None => &self.roots,
        };
        siblings
            .iter()
            .skip_while(|&&s| s != index)
            .skip(1)
            .copied()
            .collect()
    }

    fn in_state(&self, index: usize, state: ElementState) -> bool {
        let has = |name: &str| self.nodes[index].attributes.contains_key(name);
        match state {
            ElementState::Visible => self.is_visible(index),
            ElementState::Hidden => !self.is_visible(index),
            ElementState::Enabled => !has("disabled"),
            ElementState::Disabled => has("disabled"),
            ElementState::Checked => has("checked"),
            ElementState::Unchecked => !has("checked"),
        }
    }
}

fn unique(items: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut seen = HashSet::new();
    items.filter(|i| seen.insert(*i)).collect()
}

/// One compound selector such as `button.primary[type="submit"]`
#[derive(Debug, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Compound {
    fn parse(raw: &str) -> Option<Self> {
        let mut chars = raw.trim().chars().peekable();
        let mut compound = Self::default();

        let tag = take_ident(&mut chars);
        if !tag.is_empty() {
            compound.tag = Some(tag.to_ascii_lowercase());
        } else if chars.peek() == Some(&'*') {
            chars.next();
        }

        while let Some(ch) = chars.next() {
            match ch {
                '#' => compound.id = Some(take_ident(&mut chars)),
                '.' => compound.classes.push(take_ident(&mut chars)),
                '[' => {
                    let inner: String = chars.by_ref().take_while(|&c| c != ']').collect();
                    let attribute = match inner.split_once('=') {
                        Some((name, value)) => (
                            name.trim().to_string(),
                            Some(value.trim().trim_matches(['"', '\'']).to_string()),
                        ),
                        None => (inner.trim().to_string(), None),
                    };
                    compound.attributes.push(attribute);
                }
                _ => return None,
            }
        }

        if compound == Self::default() && !raw.trim().starts_with('*') {
            return None;
        }
        Some(compound)
    }

    fn matches(&self, node: &Node) -> bool {
        if self.tag.as_ref().is_some_and(|tag| *tag != node.tag) {
            return false;
        }
        if self
            .id
            .as_ref()
            .is_some_and(|id| node.attributes.get("id") != Some(id))
        {
            return false;
        }
        let classes: Vec<&str> = node
            .attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default();
        if !self.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        self.attributes
            .iter()
            .all(|(name, value)| match (node.attributes.get(name), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            })
    }
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&ch) = chars.peek() {
        if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            ident.push(ch);
            chars.next();
        } else {
            break;
        }
    }
    ident
}
