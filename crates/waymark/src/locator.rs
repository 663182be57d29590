//! Locator abstraction for element selection.
//!
//! A [`Locator`] is pure data: a root lookup followed by an ordered list of
//! narrowing steps. Nothing touches the page until a driver resolves it, so a
//! locator can be built once and reused across actions while the DOM changes
//! underneath it.
//!
//! [`LocatorOptions`] is the declarative form used by `TestService::get_locator`.
//! Its criteria are always appended in the same order:
//!
//! 1. text filters
//! 2. attribute filters
//! 3. positional selection (nth, first, last)
//! 4. DOM relationships
//! 5. element state
//!
//! The order is part of the contract. `nth(0)` followed by a state filter can
//! select nothing where the reverse order would select an element.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Attribute used for test-id lookups
pub const TEST_ID_ATTRIBUTE: &str = "data-testid";

/// Bounding box for element positioning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// X position
    pub x: f32,
    /// Y position
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre point as `(x, y)`
    #[must_use]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Where resolution starts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocatorRoot {
    /// Elements whose `data-testid` equals the value
    TestId(String),
    /// Every element in the document
    All,
    /// Elements matching a CSS selector
    Css(String),
}

/// Text comparison mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextMatch {
    /// Case-insensitive substring of the whitespace-normalized text
    Contains,
    /// Whitespace-normalized text equals the value exactly
    Exact,
}

/// Element state filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementState {
    /// Rendered with a non-empty box
    Visible,
    /// Not rendered
    Hidden,
    /// No `disabled` attribute
    Enabled,
    /// Has a `disabled` attribute
    Disabled,
    /// Checked checkbox or radio
    Checked,
    /// Not checked
    Unchecked,
}

impl ElementState {
    /// Lower-case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Checked => "checked",
            Self::Unchecked => "unchecked",
        }
    }
}

/// DOM relationship used to move from the current candidates to new ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    /// Keep candidates whose parent matches the selector
    Parent,
    /// Replace candidates with their direct children that match
    Child,
    /// Replace candidates with their following siblings that match
    Sibling,
    /// Keep candidates that have an ancestor matching the selector
    Ancestor,
    /// Replace candidates with their descendants that match
    Descendant,
}

impl Relation {
    const fn name(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
            Self::Sibling => "sibling",
            Self::Ancestor => "ancestor",
            Self::Descendant => "descendant",
        }
    }
}

/// One narrowing step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocatorStep {
    /// Filter by text content
    HasText {
        /// Text to compare against
        text: String,
        /// Comparison mode
        mode: TextMatch,
    },
    /// Filter by attribute equality
    Attribute {
        /// Attribute name
        name: String,
        /// Required value
        value: String,
    },
    /// Filter by class token
    Class(String),
    /// Keep only the element at this index
    Nth(usize),
    /// Keep only the first element
    First,
    /// Keep only the last element
    Last,
    /// Move along a DOM relationship
    Related {
        /// Relationship to follow
        relation: Relation,
        /// CSS selector the related element must match
        selector: String,
    },
    /// Filter by element state
    State(ElementState),
}

/// Lazy, reusable element reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    root: LocatorRoot,
    steps: Vec<LocatorStep>,
}

impl Locator {
    /// Elements carrying `data-testid="<id>"`
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::from_root(LocatorRoot::TestId(id.into()))
    }

    /// Every element in the document
    #[must_use]
    pub fn all() -> Self {
        Self::from_root(LocatorRoot::All)
    }

    /// Elements matching a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::from_root(LocatorRoot::Css(selector.into()))
    }

    const fn from_root(root: LocatorRoot) -> Self {
        Self {
            root,
            steps: Vec::new(),
        }
    }

    /// Root lookup
    #[must_use]
    pub const fn root(&self) -> &LocatorRoot {
        &self.root
    }

    /// Narrowing steps in application order
    #[must_use]
    pub fn steps(&self) -> &[LocatorStep] {
        &self.steps
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: LocatorStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Keep elements whose text contains `text` (case-insensitive)
    #[must_use]
    pub fn has_text(self, text: impl Into<String>) -> Self {
        self.step(LocatorStep::HasText {
            text: text.into(),
            mode: TextMatch::Contains,
        })
    }

    /// Keep elements whose whole text is `text`
    #[must_use]
    pub fn exact_text(self, text: impl Into<String>) -> Self {
        self.step(LocatorStep::HasText {
            text: text.into(),
            mode: TextMatch::Exact,
        })
    }

    /// Keep elements with `name="value"`
    #[must_use]
    pub fn attribute(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.step(LocatorStep::Attribute {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Keep elements carrying a class token
    #[must_use]
    pub fn class(self, class: impl Into<String>) -> Self {
        self.step(LocatorStep::Class(class.into()))
    }

    /// Keep the element at `index`
    #[must_use]
    pub fn nth(self, index: usize) -> Self {
        self.step(LocatorStep::Nth(index))
    }

    /// Keep the first element
    #[must_use]
    pub fn first(self) -> Self {
        self.step(LocatorStep::First)
    }

    /// Keep the last element
    #[must_use]
    pub fn last(self) -> Self {
        self.step(LocatorStep::Last)
    }

    /// Follow a DOM relationship
    #[must_use]
    pub fn related(self, relation: Relation, selector: impl Into<String>) -> Self {
        self.step(LocatorStep::Related {
            relation,
            selector: selector.into(),
        })
    }

    /// Keep elements in `state`
    #[must_use]
    pub fn state(self, state: ElementState) -> Self {
        self.step(LocatorStep::State(state))
    }

    /// Compile to a JavaScript expression evaluating to an `Element[]` in
    /// document order
    #[must_use]
    pub fn to_js(&self) -> String {
        let mut js = String::from(
            "(() => {\n\
             const norm = (s) => (s || '').replace(/\\s+/g, ' ').trim();\n\
             const visible = (el) => { const r = el.getBoundingClientRect(); \
             const st = getComputedStyle(el); \
             return r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none'; };\n\
             const uniq = (xs) => Array.from(new Set(xs));\n",
        );

        js.push_str(&match &self.root {
            LocatorRoot::TestId(id) => format!(
                "let els = Array.from(document.querySelectorAll('*')).filter(el => el.getAttribute({}) === {});\n",
                js_str(TEST_ID_ATTRIBUTE),
                js_str(id)
            ),
            LocatorRoot::All => "let els = Array.from(document.querySelectorAll('*'));\n".to_string(),
            LocatorRoot::Css(selector) => format!(
                "let els = Array.from(document.querySelectorAll({}));\n",
                js_str(selector)
            ),
        });

        for step in &self.steps {
            js.push_str(&step_js(step));
            js.push('\n');
        }
        js.push_str("return els;\n})()");
        js
    }
}

fn step_js(step: &LocatorStep) -> String {
    match step {
        LocatorStep::HasText {
            text,
            mode: TextMatch::Contains,
        } => format!(
            "els = els.filter(el => norm(el.textContent).toLowerCase().includes({}));",
            js_str(&normalize_text(text).to_lowercase())
        ),
        LocatorStep::HasText {
            text,
            mode: TextMatch::Exact,
        } => format!(
            "els = els.filter(el => norm(el.textContent) === {});",
            js_str(&normalize_text(text))
        ),
        LocatorStep::Attribute { name, value } => format!(
            "els = els.filter(el => el.getAttribute({}) === {});",
            js_str(name),
            js_str(value)
        ),
        LocatorStep::Class(class) => format!(
            "els = els.filter(el => el.classList.contains({}));",
            js_str(class)
        ),
        LocatorStep::Nth(index) => format!("els = els.slice({index}, {});", index + 1),
        LocatorStep::First => "els = els.slice(0, 1);".to_string(),
        LocatorStep::Last => "els = els.slice(-1);".to_string(),
        LocatorStep::Related { relation, selector } => {
            let sel = js_str(selector);
            match relation {
                Relation::Parent => format!(
                    "els = els.filter(el => el.parentElement !== null && el.parentElement.matches({sel}));"
                ),
                Relation::Child => format!(
                    "els = uniq(els.flatMap(el => Array.from(el.children).filter(c => c.matches({sel}))));"
                ),
                Relation::Sibling => format!(
                    "els = uniq(els.flatMap(el => {{ const out = []; \
                     for (let s = el.nextElementSibling; s; s = s.nextElementSibling) {{ if (s.matches({sel})) out.push(s); }} \
                     return out; }}));"
                ),
                Relation::Ancestor => format!(
                    "els = els.filter(el => {{ for (let p = el.parentElement; p; p = p.parentElement) {{ if (p.matches({sel})) return true; }} return false; }});"
                ),
                Relation::Descendant => format!(
                    "els = uniq(els.flatMap(el => Array.from(el.querySelectorAll({sel}))));"
                ),
            }
        }
        LocatorStep::State(state) => match state {
            ElementState::Visible => "els = els.filter(el => visible(el));".to_string(),
            ElementState::Hidden => "els = els.filter(el => !visible(el));".to_string(),
            ElementState::Enabled => "els = els.filter(el => !el.hasAttribute('disabled'));".to_string(),
            ElementState::Disabled => "els = els.filter(el => el.hasAttribute('disabled'));".to_string(),
            ElementState::Checked => {
                "els = els.filter(el => el.checked === true || el.hasAttribute('checked'));".to_string()
            }
            ElementState::Unchecked => {
                "els = els.filter(el => !(el.checked === true || el.hasAttribute('checked')));".to_string()
            }
        },
    }
}

/// JavaScript string literal for `s`
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Collapse runs of whitespace and trim, the way locator text matching sees text
#[must_use]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether `actual` satisfies a text step
#[must_use]
pub fn text_matches(actual: &str, expected: &str, mode: TextMatch) -> bool {
    let actual = normalize_text(actual);
    let expected = normalize_text(expected);
    match mode {
        TextMatch::Contains => actual.to_lowercase().contains(&expected.to_lowercase()),
        TextMatch::Exact => actual == expected,
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            LocatorRoot::TestId(id) => write!(f, "test_id({id:?})")?,
            LocatorRoot::All => f.write_str("all()")?,
            LocatorRoot::Css(selector) => write!(f, "css({selector:?})")?,
        }
        for step in &self.steps {
            f.write_str(" >> ")?;
            match step {
                LocatorStep::HasText {
                    text,
                    mode: TextMatch::Contains,
                } => write!(f, "has_text({text:?})")?,
                LocatorStep::HasText {
                    text,
                    mode: TextMatch::Exact,
                } => write!(f, "exact_text({text:?})")?,
                LocatorStep::Attribute { name, value } => write!(f, "[{name}={value:?}]")?,
                LocatorStep::Class(class) => write!(f, ".{class}")?,
                LocatorStep::Nth(index) => write!(f, "nth({index})")?,
                LocatorStep::First => f.write_str("first()")?,
                LocatorStep::Last => f.write_str("last()")?,
                LocatorStep::Related { relation, selector } => {
                    write!(f, "{}({selector:?})", relation.name())?;
                }
                LocatorStep::State(state) => write!(f, "state({})", state.as_str())?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// LOCATOR OPTIONS
// =============================================================================

/// Declarative locator criteria, combined conjunctively
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorOptions {
    /// Text the element contains (case-insensitive)
    pub has_text: Option<String>,
    /// Whole text of the element
    pub exact_text: Option<String>,
    /// Text the element contains (case-insensitive)
    pub contains_text: Option<String>,
    /// ARIA role
    pub role: Option<String>,
    /// `aria-label` value
    pub label: Option<String>,
    /// `placeholder` value
    pub placeholder: Option<String>,
    /// `name` attribute
    pub name: Option<String>,
    /// `type` attribute
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    /// `value` attribute
    pub value: Option<String>,
    /// Class token
    pub class_name: Option<String>,
    /// `id` attribute
    pub id: Option<String>,
    /// Index among the candidates
    pub nth: Option<usize>,
    /// Keep the first candidate
    #[serde(default)]
    pub first: bool,
    /// Keep the last candidate
    #[serde(default)]
    pub last: bool,
    /// Parent must match
    pub parent: Option<String>,
    /// Move to matching direct children
    pub child: Option<String>,
    /// Move to matching following siblings
    pub sibling: Option<String>,
    /// Some ancestor must match
    pub ancestor: Option<String>,
    /// Move to matching descendants
    pub descendant: Option<String>,
    /// Element state
    pub state: Option<ElementState>,
}

macro_rules! option_setters {
    ($($(#[$doc:meta])* $fn_name:ident => $field:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $fn_name(mut self, value: impl Into<String>) -> Self {
                self.$field = Some(value.into());
                self
            }
        )*
    };
}

impl LocatorOptions {
    /// Empty criteria
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    option_setters! {
        /// Contained text
        with_has_text => has_text,
        /// Whole text
        with_exact_text => exact_text,
        /// Contained text
        with_contains_text => contains_text,
        /// ARIA role
        with_role => role,
        /// `aria-label`
        with_label => label,
        /// `placeholder`
        with_placeholder => placeholder,
        /// `name`
        with_name => name,
        /// `type`
        with_type => input_type,
        /// `value`
        with_value => value,
        /// Class token
        with_class => class_name,
        /// `id`
        with_id => id,
        /// Parent selector
        with_parent => parent,
        /// Child selector
        with_child => child,
        /// Sibling selector
        with_sibling => sibling,
        /// Ancestor selector
        with_ancestor => ancestor,
        /// Descendant selector
        with_descendant => descendant,
    }

    /// Candidate index
    #[must_use]
    pub const fn with_nth(mut self, index: usize) -> Self {
        self.nth = Some(index);
        self
    }

    /// First candidate
    #[must_use]
    pub const fn with_first(mut self) -> Self {
        self.first = true;
        self
    }

    /// Last candidate
    #[must_use]
    pub const fn with_last(mut self) -> Self {
        self.last = true;
        self
    }

    /// Element state
    #[must_use]
    pub const fn with_state(mut self, state: ElementState) -> Self {
        self.state = Some(state);
        self
    }

    /// Whether no criterion is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Append every set criterion to `locator` in the fixed order
    #[must_use]
    pub fn apply(&self, mut locator: Locator) -> Locator {
        if let Some(text) = &self.has_text {
            locator = locator.has_text(text.clone());
        }
        if let Some(text) = &self.exact_text {
            locator = locator.exact_text(text.clone());
        }
        if let Some(text) = &self.contains_text {
            locator = locator.has_text(text.clone());
        }

        let attributes = [
            ("role", &self.role),
            ("aria-label", &self.label),
            ("placeholder", &self.placeholder),
            ("name", &self.name),
            ("type", &self.input_type),
            ("value", &self.value),
        ];
        for (name, value) in attributes {
            if let Some(value) = value {
                locator = locator.attribute(name, value.clone());
            }
        }
        if let Some(class) = &self.class_name {
            locator = locator.class(class.clone());
        }
        if let Some(id) = &self.id {
            locator = locator.attribute("id", id.clone());
        }

        if let Some(index) = self.nth {
            locator = locator.nth(index);
        }
        if self.first {
            locator = locator.first();
        }
        if self.last {
            locator = locator.last();
        }

        let relations = [
            (Relation::Parent, &self.parent),
            (Relation::Child, &self.child),
            (Relation::Sibling, &self.sibling),
            (Relation::Ancestor, &self.ancestor),
            (Relation::Descendant, &self.descendant),
        ];
        for (relation, selector) in relations {
            if let Some(selector) = selector {
                locator = locator.related(relation, selector.clone());
            }
        }

        if let Some(state) = self.state {
            locator = locator.state(state);
        }
        locator
    }
}
