use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{
    automaton::State, error::SignatureError, math::Map, Automaton, Show, StateId, Symbol,
};

/// Marker that a present field has empty content. Absent fields contribute nothing at all,
/// so the two never collapse into the same signature.
const EMPTY: &str = "~";

/// A deterministic fingerprint of the structural content of a node or automaton state.
///
/// Signatures never depend on object identity, memory addresses or the iteration order of
/// hash maps, so two independently constructed but equal inputs produce equal signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(String);

impl Signature {
    /// Wraps a precomputed signature string.
    pub fn new<S: Into<String>>(raw: S) -> Self {
        Self(raw.into())
    }

    /// The underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Show for Signature {
    fn show(&self) -> String {
        self.0.clone()
    }
}

/// Controls which parts of a node contribute to its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureOptions {
    /// Whether attribute values, declaration values and text content are included, or only
    /// the names.
    pub include_values: bool,
    /// Whether children are descended into.
    pub include_children: bool,
    /// Nodes at this depth (the root has depth zero) or deeper are replaced by a summary of
    /// their kind and number of children.
    pub max_depth: usize,
}

impl Default for SignatureOptions {
    fn default() -> Self {
        Self {
            include_values: true,
            include_children: true,
            max_depth: 64,
        }
    }
}

impl SignatureOptions {
    /// Sets [`SignatureOptions::include_values`].
    pub fn with_values(mut self, include: bool) -> Self {
        self.include_values = include;
        self
    }

    /// Sets [`SignatureOptions::include_children`].
    pub fn with_children(mut self, include: bool) -> Self {
        self.include_children = include;
        self
    }

    /// Sets [`SignatureOptions::max_depth`].
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// A structural node as seen by the diff producers. Parsing documents or stylesheets into
/// nodes happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A document element. An attribute without value (like `disabled`) is stored as `None`.
    Element {
        /// The tag name.
        tag: String,
        /// Attributes by name.
        attributes: Map<String, Option<String>>,
        /// Child nodes in document order.
        children: Vec<Node>,
    },
    /// A text node.
    Text(String),
    /// A style rule with its declarations. Nested rules (for example inside a media query)
    /// are children.
    Rule {
        /// The selector, e.g. `.btn`.
        selector: String,
        /// Declarations by property name.
        declarations: Map<String, String>,
        /// Nested rules.
        children: Vec<Node>,
    },
    /// A whole stylesheet.
    Stylesheet {
        /// The rules in source order.
        rules: Vec<Node>,
    },
    /// A custom component. Which of its props matter is decided by the
    /// [`ComponentExtractor`] registered for its kind.
    Component {
        /// The component kind.
        kind: String,
        /// Props by name.
        props: Map<String, Option<String>>,
        /// Child nodes.
        children: Vec<Node>,
    },
}

impl Node {
    /// An element without attributes and children.
    pub fn element<S: Into<String>>(tag: S) -> Self {
        Node::Element {
            tag: tag.into(),
            attributes: Map::default(),
            children: vec![],
        }
    }

    /// A text node.
    pub fn text<S: Into<String>>(content: S) -> Self {
        Node::Text(content.into())
    }

    /// A rule without declarations.
    pub fn rule<S: Into<String>>(selector: S) -> Self {
        Node::Rule {
            selector: selector.into(),
            declarations: Map::default(),
            children: vec![],
        }
    }

    /// A stylesheet consisting of `rules`.
    pub fn stylesheet<I: IntoIterator<Item = Node>>(rules: I) -> Self {
        Node::Stylesheet {
            rules: rules.into_iter().collect(),
        }
    }

    /// A component without props and children.
    pub fn component<S: Into<String>>(kind: S) -> Self {
        Node::Component {
            kind: kind.into(),
            props: Map::default(),
            children: vec![],
        }
    }

    /// Sets an attribute of an element or a prop of a component. Other nodes are returned unchanged.
    pub fn with_attribute<K: Into<String>, V: Into<String>>(self, name: K, value: V) -> Self {
        self.with_optional_attribute(name, Some(value.into()))
    }

    /// Sets a valueless attribute of an element or a prop of a component.
    pub fn with_flag<K: Into<String>>(self, name: K) -> Self {
        self.with_optional_attribute(name, None)
    }

    fn with_optional_attribute<K: Into<String>>(mut self, name: K, value: Option<String>) -> Self {
        match &mut self {
            Node::Element { attributes, .. } => {
                attributes.insert(name.into(), value);
            }
            Node::Component { props, .. } => {
                props.insert(name.into(), value);
            }
            _ => {}
        }
        self
    }

    /// Sets a declaration of a rule. Other nodes are returned unchanged.
    pub fn with_declaration<K: Into<String>, V: Into<String>>(mut self, property: K, value: V) -> Self {
        if let Node::Rule { declarations, .. } = &mut self {
            declarations.insert(property.into(), value.into());
        }
        self
    }

    /// Appends a child. Text nodes are returned unchanged.
    pub fn with_child(mut self, child: Node) -> Self {
        match &mut self {
            Node::Element { children, .. }
            | Node::Rule { children, .. }
            | Node::Component { children, .. } => children.push(child),
            Node::Stylesheet { rules } => rules.push(child),
            Node::Text(_) => {}
        }
        self
    }

    /// The kind of the node, for components this is the component kind.
    pub fn kind(&self) -> &str {
        match self {
            Node::Element { .. } => "element",
            Node::Text(_) => "text",
            Node::Rule { .. } => "rule",
            Node::Stylesheet { .. } => "stylesheet",
            Node::Component { kind, .. } => kind,
        }
    }

    /// The children of the node, the rules of a stylesheet.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Element { children, .. }
            | Node::Rule { children, .. }
            | Node::Component { children, .. } => children,
            Node::Stylesheet { rules } => rules,
            Node::Text(_) => &[],
        }
    }
}

/// Decides which props of a custom component identify it. Returned fields are sorted by the
/// generator, a `None` value marks a field that is present without value.
pub trait ComponentExtractor {
    /// Extracts the identifying fields from the props of a component.
    fn extract(
        &self,
        props: &Map<String, Option<String>>,
        options: &SignatureOptions,
    ) -> Vec<(String, Option<String>)>;
}

impl<F> ComponentExtractor for F
where
    F: Fn(&Map<String, Option<String>>, &SignatureOptions) -> Vec<(String, Option<String>)>,
{
    fn extract(
        &self,
        props: &Map<String, Option<String>>,
        options: &SignatureOptions,
    ) -> Vec<(String, Option<String>)> {
        self(props, options)
    }
}

/// Accumulates the canonical encoding. Every string component is length-prefixed, so the
/// concatenation of components can never be confused with a different split.
#[derive(Default)]
struct SignatureWriter {
    out: String,
}

impl SignatureWriter {
    fn open(&mut self, tag: char) {
        self.out.push(tag);
        self.out.push('(');
    }

    fn close(&mut self) {
        self.out.push(')');
    }

    fn field(&mut self, value: Option<&str>) {
        match value {
            None => {}
            Some("") => self.out.push_str(EMPTY),
            Some(value) => {
                self.out.push_str(&value.len().to_string());
                self.out.push(':');
                self.out.push_str(value);
            }
        }
    }

    fn entries<'a, I>(&mut self, entries: I, include_values: bool)
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        self.out.push('[');
        for (name, value) in entries.into_iter().sorted_by(|l, r| l.0.cmp(r.0)) {
            self.field(Some(name));
            if include_values {
                if let Some(value) = value {
                    self.out.push('=');
                    self.field(Some(value));
                }
            }
            self.out.push(';');
        }
        self.out.push(']');
    }

    fn summary(&mut self, kind: &str, children: usize) {
        self.out.push_str("#(");
        self.field(Some(kind));
        self.out.push('|');
        self.out.push_str(&children.to_string());
        self.out.push(')');
    }

    fn finish(self) -> Signature {
        Signature(self.out)
    }
}

/// Computes [`Signature`]s of nodes and automaton states.
///
/// The generator holds the extractors for custom components. It is constructed explicitly
/// and passed to whoever needs it, there is no global registry.
#[derive(Default)]
pub struct SignatureGenerator {
    extractors: BTreeMap<String, Box<dyn ComponentExtractor>>,
}

impl std::fmt::Debug for SignatureGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureGenerator")
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SignatureGenerator {
    /// Creates a generator without any component extractors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `extractor` for components of the given kind.
    pub fn with_extractor<K, E>(mut self, kind: K, extractor: E) -> Self
    where
        K: Into<String>,
        E: ComponentExtractor + 'static,
    {
        self.register(kind, extractor);
        self
    }

    /// Registers `extractor` for components of the given kind, replacing a previous one.
    pub fn register<K, E>(&mut self, kind: K, extractor: E)
    where
        K: Into<String>,
        E: ComponentExtractor + 'static,
    {
        self.extractors.insert(kind.into(), Box::new(extractor));
    }

    /// Returns true if an extractor is registered for `kind`.
    pub fn recognizes(&self, kind: &str) -> bool {
        self.extractors.contains_key(kind)
    }

    /// Computes the signature of `node`. Fails if the tree contains a component whose kind
    /// has no extractor above the depth cap.
    pub fn generate(
        &self,
        node: &Node,
        options: &SignatureOptions,
    ) -> Result<Signature, SignatureError> {
        let mut writer = SignatureWriter::default();
        self.write_node(&mut writer, node, options, 0)?;
        Ok(writer.finish())
    }

    fn write_node(
        &self,
        w: &mut SignatureWriter,
        node: &Node,
        options: &SignatureOptions,
        depth: usize,
    ) -> Result<(), SignatureError> {
        if depth >= options.max_depth {
            w.summary(node.kind(), node.children().len());
            return Ok(());
        }

        match node {
            Node::Element {
                tag, attributes, ..
            } => {
                w.open('E');
                w.field(Some(tag.as_str()));
                w.entries(
                    attributes
                        .iter()
                        .map(|(name, value)| (name.as_str(), value.as_deref())),
                    options.include_values,
                );
            }
            Node::Text(content) => {
                w.open('T');
                if options.include_values {
                    w.field(Some(content.as_str()));
                }
            }
            Node::Rule {
                selector,
                declarations,
                ..
            } => {
                w.open('R');
                w.field(Some(selector.as_str()));
                w.entries(
                    declarations
                        .iter()
                        .map(|(name, value)| (name.as_str(), Some(value.as_str()))),
                    options.include_values,
                );
            }
            Node::Stylesheet { .. } => {
                w.open('S');
            }
            Node::Component { kind, props, .. } => {
                let extractor =
                    self.extractors
                        .get(kind)
                        .ok_or_else(|| SignatureError::UnrecognizedNode {
                            kind: kind.clone(),
                        })?;
                let fields = extractor.extract(props, options);
                w.open('C');
                w.field(Some(kind.as_str()));
                w.entries(
                    fields
                        .iter()
                        .map(|(name, value)| (name.as_str(), value.as_deref())),
                    options.include_values,
                );
            }
        }

        if options.include_children && !matches!(node, Node::Text(_)) {
            w.out.push('{');
            for child in node.children() {
                self.write_node(w, child, options, depth + 1)?;
            }
            w.out.push('}');
        }
        w.close();
        Ok(())
    }

    /// Computes the signature of the state `id` of `automaton` from its acceptance and its
    /// transitions on symbols of the alphabet. Returns `None` if the state does not exist.
    pub fn state_signature<S: Symbol, M>(
        &self,
        automaton: &Automaton<S, M>,
        id: StateId,
    ) -> Option<Signature> {
        let state = automaton.state(id)?;
        let mut w = SignatureWriter::default();
        self.write_state(&mut w, automaton, state);
        Some(w.finish())
    }

    fn write_state<S: Symbol, M>(
        &self,
        w: &mut SignatureWriter,
        automaton: &Automaton<S, M>,
        state: &State<S, M>,
    ) {
        w.open('Q');
        w.out.push_str(&state.is_accepting().show());
        w.out.push('[');
        for (sym, target) in automaton
            .transitions_within_alphabet(state.id())
            .sorted_by(|l, r| l.0.cmp(r.0))
        {
            w.field(Some(sym.show().as_str()));
            w.out.push('>');
            w.out.push_str(&target.to_string());
            w.out.push(';');
        }
        w.out.push(']');
        w.close();
    }

    /// Computes the signature of a whole automaton: its alphabet, its initial state and the
    /// signatures of all states in order of their ids.
    pub fn automaton_signature<S: Symbol, M>(&self, automaton: &Automaton<S, M>) -> Signature {
        let mut w = SignatureWriter::default();
        w.open('A');
        w.out.push('[');
        for sym in automaton.alphabet() {
            w.field(Some(sym.show().as_str()));
            w.out.push(';');
        }
        w.out.push(']');
        w.out.push_str(&automaton.initial().to_string());
        w.out.push('{');
        for state in automaton.states() {
            self.write_state(&mut w, automaton, state);
        }
        w.out.push('}');
        w.close();
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{prelude::*, tests::wiki_automaton};

    fn button_rule() -> Node {
        Node::rule(".btn").with_declaration("color", "red")
    }

    fn sign(node: &Node) -> Signature {
        SignatureGenerator::new()
            .generate(node, &SignatureOptions::default())
            .unwrap()
    }

    #[test]
    fn independently_built_rules_agree() {
        let first = button_rule();
        let second = Node::rule(String::from(".b") + "tn").with_declaration("color", "red");
        assert_eq!(sign(&first), sign(&second));
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let left = Node::element("input")
            .with_attribute("type", "text")
            .with_attribute("name", "email")
            .with_flag("required");
        let right = Node::element("input")
            .with_flag("required")
            .with_attribute("name", "email")
            .with_attribute("type", "text");
        assert_eq!(sign(&left), sign(&right));

        let rules_left = Node::rule("a")
            .with_declaration("margin", "0")
            .with_declaration("padding", "1px");
        let rules_right = Node::rule("a")
            .with_declaration("padding", "1px")
            .with_declaration("margin", "0");
        assert_eq!(sign(&rules_left), sign(&rules_right));
    }

    #[test]
    fn absent_and_empty_differ() {
        let flag = Node::element("button").with_flag("disabled");
        let empty = Node::element("button").with_attribute("disabled", "");
        let missing = Node::element("button");
        assert_ne!(sign(&flag), sign(&empty));
        assert_ne!(sign(&flag), sign(&missing));
        assert_ne!(sign(&empty), sign(&missing));

        let empty_text = Node::text("");
        let valueless_text = SignatureGenerator::new()
            .generate(&empty_text, &SignatureOptions::default().with_values(false))
            .unwrap();
        assert_ne!(sign(&empty_text), valueless_text);
        // the marker for empty content cannot be forged by content
        assert_ne!(sign(&empty_text), sign(&Node::text("~")));
    }

    #[test]
    fn components_do_not_run_together() {
        let left = Node::element("div").with_attribute("a", "bc");
        let right = Node::element("div").with_attribute("ab", "c");
        assert_ne!(sign(&left), sign(&right));

        let left = Node::element("p").with_child(Node::text("ab"));
        let right = Node::element("p")
            .with_child(Node::text("a"))
            .with_child(Node::text("b"));
        assert_ne!(sign(&left), sign(&right));
    }

    #[test]
    fn values_can_be_left_out() {
        let options = SignatureOptions::default().with_values(false);
        let generator = SignatureGenerator::new();
        let red = button_rule();
        let blue = Node::rule(".btn").with_declaration("color", "blue");
        assert_ne!(sign(&red), sign(&blue));
        assert_eq!(
            generator.generate(&red, &options).unwrap(),
            generator.generate(&blue, &options).unwrap()
        );
    }

    #[test]
    fn children_can_be_left_out() {
        let options = SignatureOptions::default().with_children(false);
        let generator = SignatureGenerator::new();
        let left = Node::element("ul").with_child(Node::element("li"));
        let right = Node::element("ul");
        assert_ne!(sign(&left), sign(&right));
        assert_eq!(
            generator.generate(&left, &options).unwrap(),
            generator.generate(&right, &options).unwrap()
        );
    }

    fn nested(depth: usize, leaf: &str) -> Node {
        (0..depth).fold(Node::text(leaf), |inner, _| {
            Node::element("div").with_child(inner)
        })
    }

    #[test]
    fn depth_is_capped() {
        let options = SignatureOptions::default().with_max_depth(3);
        let generator = SignatureGenerator::new();
        let left = generator.generate(&nested(500, "left"), &options).unwrap();
        let right = generator.generate(&nested(500, "right"), &options).unwrap();
        assert_eq!(left, right);
        assert!(left.as_str().contains("#("));

        // the child count of summarized nodes still counts
        let wide = Node::element("div")
            .with_child(Node::element("div").with_child(Node::element("span")))
            .with_child(Node::element("span"));
        let summarized = SignatureOptions::default().with_max_depth(1);
        assert_ne!(
            generator.generate(&wide, &summarized).unwrap(),
            generator.generate(&nested(2, "x"), &summarized).unwrap()
        );
    }

    #[test]
    fn unknown_components_fail() {
        let node = Node::element("main").with_child(Node::component("date-picker"));
        assert_eq!(
            SignatureGenerator::new().generate(&node, &SignatureOptions::default()),
            Err(SignatureError::UnrecognizedNode {
                kind: "date-picker".to_string()
            })
        );
    }

    #[test]
    fn components_use_their_extractor() {
        let generator = SignatureGenerator::new().with_extractor(
            "date-picker",
            |props: &math::Map<String, Option<String>>,
             _: &SignatureOptions|
             -> Vec<(String, Option<String>)> {
                props
                    .iter()
                    .filter(|(name, _)| name.as_str() != "id")
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            },
        );
        assert!(generator.recognizes("date-picker"));
        let left = Node::component("date-picker")
            .with_attribute("id", "a")
            .with_attribute("format", "iso");
        let right = Node::component("date-picker")
            .with_attribute("format", "iso")
            .with_attribute("id", "b");
        let options = SignatureOptions::default();
        assert_eq!(
            generator.generate(&left, &options).unwrap(),
            generator.generate(&right, &options).unwrap()
        );
    }

    #[test]
    fn state_signatures() {
        let aut = wiki_automaton();
        let generator = SignatureGenerator::new();
        let two = generator.state_signature(&aut, 2).unwrap();
        assert_eq!(Some(two.clone()), generator.state_signature(&aut, 3));
        assert_ne!(Some(two), generator.state_signature(&aut, 0));
        assert_eq!(generator.state_signature(&aut, 42), None);
    }

    #[test]
    fn automaton_signature_embeds_every_state() {
        let aut = wiki_automaton();
        let generator = SignatureGenerator::new();
        let whole = generator.automaton_signature(&aut);
        let states: String = aut
            .state_ids()
            .filter_map(|id| generator.state_signature(&aut, id))
            .map(|signature| signature.as_str().to_string())
            .collect();
        assert_eq!(states.matches('Q').count(), aut.size());
        assert!(whole.as_str().contains(&format!("{{{states}}}")));
    }

    #[test]
    fn automaton_signature_ignores_metadata() {
        let generator = SignatureGenerator::new();
        let plain = wiki_automaton();
        let annotated = wiki_automaton().map_metadata(|id, _| format!("state {id}"));
        assert_eq!(
            generator.automaton_signature(&plain),
            generator.automaton_signature(&annotated)
        );
        let mut shifted = wiki_automaton();
        shifted.set_initial(1);
        assert_ne!(
            generator.automaton_signature(&plain),
            generator.automaton_signature(&shifted)
        );
    }
}
