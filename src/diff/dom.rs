use itertools::Itertools;

use super::Differ;
use crate::{math::Map, signature::Node};

/// A path from the root to a node, each entry is a child index.
pub type Path = Vec<usize>;

/// A single change to a document tree. Paths refer to the tree as it looks when the patch
/// is applied, so patches have to be applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomPatch {
    /// Replaces the node at `path`.
    Replace {
        /// The node to replace.
        path: Path,
        /// What to put there.
        node: Node,
    },
    /// Sets an attribute, `None` sets it without value.
    SetAttribute {
        /// The element.
        path: Path,
        /// Attribute name.
        name: String,
        /// Attribute value.
        value: Option<String>,
    },
    /// Removes an attribute.
    RemoveAttribute {
        /// The element.
        path: Path,
        /// Attribute name.
        name: String,
    },
    /// Sets the content of a text node.
    SetText {
        /// The text node.
        path: Path,
        /// Its new content.
        text: String,
    },
    /// Inserts a child.
    InsertChild {
        /// The parent.
        path: Path,
        /// Position of the new child.
        index: usize,
        /// The child.
        node: Node,
    },
    /// Removes a child.
    RemoveChild {
        /// The parent.
        path: Path,
        /// Position of the child.
        index: usize,
    },
}

/// Diffs document trees positionally. Nodes of the same tag (or component kind) are patched
/// in place, everything else is replaced. Children are compared pairwise, surplus children
/// are appended or removed from the back.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomDiffer;

fn attribute_patches(
    path: &Path,
    old: &Map<String, Option<String>>,
    new: &Map<String, Option<String>>,
    out: &mut Vec<DomPatch>,
) {
    for name in old.keys().chain(new.keys()).sorted().dedup() {
        match (old.get(name), new.get(name)) {
            (Some(_), None) => out.push(DomPatch::RemoveAttribute {
                path: path.clone(),
                name: name.clone(),
            }),
            (before, Some(value)) if before != Some(value) => out.push(DomPatch::SetAttribute {
                path: path.clone(),
                name: name.clone(),
                value: value.clone(),
            }),
            _ => {}
        }
    }
}

impl DomDiffer {
    fn diff_node(&self, old: &Node, new: &Node, path: &mut Path, out: &mut Vec<DomPatch>) {
        if old == new {
            return;
        }
        match (old, new) {
            (Node::Text(_), Node::Text(text)) => out.push(DomPatch::SetText {
                path: path.clone(),
                text: text.clone(),
            }),
            (
                Node::Element {
                    tag: old_tag,
                    attributes: old_attributes,
                    children: old_children,
                },
                Node::Element {
                    tag,
                    attributes,
                    children,
                },
            ) if old_tag == tag => {
                attribute_patches(path, old_attributes, attributes, out);
                self.diff_children(old_children, children, path, out);
            }
            (
                Node::Component {
                    kind: old_kind,
                    props: old_props,
                    children: old_children,
                },
                Node::Component {
                    kind,
                    props,
                    children,
                },
            ) if old_kind == kind => {
                attribute_patches(path, old_props, props, out);
                self.diff_children(old_children, children, path, out);
            }
            _ => out.push(DomPatch::Replace {
                path: path.clone(),
                node: new.clone(),
            }),
        }
    }

    fn diff_children(&self, old: &[Node], new: &[Node], path: &mut Path, out: &mut Vec<DomPatch>) {
        for (index, (before, after)) in old.iter().zip(new).enumerate() {
            path.push(index);
            self.diff_node(before, after, path, out);
            path.pop();
        }
        for index in (new.len()..old.len()).rev() {
            out.push(DomPatch::RemoveChild {
                path: path.clone(),
                index,
            });
        }
        for (index, node) in new.iter().enumerate().skip(old.len()) {
            out.push(DomPatch::InsertChild {
                path: path.clone(),
                index,
                node: node.clone(),
            });
        }
    }
}

impl Differ for DomDiffer {
    type Patch = DomPatch;

    fn diff(&mut self, old: &Node, new: &Node) -> Vec<DomPatch> {
        let mut out = vec![];
        self.diff_node(old, new, &mut vec![], &mut out);
        out
    }

    fn replace(&mut self, new: &Node) -> Vec<DomPatch> {
        vec![DomPatch::Replace {
            path: vec![],
            node: new.clone(),
        }]
    }
}

fn children_mut(node: &mut Node) -> Option<&mut Vec<Node>> {
    match node {
        Node::Element { children, .. }
        | Node::Rule { children, .. }
        | Node::Component { children, .. } => Some(children),
        Node::Stylesheet { rules } => Some(rules),
        Node::Text(_) => None,
    }
}

fn node_at_mut<'a>(root: &'a mut Node, path: &[usize]) -> Option<&'a mut Node> {
    path.iter()
        .try_fold(root, |node, index| children_mut(node)?.get_mut(*index))
}

/// Applies `patches` to a copy of `root` and returns the result. Patches whose path does
/// not lead anywhere are skipped.
pub fn apply(root: &Node, patches: &[DomPatch]) -> Node {
    let mut root = root.clone();
    for patch in patches {
        match patch {
            DomPatch::Replace { path, node } => {
                if let Some(target) = node_at_mut(&mut root, path) {
                    *target = node.clone();
                }
            }
            DomPatch::SetAttribute { path, name, value } => {
                if let Some(
                    Node::Element { attributes, .. } | Node::Component {
                        props: attributes, ..
                    },
                ) = node_at_mut(&mut root, path)
                {
                    attributes.insert(name.clone(), value.clone());
                }
            }
            DomPatch::RemoveAttribute { path, name } => {
                if let Some(
                    Node::Element { attributes, .. } | Node::Component {
                        props: attributes, ..
                    },
                ) = node_at_mut(&mut root, path)
                {
                    attributes.remove(name);
                }
            }
            DomPatch::SetText { path, text } => {
                if let Some(Node::Text(content)) = node_at_mut(&mut root, path) {
                    *content = text.clone();
                }
            }
            DomPatch::InsertChild { path, index, node } => {
                if let Some(children) = node_at_mut(&mut root, path).and_then(children_mut) {
                    children.insert((*index).min(children.len()), node.clone());
                }
            }
            DomPatch::RemoveChild { path, index } => {
                if let Some(children) = node_at_mut(&mut root, path).and_then(children_mut) {
                    if *index < children.len() {
                        children.remove(*index);
                    }
                }
            }
        }
    }
    root
}

#[cfg(test)]
mod tests {
    use super::apply;
    use crate::prelude::*;

    fn list<'a>(items: impl IntoIterator<Item = &'a str>) -> Node {
        items.into_iter().fold(Node::element("ul"), |ul, item| {
            ul.with_child(Node::element("li").with_child(Node::text(item)))
        })
    }

    #[test]
    fn attributes_text_and_appended_children() {
        let old = list(["milk", "eggs"]);
        let new = list(["milk", "flour", "sugar"]).with_attribute("class", "groceries");

        let patches = DomDiffer.diff(&old, &new);
        assert_eq!(
            patches,
            vec![
                DomPatch::SetAttribute {
                    path: vec![],
                    name: "class".into(),
                    value: Some("groceries".into())
                },
                DomPatch::SetText {
                    path: vec![1, 0],
                    text: "flour".into()
                },
                DomPatch::InsertChild {
                    path: vec![],
                    index: 2,
                    node: Node::element("li").with_child(Node::text("sugar"))
                },
            ]
        );
        assert_eq!(apply(&old, &patches), new);
    }

    #[test]
    fn surplus_children_are_removed_from_the_back() {
        let old = list(["a", "b", "c", "d"]).with_flag("hidden");
        let new = list(["a"]);
        let patches = DomDiffer.diff(&old, &new);
        assert_eq!(
            patches,
            vec![
                DomPatch::RemoveAttribute {
                    path: vec![],
                    name: "hidden".into()
                },
                DomPatch::RemoveChild {
                    path: vec![],
                    index: 3
                },
                DomPatch::RemoveChild {
                    path: vec![],
                    index: 2
                },
                DomPatch::RemoveChild {
                    path: vec![],
                    index: 1
                },
            ]
        );
        assert_eq!(apply(&old, &patches), new);
    }

    #[test]
    fn different_tags_are_replaced() {
        let old = Node::element("div").with_child(Node::element("span"));
        let new = Node::element("div").with_child(Node::component("badge").with_flag("new"));
        let patches = DomDiffer.diff(&old, &new);
        assert_eq!(
            patches,
            vec![DomPatch::Replace {
                path: vec![0],
                node: Node::component("badge").with_flag("new")
            }]
        );
        assert_eq!(apply(&old, &patches), new);
        assert!(DomDiffer.diff(&new, &new.clone()).is_empty());
    }
}
