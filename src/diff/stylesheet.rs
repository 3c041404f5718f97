use std::collections::BTreeMap;

use itertools::Itertools;

use super::Differ;
use crate::{math::Map, signature::Node};

/// A single change to a stylesheet. Rules are addressed by their position in the sheet at
/// the time the patch is applied, patches have to be applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StylePatch {
    /// Inserts `rule` at position `index`.
    InsertRule {
        /// Position of the new rule.
        index: usize,
        /// The rule.
        rule: Node,
    },
    /// Deletes the rule at position `index`.
    DeleteRule {
        /// Position of the rule.
        index: usize,
        /// Its selector.
        selector: String,
    },
    /// Replaces the rule at position `index`, used when nested rules changed.
    ReplaceRule {
        /// Position of the rule.
        index: usize,
        /// The new rule.
        rule: Node,
    },
    /// Sets a declaration of the rule at position `index`.
    SetDeclaration {
        /// Position of the rule.
        index: usize,
        /// Its selector.
        selector: String,
        /// The property.
        property: String,
        /// The new value.
        value: String,
    },
    /// Removes a declaration of the rule at position `index`.
    RemoveDeclaration {
        /// Position of the rule.
        index: usize,
        /// Its selector.
        selector: String,
        /// The property.
        property: String,
    },
    /// Replaces the whole sheet.
    Replace(Node),
}

/// Diffs stylesheets rule by rule.
///
/// Rules are matched by their selector and by how often that selector occurred before, so a
/// sheet with two `.btn` rules matches them in order. Unmatched old rules are deleted from
/// the back, unmatched new ones inserted from the front, and matched ones are patched
/// declaration by declaration. If the matched rules appear in a different order, the whole
/// sheet is replaced instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct StylesheetDiffer;

type RuleKey<'a> = (&'a str, usize);

fn rule_keys(rules: &[Node]) -> Vec<RuleKey<'_>> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    rules
        .iter()
        .map(|rule| {
            let selector = match rule {
                Node::Rule { selector, .. } => selector.as_str(),
                other => other.kind(),
            };
            let occurrence = seen.entry(selector).or_insert(0);
            *occurrence += 1;
            (selector, *occurrence - 1)
        })
        .collect()
}

fn declaration_patches(
    index: usize,
    selector: &str,
    old: &Map<String, String>,
    new: &Map<String, String>,
    out: &mut Vec<StylePatch>,
) {
    for property in old.keys().chain(new.keys()).sorted().dedup() {
        match (old.get(property), new.get(property)) {
            (Some(_), None) => out.push(StylePatch::RemoveDeclaration {
                index,
                selector: selector.to_string(),
                property: property.clone(),
            }),
            (before, Some(value)) if before != Some(value) => {
                out.push(StylePatch::SetDeclaration {
                    index,
                    selector: selector.to_string(),
                    property: property.clone(),
                    value: value.clone(),
                })
            }
            _ => {}
        }
    }
}

impl StylesheetDiffer {
    fn diff_rules(&self, old: &[Node], new: &[Node]) -> Option<Vec<StylePatch>> {
        let old_keys = rule_keys(old);
        let new_keys = rule_keys(new);
        let old_index: BTreeMap<RuleKey<'_>, usize> =
            old_keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();
        let new_index: BTreeMap<RuleKey<'_>, usize> =
            new_keys.iter().enumerate().map(|(i, k)| (*k, i)).collect();

        let kept_in_old = old_keys.iter().filter(|k| new_index.contains_key(*k));
        let kept_in_new = new_keys.iter().filter(|k| old_index.contains_key(*k));
        if !kept_in_old.eq(kept_in_new) {
            return None;
        }

        let mut out = vec![];
        for (index, key) in old_keys.iter().enumerate().rev() {
            if !new_index.contains_key(key) {
                out.push(StylePatch::DeleteRule {
                    index,
                    selector: key.0.to_string(),
                });
            }
        }

        for (index, (key, rule)) in new_keys.iter().zip(new).enumerate() {
            let Some(&before) = old_index.get(key) else {
                out.push(StylePatch::InsertRule {
                    index,
                    rule: rule.clone(),
                });
                continue;
            };
            match (&old[before], rule) {
                (
                    Node::Rule {
                        declarations: old_declarations,
                        children: old_children,
                        ..
                    },
                    Node::Rule {
                        selector,
                        declarations,
                        children,
                    },
                ) if old_children == children => {
                    declaration_patches(index, selector, old_declarations, declarations, &mut out)
                }
                (previous, rule) if previous != rule => out.push(StylePatch::ReplaceRule {
                    index,
                    rule: rule.clone(),
                }),
                _ => {}
            }
        }
        Some(out)
    }
}

impl Differ for StylesheetDiffer {
    type Patch = StylePatch;

    fn diff(&mut self, old: &Node, new: &Node) -> Vec<StylePatch> {
        if old == new {
            return vec![];
        }
        match (old, new) {
            (Node::Stylesheet { rules: old_rules }, Node::Stylesheet { rules: new_rules }) => self
                .diff_rules(old_rules, new_rules)
                .unwrap_or_else(|| self.replace(new)),
            _ => self.replace(new),
        }
    }

    fn replace(&mut self, new: &Node) -> Vec<StylePatch> {
        vec![StylePatch::Replace(new.clone())]
    }
}

/// Applies `patches` to a copy of `sheet` and returns the result. Patches that address
/// rules which do not exist are skipped.
pub fn apply(sheet: &Node, patches: &[StylePatch]) -> Node {
    let mut sheet = sheet.clone();
    for patch in patches {
        if let StylePatch::Replace(node) = patch {
            sheet = node.clone();
            continue;
        }
        let Node::Stylesheet { rules } = &mut sheet else {
            continue;
        };
        match patch {
            StylePatch::InsertRule { index, rule } => {
                rules.insert((*index).min(rules.len()), rule.clone())
            }
            StylePatch::DeleteRule { index, .. } if *index < rules.len() => {
                rules.remove(*index);
            }
            StylePatch::ReplaceRule { index, rule } => {
                if let Some(slot) = rules.get_mut(*index) {
                    *slot = rule.clone();
                }
            }
            StylePatch::SetDeclaration {
                index,
                property,
                value,
                ..
            } => {
                if let Some(Node::Rule { declarations, .. }) = rules.get_mut(*index) {
                    declarations.insert(property.clone(), value.clone());
                }
            }
            StylePatch::RemoveDeclaration {
                index, property, ..
            } => {
                if let Some(Node::Rule { declarations, .. }) = rules.get_mut(*index) {
                    declarations.remove(property);
                }
            }
            _ => {}
        }
    }
    sheet
}

impl std::fmt::Display for StylePatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StylePatch::InsertRule { index, .. } => write!(f, "insert rule at {index}"),
            StylePatch::DeleteRule { index, selector } => write!(f, "delete {selector} at {index}"),
            StylePatch::ReplaceRule { index, .. } => write!(f, "replace rule at {index}"),
            StylePatch::SetDeclaration {
                selector,
                property,
                value,
                ..
            } => write!(f, "{selector} {{ {property}: {value} }}"),
            StylePatch::RemoveDeclaration {
                selector, property, ..
            } => write!(f, "{selector} {{ -{property} }}"),
            StylePatch::Replace(node) => {
                write!(f, "replace sheet with {} rules", node.children().len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::apply;
    use crate::prelude::*;

    fn diff(old: &Node, new: &Node) -> Vec<StylePatch> {
        StylesheetDiffer.diff(old, new)
    }

    #[test]
    fn declarations_are_patched_in_order() {
        let old = Node::stylesheet([Node::rule(".btn")
            .with_declaration("color", "red")
            .with_declaration("padding", "4px")]);
        let new = Node::stylesheet([Node::rule(".btn")
            .with_declaration("margin", "0")
            .with_declaration("color", "blue")]);

        let patches = diff(&old, &new);
        let selector = ".btn".to_string();
        assert_eq!(
            patches,
            vec![
                StylePatch::SetDeclaration {
                    index: 0,
                    selector: selector.clone(),
                    property: "color".into(),
                    value: "blue".into()
                },
                StylePatch::SetDeclaration {
                    index: 0,
                    selector: selector.clone(),
                    property: "margin".into(),
                    value: "0".into()
                },
                StylePatch::RemoveDeclaration {
                    index: 0,
                    selector,
                    property: "padding".into()
                },
            ]
        );
        assert_eq!(apply(&old, &patches), new);
    }

    #[test]
    fn rules_are_inserted_and_deleted() {
        let old = Node::stylesheet([
            Node::rule("body").with_declaration("margin", "0"),
            Node::rule(".old").with_declaration("display", "none"),
            Node::rule(".btn").with_declaration("color", "red"),
        ]);
        let new = Node::stylesheet([
            Node::rule(":root").with_declaration("--accent", "teal"),
            Node::rule("body").with_declaration("margin", "0"),
            Node::rule(".btn").with_declaration("color", "red"),
            Node::rule(".btn").with_declaration("border", "none"),
        ]);

        let patches = diff(&old, &new);
        assert_eq!(
            patches[0],
            StylePatch::DeleteRule {
                index: 1,
                selector: ".old".into()
            }
        );
        assert_eq!(patches.len(), 3);
        assert_eq!(apply(&old, &patches), new);
    }

    #[test]
    fn nested_changes_replace_the_rule() {
        let old = Node::stylesheet([Node::rule("@media print")
            .with_child(Node::rule(".nav").with_declaration("display", "none"))]);
        let new = Node::stylesheet([Node::rule("@media print")
            .with_child(Node::rule(".nav").with_declaration("display", "block"))]);
        let patches = diff(&old, &new);
        assert!(matches!(patches[..], [StylePatch::ReplaceRule { index: 0, .. }]));
        assert_eq!(apply(&old, &patches), new);
    }

    #[test]
    fn reordered_rules_replace_the_sheet() {
        let a = Node::rule(".a").with_declaration("color", "red");
        let b = Node::rule(".b").with_declaration("color", "blue");
        let old = Node::stylesheet([a.clone(), b.clone()]);
        let new = Node::stylesheet([b, a]);
        assert_eq!(diff(&old, &new), vec![StylePatch::Replace(new.clone())]);
    }

    #[test]
    fn equal_sheets_need_no_patches() {
        let sheet = Node::stylesheet([Node::rule(".btn").with_declaration("color", "red")]);
        assert!(diff(&sheet, &sheet.clone()).is_empty());
        assert_eq!(
            diff(&sheet, &Node::text("x")),
            vec![StylePatch::Replace(Node::text("x"))]
        );
    }
}
