//! Arena-backed path trie for routes with `{name}` segments.
//!
//! Nodes live in one `Vec` and refer to each other by index. Static children
//! are keyed by their literal; dynamic children form an ordered list and are
//! never merged, so two registrations of `{id}` at the same depth produce two
//! branches tried in registration order.

use std::collections::HashMap;

use crate::{context::Params, handler::Handler};

const ROOT: usize = 0;

/// One path segment as written at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Static(&'a str),
    Dynamic(&'a str),
}

impl<'a> Segment<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) if !name.is_empty() => Segment::Dynamic(name),
            _ => Segment::Static(raw),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Segment::Dynamic(_))
    }
}

#[derive(Default)]
struct Node {
    static_children: HashMap<String, usize>,
    dynamic_children: Vec<(String, usize)>,
    handler: Option<Handler>,
}

pub struct Trie {
    nodes: Vec<Node>,
    routes: usize,
}

impl Default for Trie {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
            routes: 0,
        }
    }
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of terminal nodes carrying a handler.
    pub fn route_count(&self) -> usize {
        self.routes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Walks from the root, reusing static children and appending a new
    /// branch for every dynamic segment, then stores `handler` at the end.
    pub fn insert(&mut self, segments: &[Segment<'_>], handler: Handler) {
        let mut current = ROOT;

        for segment in segments {
            current = match *segment {
                Segment::Static(literal) => match self.nodes[current].static_children.get(literal) {
                    Some(&child) => child,
                    None => {
                        let child = self.push_node();
                        self.nodes[current]
                            .static_children
                            .insert(literal.to_string(), child);
                        child
                    }
                },
                Segment::Dynamic(name) => {
                    let child = self.push_node();
                    self.nodes[current]
                        .dynamic_children
                        .push((name.to_string(), child));
                    child
                }
            };
        }

        if self.nodes[current].handler.replace(handler).is_none() {
            self.routes += 1;
        }
    }

    /// Depth-first match: the static child first, then each dynamic child in
    /// registration order. Params are those bound along the winning path.
    pub fn find(&self, segments: &[&str]) -> Option<(Handler, Params)> {
        let mut bindings = Vec::new();
        let handler = self.walk(ROOT, segments, &mut bindings)?;
        Some((handler, bindings.into_iter().collect()))
    }

    fn walk(&self, index: usize, segments: &[&str], bindings: &mut Vec<(String, String)>) -> Option<Handler> {
        let node = &self.nodes[index];
        let Some((segment, rest)) = segments.split_first() else {
            return node.handler.clone();
        };

        if let Some(&child) = node.static_children.get(*segment) {
            if let Some(handler) = self.walk(child, rest, bindings) {
                return Some(handler);
            }
        }

        for (name, child) in &node.dynamic_children {
            bindings.push((name.clone(), (*segment).to_string()));
            if let Some(handler) = self.walk(*child, rest, bindings) {
                return Some(handler);
            }
            bindings.pop();
        }

        None
    }

    fn push_node(&mut self) -> usize {
        self.nodes.push(Node::default());
        self.nodes.len() - 1
    }
}
