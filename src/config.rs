use crate::error::Error;

pub type NodeId = usize;

#[derive(Clone)]
enum NodeKind {
    Value(f64),
    Group,
    Array { scheme: NodeId },
}

#[derive(Clone)]
struct Node {
    name: String,
    kind: NodeKind,
    children: Vec<NodeId>,
}

/**
 * A hierarchical tree of named configuration nodes: floating-point value
 * leaves, groups, and arrays. An array holds a detached scheme subtree that
 * is cloned (with its default values) every time an item is appended.
 * Solvers declare the nodes they expect in `fill_configuration_scheme` and
 * read concrete values back in `apply_configuration`.
 */
pub struct Configuration {
    nodes: Vec<Node>,
}

// ============================================================================
impl Configuration {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: "root".to_string(),
                kind: NodeKind::Group,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    fn push(&mut self, parent: Option<NodeId>, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        if let Some(parent) = parent {
            self.nodes[parent].children.push(id);
        }
        id
    }

    /// Create a value leaf with a default.
    pub fn create_node(&mut self, parent: NodeId, name: &str, default: f64) -> NodeId {
        self.push(
            Some(parent),
            Node {
                name: name.to_string(),
                kind: NodeKind::Value(default),
                children: Vec::new(),
            },
        )
    }

    pub fn create_group(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.push(
            Some(parent),
            Node {
                name: name.to_string(),
                kind: NodeKind::Group,
                children: Vec::new(),
            },
        )
    }

    /// Create a detached group to serve as an array's per-item scheme.
    pub fn create_scheme(&mut self, name: &str) -> NodeId {
        self.push(
            None,
            Node {
                name: name.to_string(),
                kind: NodeKind::Group,
                children: Vec::new(),
            },
        )
    }

    pub fn create_array(&mut self, parent: NodeId, name: &str, scheme: NodeId) -> NodeId {
        self.push(
            Some(parent),
            Node {
                name: name.to_string(),
                kind: NodeKind::Array { scheme },
                children: Vec::new(),
            },
        )
    }

    /// Append one item to an array by deep-cloning its scheme subtree,
    /// defaults included.
    pub fn append_array_item(&mut self, array: NodeId) -> Result<NodeId, Error> {
        let scheme = match self.nodes[array].kind {
            NodeKind::Array { scheme } => scheme,
            _ => {
                return Err(Error::Misconfiguration(format!(
                    "node \"{}\" is not an array",
                    self.nodes[array].name
                )))
            }
        };
        let item = self.clone_subtree(scheme);
        self.nodes[array].children.push(item);
        Ok(item)
    }

    fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let node = Node {
            name: self.nodes[id].name.clone(),
            kind: self.nodes[id].kind.clone(),
            children: Vec::new(),
        };
        let copy = self.push(None, node);
        for child in self.nodes[id].children.clone() {
            let child_copy = self.clone_subtree(child);
            self.nodes[copy].children.push(child_copy);
        }
        copy
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn name_of(&self, id: NodeId) -> &str {
        &self.nodes[id].name
    }

    pub fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name)
    }

    pub fn value_of(&self, id: NodeId) -> Result<f64, Error> {
        match self.nodes[id].kind {
            NodeKind::Value(x) => Ok(x),
            _ => Err(Error::Misconfiguration(format!(
                "node \"{}\" has no scalar value",
                self.nodes[id].name
            ))),
        }
    }

    /// Overwrite a leaf's value. Non-finite values are rejected here, before
    /// any solve step can see them.
    pub fn set_value(&mut self, id: NodeId, value: f64) -> Result<(), Error> {
        if !value.is_finite() {
            return Err(Error::Misconfiguration(format!(
                "non-finite value {} for node \"{}\"",
                value, self.nodes[id].name
            )));
        }
        match self.nodes[id].kind {
            NodeKind::Value(_) => {
                self.nodes[id].kind = NodeKind::Value(value);
                Ok(())
            }
            _ => Err(Error::Misconfiguration(format!(
                "node \"{}\" cannot hold a scalar value",
                self.nodes[id].name
            ))),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
