use serde_json::{json, Map, Value};

/// A `terms` aggregation node and its nested children
///
/// Children are kept in insertion order; inserting an alias that already
/// exists at the same depth replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationNode {
    pub alias: String,
    pub field: String,
    pub size: usize,
    children: Vec<AggregationNode>,
}

impl AggregationNode {
    pub fn new(alias: impl Into<String>, field: impl Into<String>, size: usize) -> Self {
        Self {
            alias: alias.into(),
            field: field.into(),
            size,
            children: Vec::new(),
        }
    }

    /// Build a strictly linear chain: node *i* is the sole child of node *i-1*
    pub fn chain<I>(levels: I, size: usize) -> Option<Self>
    where
        I: IntoIterator<Item = (String, String)>,
        I::IntoIter: DoubleEndedIterator,
    {
        levels
            .into_iter()
            .rev()
            .fold(None, |child, (alias, field)| {
                let mut node = AggregationNode::new(alias, field, size);
                if let Some(child) = child {
                    node.insert_child(child);
                }
                Some(node)
            })
    }

    /// Insert a child, replacing any existing child with the same alias
    pub fn insert_child(&mut self, child: AggregationNode) {
        match self.children.iter_mut().find(|c| c.alias == child.alias) {
            Some(existing) => *existing = child,
            None => self.children.push(child),
        }
    }

    pub fn children(&self) -> &[AggregationNode] {
        &self.children
    }

    pub fn child(&self, alias: &str) -> Option<&AggregationNode> {
        self.children.iter().find(|c| c.alias == alias)
    }

    /// Number of nesting levels including this node
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    /// Aliases from this node down the first-child path
    pub fn aliases(&self) -> Vec<&str> {
        let mut aliases = vec![self.alias.as_str()];
        let mut node = self;
        while let Some(child) = node.children.first() {
            aliases.push(child.alias.as_str());
            node = child;
        }
        aliases
    }

    /// Body of this node: `{"terms": {...}, "aggs": {...}}`
    fn to_body(&self) -> Value {
        let mut body = Map::new();
        body.insert(
            "terms".to_string(),
            json!({"field": self.field, "size": self.size}),
        );
        if !self.children.is_empty() {
            body.insert("aggs".to_string(), Self::aggs_map(&self.children));
        }
        Value::Object(body)
    }

    fn aggs_map(nodes: &[AggregationNode]) -> Value {
        Value::Object(
            nodes
                .iter()
                .map(|n| (n.alias.clone(), n.to_body()))
                .collect(),
        )
    }

    /// Contents of the request's top-level `aggs` key: `{alias: {...}}`
    pub fn to_aggs(&self) -> Value {
        Self::aggs_map(std::slice::from_ref(self))
    }
}
