use super::value::{Mask, Row, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Render-time variable and mask table with read-only fallback to the
/// enclosing scope.
///
/// Each rendered block instance gets its own scope; a row instance gets a
/// scope of its own on top of the block's. Lookups walk outwards, writes
/// never happen after construction, so a child can never leak into its
/// parent or siblings.
#[derive(Default)]
pub struct Scope {
    vars: Row,
    masks: HashMap<String, Mask>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new(vars: Row, masks: HashMap<String, Mask>, parent: Option<Arc<Scope>>) -> Self {
        Self {
            vars,
            masks,
            parent,
        }
    }

    /// Scope for one row of a data source, on top of the block's scope
    ///
    /// Row pairs shadow the block's variables, except for nested blocks: a
    /// row key named like a child block never replaces that block.
    pub fn for_row(index: usize, row: Row, parent: Arc<Scope>) -> Self {
        let mut vars = Row::with_capacity(row.len() + 2);
        vars.insert("index".to_string(), Value::from(index));
        vars.insert(
            "parity".to_string(),
            Value::from(if index % 2 == 0 { "even" } else { "odd" }),
        );
        for (key, value) in row {
            if matches!(parent.vars.get(&key), Some(Value::Block(_))) {
                log::trace!("Row key '{}' names a nested block, ignoring", key);
                continue;
            }
            vars.insert(key, value);
        }

        Self::new(vars, HashMap::new(), Some(parent))
    }

    /// Find a variable here or in any enclosing scope
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.vars.get(name) {
                return Some(value);
            }
            scope = scope.parent.as_deref()?;
        }
    }

    /// Find a mask here or in any enclosing scope
    pub fn mask(&self, name: &str) -> Option<&Mask> {
        let mut scope = self;
        loop {
            if let Some(mask) = scope.masks.get(name) {
                return Some(mask);
            }
            scope = scope.parent.as_deref()?;
        }
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::value::row;

    fn text(scope: &Scope, name: &str) -> Option<String> {
        scope.lookup(name).and_then(Value::to_text)
    }

    #[test]
    fn test_fallback_to_parent() {
        let parent = Arc::new(Scope::new(
            row([("title", "Home"), ("user", "ann")]),
            HashMap::new(),
            None,
        ));
        let child = Scope::new(row([("user", "bob")]), HashMap::new(), Some(parent));

        assert_eq!(text(&child, "title").as_deref(), Some("Home"));
        assert_eq!(text(&child, "user").as_deref(), Some("bob"));
        assert_eq!(text(child.parent().unwrap(), "user").as_deref(), Some("ann"));
        assert!(child.lookup("missing").is_none());
    }

    #[test]
    fn test_masks_visible_to_descendants_only() {
        let mut masks: HashMap<String, Mask> = HashMap::new();
        masks.insert("upper".to_string(), Arc::new(|v: Value| v));

        let parent = Arc::new(Scope::default());
        let child = Arc::new(Scope::new(Row::new(), masks, Some(Arc::clone(&parent))));
        let grandchild = Scope::new(Row::new(), HashMap::new(), Some(child));

        assert!(grandchild.mask("upper").is_some());
        assert!(parent.mask("upper").is_none());
    }

    #[test]
    fn test_row_scope_injects_index_and_parity() {
        let block = Arc::new(Scope::new(row([("item", "x")]), HashMap::new(), None));

        let first = Scope::for_row(0, row([("a", 1)]), Arc::clone(&block));
        assert_eq!(text(&first, "index").as_deref(), Some("0"));
        assert_eq!(text(&first, "parity").as_deref(), Some("even"));
        assert_eq!(text(&first, "item").as_deref(), Some("x"));

        let second = Scope::for_row(1, row([("index", "custom")]), block);
        assert_eq!(text(&second, "parity").as_deref(), Some("odd"));
        assert_eq!(text(&second, "index").as_deref(), Some("custom"));
    }

    #[test]
    fn test_row_key_never_shadows_nested_block() {
        let (root, _) = crate::views::parser::Parser::new()
            .parse("{#tags}{/tags}")
            .unwrap();
        let block = Arc::new(Scope::new(root.snapshot().vars, HashMap::new(), None));

        let scope = Scope::for_row(0, row([("tags", "raw"), ("name", "x")]), block);
        assert!(matches!(scope.lookup("tags"), Some(Value::Block(_))));
        assert_eq!(text(&scope, "name").as_deref(), Some("x"));
    }
}
