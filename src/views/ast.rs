use super::value::{DataSource, Mask, Row, Value};
use crate::error::Result;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Joins ancestor block names into a qualified name (`outer:inner`)
pub const QUALIFIED_NAME_SEPARATOR: char = ':';

/// A pending operation a block must wait for before it renders
pub type WaitHandle = Shared<BoxFuture<'static, Result<()>>>;

/// A parsed variable reference: `{name}`, `{{name}}`, `{name.path|mask}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Bare variable name
    pub name: String,
    /// Sub-keys for nested lookup, `a.b.c` gives `["b", "c"]`
    pub path: Vec<String>,
    /// Masks applied left to right
    pub masks: Vec<String>,
    /// Single-brace placeholders escape, double-brace ones emit raw
    pub escape: bool,
}

impl Placeholder {
    /// Split a tag name into variable, deep path and mask chain.
    /// Masks are split off first, so `a.b|m` is `a` -> `b` piped through `m`.
    pub fn parse(tag: &str, escape: bool) -> Self {
        let mut masks = tag.split('|').filter(|s| !s.is_empty());
        let reference = masks.next().unwrap_or_default();
        let masks = masks.map(str::to_string).collect();

        let mut segments = reference.split('.').filter(|s| !s.is_empty());
        let name = segments.next().unwrap_or_default().to_string();
        let path = segments.map(str::to_string).collect();

        Self {
            name,
            path,
            masks,
            escape,
        }
    }

    /// An unescaped placeholder with no path or masks
    pub fn raw(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Vec::new(),
            masks: Vec::new(),
            escape: false,
        }
    }
}

/// One element of a block's parsed content
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Placeholder(Placeholder),
}

/// Everything about a block the public API may change after parsing
pub(crate) struct BlockState {
    pub vars: IndexMap<String, Value>,
    pub masks: HashMap<String, Mask>,
    pub visible: bool,
    pub data_source: Option<DataSource>,
    pub wait_set: Vec<WaitHandle>,
}

/// What the renderer needs from a block's state, copied out of the lock
pub(crate) struct BlockSnapshot {
    pub vars: IndexMap<String, Value>,
    pub masks: HashMap<String, Mask>,
    pub visible: bool,
    pub data_source: Option<DataSource>,
}

/// A named scope of template text
///
/// Name and content are fixed at parse time. Variables, masks, visibility,
/// data source and wait set live behind a lock so a shared `Arc<Block>` can
/// be configured through the view before rendering.
pub struct Block {
    name: String,
    qualified_name: String,
    parent: Option<String>,
    content: Vec<Segment>,
    state: RwLock<BlockState>,
}

impl Block {
    pub(crate) fn new(
        name: impl Into<String>,
        qualified_name: String,
        parent: Option<String>,
        content: Vec<Segment>,
        vars: IndexMap<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            qualified_name,
            parent,
            content,
            state: RwLock::new(BlockState {
                vars,
                masks: HashMap::new(),
                visible: true,
                data_source: None,
                wait_set: Vec::new(),
            }),
        }
    }

    /// Local name (empty for the root)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ancestor names joined by `:` (empty for the root)
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Qualified name of the enclosing block, `None` for the root
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn content(&self) -> &[Segment] {
        &self.content
    }

    /// Name used in logs and error messages
    pub fn display_name(&self) -> &str {
        if self.qualified_name.is_empty() {
            "<root>"
        } else {
            &self.qualified_name
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BlockState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BlockState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_visible(&self) -> bool {
        self.read().visible
    }

    pub(crate) fn set_visible(&self, visible: bool) {
        self.write().visible = visible;
    }

    /// Current value of a variable in this block's own table
    pub fn var(&self, name: &str) -> Option<Value> {
        self.read().vars.get(name).cloned()
    }

    pub(crate) fn set_var(&self, name: impl Into<String>, value: Value) {
        self.write().vars.insert(name.into(), value);
    }

    pub(crate) fn merge_vars(&self, row: Row) {
        self.write().vars.extend(row);
    }

    pub(crate) fn add_mask(&self, name: impl Into<String>, mask: Mask) {
        self.write().masks.insert(name.into(), mask);
    }

    pub(crate) fn remove_mask(&self, name: &str) {
        self.write().masks.remove(name);
    }

    pub(crate) fn set_data_source(&self, source: DataSource) {
        self.write().data_source = Some(source);
    }

    pub(crate) fn add_wait(&self, handle: WaitHandle) {
        self.write().wait_set.push(handle);
    }

    pub(crate) fn wait_set(&self) -> Vec<WaitHandle> {
        self.read().wait_set.clone()
    }

    pub(crate) fn snapshot(&self) -> BlockSnapshot {
        let state = self.read();
        BlockSnapshot {
            vars: state.vars.clone(),
            masks: state.masks.clone(),
            visible: state.visible,
            data_source: state.data_source.clone(),
        }
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("qualified_name", &self.qualified_name)
            .field("segments", &self.content.len())
            .finish()
    }
}

/// Join a parent's qualified name and a local block name
pub fn qualify(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, QUALIFIED_NAME_SEPARATOR, name)
    }
}

/// Lookup table from qualified name to block, shared by a whole template tree
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    blocks: Arc<DashMap<String, Arc<Block>>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, qualified_name: &str) -> Option<Arc<Block>> {
        self.blocks
            .get(qualified_name)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.blocks.contains_key(qualified_name)
    }

    pub(crate) fn register(&self, block: Arc<Block>) {
        log::trace!("Registering block '{}'", block.display_name());
        self.blocks.insert(block.qualified_name().to_string(), block);
    }

    /// Move every block of `other` into this registry
    pub(crate) fn absorb(&self, other: BlockRegistry) {
        for entry in other.blocks.iter() {
            self.blocks
                .insert(entry.key().clone(), Arc::clone(entry.value()));
        }
    }

    /// Unregister `qualified_name` and every block nested under it
    pub(crate) fn remove_subtree(&self, qualified_name: &str) {
        let prefix = format!("{}{}", qualified_name, QUALIFIED_NAME_SEPARATOR);
        self.blocks
            .retain(|name, _| name.as_str() != qualified_name && !name.starts_with(&prefix));
    }

    /// Qualified names of every registered block except the root, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .blocks
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        names
    }

    /// `block` followed by its ancestors up to the root
    pub(crate) fn lineage(&self, block: &Arc<Block>) -> Vec<Arc<Block>> {
        let mut chain = vec![Arc::clone(block)];
        let mut parent = block.parent().map(str::to_string);

        while let Some(name) = parent {
            match self.get(&name) {
                Some(ancestor) => {
                    parent = ancestor.parent().map(str::to_string);
                    chain.push(ancestor);
                }
                None => break,
            }
        }

        chain
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_parse() {
        let p = Placeholder::parse("price|round|currency", true);
        assert_eq!(p.name, "price");
        assert!(p.path.is_empty());
        assert_eq!(p.masks, vec!["round", "currency"]);

        let p = Placeholder::parse("items.length", false);
        assert_eq!(p.name, "items");
        assert_eq!(p.path, vec!["length"]);
        assert!(p.masks.is_empty());
        assert!(!p.escape);
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("", "row"), "row");
        assert_eq!(qualify("outer", "inner"), "outer:inner");
    }

    #[test]
    fn test_registry_lineage() {
        let registry = BlockRegistry::new();
        let root = Arc::new(Block::new("", String::new(), None, vec![], IndexMap::new()));
        let outer = Arc::new(Block::new(
            "outer",
            "outer".to_string(),
            Some(String::new()),
            vec![],
            IndexMap::new(),
        ));
        let inner = Arc::new(Block::new(
            "inner",
            "outer:inner".to_string(),
            Some("outer".to_string()),
            vec![],
            IndexMap::new(),
        ));
        registry.register(root);
        registry.register(Arc::clone(&outer));
        registry.register(Arc::clone(&inner));

        let lineage: Vec<String> = registry
            .lineage(&inner)
            .iter()
            .map(|b| b.display_name().to_string())
            .collect();
        assert_eq!(lineage, vec!["outer:inner", "outer", "<root>"]);
        assert_eq!(registry.names(), vec!["outer", "outer:inner"]);
    }

    #[test]
    fn test_registry_remove_subtree() {
        let registry = BlockRegistry::new();
        for (name, parent) in [("slot", ""), ("slot:old", "slot"), ("slotted", "")] {
            registry.register(Arc::new(Block::new(
                name.rsplit(':').next().unwrap_or(name),
                name.to_string(),
                Some(parent.to_string()),
                vec![],
                IndexMap::new(),
            )));
        }

        registry.remove_subtree("slot");
        assert_eq!(registry.names(), vec!["slotted"]);
    }
}
