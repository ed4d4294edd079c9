//! Route groups.
//!
//! A group carries its own middleware and an optional parent. Registering a
//! route on a group flattens the ancestor middleware (root first) in front of
//! the route's handlers and stores the result in the router's route table.
//! The tree is not consulted again at dispatch time.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::handler::HandlerFunc;
use crate::srv::Srv;

struct GroupNode {
    middleware: RwLock<Vec<HandlerFunc>>,
    parent: Option<Arc<GroupNode>>,
}

/// A node in the route group tree.
#[derive(Clone)]
pub struct SrvGroup {
    srv: Srv,
    node: Arc<GroupNode>,
}

impl SrvGroup {
    pub(crate) fn new(srv: Srv, middleware: Vec<HandlerFunc>) -> Self {
        Self::with_parent(srv, None, middleware)
    }

    fn with_parent(srv: Srv, parent: Option<Arc<GroupNode>>, middleware: Vec<HandlerFunc>) -> Self {
        Self {
            srv,
            node: Arc::new(GroupNode {
                middleware: RwLock::new(middleware),
                parent,
            }),
        }
    }

    /// Append middleware to this group.
    ///
    /// Affects routes registered afterwards on this group or its children.
    pub fn use_middleware(&self, handlers: impl IntoIterator<Item = HandlerFunc>) -> &Self {
        self.node.middleware.write().extend(handlers);
        self
    }

    /// Child group whose routes run this group's middleware first.
    pub fn group(&self, handlers: impl IntoIterator<Item = HandlerFunc>) -> Self {
        Self::with_parent(
            self.srv.clone(),
            Some(Arc::clone(&self.node)),
            handlers.into_iter().collect(),
        )
    }

    /// Register `handlers` for `cmd` behind the flattened group middleware.
    pub fn handle(&self, cmd: &str, handlers: impl IntoIterator<Item = HandlerFunc>) -> &Self {
        let mut chain = self.middleware();
        let own_len = chain.len();
        chain.extend(handlers);
        if chain.len() > own_len {
            let _ = self.srv.handle(cmd, chain);
        }
        self
    }

    /// Ancestor-to-self middleware as it would be frozen into a route now.
    pub fn middleware(&self) -> Vec<HandlerFunc> {
        let mut lineage = Vec::new();
        let mut cursor = Some(&self.node);
        while let Some(node) = cursor {
            lineage.push(node);
            cursor = node.parent.as_ref();
        }
        lineage
            .into_iter()
            .rev()
            .flat_map(|node| node.middleware.read().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop() -> HandlerFunc {
        handler_fn(|c| Box::pin(async move { c.next().await }))
    }

    fn same(a: &[HandlerFunc], b: &[&HandlerFunc]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
    }

    #[test]
    fn top_level_group_prefixes_its_middleware() {
        let srv = Srv::new(Vec::new());
        let (g, h) = (noop(), noop());
        let _ = srv.group([Arc::clone(&g)]).handle("cmd", [Arc::clone(&h)]);
        let chain = srv.chain_for("cmd");
        assert!(same(&chain[..2], &[&g, &h]));
    }

    #[test]
    fn nested_groups_flatten_root_first() {
        let srv = Srv::new(Vec::new());
        let (a, b, c, h) = (noop(), noop(), noop(), noop());
        let root = srv.group([Arc::clone(&a)]);
        let child = root.group([Arc::clone(&b)]);
        let grandchild = child.group([Arc::clone(&c)]);
        assert!(same(&grandchild.middleware(), &[&a, &b, &c]));

        let _ = grandchild.handle("deep", [Arc::clone(&h)]);
        let chain = srv.chain_for("deep");
        assert!(same(&chain[..4], &[&a, &b, &c, &h]));
    }

    #[test]
    fn group_middleware_is_frozen_at_registration() {
        let srv = Srv::new(Vec::new());
        let (early, late, h) = (noop(), noop(), noop());
        let group = srv.group([Arc::clone(&early)]);
        let _ = group.handle("cmd", [Arc::clone(&h)]);
        let _ = group.use_middleware([Arc::clone(&late)]);

        let chain = srv.chain_for("cmd");
        // early + h + chain end
        assert_eq!(chain.len(), 3);
        assert!(same(&chain[..2], &[&early, &h]));
    }

    #[test]
    fn parent_use_reaches_later_child_routes() {
        let srv = Srv::new(Vec::new());
        let (p1, p2, c1, h) = (noop(), noop(), noop(), noop());
        let parent = srv.group([Arc::clone(&p1)]);
        let child = parent.group([Arc::clone(&c1)]);
        let _ = parent.use_middleware([Arc::clone(&p2)]);
        let _ = child.handle("cmd", [Arc::clone(&h)]);
        let chain = srv.chain_for("cmd");
        assert!(same(&chain[..4], &[&p1, &p2, &c1, &h]));
    }

    #[test]
    fn sibling_groups_are_independent() {
        let srv = Srv::new(Vec::new());
        let (a, b, h1, h2) = (noop(), noop(), noop(), noop());
        let root = srv.group(Vec::new());
        let _ = root.group([Arc::clone(&a)]).handle("one", [Arc::clone(&h1)]);
        let _ = root.group([Arc::clone(&b)]).handle("two", [Arc::clone(&h2)]);
        assert!(same(&srv.chain_for("one")[..2], &[&a, &h1]));
        assert!(same(&srv.chain_for("two")[..2], &[&b, &h2]));
    }

    #[test]
    fn handle_without_handlers_is_ignored() {
        let srv = Srv::new(Vec::new());
        let _ = srv.group([noop()]).handle("cmd", Vec::new());
        // not-found + chain end
        assert_eq!(srv.chain_for("cmd").len(), 2);
    }
}
