use std::sync::Arc;

use libwirecrab_tools::{Config, Linktype, RawFrame};

use crate::dissector::{Dissection, MatchContext};
use crate::layer::Layer;
use crate::registry::DissectorRegistry;
use crate::tree::{Fields, ProtocolNode};

/// Default bound on the number of layers built by `detect`
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Name of the pseudo layer holding frame metadata
pub const FRAME_PROTOCOL: &str = "frame";

/// Drives the dissectors of a registry over raw payloads
#[derive(Clone)]
pub struct DissectionEngine {
    registry: Arc<DissectorRegistry>,
    max_depth: usize,
}

impl DissectionEngine {
    /// Build an engine. The depth bound is read from `dissect.max_depth`.
    pub fn new(registry: Arc<DissectorRegistry>, config: &Config) -> Self {
        let max_depth = config
            .get_usize("dissect.max_depth")
            .filter(|&d| d > 0)
            .unwrap_or(DEFAULT_MAX_DEPTH);
        DissectionEngine {
            registry,
            max_depth,
        }
    }

    pub fn with_max_depth(registry: Arc<DissectorRegistry>, max_depth: usize) -> Self {
        DissectionEngine {
            registry,
            max_depth: max_depth.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<DissectorRegistry> {
        &self.registry
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decode `payload` into a protocol tree
    ///
    /// All dissectors are tried in registration order, regardless of their layer. The
    /// first one matching and parsing successfully gives the node; the data it exposes as
    /// payload is decoded the same way to build the child. Field offsets in the returned
    /// tree are relative to the start of `payload`.
    ///
    /// Returns `None` if `payload` is empty or if nothing matches.
    pub fn detect(&self, payload: &[u8], ctx: &MatchContext) -> Option<ProtocolNode> {
        let mut layers: Vec<ProtocolNode> = Vec::new();
        let mut data = payload;
        let mut base = 0;
        let mut ctx = ctx.clone();

        while !data.is_empty() && layers.len() < self.max_depth {
            let (name, dissection) = match self.dissect_one(data, &ctx) {
                Some(r) => r,
                None => break,
            };
            let mut node = ProtocolNode::new(name);
            node.fields = rebase(dissection.fields, base);
            if let Some(child) = dissection.child {
                node.child = Some(Box::new(child));
                layers.push(node);
                break;
            }
            layers.push(node);
            let inner = match dissection.payload {
                Some(p) if !p.is_empty() && p.len() < data.len() => p,
                _ => break,
            };
            let offset = match subslice_offset(data, inner) {
                Some(o) => o,
                None => {
                    warn!("dissector {} returned data outside of its input", name);
                    break;
                }
            };
            base += offset;
            data = inner;
            ctx = MatchContext {
                src_port: dissection.ports.map(|p| p.0).or(ctx.src_port),
                dst_port: dissection.ports.map(|p| p.1).or(ctx.dst_port),
                hint: dissection.next,
            };
        }

        if layers.len() >= self.max_depth {
            debug!("detect: maximum depth ({}) reached", self.max_depth);
        }

        let mut tree: Option<ProtocolNode> = None;
        while let Some(mut node) = layers.pop() {
            if let Some(child) = tree.take() {
                node.child = Some(Box::new(child));
            }
            tree = Some(node);
        }
        tree
    }

    fn dissect_one<'a>(
        &self,
        data: &'a [u8],
        ctx: &MatchContext,
    ) -> Option<(&'static str, Dissection<'a>)> {
        for d in self.registry.iter_dissectors() {
            if !d.matches(data, ctx) {
                continue;
            }
            match d.parse(data) {
                Ok(dissection) => return Some((d.name(), dissection)),
                Err(e) => {
                    debug!("dissector {} matched but failed: {}", d.name(), e);
                }
            }
        }
        None
    }

    /// Fill in the unresolved layers of an existing tree
    ///
    /// For each node named `data`, `unknown`, `raw` (or with an empty name), the dissectors
    /// of the layer implied by the position of the node are tried on the bytes of the node
    /// (or on the whole `payload` when the node has no usable position). On success the
    /// name and fields of the node are replaced. The structure of the tree never changes.
    pub fn enrich(&self, node: &mut ProtocolNode, payload: &[u8], ctx: &MatchContext) {
        let mut parent_layer: Option<Layer> = None;
        let mut depth = 0;
        let mut ctx = ctx.clone();
        let mut current = Some(node);

        while let Some(n) = current {
            if n.is_unresolved() && !payload.is_empty() {
                let layer = match parent_layer {
                    Some(l) => l.next(),
                    None => Some(Layer::from_depth(depth)),
                };
                if let Some(layer) = layer {
                    self.enrich_node(n, layer, payload, &ctx);
                }
            }
            parent_layer = self.registry.layer_of(&n.name);
            if n.name != FRAME_PROTOCOL {
                depth += 1;
            }
            ctx = MatchContext::from_parent(n, &ctx);
            current = n.child.as_deref_mut();
        }
    }

    fn enrich_node(&self, node: &mut ProtocolNode, layer: Layer, payload: &[u8], ctx: &MatchContext) {
        let (data, base) = match node.span() {
            Some(r) if r.start < r.end && r.end <= payload.len() => (&payload[r.clone()], r.start),
            Some(r) if r.end - r.start == payload.len() => (payload, r.start),
            _ => (payload, 0),
        };
        let dissector = match self.registry.find_match(layer, data, ctx) {
            Some(d) => d,
            None => {
                trace!("enrich: no {} dissector for node '{}'", layer, node.name);
                return;
            }
        };
        match dissector.parse(data) {
            Ok(dissection) => {
                debug!("enrich: '{}' resolved as {}", node.name, dissector.name());
                node.name = dissector.name().to_string();
                node.fields = rebase(dissection.fields, base);
            }
            Err(e) => {
                debug!("enrich: {} failed on node '{}': {}", dissector.name(), node.name, e);
            }
        }
    }

    /// Build the tree of a captured frame: a `frame` root node holding frame metadata,
    /// with the decoded layers as child
    pub fn frame_tree(&self, frame: &RawFrame) -> ProtocolNode {
        let mut root = ProtocolNode::new(FRAME_PROTOCOL);
        root.add_field("frame.number", frame.number.to_string());
        root.add_field(
            "frame.time_epoch",
            format!("{}.{:06}", frame.ts.secs, frame.ts.micros),
        );
        root.add_field("frame.len", frame.origlen.to_string());
        root.add_field("frame.cap_len", frame.caplen.to_string());

        let ctx = MatchContext {
            hint: link_type_hint(frame.link_type),
            ..MatchContext::default()
        };
        if let Some(tree) = self.detect(&frame.data, &ctx) {
            root.add_field("frame.protocols", format!("{}:{}", FRAME_PROTOCOL, tree.protocols()));
            root.child = Some(Box::new(tree));
        } else {
            trace!("frame {}: no dissector matched", frame.number);
        }
        root
    }
}

fn link_type_hint(link_type: Linktype) -> Option<&'static str> {
    match link_type {
        Linktype::ETHERNET => Some("eth"),
        // LINKTYPE_IPV4 and LINKTYPE_IPV6
        Linktype(228) => Some("ip"),
        Linktype(229) => Some("ipv6"),
        _ => None,
    }
}

fn rebase(fields: Fields, base: usize) -> Fields {
    if base == 0 {
        return fields;
    }
    fields
        .into_iter()
        .map(|(k, mut v)| {
            v.byte_offset = v.byte_offset.map(|o| o + base);
            (k, v)
        })
        .collect()
}

/// Offset of `inner` in `outer`, if `inner` is a sub-slice of `outer`
fn subslice_offset(outer: &[u8], inner: &[u8]) -> Option<usize> {
    let outer_start = outer.as_ptr() as usize;
    let inner_start = inner.as_ptr() as usize;
    if inner_start < outer_start || inner_start + inner.len() > outer_start + outer.len() {
        return None;
    }
    Some(inner_start - outer_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissector::{Dissection, Dissector};
    use crate::error::DissectError;

    /// Consumes one byte equal to `tag`, exposes the rest as payload
    struct Tag(&'static str, u8);

    impl Dissector for Tag {
        fn name(&self) -> &'static str {
            self.0
        }
        fn matches(&self, payload: &[u8], _ctx: &MatchContext) -> bool {
            payload.first() == Some(&self.1)
        }
        fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
            let mut d = Dissection::new();
            d.field(format!("{}.tag", self.0), self.1.to_string(), 0, 1);
            d.payload = Some(&payload[1..]);
            Ok(d)
        }
    }

    /// Matches anything, always fails
    struct Broken;

    impl Dissector for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn matches(&self, _payload: &[u8], _ctx: &MatchContext) -> bool {
            true
        }
        fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
            Err(DissectError::Truncated {
                protocol: "broken",
                needed: payload.len() + 1,
                available: payload.len(),
            })
        }
    }

    /// Matches anything, exposes the whole input again
    struct Loop;

    impl Dissector for Loop {
        fn name(&self) -> &'static str {
            "loop"
        }
        fn matches(&self, _payload: &[u8], _ctx: &MatchContext) -> bool {
            true
        }
        fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
            Ok(Dissection {
                payload: Some(payload),
                ..Dissection::default()
            })
        }
    }

    fn engine(registry: DissectorRegistry) -> DissectionEngine {
        DissectionEngine::with_max_depth(Arc::new(registry), DEFAULT_MAX_DEPTH)
    }

    fn tags() -> DissectorRegistry {
        let mut registry = DissectorRegistry::new();
        registry.register(Layer::Application, Arc::new(Broken));
        registry.register(Layer::Datalink, Arc::new(Tag("a", 1)));
        registry.register(Layer::Network, Arc::new(Tag("b", 2)));
        registry.register(Layer::Transport, Arc::new(Tag("c", 3)));
        registry
    }

    #[test]
    fn detect_chain_with_offsets() {
        let engine = engine(tags());
        let tree = engine
            .detect(&[1, 2, 3, 9], &MatchContext::default())
            .expect("tree");
        assert_eq!(tree.protocols(), "a:b:c");
        let c = tree.find("c").expect("c");
        assert_eq!(c.fields["c.tag"].byte_offset, Some(2));
    }

    #[test]
    fn detect_nothing() {
        let engine = engine(tags());
        assert!(engine.detect(&[], &MatchContext::default()).is_none());
        // only the failing dissector matches
        assert!(engine.detect(&[7, 7], &MatchContext::default()).is_none());
    }

    #[test]
    fn detect_terminates_on_non_shrinking_payload() {
        let mut registry = DissectorRegistry::new();
        registry.register(Layer::Datalink, Arc::new(Loop));
        let engine = engine(registry);
        let tree = engine.detect(&[0; 8], &MatchContext::default()).expect("tree");
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn detect_bounded_depth() {
        let mut registry = DissectorRegistry::new();
        registry.register(Layer::Datalink, Arc::new(Tag("a", 1)));
        let engine = DissectionEngine::with_max_depth(Arc::new(registry), 4);
        let tree = engine.detect(&[1; 100], &MatchContext::default()).expect("tree");
        assert_eq!(tree.depth(), 4);
    }

    #[test]
    fn enrich_resolves_sentinel_nodes() {
        let engine = engine(tags());
        let mut tree = ProtocolNode::new("frame")
            .with_child(ProtocolNode::new("a").with_child(ProtocolNode::new("data")));
        engine.enrich(&mut tree, &[2, 3], &MatchContext::default());
        assert_eq!(tree.protocols(), "frame:a:b");
        let b = tree.find("b").expect("b");
        assert_eq!(b.get("b.tag"), Some("2"));
        // links are not restructured
        assert!(b.child.is_none());
    }

    #[test]
    fn enrich_by_depth_when_parent_unknown() {
        let engine = engine(tags());
        let mut tree = ProtocolNode::new("x")
            .with_child(ProtocolNode::new("y").with_child(ProtocolNode::new("unknown")));
        engine.enrich(&mut tree, &[3], &MatchContext::default());
        assert_eq!(tree.protocols(), "x:y:c");
    }

    #[test]
    fn enrich_keeps_resolved_nodes() {
        let engine = engine(tags());
        let mut tree = ProtocolNode::new("a").with_child(ProtocolNode::new("b"));
        let before = tree.clone();
        engine.enrich(&mut tree, &[1, 2, 3], &MatchContext::default());
        assert_eq!(tree, before);
    }

    #[test]
    fn enrich_uses_node_span() {
        let engine = engine(tags());
        let mut data = ProtocolNode::new("data");
        data.add_positioned_field("data.data", "03", 2, 1);
        let mut tree = ProtocolNode::new("a").with_child(ProtocolNode::new("b").with_child(data));
        engine.enrich(&mut tree, &[1, 2, 3], &MatchContext::default());
        let c = tree.find("c").expect("c");
        assert_eq!(c.fields["c.tag"].byte_offset, Some(2));
    }
}
