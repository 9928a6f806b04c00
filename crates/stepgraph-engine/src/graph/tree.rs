//! Nested view of a revision's flat step/link storage.
//!
//! Branches become child sequences keyed by their condition value and
//! containers become a single `push` child. Nothing is executed; broken or
//! unexpected shapes end the affected sequence with a warning instead of
//! failing the whole build.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use stepgraph_core::registry::{OutboundLinkMode, Registry};
use stepgraph_core::types::{Link, Step, StepNo};

use super::join::find_join_point_for_links;
use super::model::GraphModel;
use super::resolver::{POP, PUSH};

const DEFAULT_MAX_DEPTH: usize = 64;

/// An ordered run of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeSequence {
    pub nodes: Vec<StepNode>,
}

impl NodeSequence {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StepNode> {
        self.nodes.get(index)
    }

    pub fn step_nos(&self) -> Vec<StepNo> {
        self.nodes.iter().map(|n| n.step.step_no).collect()
    }
}

/// One step, plus the nested sequences it opens (branches or container
/// contents).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepNode {
    pub step: Step,
    pub branches: Vec<Branch>,
}

impl StepNode {
    fn new(step: Step) -> Self {
        Self {
            step,
            branches: vec![],
        }
    }

    /// The child sequence opened under `condition`.
    pub fn branch(&self, condition: &str) -> Option<&NodeSequence> {
        self.branches
            .iter()
            .find(|b| b.condition.as_deref() == Some(condition))
            .map(|b| &b.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub condition: Option<String>,
    pub sequence: NodeSequence,
}

/// Build the tree for a set of steps and links, starting at `start`.
pub fn build_tree(
    registry: &Registry,
    start: Option<StepNo>,
    steps: &[Step],
    links: &[Link],
) -> NodeSequence {
    let graph = GraphModel::new(start, steps.iter().cloned(), links.iter().cloned());
    TreeBuilder::new(registry, &graph).build(start)
}

/// Walks a [`GraphModel`] into a [`NodeSequence`].
pub struct TreeBuilder<'a> {
    registry: &'a Registry,
    graph: &'a GraphModel,
    max_depth: usize,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(registry: &'a Registry, graph: &'a GraphModel) -> Self {
        Self {
            registry,
            graph,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn build(&self, start: Option<StepNo>) -> NodeSequence {
        let mut sequence = NodeSequence::default();
        self.fill(&mut sequence, start, None, &HashSet::new(), 0);
        sequence
    }

    /// Append steps to `sequence` from `start` until the path ends or
    /// reaches `join`. `ancestors` holds every step already placed on the
    /// path leading here.
    fn fill(
        &self,
        sequence: &mut NodeSequence,
        start: Option<StepNo>,
        join: Option<StepNo>,
        ancestors: &HashSet<StepNo>,
        depth: usize,
    ) {
        if depth > self.max_depth {
            warn!(depth, max_depth = self.max_depth, "Graph nesting too deep, truncating");
            return;
        }

        let mut seen = ancestors.clone();
        let mut current = start;

        while let Some(step_no) = current {
            let Some(step) = self.graph.get_step(step_no) else {
                warn!(step_no, "Link points to a missing step");
                return;
            };

            let Some(step_type) = self.registry.find_step_type(&step.step_type_name) else {
                warn!(step_no, step_type = %step.step_type_name, "Unrecognized workflow step type");
                return;
            };

            if Some(step_no) == join {
                return;
            }

            if !seen.insert(step_no) {
                warn!(step_no, "Cycle in graph, ending sequence");
                return;
            }

            let mut node = StepNode::new(step.clone());
            let links = self.graph.outbound(step_no);

            if links.is_empty() {
                sequence.nodes.push(node);
                return;
            }

            if links.len() == 1 && links[0].condition_value.as_deref().unwrap_or("").is_empty() {
                sequence.nodes.push(node);
                current = links[0].to_step_no;
                continue;
            }

            match step_type.outbound_link_mode {
                OutboundLinkMode::Two | OutboundLinkMode::Variable => {
                    let branch_join = find_join_point_for_links(self.graph, links);
                    for link in links {
                        let mut branch = NodeSequence::default();
                        let inside = link.to_step_no.is_some()
                            && link.to_step_no != branch_join
                            && link.to_step_no != join;
                        if inside {
                            self.fill(&mut branch, link.to_step_no, branch_join, &seen, depth + 1);
                        }
                        node.branches.push(Branch {
                            condition: link.condition_value.clone(),
                            sequence: branch,
                        });
                    }
                    sequence.nodes.push(node);
                    current = branch_join;
                }
                OutboundLinkMode::Container => {
                    let push = links
                        .iter()
                        .find(|l| l.condition_value.as_deref() == Some(PUSH));
                    if let Some(first) = push.and_then(|l| l.to_step_no) {
                        let mut contents = NodeSequence::default();
                        self.fill(&mut contents, Some(first), None, &seen, depth + 1);
                        node.branches.push(Branch {
                            condition: Some(PUSH.to_string()),
                            sequence: contents,
                        });
                    }
                    sequence.nodes.push(node);

                    let pop = links
                        .iter()
                        .find(|l| l.condition_value.as_deref() == Some(POP));
                    match pop {
                        Some(link) => current = link.to_step_no,
                        None => return,
                    }
                }
                mode => {
                    warn!(
                        step_no,
                        step_type = %step.step_type_name,
                        %mode,
                        "Expected a single unconditional link for this step type"
                    );
                    sequence.nodes.push(node);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepgraph_core::registry::StepType;

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.register_step_type(StepType::new("add", OutboundLinkMode::One));
        r.register_step_type(StepType::new("branch", OutboundLinkMode::Two));
        r.register_step_type(StepType::new("fork", OutboundLinkMode::Variable));
        r.register_step_type(StepType::container("container"));
        r
    }

    #[test]
    fn test_flat_sequence() {
        let steps = vec![Step::new(1, "add"), Step::new(2, "add"), Step::new(3, "add")];
        let links = vec![Link::always(1, 2), Link::always(2, 3)];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1, 2, 3]);
        assert!(tree.nodes.iter().all(|n| n.branches.is_empty()));
    }

    #[test]
    fn test_branch_evolution() {
        let r = registry();
        let mut steps = vec![Step::new(1, "add"), Step::new(2, "branch"), Step::new(3, "add")];
        let mut links = vec![Link::always(1, 2), Link::when(2, 3, "true")];

        // one-sided branch at the end of the graph
        let tree = build_tree(&r, Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1, 2]);
        let branch = tree.get(1).unwrap();
        assert_eq!(branch.branches.len(), 1);
        assert_eq!(branch.branch("true").unwrap().step_nos(), vec![3]);

        // both sides
        steps.push(Step::new(4, "add"));
        links.push(Link::when(2, 4, "false"));
        let tree = build_tree(&r, Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1, 2]);
        let branch = tree.get(1).unwrap();
        assert_eq!(branch.branches.len(), 2);
        assert_eq!(branch.branch("true").unwrap().step_nos(), vec![3]);
        assert_eq!(branch.branch("false").unwrap().step_nos(), vec![4]);

        // reconverge after the branch
        steps.push(Step::new(5, "add"));
        links.push(Link::always(3, 5));
        links.push(Link::always(4, 5));
        let tree = build_tree(&r, Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1, 2, 5]);
        let branch = tree.get(1).unwrap();
        assert_eq!(branch.branch("true").unwrap().step_nos(), vec![3]);
        assert_eq!(branch.branch("false").unwrap().step_nos(), vec![4]);

        // wrap everything in a container
        steps.push(Step::new(6, "container"));
        links.push(Link::when(6, 1, PUSH));
        let tree = build_tree(&r, Some(6), &steps, &links);
        assert_eq!(tree.step_nos(), vec![6]);
        let container = tree.get(0).unwrap();
        assert_eq!(container.branches.len(), 1);
        assert_eq!(container.branch(PUSH).unwrap().step_nos(), vec![1, 2, 5]);
    }

    #[test]
    fn test_empty_branch_to_join() {
        // 1 branches to 2 ("true") or straight to 3 ("false"); 2 -> 3
        let steps = vec![Step::new(1, "branch"), Step::new(2, "add"), Step::new(3, "add")];
        let links = vec![Link::when(1, 2, "true"), Link::when(1, 3, "false"), Link::always(2, 3)];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1, 3]);
        let node = tree.get(0).unwrap();
        assert_eq!(node.branch("true").unwrap().step_nos(), vec![2]);
        assert!(node.branch("false").unwrap().is_empty());
    }

    #[test]
    fn test_fork_with_dangling_branch() {
        let steps = vec![Step::new(1, "fork"), Step::new(2, "add"), Step::new(3, "add")];
        let links = vec![Link::when(1, 2, "a"), Link::when(1, 3, "b"), Link {
            from_step_no: 1,
            to_step_no: None,
            condition_value: Some("c".into()),
        }];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1]);
        let node = tree.get(0).unwrap();
        assert_eq!(node.branches.len(), 3);
        assert_eq!(node.branch("a").unwrap().step_nos(), vec![2]);
        assert!(node.branch("c").unwrap().is_empty());
    }

    #[test]
    fn test_container_continues_at_pop() {
        let steps = vec![
            Step::new(1, "container"),
            Step::new(2, "add"),
            Step::new(3, "container"),
            Step::new(4, "add"),
        ];
        let links = vec![
            Link::when(1, 2, PUSH),
            Link::when(1, 3, POP),
            Link::when(3, 4, POP),
        ];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1, 3, 4]);
        assert_eq!(tree.get(0).unwrap().branch(PUSH).unwrap().step_nos(), vec![2]);
        assert!(tree.get(1).unwrap().branches.is_empty());
    }

    #[test]
    fn test_container_dangling_pop_ends() {
        let steps = vec![Step::new(1, "container"), Step::new(2, "add")];
        let links = vec![Link::when(1, 2, PUSH), Link {
            from_step_no: 1,
            to_step_no: None,
            condition_value: Some(POP.into()),
        }];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1]);
    }

    #[test]
    fn test_unknown_type_stops_sequence() {
        let steps = vec![Step::new(1, "add"), Step::new(2, "mystery"), Step::new(3, "add")];
        let links = vec![Link::always(1, 2), Link::always(2, 3)];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1]);
    }

    #[test]
    fn test_unknown_type_at_join_ends_every_sequence() {
        let steps = vec![
            Step::new(1, "branch"),
            Step::new(2, "add"),
            Step::new(3, "add"),
            Step::new(4, "mystery"),
            Step::new(5, "add"),
        ];
        let links = vec![
            Link::when(1, 2, "true"),
            Link::when(1, 3, "false"),
            Link::always(2, 4),
            Link::always(3, 4),
            Link::always(4, 5),
        ];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1]);
        let node = tree.get(0).unwrap();
        assert_eq!(node.branch("true").unwrap().step_nos(), vec![2]);
        assert_eq!(node.branch("false").unwrap().step_nos(), vec![3]);
    }

    #[test]
    fn test_missing_destination_stops_sequence() {
        let steps = vec![Step::new(1, "add")];
        let links = vec![Link::always(1, 9)];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1]);
    }

    #[test]
    fn test_cycle_is_cut() {
        let steps = vec![Step::new(1, "add"), Step::new(2, "add")];
        let links = vec![Link::always(1, 2), Link::always(2, 1)];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1, 2]);
    }

    #[test]
    fn test_conditioned_single_link_on_plain_step() {
        let steps = vec![Step::new(1, "add"), Step::new(2, "add")];
        let links = vec![Link::when(1, 2, "odd")];
        let tree = build_tree(&registry(), Some(1), &steps, &links);
        assert_eq!(tree.step_nos(), vec![1]);
    }

    #[test]
    fn test_depth_guard() {
        let r = registry();
        let steps = vec![
            Step::new(1, "container"),
            Step::new(2, "container"),
            Step::new(3, "add"),
        ];
        let links = vec![Link::when(1, 2, PUSH), Link::when(2, 3, PUSH)];
        let graph = GraphModel::new(Some(1), steps, links);
        let tree = TreeBuilder::new(&r, &graph).with_max_depth(1).build(Some(1));
        let inner = tree.get(0).unwrap().branch(PUSH).unwrap();
        assert_eq!(inner.step_nos(), vec![2]);
        assert!(inner.get(0).unwrap().branch(PUSH).unwrap().is_empty());
    }
}
