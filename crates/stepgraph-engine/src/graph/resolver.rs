use serde_json::Value;
use tracing::debug;

use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::registry::{OutboundLinkMode, Registry};
use stepgraph_core::types::{Step, StepNo};
use stepgraph_core::value::condition_matches;

use super::join::find_join_point_for_step;
use super::model::GraphModel;

/// Condition value a container's link into its contents carries.
pub const PUSH: &str = "push";
/// Condition value a container's link past its contents carries.
pub const POP: &str = "pop";

/// Run-scoped LIFO of the containers currently being walked.
///
/// A container's step number is pushed when the loop enters it and popped
/// once, when resolution falls off the end of its contents.
#[derive(Debug, Clone, Default)]
pub struct ContainerStack {
    frames: Vec<StepNo>,
}

impl ContainerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame, failing once `max_depth` frames are open.
    pub fn push(&mut self, step_no: StepNo, max_depth: usize) -> Result<()> {
        if self.frames.len() >= max_depth {
            return Err(StepGraphError::MaxDepthExceeded(max_depth));
        }
        self.frames.push(step_no);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<StepNo> {
        self.frames.pop()
    }

    pub fn peek(&self) -> Option<StepNo> {
        self.frames.last().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Picks the step that follows another, according to the link mode of the
/// step's type.
pub struct NextStepResolver<'a> {
    graph: &'a GraphModel,
    registry: &'a Registry,
    max_depth: usize,
}

impl<'a> NextStepResolver<'a> {
    pub fn new(graph: &'a GraphModel, registry: &'a Registry, max_depth: usize) -> Self {
        Self {
            graph,
            registry,
            max_depth,
        }
    }

    /// Resolve the step after `step`, given what it produced.
    ///
    /// `None` ends the current path: the run, or the branch when called
    /// from inside a fork.
    pub fn resolve(
        &self,
        step: &Step,
        output: &Value,
        stack: &mut ContainerStack,
    ) -> Result<Option<StepNo>> {
        let mut step_no = step.step_no;
        let mut type_name: &str = &step.step_type_name;
        let mut value = output.clone();
        let mut popping = false;

        loop {
            match self.registry.link_mode(type_name)? {
                // Stored links of a ZERO step only position it in the graph.
                OutboundLinkMode::Zero => return Ok(None),
                OutboundLinkMode::Variable => {
                    return Ok(find_join_point_for_step(self.graph, step_no));
                }
                OutboundLinkMode::Container => {
                    if popping {
                        value = Value::from(POP);
                    } else {
                        stack.push(step_no, self.max_depth)?;
                        value = Value::from(PUSH);
                    }
                }
                OutboundLinkMode::One | OutboundLinkMode::Two => {}
            }

            let mut evaluated = Vec::new();
            for link in self.graph.outbound(step_no) {
                match &link.condition_value {
                    None => return Ok(link.to_step_no),
                    Some(condition) => {
                        if condition_matches(condition, &value) {
                            return Ok(link.to_step_no);
                        }
                        evaluated.push(condition.as_str());
                    }
                }
            }

            if !evaluated.is_empty() {
                debug!(
                    step_no,
                    output = %value,
                    conditions = ?evaluated,
                    "No link condition matched"
                );
            }

            let Some(frame) = stack.pop() else {
                return Ok(None);
            };
            let container = self.graph.step(frame)?;
            step_no = container.step_no;
            type_name = &container.step_type_name;
            popping = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepgraph_core::registry::StepType;
    use stepgraph_core::types::Link;

    fn registry() -> Registry {
        let mut r = Registry::new();
        r.register_step_type(StepType::new("one", OutboundLinkMode::One));
        r.register_step_type(StepType::new("two", OutboundLinkMode::Two));
        r.register_step_type(StepType::new("zero", OutboundLinkMode::Zero));
        r.register_step_type(StepType::new("fork", OutboundLinkMode::Variable));
        r.register_step_type(StepType::container("container"));
        r
    }

    fn graph(steps: &[(StepNo, &str)], links: Vec<Link>) -> GraphModel {
        GraphModel::new(
            steps.first().map(|s| s.0),
            steps.iter().map(|(n, t)| Step::new(*n, *t)),
            links,
        )
    }

    #[test]
    fn test_boolean_branch() {
        let g = graph(
            &[(1, "two"), (2, "one"), (3, "one")],
            vec![Link::when(1, 2, "true"), Link::when(1, 3, "false")],
        );
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();
        let step = g.step(1).unwrap();

        assert_eq!(resolver.resolve(step, &json!(true), &mut stack).unwrap(), Some(2));
        assert_eq!(resolver.resolve(step, &json!(false), &mut stack).unwrap(), Some(3));
        assert_eq!(resolver.resolve(step, &json!("maybe"), &mut stack).unwrap(), None);
        assert_eq!(resolver.resolve(step, &Value::Null, &mut stack).unwrap(), None);
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let g = graph(
            &[(1, "two"), (2, "one"), (3, "one")],
            vec![Link::when(1, 2, "7"), Link::when(1, 3, "8")],
        );
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let step = g.step(1).unwrap();
        for _ in 0..3 {
            let mut stack = ContainerStack::new();
            assert_eq!(resolver.resolve(step, &json!(8), &mut stack).unwrap(), Some(3));
            assert!(stack.is_empty());
        }
    }

    #[test]
    fn test_unconditional_link_wins_in_order() {
        let g = graph(
            &[(1, "one"), (2, "one"), (3, "one")],
            vec![Link::when(1, 3, "x"), Link::always(1, 2), Link::when(1, 3, "y")],
        );
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();
        let step = g.step(1).unwrap();
        assert_eq!(resolver.resolve(step, &json!("y"), &mut stack).unwrap(), Some(2));
        assert_eq!(resolver.resolve(step, &json!("x"), &mut stack).unwrap(), Some(3));
    }

    #[test]
    fn test_zero_never_advances() {
        let g = graph(&[(1, "zero"), (2, "one")], vec![Link::always(1, 2)]);
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();
        stack.push(9, 8).unwrap();
        assert_eq!(resolver.resolve(g.step(1).unwrap(), &json!(1), &mut stack).unwrap(), None);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_variable_goes_to_join() {
        let g = graph(
            &[(1, "fork"), (2, "one"), (3, "one"), (4, "one")],
            vec![
                Link::when(1, 2, "a"),
                Link::when(1, 3, "b"),
                Link::always(2, 4),
                Link::always(3, 4),
            ],
        );
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();
        assert_eq!(resolver.resolve(g.step(1).unwrap(), &json!(true), &mut stack).unwrap(), Some(4));
    }

    #[test]
    fn test_container_push_then_pop() {
        // 1 -> [2: 3 -> 4] -> 5
        let g = graph(
            &[(1, "one"), (2, "container"), (3, "one"), (4, "one"), (5, "one")],
            vec![
                Link::always(1, 2),
                Link::when(2, 3, PUSH),
                Link::when(2, 5, POP),
                Link::always(3, 4),
            ],
        );
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();

        let next = resolver.resolve(g.step(2).unwrap(), &Value::Null, &mut stack).unwrap();
        assert_eq!(next, Some(3));
        assert_eq!(stack.peek(), Some(2));

        let next = resolver.resolve(g.step(3).unwrap(), &Value::Null, &mut stack).unwrap();
        assert_eq!(next, Some(4));

        let next = resolver.resolve(g.step(4).unwrap(), &Value::Null, &mut stack).unwrap();
        assert_eq!(next, Some(5));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_empty_container_pops_itself() {
        let g = graph(
            &[(1, "container"), (2, "one")],
            vec![Link::when(1, 2, POP)],
        );
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();
        assert_eq!(resolver.resolve(g.step(1).unwrap(), &Value::Null, &mut stack).unwrap(), Some(2));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_nested_containers_pop_in_reverse() {
        // 1 [ 2 [ 3 ] ] then 2 pops to nothing, 1 pops to 4
        let g = graph(
            &[(1, "container"), (2, "container"), (3, "one"), (4, "one")],
            vec![
                Link::when(1, 2, PUSH),
                Link::when(1, 4, POP),
                Link::when(2, 3, PUSH),
            ],
        );
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();

        assert_eq!(resolver.resolve(g.step(1).unwrap(), &Value::Null, &mut stack).unwrap(), Some(2));
        assert_eq!(resolver.resolve(g.step(2).unwrap(), &Value::Null, &mut stack).unwrap(), Some(3));
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.peek(), Some(2));

        assert_eq!(resolver.resolve(g.step(3).unwrap(), &Value::Null, &mut stack).unwrap(), Some(4));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_dangling_link_ends_without_pop() {
        let g = graph(&[(1, "one"), (2, "container")], vec![Link::dangling(1)]);
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();
        stack.push(2, 8).unwrap();
        assert_eq!(resolver.resolve(g.step(1).unwrap(), &json!(1), &mut stack).unwrap(), None);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_push_bounded_by_depth() {
        let g = graph(&[(1, "container"), (2, "one")], vec![Link::when(1, 2, PUSH)]);
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 1);
        let mut stack = ContainerStack::new();
        stack.push(7, 1).unwrap();
        let err = resolver
            .resolve(g.step(1).unwrap(), &Value::Null, &mut stack)
            .unwrap_err();
        assert!(matches!(err, StepGraphError::MaxDepthExceeded(1)));
    }

    #[test]
    fn test_unknown_step_type() {
        let g = graph(&[(1, "mystery")], vec![]);
        let r = registry();
        let resolver = NextStepResolver::new(&g, &r, 8);
        let mut stack = ContainerStack::new();
        let err = resolver
            .resolve(g.step(1).unwrap(), &Value::Null, &mut stack)
            .unwrap_err();
        assert!(matches!(err, StepGraphError::UnknownStepType(_)));
    }
}
