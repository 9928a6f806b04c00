use std::collections::{HashMap, HashSet, VecDeque};

use stepgraph_core::types::{Link, StepNo};

use super::model::GraphModel;

/// Find the first step reached from more than one of `starts`.
///
/// Runs a breadth-first search from all starts at once, remembering for
/// every step which starts have reached it. The first step to collect a
/// second start is the join point. `None` starts and dangling links are
/// ignored. Returns `None` when the paths never meet.
pub fn find_first_join_point(
    graph: &GraphModel,
    starts: impl IntoIterator<Item = Option<StepNo>>,
) -> Option<StepNo> {
    let mut reached_by: HashMap<StepNo, HashSet<StepNo>> = HashMap::new();
    let mut queue: VecDeque<(StepNo, StepNo)> = VecDeque::new();

    for start in starts.into_iter().flatten() {
        reached_by.entry(start).or_default().insert(start);
        queue.push_back((start, start));
    }

    while let Some((current, source)) = queue.pop_front() {
        for link in graph.outbound(current) {
            let Some(next) = link.to_step_no else {
                continue;
            };

            let sources = reached_by.entry(next).or_default();
            if sources.insert(source) {
                if sources.len() > 1 {
                    return Some(next);
                }
                queue.push_back((next, source));
            }
        }
    }

    None
}

/// Join point of the branches leaving `step_no`.
pub fn find_join_point_for_step(graph: &GraphModel, step_no: StepNo) -> Option<StepNo> {
    find_first_join_point(graph, graph.destinations(step_no))
}

/// Join point of the branches a set of links leads into.
pub fn find_join_point_for_links<'a>(
    graph: &GraphModel,
    links: impl IntoIterator<Item = &'a Link>,
) -> Option<StepNo> {
    find_first_join_point(graph, links.into_iter().map(|l| l.to_step_no))
}
