use std::collections::HashMap;

use stepgraph_core::error::{Result, StepGraphError};
use stepgraph_core::types::{Link, Revision, Step, StepNo};

/// Read-only view of one revision's steps and links.
///
/// Steps are keyed by step number. Links are grouped by origin step and keep
/// the order they were stored in, which is the order the resolver tries
/// them.
#[derive(Debug, Clone, Default)]
pub struct GraphModel {
    start_step_no: Option<StepNo>,
    steps: HashMap<StepNo, Step>,
    links: HashMap<StepNo, Vec<Link>>,
}

impl GraphModel {
    pub fn new(
        start_step_no: Option<StepNo>,
        steps: impl IntoIterator<Item = Step>,
        links: impl IntoIterator<Item = Link>,
    ) -> Self {
        let steps = steps.into_iter().map(|s| (s.step_no, s)).collect();
        let mut link_map: HashMap<StepNo, Vec<Link>> = HashMap::new();
        for link in links {
            link_map.entry(link.from_step_no).or_default().push(link);
        }
        Self {
            start_step_no,
            steps,
            links: link_map,
        }
    }

    pub fn from_revision(revision: &Revision) -> Self {
        Self::new(
            revision.start_step_no,
            revision.steps.iter().cloned(),
            revision.links.iter().cloned(),
        )
    }

    /// Check that the start step and every link destination exist.
    pub fn validate(&self) -> Result<()> {
        if let Some(start) = self.start_step_no {
            if !self.steps.contains_key(&start) {
                return Err(StepGraphError::StepNotFound(start));
            }
        }

        let mut origins: Vec<_> = self.links.keys().copied().collect();
        origins.sort_unstable();
        for origin in origins {
            for link in &self.links[&origin] {
                if let Some(to) = link.to_step_no {
                    if !self.steps.contains_key(&to) {
                        return Err(StepGraphError::StepNotFound(to));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn start_step_no(&self) -> Option<StepNo> {
        self.start_step_no
    }

    pub fn step(&self, step_no: StepNo) -> Result<&Step> {
        self.steps
            .get(&step_no)
            .ok_or(StepGraphError::StepNotFound(step_no))
    }

    pub fn get_step(&self, step_no: StepNo) -> Option<&Step> {
        self.steps.get(&step_no)
    }

    pub fn contains(&self, step_no: StepNo) -> bool {
        self.steps.contains_key(&step_no)
    }

    /// Outbound links of a step, in stored order.
    pub fn outbound(&self, step_no: StepNo) -> &[Link] {
        self.links.get(&step_no).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Destinations of a step's outbound links, dangling ones included.
    pub fn destinations(&self, step_no: StepNo) -> Vec<Option<StepNo>> {
        self.outbound(step_no).iter().map(|l| l.to_step_no).collect()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
