//! Per-subresource resource state and split-barrier bookkeeping.

use bitflags::bitflags;

bitflags! {
    /// Usage state of a subresource. Translated to image layouts and access
    /// masks by the driver when barriers are recorded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        /// Contents may be discarded; only valid as a starting state.
        const UNDEFINED = 1 << 0;
        const COMMON = 1 << 1;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 2;
        const INDEX_BUFFER = 1 << 3;
        const RENDER_TARGET = 1 << 4;
        const UNORDERED_ACCESS = 1 << 5;
        const DEPTH_WRITE = 1 << 6;
        const DEPTH_READ = 1 << 7;
        const SHADER_RESOURCE = 1 << 8;
        const INDIRECT_ARGUMENT = 1 << 9;
        const COPY_DEST = 1 << 10;
        const COPY_SOURCE = 1 << 11;
        const PRESENT = 1 << 12;
        const HOST_ACCESS = 1 << 13;
        const RAYTRACING_ACCELERATION_STRUCTURE = 1 << 14;
    }
}

/// Split-barrier half carried by a barrier or requested for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarrierPhase {
    #[default]
    None,
    BeginOnly,
    EndOnly,
}

/// Requested target state of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    pub state: ResourceState,
    pub phase: BarrierPhase,
}

impl StateInfo {
    pub fn new(state: ResourceState) -> Self {
        Self {
            state,
            phase: BarrierPhase::None,
        }
    }

    pub fn begin_only(state: ResourceState) -> Self {
        Self {
            state,
            phase: BarrierPhase::BeginOnly,
        }
    }
}

/// Tracked state of one subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubresourceState {
    Stable(ResourceState),
    /// A begin-only barrier `from -> to` was recorded and is not completed yet.
    BeginOnlySplit {
        from: ResourceState,
        to: ResourceState,
    },
}

impl SubresourceState {
    /// The state the subresource is in, or is heading to.
    pub fn target(&self) -> ResourceState {
        match *self {
            SubresourceState::Stable(s) => s,
            SubresourceState::BeginOnlySplit { to, .. } => to,
        }
    }

    pub fn is_split_open(&self) -> bool {
        matches!(self, SubresourceState::BeginOnlySplit { .. })
    }

    /// Whether this state already satisfies `target` without any barrier.
    pub fn satisfies(&self, target: &StateInfo) -> bool {
        match *self {
            SubresourceState::Stable(s) => s == target.state,
            SubresourceState::BeginOnlySplit { .. } => false,
        }
    }

    fn contains(&self, flags: ResourceState) -> bool {
        match *self {
            SubresourceState::Stable(s) => s.intersects(flags),
            SubresourceState::BeginOnlySplit { from, to } => {
                from.intersects(flags) || to.intersects(flags)
            }
        }
    }
}

impl From<ResourceState> for SubresourceState {
    fn from(state: ResourceState) -> Self {
        SubresourceState::Stable(state)
    }
}

/// One barrier command to record for one subresource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedBarrier {
    pub subresource: u32,
    pub before: ResourceState,
    pub after: ResourceState,
    pub phase: BarrierPhase,
}

/// Barrier planner for the subresources of one resource.
///
/// At most one split barrier is open per subresource: a transition
/// requested while a split is open first closes it with an end-only
/// barrier, then starts from the state the split was heading to.
#[derive(Debug, Clone)]
pub struct BarrierTracker {
    states: Vec<SubresourceState>,
}

impl BarrierTracker {
    pub fn new(states: Vec<SubresourceState>) -> Self {
        Self { states }
    }

    pub fn states(&self) -> &[SubresourceState] {
        &self.states
    }

    pub fn into_states(self) -> Vec<SubresourceState> {
        self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Plan the barriers moving `subresource` to `target`, appending them to
    /// `out` and updating the tracked state.
    pub fn transition(&mut self, subresource: u32, target: StateInfo, out: &mut Vec<PlannedBarrier>) {
        let index = subresource as usize;

        let state = match self.states[index] {
            SubresourceState::Stable(state) => state,
            SubresourceState::BeginOnlySplit { from, to } => {
                out.push(PlannedBarrier {
                    subresource,
                    before: from,
                    after: to,
                    phase: BarrierPhase::EndOnly,
                });
                self.states[index] = SubresourceState::Stable(to);
                to
            }
        };
        if state == target.state {
            return;
        }

        match target.phase {
            BarrierPhase::BeginOnly => {
                out.push(PlannedBarrier {
                    subresource,
                    before: state,
                    after: target.state,
                    phase: BarrierPhase::BeginOnly,
                });
                self.states[index] = SubresourceState::BeginOnlySplit {
                    from: state,
                    to: target.state,
                };
            }
            // Nothing is open here, so an end-only request is a full barrier.
            BarrierPhase::None | BarrierPhase::EndOnly => {
                out.push(PlannedBarrier {
                    subresource,
                    before: state,
                    after: target.state,
                    phase: BarrierPhase::None,
                });
                self.states[index] = SubresourceState::Stable(target.state);
            }
        }
    }

    /// Plan a transition of every subresource to its matching target.
    pub fn transition_all(&mut self, targets: &[StateInfo]) -> Vec<PlannedBarrier> {
        let mut out = Vec::new();
        for (i, target) in targets.iter().enumerate() {
            self.transition(i as u32, *target, &mut out);
        }
        out
    }

    /// Plan a transition of every subresource to the same target.
    pub fn transition_all_to(&mut self, target: StateInfo) -> Vec<PlannedBarrier> {
        let mut out = Vec::new();
        for i in 0..self.states.len() {
            self.transition(i as u32, target, &mut out);
        }
        out
    }

    pub fn any_contains(&self, flags: ResourceState) -> bool {
        self.states.iter().any(|s| s.contains(flags))
    }
}
