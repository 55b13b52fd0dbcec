//! Instrumentation points supplied for a method.

/// A source location to record, keyed by its offset in the original body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequencePoint {
    /// Offset of the instruction in the body before instrumentation
    pub offset: u32,
    /// Coverage id reported by the probe
    pub id: u32,
}

/// One outgoing edge of a conditional branch or `switch`.
///
/// `offset` is the original offset of the branch instruction itself. `path` 0 is the
/// fall-through edge; `path` n is the n-th target of the branch operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchPoint {
    /// Offset of the branch instruction in the body before instrumentation
    pub offset: u32,
    /// Edge discriminator
    pub path: u32,
    /// Coverage id reported by the probe
    pub id: u32,
}

/// Everything to instrument in a single method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentationPoints {
    /// Sequence points, in any order
    pub sequence_points: Vec<SequencePoint>,
    /// Branch points, in any order
    pub branch_points: Vec<BranchPoint>,
}

impl InstrumentationPoints {
    /// Create a point set
    #[must_use]
    pub fn new(sequence_points: Vec<SequencePoint>, branch_points: Vec<BranchPoint>) -> Self {
        InstrumentationPoints {
            sequence_points,
            branch_points,
        }
    }

    /// True if there is nothing to instrument
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence_points.is_empty() && self.branch_points.is_empty()
    }

    /// The sequence point whose probe ends up first in the body; the idempotency guard looks
    /// for it.
    ///
    /// That is the lowest offset, and among points sharing it the one supplied first, since
    /// probes on one offset are inserted in supply order.
    #[must_use]
    pub fn first_sequence_point(&self) -> Option<&SequencePoint> {
        self.sequence_points.iter().min_by_key(|point| point.offset)
    }

    /// Largest sequence point id
    #[must_use]
    pub fn max_sequence_id(&self) -> Option<u32> {
        self.sequence_points.iter().map(|point| point.id).max()
    }

    /// Largest branch point id
    #[must_use]
    pub fn max_branch_id(&self) -> Option<u32> {
        self.branch_points.iter().map(|point| point.id).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary() {
        let points = InstrumentationPoints::new(
            vec![
                SequencePoint { offset: 7, id: 3 },
                SequencePoint { offset: 0, id: 9 },
            ],
            vec![BranchPoint {
                offset: 2,
                path: 1,
                id: 12,
            }],
        );

        assert!(!points.is_empty());
        assert_eq!(points.first_sequence_point().map(|p| p.id), Some(9));
        assert_eq!(points.max_sequence_id(), Some(9));
        assert_eq!(points.max_branch_id(), Some(12));
        assert!(InstrumentationPoints::default().is_empty());
        assert_eq!(InstrumentationPoints::default().max_branch_id(), None);
    }

    #[test]
    fn first_point_keeps_supply_order_on_ties() {
        let points = InstrumentationPoints::new(
            vec![
                SequencePoint { offset: 4, id: 1 },
                SequencePoint { offset: 0, id: 5 },
                SequencePoint { offset: 0, id: 3 },
            ],
            Vec::new(),
        );
        assert_eq!(points.first_sequence_point().map(|p| p.id), Some(5));
    }
}
