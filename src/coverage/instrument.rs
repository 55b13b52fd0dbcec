use std::collections::BTreeMap;

use crate::{
    coverage::points::{BranchPoint, InstrumentationPoints, SequencePoint},
    il::{opcodes, FlowType, Instruction, Method, Placement},
    probe::ProbeDispatch,
    Result,
};

/// What [`instrument`] did to a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instrumented {
    /// Probes were inserted
    Applied {
        /// Number of sequence probes inserted
        sequence_probes: usize,
        /// Number of branch edge probes inserted
        branch_probes: usize,
    },
    /// The method already starts with the probe of its first sequence point
    AlreadyInstrumented,
    /// No sequence points were supplied, the method is left alone
    NoSequencePoints,
}

/// Instrument a method for sequence and branch coverage.
///
/// The idempotency guard runs first. Branch coverage is applied before sequence coverage so
/// that sequence probes placed in front of a branch target also cover the edge blocks that jump
/// to it. On success the declared stack depth grows by the probe's depth.
///
/// # Errors
/// Returns [`crate::Error::Relocation`] if an insertion fails; the method must then be
/// discarded.
pub fn instrument(
    method: &mut Method,
    points: &InstrumentationPoints,
    dispatch: &ProbeDispatch,
) -> Result<Instrumented> {
    if points.sequence_points.is_empty() {
        return Ok(Instrumented::NoSequencePoints);
    }
    if is_instrumented(method, points, dispatch) {
        return Ok(Instrumented::AlreadyInstrumented);
    }

    let branch_probes = add_branch_coverage(method, &points.branch_points, dispatch)?;
    let sequence_probes = add_sequence_coverage(method, &points.sequence_points, dispatch)?;
    method.increase_max_stack(dispatch.stack_depth());

    Ok(Instrumented::Applied {
        sequence_probes,
        branch_probes,
    })
}

/// True if the instructions at the first sequence point's offset are exactly its probe.
#[must_use]
pub fn is_instrumented(
    method: &Method,
    points: &InstrumentationPoints,
    dispatch: &ProbeDispatch,
) -> bool {
    let Some(first) = points.first_sequence_point() else {
        return false;
    };
    let Some(anchor) = method.find_by_original_offset(first.offset) else {
        return false;
    };

    let expected = dispatch.probe_instructions(first.id);
    let mut actual = method.sequence_from(anchor);
    expected.iter().all(|probe| {
        actual
            .next()
            .is_some_and(|instruction| instruction.same_as(probe))
    })
}

/// Insert a probe in front of the instruction at each sequence point's original offset.
///
/// Points are processed in ascending offset order; several points on one offset run in that
/// order too. Points that do not name an instruction are skipped.
///
/// # Errors
/// Returns [`crate::Error::Relocation`] if an insertion fails.
pub fn add_sequence_coverage(
    method: &mut Method,
    points: &[SequencePoint],
    dispatch: &ProbeDispatch,
) -> Result<usize> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|point| point.offset);

    let mut inserted = 0;
    for point in sorted {
        let Some(anchor) = method.find_by_original_offset(point.offset) else {
            log::debug!(
                "Sequence point {} at IL_{:04x} does not start an instruction, skipped",
                point.id,
                point.offset
            );
            continue;
        };
        method.insert(anchor, dispatch.probe_instructions(point.id), Placement::Before)?;
        inserted += 1;
    }

    Ok(inserted)
}

/// Insert one probe per covered edge of each conditional branch or `switch`.
///
/// The new code goes right after the branch: the fall-through probe, then a `br` to the
/// original next instruction, then one `probe; br target` block per covered taken edge. The
/// branch operand is pointed at those blocks, so each probe records the edge rather than the
/// destination.
///
/// # Errors
/// Returns [`crate::Error::Relocation`] if an insertion fails.
pub fn add_branch_coverage(
    method: &mut Method,
    points: &[BranchPoint],
    dispatch: &ProbeDispatch,
) -> Result<usize> {
    let mut by_offset: BTreeMap<u32, BTreeMap<u32, u32>> = BTreeMap::new();
    for point in points {
        by_offset
            .entry(point.offset)
            .or_default()
            .insert(point.path, point.id);
    }

    let mut inserted = 0;
    for (offset, paths) in by_offset {
        let Some(branch) = method.find_by_original_offset(offset) else {
            log::debug!("Branch point at IL_{offset:04x} does not start an instruction, skipped");
            continue;
        };
        let Some(instruction) = method.instruction(branch) else {
            continue;
        };
        if !matches!(
            instruction.flow(),
            FlowType::ConditionalBranch | FlowType::Switch
        ) {
            log::debug!(
                "Branch point at IL_{:04x} names {}, which has no edges to cover",
                offset,
                instruction.mnemonic()
            );
            continue;
        }
        let targets = instruction.targets().to_vec();
        let Some(next) = method.next_of(branch) else {
            log::debug!("Branch at IL_{offset:04x} has no fall-through instruction, skipped");
            continue;
        };

        let mut code = Vec::new();
        if let Some(id) = paths.get(&0) {
            code.extend(dispatch.probe_instructions(*id));
            inserted += 1;
        }

        let taken: Vec<(usize, u32)> = targets
            .iter()
            .enumerate()
            .filter_map(|(index, _)| {
                let path = u32::try_from(index + 1).ok()?;
                paths.get(&path).map(|id| (index, *id))
            })
            .collect();

        let mut blocks = Vec::with_capacity(taken.len());
        if !taken.is_empty() {
            code.push(Instruction::branch(opcodes::BR, next));
            for (index, id) in taken {
                blocks.push((index, code.len()));
                code.extend(dispatch.probe_instructions(id));
                code.push(Instruction::branch(opcodes::BR, targets[index]));
                inserted += 1;
            }
        }

        if code.is_empty() {
            continue;
        }
        let ids = method.insert(branch, code, Placement::After)?;

        if let Some(instruction) = method.instruction_mut(branch) {
            let slots = instruction.targets_mut();
            for (index, start) in blocks {
                slots[index] = ids[start];
            }
        }
    }

    Ok(inserted)
}
