//! Sender grouping

use mailramp_common::types::SenderId;
use mailramp_storage::models::{DispatchCandidate, Sender};

/// Entries of one sender, split into provider-sized batches
#[derive(Debug, Clone)]
pub struct SenderGroup {
    pub sender: Sender,
    pub batches: Vec<Vec<DispatchCandidate>>,
}

impl SenderGroup {
    pub fn sender_id(&self) -> SenderId {
        self.sender.id
    }

    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(Vec::is_empty)
    }
}

/// Partition candidates by sender.
///
/// At most `max_total` candidates are kept overall, taken in input order.
/// Within a group entries are ordered by priority (highest first), then by
/// `scheduled_for`. Groups larger than `max_batch` are split into
/// consecutive batches; a `max_batch` of zero disables splitting. Groups
/// appear in the order their sender was first seen.
pub fn group_by_sender(
    candidates: Vec<DispatchCandidate>,
    max_total: usize,
    max_batch: usize,
) -> Vec<SenderGroup> {
    let mut groups: Vec<(Sender, Vec<DispatchCandidate>)> = Vec::new();

    for candidate in candidates.into_iter().take(max_total) {
        match groups
            .iter_mut()
            .find(|(sender, _)| sender.id == candidate.sender.id)
        {
            Some((_, members)) => members.push(candidate),
            None => groups.push((candidate.sender.clone(), vec![candidate])),
        }
    }

    groups
        .into_iter()
        .map(|(sender, mut members)| {
            members.sort_by(|a, b| {
                b.entry
                    .priority
                    .cmp(&a.entry.priority)
                    .then(a.entry.scheduled_for.cmp(&b.entry.scheduled_for))
            });
            let batches = if max_batch == 0 {
                vec![members]
            } else {
                members.chunks(max_batch).map(<[_]>::to_vec).collect()
            };
            SenderGroup { sender, batches }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{at, candidate};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_groups_by_sender_fifo() {
        let a = candidate(at(9, 0));
        let mut a_late = candidate(at(9, 30));
        a_late.sender = a.sender.clone();
        let mut a_early = candidate(at(8, 0));
        a_early.sender = a.sender.clone();
        let b = candidate(at(7, 0));

        let groups = group_by_sender(
            vec![a.clone(), a_late.clone(), b.clone(), a_early.clone()],
            100,
            100,
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].sender_id(), a.sender.id);
        let order: Vec<_> = groups[0].batches[0].iter().map(|c| c.entry.id).collect();
        assert_eq!(order, vec![a_early.entry.id, a.entry.id, a_late.entry.id]);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn test_priority_breaks_ties_first() {
        let low = candidate(at(8, 0));
        let mut high = candidate(at(9, 0));
        high.sender = low.sender.clone();
        high.entry.priority = 5;

        let groups = group_by_sender(vec![low.clone(), high.clone()], 10, 10);
        assert_eq!(groups[0].batches[0][0].entry.id, high.entry.id);
    }

    #[test]
    fn test_global_ceiling() {
        let all: Vec<_> = (0..10).map(|_| candidate(at(8, 0))).collect();
        let groups = group_by_sender(all, 4, 100);
        let total: usize = groups.iter().map(SenderGroup::len).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_oversized_group_split() {
        let first = candidate(at(8, 0));
        let all: Vec<_> = (0..5)
            .map(|_| {
                let mut c = candidate(at(8, 0));
                c.sender = first.sender.clone();
                c
            })
            .collect();

        let groups = group_by_sender(all, 100, 2);
        assert_eq!(groups.len(), 1);
        let sizes: Vec<_> = groups[0].batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
