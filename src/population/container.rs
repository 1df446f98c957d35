//! The hierarchical population container.

use crate::candidate::{Candidate, GeneticKey, Genome, Member};
use std::collections::HashSet;
use std::ops::{Add, Bound, RangeBounds, Sub};
use std::sync::Arc;

/// A tree of candidates and child populations.
///
/// `members` holds candidates placed directly in this node;
/// `subpopulations` holds child nodes. Every operation that talks about
/// "the members of a population" means [`all_members`](Self::all_members):
/// own members first, then each child's members depth-first, in order.
///
/// Children are owned by value, so a population can never contain itself.
#[derive(Debug, Clone)]
pub struct Population<G> {
    members: Vec<Member<G>>,
    subpopulations: Vec<Population<G>>,
}

impl<G: Genome> Default for Population<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Genome> Population<G> {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            subpopulations: Vec::new(),
        }
    }

    /// A flat population holding `members` in order, duplicates included.
    pub fn from_members(members: impl IntoIterator<Item = Member<G>>) -> Self {
        Self {
            members: members.into_iter().collect(),
            subpopulations: Vec::new(),
        }
    }

    /// A population with `a` and `b` as its two children, shapes preserved.
    pub fn union(a: Population<G>, b: Population<G>) -> Self {
        Self {
            members: Vec::new(),
            subpopulations: vec![a, b],
        }
    }

    /// Candidates held directly by this node.
    pub fn members(&self) -> &[Member<G>] {
        &self.members
    }

    pub fn subpopulations(&self) -> &[Population<G>] {
        &self.subpopulations
    }

    pub fn subpopulations_mut(&mut self) -> &mut [Population<G>] {
        &mut self.subpopulations
    }

    /// Lazy depth-first walk over every candidate in the tree.
    ///
    /// Restartable: each call starts a fresh walk.
    pub fn all_members(&self) -> AllMembers<'_, G> {
        AllMembers {
            members: self.members.iter(),
            pending: vec![self.subpopulations.iter()],
        }
    }

    pub fn iter(&self) -> AllMembers<'_, G> {
        self.all_members()
    }

    /// Number of candidates in the whole tree. Recounted on every call.
    pub fn len(&self) -> usize {
        self.all_members().count()
    }

    pub fn is_empty(&self) -> bool {
        self.all_members().next().is_none()
    }

    /// The `index`-th candidate of [`all_members`](Self::all_members).
    pub fn get(&self, index: usize) -> Option<&Member<G>> {
        self.all_members().nth(index)
    }

    /// A new flat population over a range of [`all_members`](Self::all_members).
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Population<G> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let iter = self.all_members().skip(start).cloned();
        match range.end_bound() {
            Bound::Included(&e) => Self::from_members(iter.take((e + 1).saturating_sub(start))),
            Bound::Excluded(&e) => Self::from_members(iter.take(e.saturating_sub(start))),
            Bound::Unbounded => Self::from_members(iter),
        }
    }

    /// All candidates moved into a single node.
    pub fn flatten(&self) -> Population<G> {
        self.slice(..)
    }

    /// Whether some member is structurally equivalent to `candidate`.
    pub fn contains(&self, candidate: &Candidate<G>) -> bool {
        self.all_members().any(|m| m.same(candidate))
    }

    /// Appends one candidate to this node's members.
    pub fn add_member(&mut self, member: Member<G>) {
        self.members.push(member);
    }

    /// Appends candidates from `source` to this node's members.
    ///
    /// With `allow_duplicates == false` a candidate is appended only if no
    /// structurally equivalent candidate is already anywhere in the tree,
    /// including ones appended earlier in the same call.
    pub fn add_members(&mut self, source: impl IntoIterator<Item = Member<G>>, allow_duplicates: bool) {
        for member in source {
            if allow_duplicates || !self.contains(&member) {
                self.members.push(member);
            }
        }
    }

    /// Appends `population` as a child without flattening it.
    pub fn add_subpopulation(&mut self, population: Population<G>) {
        self.subpopulations.push(population);
    }

    /// Removes duplicate candidates while preserving the tree shape.
    ///
    /// With `between_subpops` one "seen" set is threaded through the whole
    /// tree in [`all_members`](Self::all_members) order and the first
    /// occurrence survives; which copy survives is otherwise unspecified.
    /// Without it each node is deduplicated independently, so siblings may
    /// keep candidates they share.
    pub fn remove_duplicates(&mut self, between_subpops: bool) {
        let mut shared: HashSet<GeneticKey> = HashSet::new();
        let mut stack: Vec<&mut Population<G>> = vec![self];

        while let Some(node) = stack.pop() {
            if between_subpops {
                node.members.retain(|m| shared.insert(m.key().clone()));
            } else {
                let mut local: HashSet<GeneticKey> = HashSet::new();
                node.members.retain(|m| local.insert(m.key().clone()));
            }
            // Reversed so the first child is processed next.
            stack.extend(node.subpopulations.iter_mut().rev());
        }
    }

    /// Removes every member for which `predicate` is true, tree shape kept.
    pub fn remove_members(&mut self, mut predicate: impl FnMut(&Candidate<G>) -> bool) {
        let mut stack: Vec<&mut Population<G>> = vec![self];
        while let Some(node) = stack.pop() {
            node.members.retain(|m| !predicate(m));
            stack.extend(node.subpopulations.iter_mut());
        }
    }

    /// Flat population of this tree's members with no equivalent in `other`.
    pub fn subtract(&self, other: &Population<G>) -> Population<G> {
        Self::from_members(self.all_members().filter(|m| !other.contains(m)).cloned())
    }

    /// Gives an id to every member lacking one, counting up from `next_id`.
    ///
    /// Returns the next unused id so the counter can continue across calls.
    pub fn assign_ids_from(&self, mut next_id: u64) -> u64 {
        for member in self.all_members() {
            member.modify(|s| {
                if s.id.is_none() {
                    s.id = Some(next_id);
                    next_id += 1;
                }
            });
        }
        next_id
    }

    /// Distinct candidates in [`all_members`](Self::all_members) order.
    pub fn unique_members(&self) -> Vec<Member<G>> {
        let mut seen: HashSet<GeneticKey> = HashSet::new();
        self.all_members()
            .filter(|m| seen.insert(m.key().clone()))
            .cloned()
            .collect()
    }

    /// The member with the highest scalar fitness.
    pub fn best(&self) -> Option<Member<G>> {
        self.all_members()
            .filter_map(|m| m.scalar_fitness().map(|f| (f, m)))
            .fold(None, |best: Option<(f64, &Member<G>)>, (f, m)| match best {
                Some((bf, _)) if bf >= f => best,
                _ => Some((f, m)),
            })
            .map(|(_, m)| Arc::clone(m))
    }
}

/// Depth-first iterator returned by [`Population::all_members`].
///
/// Walks with an explicit stack of child iterators rather than recursion.
pub struct AllMembers<'a, G> {
    members: std::slice::Iter<'a, Member<G>>,
    pending: Vec<std::slice::Iter<'a, Population<G>>>,
}

impl<'a, G> Iterator for AllMembers<'a, G> {
    type Item = &'a Member<G>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(member) = self.members.next() {
                return Some(member);
            }
            let child = loop {
                let top = self.pending.last_mut()?;
                match top.next() {
                    Some(child) => break child,
                    None => {
                        self.pending.pop();
                    }
                }
            };
            self.members = child.members.iter();
            self.pending.push(child.subpopulations.iter());
        }
    }
}

impl<'a, G: Genome> IntoIterator for &'a Population<G> {
    type Item = &'a Member<G>;
    type IntoIter = AllMembers<'a, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.all_members()
    }
}

impl<G: Genome> FromIterator<Member<G>> for Population<G> {
    fn from_iter<I: IntoIterator<Item = Member<G>>>(iter: I) -> Self {
        Self::from_members(iter)
    }
}

impl<G: Genome> Add for Population<G> {
    type Output = Population<G>;

    fn add(self, rhs: Population<G>) -> Population<G> {
        Population::union(self, rhs)
    }
}

impl<G: Genome> Sub for &Population<G> {
    type Output = Population<G>;

    fn sub(self, rhs: &Population<G>) -> Population<G> {
        self.subtract(rhs)
    }
}
