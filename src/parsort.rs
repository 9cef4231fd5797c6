//! Implementation of a parallel samplesort.
//!
//! Records are sorted by a key extracted from each record. The records travel
//! with their keys, so the record type itself needs no ordering.

use std::cmp::Ordering;
use std::fmt::Display;
use std::mem::offset_of;

use itertools::Itertools;
use mpi::datatype::{UncommittedDatatypeRef, UncommittedUserDatatype, UserDatatype};
use mpi::traits::CommunicatorCollectives;
use mpi::traits::Equivalence;
use rand::{seq::SliceRandom, Rng};

use crate::tools::{gather_to_all, global_max, global_min, redistribute_by_bins};

const OVERSAMPLING: usize = 8;

/// Trait that each sort key fed into parsort needs to satisfy.
pub trait SortKey: Equivalence + Copy + Ord + Display + Sized {}

impl<T: Equivalence + Copy + Ord + Display + Sized> SortKey for T {}

/// An internal struct. We convert every array element into this struct.
/// The triple `(key, rank, index)` is guaranteed to be unique even if keys
/// repeat, and the element itself travels along as payload.
#[derive(Copy, Clone)]
struct KeyedItem<K, T> {
    pub key: K,
    pub rank: usize,
    pub index: usize,
    pub item: T,
}

impl<K: SortKey, T> KeyedItem<K, T> {
    fn order(&self) -> (K, usize, usize) {
        (self.key, self.rank, self.index)
    }
}

impl<K: SortKey, T> PartialEq for KeyedItem<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.order() == other.order()
    }
}

impl<K: SortKey, T> Eq for KeyedItem<K, T> {}

impl<K: SortKey, T> PartialOrd for KeyedItem<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: SortKey, T> Ord for KeyedItem<K, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order().cmp(&other.order())
    }
}

unsafe impl<K: SortKey, T: Equivalence> Equivalence for KeyedItem<K, T> {
    type Out = UserDatatype;

    // Depending on the MPI implementation the below offset needs
    // to be an i64 or isize. If it is an i64 Clippy warns about
    // a useless conversion. But this warning is MPI implementation
    // dependent. So switch off here.

    #[allow(clippy::useless_conversion)]
    fn equivalent_datatype() -> Self::Out {
        UserDatatype::structured::<UncommittedDatatypeRef>(
            &[1, 1, 1, 1],
            &[
                (offset_of!(KeyedItem<K, T>, key) as i64).try_into().unwrap(),
                (offset_of!(KeyedItem<K, T>, rank) as i64)
                    .try_into()
                    .unwrap(),
                (offset_of!(KeyedItem<K, T>, index) as i64)
                    .try_into()
                    .unwrap(),
                (offset_of!(KeyedItem<K, T>, item) as i64)
                    .try_into()
                    .unwrap(),
            ],
            &[
                UncommittedUserDatatype::contiguous(1, &<K as Equivalence>::equivalent_datatype())
                    .as_ref(),
                usize::equivalent_datatype().into(),
                usize::equivalent_datatype().into(),
                UncommittedUserDatatype::contiguous(1, &<T as Equivalence>::equivalent_datatype())
                    .as_ref(),
            ],
        )
    }
}

impl<K: SortKey, T> Display for KeyedItem<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(key: {}, rank: {}, index: {})",
            self.key, self.rank, self.index
        )
    }
}

fn to_keyed_items<T, K, F>(arr: &[T], key: &F, rank: usize) -> Vec<KeyedItem<K, T>>
where
    T: Copy,
    K: SortKey,
    F: Fn(&T) -> K,
{
    arr.iter()
        .enumerate()
        .map(|(index, item)| KeyedItem {
            key: key(item),
            rank,
            index,
            item: *item,
        })
        .collect()
}

fn get_buckets<K, T, C, R>(arr: &[KeyedItem<K, T>], comm: &C, rng: &mut R) -> Vec<KeyedItem<K, T>>
where
    K: SortKey,
    T: Equivalence + Copy,
    C: CommunicatorCollectives,
    R: Rng + ?Sized,
{
    let size = comm.size() as usize;

    // In the first step we pick `oversampling * nprocs` splitters.

    let oversampling = arr.len().min(OVERSAMPLING);

    // The global smallest and largest element bound the first and last bucket.

    let global_min_elem = global_min(arr, comm);
    let global_max_elem = global_max(arr, comm);

    let splitters = arr
        .choose_multiple(rng, oversampling)
        .copied()
        .collect_vec();

    // We gather the splitters into all ranks so that each rank has all splitters.
    // Every process then sorts them into the same list.

    let mut all_splitters = gather_to_all(&splitters, comm);
    all_splitters.sort_unstable();

    // We now insert the smallest and largest possible element if they are not already
    // in the splitter collection.

    if *all_splitters.first().unwrap() != global_min_elem {
        all_splitters.insert(0, global_min_elem)
    }

    if *all_splitters.last().unwrap() != global_max_elem {
        all_splitters.push(global_max_elem);
    }

    // We now define p buckets (p is number of processors) and we return
    // a p element array containing the first element of each bucket

    split(&all_splitters, size)
        .map(|slice| slice.first().unwrap())
        .copied()
        .collect_vec()
}

/// Parallel sort of records by a key.
///
/// Returns the locally held part of the globally sorted array. The number of
/// elements per rank after sorting is arbitrary. Every rank must hold at
/// least one element.
///
/// Collective: all ranks must call this.
pub fn parsort_by_key<T, K, F, C, R>(arr: &[T], key: F, comm: &C, rng: &mut R) -> Vec<T>
where
    T: Equivalence + Copy,
    K: SortKey,
    F: Fn(&T) -> K,
    C: CommunicatorCollectives,
    R: Rng + ?Sized,
{
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;

    // If we only have a single rank simply sort the local array and return

    if size == 1 {
        let mut arr = arr.to_vec();
        arr.sort_by_key(|item| key(item));
        return arr;
    }

    assert!(
        !arr.is_empty(),
        "parsort requires a non-empty local array on every rank"
    );

    // Attach the key, the rank and the index to every element so that
    // there are no duplicates in the sorting set, then sort locally.

    let mut arr = to_keyed_items(arr, &key, rank);
    arr.sort_unstable();

    // Collective: splitters are shared by all ranks.
    let buckets = get_buckets(&arr, comm, rng);

    // Collective: we now redistribute with respect to these buckets.
    let mut recvbuffer = redistribute_by_bins(&arr, &buckets, comm);

    // We now have everything in the receive buffer. Now sort the local elements and return

    recvbuffer.sort_unstable();
    recvbuffer.iter().map(|elem| elem.item).collect_vec()
}

/// Parallel sort of keys.
pub fn parsort<T: SortKey, C: CommunicatorCollectives, R: Rng + ?Sized>(
    arr: &[T],
    comm: &C,
    rng: &mut R,
) -> Vec<T> {
    parsort_by_key(arr, |&item| item, comm, rng)
}

// The following is a simple iterator that splits a slice into n
// chunks. It is from https://users.rust-lang.org/t/how-to-split-a-slice-into-n-chunks/40008/3

fn split<T>(slice: &[T], n: usize) -> impl Iterator<Item = &[T]> {
    let len = slice.len() / n;
    let rem = slice.len() % n;
    Split { slice, len, rem }
}

struct Split<'a, T> {
    slice: &'a [T],
    len: usize,
    rem: usize,
}

impl<'a, T> Iterator for Split<'a, T> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<Self::Item> {
        if self.slice.is_empty() {
            return None;
        }
        let mut len = self.len;
        if self.rem > 0 {
            len += 1;
            self.rem -= 1;
        }
        let (chunk, rest) = self.slice.split_at(len);
        self.slice = rest;
        Some(chunk)
    }
}
