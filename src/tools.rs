//! Collective utility routines.
//!
//! Every function taking a communicator is collective: all ranks must call
//! it in the same order or the run deadlocks.

use itertools::Itertools;
use mpi::{
    collective::{SystemOperation, UserOperation},
    datatype::{Partition, PartitionMut},
    point_to_point as p2p,
    traits::{CommunicatorCollectives, Destination, Equivalence, Root, Source},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Gather array to all processes
pub fn gather_to_all<T: Equivalence, C: CommunicatorCollectives>(arr: &[T], comm: &C) -> Vec<T> {
    // First we need to broadcast the individual sizes on each process.

    let size = comm.size();

    let local_len = arr.len() as i32;

    let mut sizes = vec![0; size as usize];

    comm.all_gather_into(&local_len, &mut sizes);

    let recv_len = sizes.iter().sum::<i32>() as usize;

    // Now we have the size of each local contribution.
    let mut recvbuffer = Vec::<T>::with_capacity(recv_len);
    let buf: &mut [T] = unsafe { std::mem::transmute(recvbuffer.spare_capacity_mut()) };

    let recv_displs = displacements(&sizes);

    let mut receiv_partition = PartitionMut::new(buf, sizes, &recv_displs[..]);

    comm.all_gather_varcount_into(arr, &mut receiv_partition);

    unsafe { recvbuffer.set_len(recv_len) };

    recvbuffer
}

/// Gather distributed array to the root rank.
///
/// The result is a `Vec<T>` on root and `None` on all other ranks.
pub fn gather_to_root<T: Equivalence, C: CommunicatorCollectives>(
    arr: &[T],
    comm: &C,
) -> Option<Vec<T>> {
    let n = arr.len() as i32;
    let rank = comm.rank();
    let size = comm.size();
    let root_process = comm.process_at_rank(0);

    // We first communicate the length of the array to root.

    if rank == 0 {
        // We are at root.

        let mut counts = vec![0_i32; size as usize];
        root_process.gather_into_root(&n, &mut counts);

        // We now have all ranks at root. Can now a varcount gather to get
        // the array elements.

        let nelements = counts.iter().sum::<i32>();
        let mut new_arr = Vec::<T>::with_capacity(nelements as usize);
        let new_arr_buf: &mut [T] = unsafe { std::mem::transmute(new_arr.spare_capacity_mut()) };

        let displs = displacements(counts.as_slice());

        let mut partition = PartitionMut::new(new_arr_buf, counts, &displs[..]);

        root_process.gather_varcount_into_root(arr, &mut partition);

        unsafe { new_arr.set_len(nelements as usize) };
        Some(new_arr)
    } else {
        root_process.gather_into(&n);
        root_process.gather_varcount_into(arr);
        None
    }
}

/// Get global size of a distributed array.
///
/// Computes the size and broadcasts it to all ranks.
pub fn global_size<T, C: CommunicatorCollectives>(arr: &[T], comm: &C) -> usize {
    let local_size = arr.len();
    let mut global_size = 0;

    comm.all_reduce_into(&local_size, &mut global_size, SystemOperation::sum());

    global_size
}

/// Global index of the first local element of a distributed array.
pub fn global_offset<C: CommunicatorCollectives>(local_len: usize, comm: &C) -> usize {
    let mut offset = 0;
    comm.exclusive_scan_into(&local_len, &mut offset, SystemOperation::sum());

    // The receive buffer of an exclusive scan is undefined on the first rank.
    if comm.rank() == 0 {
        0
    } else {
        offset
    }
}

/// Get the maximum value across all ranks
pub fn global_max<T: Equivalence + Copy + Ord, C: CommunicatorCollectives>(
    arr: &[T],
    comm: &C,
) -> T {
    let local_max = arr.iter().max().unwrap();

    // Just need to initialize global_max with something.
    let mut global_max = *local_max;

    comm.all_reduce_into(
        local_max,
        &mut global_max,
        &UserOperation::commutative(|x, y| {
            let x: &[T] = x.downcast().unwrap();
            let y: &mut [T] = y.downcast().unwrap();
            for (&x_i, y_i) in x.iter().zip(y) {
                *y_i = x_i.max(*y_i);
            }
        }),
    );

    global_max
}

/// Get the minimum value across all ranks
pub fn global_min<T: Equivalence + Copy + Ord, C: CommunicatorCollectives>(
    arr: &[T],
    comm: &C,
) -> T {
    let local_min = *arr.iter().min().unwrap();

    // Just need to initialize global_min with something.
    let mut global_min = local_min;

    comm.all_reduce_into(
        &local_min,
        &mut global_min,
        &UserOperation::commutative(|x, y| {
            let x: &[T] = x.downcast().unwrap();
            let y: &mut [T] = y.downcast().unwrap();
            for (&x_i, y_i) in x.iter().zip(y) {
                *y_i = x_i.min(*y_i);
            }
        }),
    );

    global_min
}

/// Replace every entry of `values` by its sum across all ranks.
pub fn all_reduce_sum_in_place<T, C>(values: &mut [T], comm: &C)
where
    T: Equivalence + Copy,
    C: CommunicatorCollectives,
{
    let local = values.to_vec();
    comm.all_reduce_into(&local[..], values, SystemOperation::sum());
}

/// True on all ranks if `local` is true on every rank.
pub fn global_all<C: CommunicatorCollectives>(local: bool, comm: &C) -> bool {
    let mut global = false;
    comm.all_reduce_into(&local, &mut global, SystemOperation::logical_and());
    global
}

/// Broadcast a value from `owner` to all ranks.
pub fn broadcast_from<T: Equivalence, C: CommunicatorCollectives>(
    value: &mut T,
    owner: usize,
    comm: &C,
) {
    comm.process_at_rank(owner as i32).broadcast_into(value);
}

/// Communicate the first element of each local array back to the previous rank.
pub fn communicate_back<T: Equivalence, C: CommunicatorCollectives>(
    arr: &[T],
    comm: &C,
) -> Option<T> {
    let rank = comm.rank();
    let size = comm.size();

    if rank == size - 1 {
        comm.process_at_rank(rank - 1).send(arr.first().unwrap());
        None
    } else {
        let (new_last, _status) = if rank > 0 {
            p2p::send_receive(
                arr.first().unwrap(),
                &comm.process_at_rank(rank - 1),
                &comm.process_at_rank(rank + 1),
            )
        } else {
            comm.process_at_rank(1).receive::<T>()
        };
        Some(new_last)
    }
}

/// Check if an array is sorted.
pub fn is_sorted_array<T: Equivalence + PartialOrd, C: CommunicatorCollectives>(
    arr: &[T],
    comm: &C,
) -> bool {
    let mut sorted = arr.iter().tuple_windows().all(|(elem1, elem2)| elem1 <= elem2);

    if comm.size() == 1 {
        return sorted;
    }

    if let Some(next_first) = communicate_back(arr, comm) {
        sorted = sorted && *arr.last().unwrap() <= next_first;
    }

    global_all(sorted, comm)
}

/// Redistribute an array via an all_to_all_varcount operation.
///
/// `counts[r]` consecutive elements are sent to rank `r`.
pub fn redistribute<T: Equivalence, C: CommunicatorCollectives>(
    arr: &[T],
    counts: &[i32],
    comm: &C,
) -> Vec<T> {
    assert_eq!(counts.len(), comm.size() as usize);

    // First send the counts around via an alltoall operation.

    let mut recv_counts = vec![0; counts.len()];

    comm.all_to_all_into(counts, &mut recv_counts);

    // We have the recv_counts. Allocate space and setup the partitions.

    let nelems = recv_counts.iter().sum::<i32>() as usize;

    let mut output = Vec::<T>::with_capacity(nelems);
    let out_buf: &mut [T] = unsafe { std::mem::transmute(output.spare_capacity_mut()) };

    let send_partition = Partition::new(arr, counts, displacements(counts));
    let mut recv_partition =
        PartitionMut::new(out_buf, &recv_counts[..], displacements(&recv_counts));

    comm.all_to_all_varcount_into(&send_partition, &mut recv_partition);

    unsafe { output.set_len(nelems) };

    output
}

/// Number of elements rank `rank` holds in an even block distribution.
///
/// Rank `r` of `p` owns the global positions `[r n / p, (r + 1) n / p)`.
pub fn block_range(total: usize, rank: usize, size: usize) -> (usize, usize) {
    (rank * total / size, (rank + 1) * total / size)
}

/// Redistribute a globally ordered array into an even block distribution.
///
/// The global order is preserved. Afterwards two arrays of the same global
/// length are aligned position by position on every rank.
pub fn redistribute_evenly<T: Equivalence, C: CommunicatorCollectives>(
    arr: &[T],
    comm: &C,
) -> Vec<T> {
    let size = comm.size() as usize;
    let total = global_size(arr, comm);
    let first = global_offset(arr.len(), comm);
    let last = first + arr.len();

    let counts = (0..size)
        .map(|r| {
            let (start, end) = block_range(total, r, size);
            end.min(last).saturating_sub(start.max(first)) as i32
        })
        .collect_vec();

    redistribute(arr, &counts, comm)
}

/// Distribute a sorted sequence into bins.
///
/// For an array with n elements to be distributed into p bins,
/// the array `bins` has p elements. The bins are defined by half-open intervals
/// of the form [b_j, b_{j+1})). The final bin is the half-open interval [b_{p-1}, \infty).
/// It is assumed that the bins and the elements are both sorted sequences and that
/// every element has an associated bin.
/// The function returns a p element array with the counts of how many elements go to each bin.
/// Since the sequence is sorted this fully defines what element goes into which bin.
pub fn sort_to_bins<T: Ord>(sorted_keys: &[T], bins: &[T]) -> Vec<usize> {
    let nbins = bins.len();

    if sorted_keys.is_empty() {
        return vec![0; nbins];
    }

    // Make sure that the smallest element of the sorted keys fits into the bins.
    assert!(bins.first().unwrap() <= sorted_keys.first().unwrap());

    // Deal with the special case that there is only one bin.
    // This means that all elements are in the one bin.
    if nbins == 1 {
        return vec![sorted_keys.len(); 1];
    }

    let mut bin_counts = vec![0; nbins];

    // Each key goes to the last bin whose start is not larger than the key.
    for key in sorted_keys {
        let bin = bins.partition_point(|b| b <= key) - 1;
        bin_counts[bin] += 1;
    }

    bin_counts
}

/// Redistribute locally sorted keys with respect to bins.
///
/// - The array `sorted_keys` is assumed to be sorted within each process. It needs not be globally sorted.
/// - If there are `r` ranks in the communicator, the size of `bins` must be `r`.
/// - The bins are defined through half-open intervals (bin[0], bin[1]), .... This defines r-1 bins. The
///   last bin is the half-open interval [bin[r-1], \infty).
/// - All array elements must be larger or equal bin[0]. This means that each element can be sorted into a bin.
pub fn redistribute_by_bins<T: Equivalence + Ord, C: CommunicatorCollectives>(
    sorted_keys: &[T],
    bins: &[T],
    comm: &C,
) -> Vec<T> {
    let counts = sort_to_bins(sorted_keys, bins);
    let counts = counts.iter().map(|elem| *elem as i32).collect_vec();
    redistribute(sorted_keys, &counts, comm)
}

/// Get a seeded rng
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Compute displacements from a vector of counts.
///
/// This is useful for global MPI varcount operations. Let
/// count [ 3, 4, 5]. Then the corresponding displacements are
/// [0, 3, 7]. Note that the last element `5` is ignored.
pub fn displacements(counts: &[i32]) -> Vec<i32> {
    counts
        .iter()
        .scan(0, |acc, &x| {
            let tmp = *acc;
            *acc += x;
            Some(tmp)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use itertools::Itertools;

    use super::{block_range, displacements, sort_to_bins};

    #[test]
    fn test_sort_to_bins() {
        let elems = (0..100).collect_vec();
        let bins = [0, 17, 55];

        let counts = sort_to_bins(&elems, &bins);

        assert_eq!(counts[0], 17);
        assert_eq!(counts[1], 38);
        assert_eq!(counts[2], 45);
    }

    #[test]
    fn test_sort_to_bins_with_gaps() {
        let elems = [3, 4, 40, 41, 90];
        let bins = [0, 10, 20, 50];
        assert_eq!(sort_to_bins(&elems, &bins), vec![2, 0, 2, 1]);
        assert_eq!(sort_to_bins::<i32>(&[], &bins), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_displacements() {
        assert_eq!(displacements(&[3, 4, 5]), vec![0, 3, 7]);
        assert_eq!(displacements(&[]), Vec::<i32>::new());
    }

    #[test]
    fn test_block_range_covers_total() {
        for (total, size) in [(10, 3), (4, 4), (3, 8), (0, 2)] {
            let ranges = (0..size).map(|r| block_range(total, r, size)).collect_vec();
            assert_eq!(ranges.first().unwrap().0, 0);
            assert_eq!(ranges.last().unwrap().1, total);
            for (a, b) in ranges.iter().tuple_windows() {
                assert_eq!(a.1, b.0);
            }
        }
    }
}
