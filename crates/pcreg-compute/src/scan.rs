use std::ops::Add;

use num_traits::Zero;
use rayon::prelude::*;

use crate::buffer::{Buffer, Element};
use crate::error::ComputeError;
use crate::launch::{check_row_tiling, launch_groups, ELEMENTS_PER_ITEM};
use crate::queue::Queue;

/// Element types supported by [`Scan`].
pub trait Scannable: Element + Zero + Add<Output = Self> {}

impl<T> Scannable for T where T: Element + Zero + Add<Output = T> {}

/// Whether the running sum at `c` includes the element at `c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// `out[c] = in[0] + ... + in[c]`.
    Inclusive,
    /// `out[0] = 0`, `out[c] = in[0] + ... + in[c - 1]`.
    Exclusive,
}

/// Scans one block in place and returns the sum of its input elements.
fn scan_block<T: Scannable>(input: &[T], out: &mut [T], kind: ScanKind) -> T {
    let mut acc = T::zero();
    for (o, &v) in out.iter_mut().zip(input) {
        match kind {
            ScanKind::Inclusive => {
                acc = acc + v;
                *o = acc;
            }
            ScanKind::Exclusive => {
                *o = acc;
                acc = acc + v;
            }
        }
    }
    acc
}

/// Row-wise prefix sum of a `rows x cols` array.
///
/// Rows larger than one work-group are scanned per group, the group sums are
/// then scanned exclusively, and finally each group adds the sum of the groups
/// preceding it.
#[derive(Debug, Clone)]
pub struct Scan<T: Scannable> {
    kind: ScanKind,
    cols: usize,
    rows: usize,
    groups: usize,
    block: usize,
    input: Buffer<T>,
    sums: Option<Buffer<T>>,
    output: Buffer<T>,
}

impl<T: Scannable> Scan<T> {
    /// Configures a scan with its own input buffer.
    pub fn new(queue: &mut Queue, kind: ScanKind, cols: usize, rows: usize) -> Result<Self, ComputeError> {
        check_row_tiling("scan", cols, rows, queue.work_group_size())?;
        let input = queue.alloc::<T>(cols * rows);
        Self::with_input(queue, kind, input, cols, rows)
    }

    /// Configures a scan of a buffer produced by another stage.
    pub fn with_input(
        queue: &mut Queue,
        kind: ScanKind,
        input: Buffer<T>,
        cols: usize,
        rows: usize,
    ) -> Result<Self, ComputeError> {
        let groups = check_row_tiling("scan", cols, rows, queue.work_group_size())?;
        if input.len() != cols * rows {
            return Err(ComputeError::LengthMismatch {
                id: input.id(),
                expected: cols * rows,
                actual: input.len(),
            });
        }
        let sums = (groups > 1).then(|| queue.alloc::<T>(groups * rows));
        let output = queue.alloc::<T>(cols * rows);
        Ok(Self {
            kind,
            cols,
            rows,
            groups,
            block: ELEMENTS_PER_ITEM * queue.work_group_size(),
            input,
            sums,
            output,
        })
    }

    /// Input buffer handle.
    pub fn input(&self) -> Buffer<T> {
        self.input
    }

    /// Output buffer handle, same shape as the input.
    pub fn output(&self) -> Buffer<T> {
        self.output
    }

    /// Number of work-groups per row.
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Enqueues the scan.
    pub fn run(&self, queue: &mut Queue) {
        let (kind, cols, groups, block) = (self.kind, self.cols, self.groups, self.block);
        let (input, output) = (self.input, self.output);

        let Some(sums) = self.sums else {
            queue.enqueue("scan", move |arena| {
                arena.with_output(output, |arena, out| {
                    let data = arena.get(input)?;
                    launch_groups(out, cols, |row, out_row| {
                        scan_block(&data[row * cols..(row + 1) * cols], out_row, kind);
                    });
                    Ok(())
                })
            });
            return;
        };

        queue.enqueue("scan", move |arena| {
            arena.with_outputs(output, sums, |arena, out, sums| {
                let data = arena.get(input)?;
                out.par_chunks_mut(cols)
                    .zip(sums.par_chunks_mut(groups))
                    .enumerate()
                    .for_each(|(row, (out_row, row_sums))| {
                        let row_data = &data[row * cols..(row + 1) * cols];
                        // padding groups contribute zero
                        row_sums.fill(T::zero());
                        out_row
                            .par_chunks_mut(block)
                            .zip(row_data.par_chunks(block))
                            .zip(row_sums.par_iter_mut())
                            .for_each(|((o, i), sum)| *sum = scan_block(i, o, kind));
                    });
                Ok(())
            })
        });
        queue.enqueue("scan_sums", move |arena| {
            let sums = arena.get_mut(sums)?;
            for row in sums.chunks_mut(groups) {
                let scanned = row.to_vec();
                scan_block(&scanned, row, ScanKind::Exclusive);
            }
            Ok(())
        });
        queue.enqueue("scan_add_sums", move |arena| {
            arena.with_output(output, |arena, out| {
                let sums = arena.get(sums)?;
                launch_groups(out, cols, |row, out_row| {
                    for (group, chunk) in out_row.chunks_mut(block).enumerate().skip(1) {
                        let offset = sums[row * groups + group];
                        chunk.iter_mut().for_each(|v| *v = *v + offset);
                    }
                });
                Ok(())
            })
        });
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Device;
    use rand::Rng;

    fn naive(data: &[u32], kind: ScanKind) -> Vec<u32> {
        let mut acc = 0;
        data.iter()
            .map(|&v| {
                let before = acc;
                acc += v;
                match kind {
                    ScanKind::Inclusive => acc,
                    ScanKind::Exclusive => before,
                }
            })
            .collect()
    }

    #[test]
    fn scan_single_group() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let inclusive = Scan::<u32>::new(&mut queue, ScanKind::Inclusive, 4, 2)?;
        let exclusive = Scan::with_input(&mut queue, ScanKind::Exclusive, inclusive.input(), 4, 2)?;

        queue.write(inclusive.input(), vec![1, 2, 3, 4, 5, 6, 7, 8])?;
        inclusive.run(&mut queue);
        exclusive.run(&mut queue);

        assert_eq!(queue.read(inclusive.output())?, vec![1, 3, 6, 10, 5, 11, 18, 26]);
        assert_eq!(queue.read(exclusive.output())?, vec![0, 1, 3, 6, 0, 5, 11, 18]);
        Ok(())
    }

    #[test]
    fn scan_matches_naive_two_level() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::rng();
        let mut queue = Queue::new(Device::cpu().with_work_group_size(8)?)?;
        let (cols, rows) = (1000, 2);
        let data = (0..cols * rows)
            .map(|_| rng.random_range(0..100u32))
            .collect::<Vec<_>>();

        for kind in [ScanKind::Inclusive, ScanKind::Exclusive] {
            let scan = Scan::<u32>::new(&mut queue, kind, cols, rows)?;
            // 1000 columns in blocks of 64 need 16 groups
            assert_eq!(scan.groups(), 16);
            queue.write(scan.input(), data.clone())?;
            scan.run(&mut queue);
            let out = queue.read(scan.output())?;
            for row in 0..rows {
                let range = row * cols..(row + 1) * cols;
                assert_eq!(out[range.clone()], naive(&data[range], kind)[..]);
            }
        }
        Ok(())
    }

    #[test]
    fn scan_rejects_unaligned_rows() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        assert!(matches!(
            Scan::<u32>::new(&mut queue, ScanKind::Inclusive, 7, 1),
            Err(ComputeError::InvalidShape { kernel: "scan", .. })
        ));
        Ok(())
    }
}
