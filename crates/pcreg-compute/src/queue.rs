use std::collections::VecDeque;

use crate::buffer::{Buffer, BufferArena, Element};
use crate::device::Device;
use crate::error::ComputeError;

/// A deferred command recorded on a [`Queue`].
pub type Command = Box<dyn FnOnce(&mut BufferArena) -> Result<(), ComputeError> + Send>;

/// An in-order command queue bound to a [`Device`].
///
/// Kernels are recorded with [`Queue::enqueue`] and executed in submission
/// order when the queue is drained. Draining happens on [`Queue::finish`] and
/// before every blocking read or write, so a read always observes the effect
/// of every command enqueued before it. Errors raised by a command surface at
/// the call that drains the queue.
pub struct Queue {
    device: Device,
    pool: rayon::ThreadPool,
    arena: BufferArena,
    pending: VecDeque<(&'static str, Command)>,
    executed: u64,
}

impl Queue {
    /// Creates a queue and the thread pool backing its device.
    pub fn new(device: Device) -> Result<Self, ComputeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(device.compute_units())
            .build()
            .map_err(|e| ComputeError::ThreadPool(e.to_string()))?;
        log::debug!("created queue on {device}");
        Ok(Self {
            device,
            pool,
            arena: BufferArena::new(),
            pending: VecDeque::new(),
            executed: 0,
        })
    }

    /// Returns the device of the queue.
    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns the number of work items per work-group of the device.
    #[inline]
    pub fn work_group_size(&self) -> usize {
        self.device.max_work_group_size()
    }

    /// Allocates a zero-initialized buffer.
    pub fn alloc<T: Element>(&mut self, len: usize) -> Buffer<T> {
        self.arena.alloc(len)
    }

    /// Number of commands waiting to be executed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of commands executed since the queue was created.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Records a command. It runs on the device thread pool when the queue drains.
    pub fn enqueue<F>(&mut self, label: &'static str, command: F)
    where
        F: FnOnce(&mut BufferArena) -> Result<(), ComputeError> + Send + 'static,
    {
        self.pending.push_back((label, Box::new(command)));
    }

    /// Records a copy of `data` into `buffer`.
    ///
    /// The length is checked immediately, the copy happens in queue order.
    pub fn write<T: Element>(&mut self, buffer: Buffer<T>, data: Vec<T>) -> Result<(), ComputeError> {
        check_len(buffer, data.len())?;
        self.enqueue("write", move |arena| {
            arena.get_mut(buffer)?.copy_from_slice(&data);
            Ok(())
        });
        Ok(())
    }

    /// Drains the queue and copies `data` into `buffer`.
    pub fn write_blocking<T: Element>(
        &mut self,
        buffer: Buffer<T>,
        data: &[T],
    ) -> Result<(), ComputeError> {
        check_len(buffer, data.len())?;
        self.finish()?;
        self.arena.get_mut(buffer)?.copy_from_slice(data);
        Ok(())
    }

    /// Drains the queue and returns a copy of the contents of `buffer`.
    pub fn read<T: Element>(&mut self, buffer: Buffer<T>) -> Result<Vec<T>, ComputeError> {
        self.finish()?;
        Ok(self.arena.get(buffer)?.to_vec())
    }

    /// Drains the queue and copies the contents of `buffer` into `dst`.
    pub fn read_into<T: Element>(&mut self, buffer: Buffer<T>, dst: &mut [T]) -> Result<(), ComputeError> {
        check_len(buffer, dst.len())?;
        self.finish()?;
        dst.copy_from_slice(self.arena.get(buffer)?);
        Ok(())
    }

    /// Executes every pending command in submission order.
    ///
    /// On failure the remaining commands are discarded, since they depend on
    /// the state the failed command should have produced.
    pub fn finish(&mut self) -> Result<(), ComputeError> {
        while let Some((label, command)) = self.pending.pop_front() {
            let arena = &mut self.arena;
            let result = self.pool.install(move || command(arena));
            self.executed += 1;
            if let Err(err) = result {
                let dropped = self.pending.len();
                self.pending.clear();
                log::error!("command `{label}` failed, dropped {dropped} pending commands");
                return Err(ComputeError::CommandFailed {
                    label,
                    source: Box::new(err),
                });
            }
            log::trace!("executed `{label}`");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("device", &self.device)
            .field("arena", &self.arena)
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn check_len<T>(buffer: Buffer<T>, len: usize) -> Result<(), ComputeError> {
    if buffer.len() != len {
        return Err(ComputeError::LengthMismatch {
            id: buffer.id(),
            expected: buffer.len(),
            actual: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_run_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu().with_compute_units(2)?)?;
        let buffer = queue.alloc::<u32>(4);

        queue.write(buffer, vec![1, 2, 3, 4])?;
        queue.enqueue("double", move |arena| {
            arena.get_mut(buffer)?.iter_mut().for_each(|v| *v *= 2);
            Ok(())
        });
        queue.enqueue("increment", move |arena| {
            arena.get_mut(buffer)?.iter_mut().for_each(|v| *v += 1);
            Ok(())
        });
        assert_eq!(queue.pending(), 3);

        assert_eq!(queue.read(buffer)?, vec![3, 5, 7, 9]);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.executed(), 3);
        Ok(())
    }

    #[test]
    fn failed_command_drops_the_rest() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let buffer = queue.alloc::<f32>(2);

        queue.enqueue("broken", |_| Err(ComputeError::invalid_shape("broken", "always fails")));
        queue.enqueue("never", move |arena| {
            arena.get_mut(buffer)?[0] = 1.0;
            Ok(())
        });

        let err = queue.finish().unwrap_err();
        assert!(matches!(err, ComputeError::CommandFailed { label: "broken", .. }));
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.read(buffer)?, vec![0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn write_checks_length_eagerly() -> Result<(), Box<dyn std::error::Error>> {
        let mut queue = Queue::new(Device::cpu())?;
        let buffer = queue.alloc::<f32>(3);
        assert!(matches!(
            queue.write(buffer, vec![0.0; 2]),
            Err(ComputeError::LengthMismatch { expected: 3, actual: 2, .. })
        ));
        assert_eq!(queue.pending(), 0);

        queue.write_blocking(buffer, &[1.0, 2.0, 3.0])?;
        let mut out = [0.0; 3];
        queue.read_into(buffer, &mut out)?;
        assert_eq!(out, [1.0, 2.0, 3.0]);
        Ok(())
    }
}
