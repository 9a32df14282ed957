use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use crate::error::ComputeError;

/// Element types a buffer can hold.
pub trait Element: Copy + Default + Send + Sync + 'static {}

impl<T> Element for T where T: Copy + Default + Send + Sync + 'static {}

/// A typed handle to a device buffer owned by a [`BufferArena`].
///
/// Handles are cheap to copy. Passing one to a stage constructor is how a
/// consumer stage aliases the output of its producer.
pub struct Buffer<T> {
    id: usize,
    len: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Buffer<T> {
    /// Returns the arena slot of the buffer.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Buffer<T> {}

impl<T> PartialEq for Buffer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.len == other.len
    }
}

impl<T> Eq for Buffer<T> {}

impl<T> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Buffer<{}>#{}[{}]",
            std::any::type_name::<T>(),
            self.id,
            self.len
        )
    }
}

type Slot = Option<Box<dyn Any + Send + Sync>>;

/// Storage for every buffer of a compute session.
///
/// A buffer is checked out with [`BufferArena::take`] while a kernel writes it
/// and returned with [`BufferArena::restore`], so a kernel can read some
/// buffers while mutating others without aliasing.
#[derive(Default)]
pub struct BufferArena {
    slots: Vec<Slot>,
    lens: Vec<usize>,
}

impl BufferArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a zero-initialized buffer of `len` elements.
    pub fn alloc<T: Element>(&mut self, len: usize) -> Buffer<T> {
        let id = self.slots.len();
        self.slots.push(Some(Box::new(vec![T::default(); len])));
        self.lens.push(len);
        log::trace!(
            "alloc buffer #{id}: {len} x {}",
            std::any::type_name::<T>()
        );
        Buffer {
            id,
            len,
            _marker: PhantomData,
        }
    }

    /// Number of buffers allocated so far.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing was allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: usize) -> Result<&(dyn Any + Send + Sync), ComputeError> {
        self.slots
            .get(id)
            .ok_or(ComputeError::UnknownBuffer(id))?
            .as_deref()
            .ok_or(ComputeError::BufferInUse(id))
    }

    /// Borrows the contents of a buffer.
    pub fn get<T: Element>(&self, buffer: Buffer<T>) -> Result<&[T], ComputeError> {
        let data = self
            .slot(buffer.id)?
            .downcast_ref::<Vec<T>>()
            .ok_or(ComputeError::TypeMismatch(buffer.id))?;
        Ok(data.as_slice())
    }

    /// Mutably borrows the contents of a buffer.
    pub fn get_mut<T: Element>(&mut self, buffer: Buffer<T>) -> Result<&mut [T], ComputeError> {
        let data = self
            .slots
            .get_mut(buffer.id)
            .ok_or(ComputeError::UnknownBuffer(buffer.id))?
            .as_deref_mut()
            .ok_or(ComputeError::BufferInUse(buffer.id))?
            .downcast_mut::<Vec<T>>()
            .ok_or(ComputeError::TypeMismatch(buffer.id))?;
        Ok(data.as_mut_slice())
    }

    /// Checks a buffer out of the arena.
    pub fn take<T: Element>(&mut self, buffer: Buffer<T>) -> Result<Vec<T>, ComputeError> {
        // validate before moving the slot out
        self.get(buffer)?;
        let boxed = self.slots[buffer.id]
            .take()
            .ok_or(ComputeError::BufferInUse(buffer.id))?;
        boxed
            .downcast::<Vec<T>>()
            .map(|data| *data)
            .map_err(|_| ComputeError::TypeMismatch(buffer.id))
    }

    /// Returns a buffer previously checked out with [`BufferArena::take`].
    pub fn restore<T: Element>(&mut self, buffer: Buffer<T>, data: Vec<T>) -> Result<(), ComputeError> {
        let expected = *self
            .lens
            .get(buffer.id)
            .ok_or(ComputeError::UnknownBuffer(buffer.id))?;
        if data.len() != expected {
            return Err(ComputeError::LengthMismatch {
                id: buffer.id,
                expected,
                actual: data.len(),
            });
        }
        let slot = &mut self.slots[buffer.id];
        if slot.is_some() {
            return Err(ComputeError::BufferInUse(buffer.id));
        }
        *slot = Some(Box::new(data));
        Ok(())
    }

    /// Runs `f` with `output` checked out and the rest of the arena readable.
    ///
    /// The buffer is returned to the arena even if `f` fails.
    pub fn with_output<T, R, F>(&mut self, output: Buffer<T>, f: F) -> Result<R, ComputeError>
    where
        T: Element,
        F: FnOnce(&BufferArena, &mut [T]) -> Result<R, ComputeError>,
    {
        let mut data = self.take(output)?;
        let result = f(self, &mut data);
        self.restore(output, data)?;
        result
    }

    /// Same as [`BufferArena::with_output`] for kernels writing two buffers.
    pub fn with_outputs<A, B, R, F>(
        &mut self,
        first: Buffer<A>,
        second: Buffer<B>,
        f: F,
    ) -> Result<R, ComputeError>
    where
        A: Element,
        B: Element,
        F: FnOnce(&BufferArena, &mut [A], &mut [B]) -> Result<R, ComputeError>,
    {
        let mut a = self.take(first)?;
        let mut b = match self.take(second) {
            Ok(b) => b,
            Err(err) => {
                self.restore(first, a)?;
                return Err(err);
            }
        };
        let result = f(self, &mut a, &mut b);
        self.restore(first, a)?;
        self.restore(second, b)?;
        result
    }
}

impl fmt::Debug for BufferArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferArena")
            .field("buffers", &self.slots.len())
            .finish()
    }
}
