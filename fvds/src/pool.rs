//! Pooled, reference-counted frames.
//!
//! A [`RefFrame`] is a shared handle: cloning it adds a reference and dropping
//! it removes one. When the last handle goes away the frame buffer is pushed
//! back onto the free list of the [`FramePool`] it came from, if that pool is
//! still alive. Pools and handles are per encoder and never cross threads.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::frame::{Frame, validate_dimensions};

struct PoolInner {
    width: u32,
    height: u32,
    free: RefCell<Vec<Frame>>,
    outstanding: Cell<usize>,
    allocated: Cell<usize>,
}

#[derive(Clone)]
pub struct FramePool {
    inner: Rc<PoolInner>,
}

impl FramePool {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        validate_dimensions(width, height)?;
        Ok(Self {
            inner: Rc::new(PoolInner {
                width,
                height,
                free: RefCell::new(Vec::new()),
                outstanding: Cell::new(0),
                allocated: Cell::new(0),
            }),
        })
    }

    /// Hands out a frame with a reference count of one. Reused buffers keep
    /// their previous contents.
    pub fn acquire(&self) -> RefFrame {
        let inner = &self.inner;
        let frame = inner.free.borrow_mut().pop().unwrap_or_else(|| {
            inner.allocated.set(inner.allocated.get() + 1);
            Frame::new(inner.width, inner.height)
        });
        inner.outstanding.set(inner.outstanding.get() + 1);
        RefFrame {
            slot: Rc::new(Slot {
                frame,
                pool: Rc::downgrade(inner),
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn free_len(&self) -> usize {
        self.inner.free.borrow().len()
    }

    /// Frames currently held through at least one handle.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.get()
    }

    /// Frame buffers created over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.inner.allocated.get()
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("free", &self.free_len())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

struct Slot {
    frame: Frame,
    pool: Weak<PoolInner>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.outstanding.set(pool.outstanding.get() - 1);
            pool.free.borrow_mut().push(mem::take(&mut self.frame));
        }
    }
}

#[derive(Clone)]
pub struct RefFrame {
    slot: Rc<Slot>,
}

impl RefFrame {
    /// Wraps a frame that belongs to no pool.
    pub fn detached(frame: Frame) -> Self {
        Self {
            slot: Rc::new(Slot {
                frame,
                pool: Weak::new(),
            }),
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.slot.frame
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame> {
        let count = Rc::strong_count(&self.slot);
        match Rc::get_mut(&mut self.slot) {
            Some(slot) => Ok(&mut slot.frame),
            None => Err(Error::SharedFrame(count)),
        }
    }

    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.slot)
    }

    pub fn ptr_eq(&self, other: &RefFrame) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }

    /// Gives up this handle. The frame returns to its pool once no handle is left.
    pub fn release(self) {}
}

impl Deref for RefFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame()
    }
}

impl fmt::Debug for RefFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("refs", &self.ref_count())
            .finish()
    }
}
