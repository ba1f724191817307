//! Free list of frame object shells.
//!
//! Frame objects are created and dropped at call rate while tracing or
//! profiling, so released shells are kept for reuse up to a bound. The pool
//! belongs to one interpreter; finalizing it at interpreter teardown frees
//! every shell and forbids further allocation.

use crate::config::FramePoolConfig;
use crate::frame_object::{FacadeShell, FrameLink};
use crate::thread::ThreadInner;
use log::debug;
use std::rc::Weak;

/// Bounded LIFO of empty frame object shells.
pub struct FacadePool {
    free: Vec<Box<FacadeShell>>,
    max_free: usize,
    finalized: bool,
}

impl FacadePool {
    pub fn new(config: &FramePoolConfig) -> Self {
        Self {
            free: Vec::with_capacity(config.max_free.min(16)),
            max_free: config.max_free,
            finalized: false,
        }
    }

    /// Take a shell, reusing a released one when available.
    ///
    /// # Panics
    ///
    /// Panics once the pool has been finalized.
    pub(crate) fn alloc(&mut self, link: FrameLink, thread: Weak<ThreadInner>) -> Box<FacadeShell> {
        assert!(!self.finalized, "frame object allocated after interpreter teardown");
        match self.free.pop() {
            Some(mut shell) => {
                shell.link = link;
                shell.thread = thread;
                shell
            }
            None => Box::new(FacadeShell::new(link, thread)),
        }
    }

    /// Return an emptied shell.
    pub(crate) fn release(&mut self, shell: Box<FacadeShell>) {
        debug_assert!(shell.is_empty());
        if !self.finalized && self.free.len() < self.max_free {
            self.free.push(shell);
        }
    }

    /// Shells waiting for reuse.
    #[inline]
    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    /// Free every pooled shell, returning how many were freed.
    pub fn clear(&mut self) -> usize {
        let freed = self.free.len();
        self.free.clear();
        freed
    }

    /// Free the pool for good.
    pub fn finalize(&mut self) {
        let freed = self.clear();
        self.finalized = true;
        debug!("frame object pool finalized, {} shells freed", freed);
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl std::fmt::Debug for FacadePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacadePool")
            .field("free", &self.free.len())
            .field("max_free", &self.max_free)
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max_free: usize) -> FacadePool {
        FacadePool::new(&FramePoolConfig { max_free })
    }

    fn shell(pool: &mut FacadePool) -> Box<FacadeShell> {
        pool.alloc(FrameLink::Detached, Weak::new())
    }

    #[test]
    fn test_release_then_reuse() {
        let mut pool = pool(4);
        let a = shell(&mut pool);
        let addr = &*a as *const FacadeShell;
        pool.release(a);
        assert_eq!(pool.num_free(), 1);
        let b = shell(&mut pool);
        assert_eq!(&*b as *const FacadeShell, addr);
        assert_eq!(pool.num_free(), 0);
    }

    #[test]
    fn test_bounded() {
        let mut pool = pool(2);
        let shells: Vec<_> = (0..5).map(|_| shell(&mut pool)).collect();
        for s in shells {
            pool.release(s);
        }
        assert_eq!(pool.num_free(), 2);
    }

    #[test]
    fn test_clear() {
        let mut pool = pool(4);
        let s = shell(&mut pool);
        pool.release(s);
        assert_eq!(pool.clear(), 1);
        assert_eq!(pool.num_free(), 0);
    }

    #[test]
    fn test_release_after_finalize_frees() {
        let mut pool = pool(4);
        let s = shell(&mut pool);
        pool.finalize();
        pool.release(s);
        assert_eq!(pool.num_free(), 0);
        assert!(pool.is_finalized());
    }

    #[test]
    #[should_panic(expected = "after interpreter teardown")]
    fn test_alloc_after_finalize_panics() {
        let mut pool = pool(4);
        pool.finalize();
        let _ = shell(&mut pool);
    }
}
