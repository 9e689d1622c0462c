//! Lock-free intrusive chains of [`Command`] nodes (spec.md §4.5).
//!
//! Two shapes are used throughout the crate: a [`SharedStack`], pushed to
//! concurrently by many producer threads and drained in one atomic swap
//! by a single consumer, and a [`PrivateFifo`], a plain singly-linked
//! list only ever touched by one thread at a time. Both reuse `Command`'s
//! own `next` field rather than allocating separate list nodes — a
//! command is only ever on exactly one of these chains at a time.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::command::Command;

/// A chain drained from a [`SharedStack`] comes out in LIFO (most
/// recently pushed first) order. Reversing it restores submission
/// order, which matters for ordering guarantees like "Stop processed
/// after an earlier Play for the same stream in the same tick".
pub(crate) fn reverse_chain(mut head: *mut Command) -> (*mut Command, *mut Command) {
    if head.is_null() {
        return (ptr::null_mut(), ptr::null_mut());
    }
    let tail = head;
    let mut prev: *mut Command = ptr::null_mut();
    while !head.is_null() {
        let next = unsafe { (*head).next.load(Ordering::Relaxed) };
        unsafe { (*head).next.store(prev, Ordering::Relaxed) };
        prev = head;
        head = next;
    }
    (prev, tail)
}

/// Multi-producer, single-consumer stack. Producers `push` concurrently;
/// the one consumer drains the whole chain with `take_all`.
pub(crate) struct SharedStack {
    head: AtomicPtr<Command>,
}

// `SharedStack`'s only field is an `AtomicPtr`, which is already
// unconditionally `Send`/`Sync` — no manual impl needed (or allowed:
// the auto-derived ones already apply).

impl SharedStack {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Pushes a single node. Safe to call concurrently from any number
    /// of threads.
    pub(crate) fn push(&self, node: Box<Command>) {
        let node_ptr = Box::into_raw(node);
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            unsafe { (*node_ptr).next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, node_ptr, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }
    }

    /// Atomically empties the stack, returning the LIFO-order chain head
    /// (or null if the stack was empty). The caller takes ownership of
    /// every node in the chain.
    pub(crate) fn take_all(&self) -> *mut Command {
        self.head.swap(ptr::null_mut(), Ordering::AcqRel)
    }

    /// Splices an externally-built chain (`head..=tail`, already linked
    /// through `next`) onto the front of the stack without disturbing
    /// whatever concurrent pushes are doing. `tail.next` is overwritten
    /// to whatever the stack's head was at the moment of the successful
    /// exchange, so no node from either chain is ever orphaned.
    pub(crate) fn push_chain(&self, head: *mut Command, tail: *mut Command) {
        if head.is_null() {
            return;
        }
        let mut old_head = self.head.load(Ordering::Acquire);
        loop {
            unsafe { (*tail).next.store(old_head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(old_head, head, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => old_head = actual,
            }
        }
    }
}

impl Drop for SharedStack {
    fn drop(&mut self) {
        let mut head = self.take_all();
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            head = node.next.load(Ordering::Relaxed);
        }
    }
}

/// Singly-linked list touched by exactly one thread at a time: either a
/// `Client`'s private command pool, or the mixer's private "chamber" for
/// the duration of one tick.
pub(crate) struct PrivateFifo {
    head: *mut Command,
}

// SAFETY: moving a `PrivateFifo` (and the chain it owns) to another
// thread and continuing to use it serially there is sound; it is never
// accessed from two threads at once.
unsafe impl Send for PrivateFifo {}

impl PrivateFifo {
    pub(crate) fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub(crate) fn push(&mut self, node: Box<Command>) {
        let node_ptr = Box::into_raw(node);
        unsafe { (*node_ptr).next.store(self.head, Ordering::Relaxed) };
        self.head = node_ptr;
    }

    pub(crate) fn pop(&mut self) -> Option<Box<Command>> {
        if self.head.is_null() {
            return None;
        }
        let node = unsafe { Box::from_raw(self.head) };
        self.head = node.next.load(Ordering::Relaxed);
        Some(node)
    }

    /// Prepends an already-linked `head..=tail` chain.
    pub(crate) fn push_chain(&mut self, head: *mut Command, tail: *mut Command) {
        if head.is_null() {
            return;
        }
        unsafe { (*tail).next.store(self.head, Ordering::Relaxed) };
        self.head = head;
    }

    /// Hands out the whole chain (head, tail), leaving this FIFO empty.
    /// Returns `None` if empty. Used by the mixer to move a drained
    /// chamber onto the shared exhaust stack in one splice.
    pub(crate) fn take_chain(&mut self) -> Option<(*mut Command, *mut Command)> {
        if self.head.is_null() {
            return None;
        }
        let head = self.head;
        let mut tail = head;
        loop {
            let next = unsafe { (*tail).next.load(Ordering::Relaxed) };
            if next.is_null() {
                break;
            }
            tail = next;
        }
        self.head = ptr::null_mut();
        Some((head, tail))
    }

    /// Non-destructive iterator over the chain, front to back.
    pub(crate) fn iter(&self) -> ChainIter<'_> {
        ChainIter {
            cursor: self.head,
            _marker: std::marker::PhantomData,
        }
    }
}

impl Drop for PrivateFifo {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

pub(crate) struct ChainIter<'a> {
    cursor: *mut Command,
    _marker: std::marker::PhantomData<&'a Command>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Command;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_null() {
            return None;
        }
        let node = unsafe { &*self.cursor };
        self.cursor = node.next.load(Ordering::Relaxed);
        Some(node)
    }
}
