// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring buffers for drivers that may be entered from several contexts
//!
//! Each ring buffer is a `static` holding a fixed number of entries, guarded
//! by a spin lock so that concurrent callers (power-management callbacks on
//! different CPUs, or test threads on the host) can record into the same
//! buffer. Nothing here allocates, and the crate is `no_std` outside of its
//! own tests.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! ## Creating a ring buffer
//!
//! ```
//! ringbuf!(u32, 16, 0);
//! ```
//!
//! Entries are recorded with [`ringbuf_entry!`]:
//!
//! ```
//! ringbuf_entry!(status);
//! ```
//!
//! A named ring buffer can be declared and fed the same way:
//!
//! ```
//! ringbuf!(SEQ_RINGBUF, Trace, 32, Trace::None);
//!
//! // ...
//!
//! ringbuf_entry!(SEQ_RINGBUF, Trace::SeqStart(pd));
//! ```
//!
//! ## Reading a ring buffer back
//!
//! A debug or snapshot facility can lock the static and walk it with
//! [`Ringbuf::iter`], which yields entries oldest first:
//!
//! ```
//! for ent in SEQ_RINGBUF.lock().iter() {
//!     persist(ent.line, ent.count, ent.payload);
//! }
//! ```
//!
//! Repeated identical entries from the same source line are folded into one
//! entry whose `count` is bumped, so a polling loop that logs the same value
//! a thousand times costs a single slot.

#![cfg_attr(not(test), no_std)]

/// Re-export the lock type so that code generated by the macros is guaranteed
/// to be able to find it.
pub use spin;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The actual type of `NAME` will be `spin::Mutex<Ringbuf<T, N>>`.
///
/// If you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::spin::Mutex<$crate::Ringbuf<$t, $n>> =
            $crate::spin::Mutex::new($crate::Ringbuf::new($init));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// With the `disabled` feature the static still exists, so readers continue
/// to compile, but it has no room for entries.
#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        static $name: $crate::spin::Mutex<$crate::Ringbuf<$t, 0>> =
            $crate::spin::Mutex::new($crate::Ringbuf::new($init));
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`. If you declared your ringbuffer without a name, you can also use
/// this without a name, and it will default to `__RINGBUF`.
///
/// The payload is evaluated before the lock is taken, so it may itself record
/// into the same ringbuffer.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other, by evaluating them in a tuple where each cannot
        // accidentally use the other's binding.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::entry(
            &mut *$crate::spin::Mutex::lock(buf),
            line!() as u16,
            p,
        );
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
/// A `count` of zero marks a slot that holds nothing.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Creates an empty ring buffer whose unused slots hold `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // An empty buffer is treated as if `last` were out of range, which
        // lands the first entry in slot 0 below.
        let last = self.last.unwrap_or(usize::MAX);

        // `get_mut` keeps a corrupt or absent `last` from panicking; we just
        // start over at 0 in that case.
        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        if N == 0 {
            return;
        }

        let ndx = match last.wrapping_add(1) {
            n if n >= N => 0,
            n => n,
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// Iterates over every recorded entry, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };
        let (newer, older) = self.buffer.split_at(start);
        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.count != 0)
    }

}
