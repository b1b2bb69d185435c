//! Call frames for pointer-calls and variant-calls.
//!
//! A [`CallFrame`] lays out one call's arguments in ABI form: each argument's
//! bytes are written into a bump arena and the arena address is recorded in a
//! fixed array the engine receives as `*const *const c_void`. The return slot
//! is reserved in the same arena. Dropping the frame resets the arena and
//! returns it to a per-thread pool, so every exit path releases the storage.
//!
//! A [`Transferred`] argument stays pending in the frame. The dispatcher
//! completes the handover once the engine has been called; a frame dropped
//! before that releases the reference.
//!
//! ```ignore
//! let mut frame = CallFrame::new();
//! frame.arg(&lines).arg(Some(material.raw())).arg(false).arg(Color::WHITE);
//! dispatch::ptrcall::<()>(bind, Some(gizmo.raw()), frame)?;
//! ```
//!
//! Borrowed arguments (`&'a T`) must outlive the frame; heap builtins are
//! passed as bitwise copies of their slots, so the borrow keeps the owner
//! alive for the call.

use std::cell::RefCell;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;

use bumpalo::Bump;

use crate::builtin::{GString, PayloadType};
use crate::error::HandleError;
use crate::handle::Payload;
use crate::marshal::{AbiType, FromAbiReturn, ToAbi};
use crate::object::{Bound, EngineClass, PendingHandover, RawObject, Transferred};

/// Largest number of arguments one frame can carry.
pub const MAX_FRAME_ARGS: usize = gdbridge_sys::MAX_CALL_ARGS;

const ARENA_CAPACITY: usize = 1024;
const POOLED_ARENAS: usize = 8;

thread_local! {
    static ARENAS: RefCell<Vec<Bump>> = const { RefCell::new(Vec::new()) };
}

fn acquire_arena() -> Bump {
    ARENAS
        .try_with(|pool| pool.borrow_mut().pop())
        .ok()
        .flatten()
        .unwrap_or_else(|| Bump::with_capacity(ARENA_CAPACITY))
}

fn release_arena(mut arena: Bump) {
    arena.reset();
    let _ = ARENAS.try_with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < POOLED_ARENAS {
            pool.push(arena);
        }
    });
}

/// Argument and return storage for one call.
///
/// `'a` bounds every borrowed argument. Frames hold raw pointers and are
/// neither `Send` nor `Sync`.
pub struct CallFrame<'a> {
    arena: Option<Bump>,
    args: [*const c_void; MAX_FRAME_ARGS],
    len: usize,
    ret: *mut c_void,
    poison: Option<HandleError>,
    temporaries: Vec<Payload>,
    handovers: Vec<PendingHandover>,
    _borrows: PhantomData<&'a ()>,
}

impl<'a> CallFrame<'a> {
    pub fn new() -> Self {
        Self {
            arena: Some(acquire_arena()),
            args: [ptr::null(); MAX_FRAME_ARGS],
            len: 0,
            ret: ptr::null_mut(),
            poison: None,
            temporaries: Vec::new(),
            handovers: Vec::new(),
            _borrows: PhantomData,
        }
    }

    fn arena(&self) -> &Bump {
        match &self.arena {
            Some(arena) => arena,
            None => unreachable!("frame arena is only taken in drop"),
        }
    }

    /// Appends one argument.
    ///
    /// # Panics
    ///
    /// If the frame already holds [`MAX_FRAME_ARGS`] arguments.
    pub fn arg(&mut self, value: impl PushArg<'a>) -> &mut Self {
        value.push_into(self);
        self
    }

    /// Writes `bytes` into the arena and records its address as the next
    /// argument.
    pub fn push_abi<A: Copy>(&mut self, bytes: A) -> &mut Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("CallFrame::push_abi");

        assert!(
            self.len < MAX_FRAME_ARGS,
            "call frame overflow: more than {MAX_FRAME_ARGS} arguments"
        );
        let slot: *const c_void = if size_of::<A>() == 0 {
            ptr::null()
        } else {
            (self.arena().alloc(bytes) as *mut A).cast_const().cast()
        };
        self.args[self.len] = slot;
        self.len += 1;
        self
    }

    /// Pushes the ABI form of `value`, poisoning the frame on a dead handle.
    pub(crate) fn push_value<T: ToAbi + ?Sized>(&mut self, value: &T) -> &mut Self {
        match value.to_abi() {
            Ok(bytes) => self.push_abi(bytes),
            Err(err) => {
                tracing::warn!(target: "gdbridge::dispatch", %err, index = self.len, "argument handle is dead, frame poisoned");
                self.poison.get_or_insert(err);
                self.push_abi(MaybeUninit::<T::Abi>::zeroed())
            }
        }
    }

    /// Appends a 24-byte variant argument for a variant-call.
    pub fn variant_arg(&mut self, value: &'a crate::variant::Variant) -> &mut Self {
        self.push_value(value)
    }

    /// Reserves a typed return slot. Unit types get a null slot.
    pub fn ret<R: AbiType>(&mut self) -> *mut c_void {
        self.ret = if size_of::<R::Abi>() == 0 {
            ptr::null_mut()
        } else {
            let slot = self.arena().alloc(MaybeUninit::<R::Abi>::zeroed());
            slot.as_mut_ptr().cast()
        };
        self.ret
    }

    /// Decodes the return slot after dispatch.
    ///
    /// # Safety
    ///
    /// The slot must have been reserved with `ret::<R>()` and filled by the
    /// engine. Ownership of the value moves to the returned `R`.
    pub unsafe fn take_ret<R: FromAbiReturn>(&mut self) -> R {
        let abi = if size_of::<R::Abi>() == 0 {
            unsafe { MaybeUninit::<R::Abi>::zeroed().assume_init() }
        } else {
            debug_assert!(!self.ret.is_null(), "take_ret without ret");
            unsafe { ptr::read(self.ret.cast::<R::Abi>()) }
        };
        self.ret = ptr::null_mut();
        unsafe { R::from_abi_return(abi) }
    }

    pub fn ret_ptr(&self) -> *mut c_void {
        self.ret
    }

    /// The argument pointer array, valid until the frame is dropped.
    pub fn args_ptr(&self) -> *const *const c_void {
        self.args.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The first dead handle pushed into this frame, if any.
    pub fn poison(&self) -> Option<HandleError> {
        self.poison
    }

    /// Number of transferred arguments still owned by the frame.
    pub fn pending_handovers(&self) -> usize {
        self.handovers.len()
    }

    /// Called once the engine has received the arguments.
    pub(crate) fn complete_handovers(&mut self) {
        for handover in self.handovers.drain(..) {
            handover.complete();
        }
    }

    /// Keeps a host-created temporary alive for the frame's lifetime.
    pub(crate) fn keep(&mut self, payload: Payload) -> Result<crate::handle::RawSlots, HandleError> {
        let raw = payload.raw()?;
        self.temporaries.push(payload);
        Ok(raw)
    }
}

impl Default for CallFrame<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallFrame<'_> {
    fn drop(&mut self) {
        if let Some(arena) = self.arena.take() {
            release_arena(arena);
        }
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// Something that can be appended to a [`CallFrame`].
pub trait PushArg<'a> {
    fn push_into(self, frame: &mut CallFrame<'a>);
}

impl<'a, T: ToAbi> PushArg<'a> for &'a T {
    fn push_into(self, frame: &mut CallFrame<'a>) {
        frame.push_value(self);
    }
}

macro_rules! impl_push_by_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<'a> PushArg<'a> for $ty {
                fn push_into(self, frame: &mut CallFrame<'a>) {
                    frame.push_value(&self);
                }
            }
        )*
    };
}

impl_push_by_value!(bool, i64, i32, i16, i8, u32, u16, u8, f64, f32);
impl_push_by_value!(
    crate::builtin::Vector2,
    crate::builtin::Vector2i,
    crate::builtin::Vector3,
    crate::builtin::Vector3i,
    crate::builtin::Vector4,
    crate::builtin::Vector4i,
    crate::builtin::Rect2,
    crate::builtin::Rect2i,
    crate::builtin::Transform2D,
    crate::builtin::Plane,
    crate::builtin::Quaternion,
    crate::builtin::Aabb,
    crate::builtin::Basis,
    crate::builtin::Transform3D,
    crate::builtin::Projection,
    crate::builtin::Color,
    crate::builtin::Rid,
    RawObject,
    Option<RawObject>,
);

impl<'a, 'b: 'a, T: EngineClass> PushArg<'a> for Bound<'b, T> {
    fn push_into(self, frame: &mut CallFrame<'a>) {
        frame.push_value(&self);
    }
}

impl<'a, 'b: 'a, T: EngineClass> PushArg<'a> for Option<Bound<'b, T>> {
    fn push_into(self, frame: &mut CallFrame<'a>) {
        frame.push_value(&self.map(|b| b.raw()));
    }
}

/// The engine takes over the reference carried by a transferred handle once
/// the call is dispatched.
impl<'a, T: EngineClass> PushArg<'a> for Transferred<T> {
    fn push_into(self, frame: &mut CallFrame<'a>) {
        let pending = self.into_pending();
        frame.push_value(&pending.raw());
        frame.handovers.push(pending);
    }
}

/// String literals become engine strings owned by the frame.
impl<'a> PushArg<'a> for &str {
    fn push_into(self, frame: &mut CallFrame<'a>) {
        let payload = GString::from(self).into_payload();
        match frame.keep(payload) {
            Ok(raw) => {
                frame.push_abi(crate::marshal::take_words::<1>(raw));
            }
            Err(err) => {
                frame.poison.get_or_insert(err);
                frame.push_abi([0u64; 1]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::Vector3;
    use crate::test_support;
    use crate::variant::Variant;

    #[test]
    fn scalar_arguments_are_laid_out_at_abi_width() {
        let mut frame = CallFrame::new();
        frame.arg(true).arg(7i32).arg(1.5f32);
        assert_eq!(frame.len(), 3);

        unsafe {
            let args = frame.args_ptr();
            assert_eq!(*(*args.add(0)).cast::<u8>(), 1);
            assert_eq!(*(*args.add(1)).cast::<i64>(), 7);
            assert_eq!(*(*args.add(2)).cast::<f64>(), 1.5);
        }
    }

    #[test]
    fn pod_arguments_are_copied_by_value() {
        let mut frame = CallFrame::new();
        frame.arg(Vector3::new(1.0, 2.0, 3.0));
        let stored = unsafe { *(*frame.args_ptr()).cast::<Vector3>() };
        assert_eq!(stored, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn thirty_two_arguments_fit() {
        let mut frame = CallFrame::new();
        for i in 0..MAX_FRAME_ARGS as i64 {
            frame.arg(i);
        }
        assert_eq!(frame.len(), MAX_FRAME_ARGS);
        let last = unsafe { *(*frame.args_ptr().add(MAX_FRAME_ARGS - 1)).cast::<i64>() };
        assert_eq!(last, 31);
    }

    #[test]
    #[should_panic(expected = "call frame overflow")]
    fn thirty_third_argument_panics() {
        let mut frame = CallFrame::new();
        for i in 0..=MAX_FRAME_ARGS as i64 {
            frame.arg(i);
        }
    }

    #[test]
    fn unit_return_has_null_slot() {
        let mut frame = CallFrame::new();
        assert!(frame.ret::<()>().is_null());
        assert!(!frame.ret::<i64>().is_null());
    }

    #[test]
    fn take_ret_reads_what_the_engine_wrote() {
        let mut frame = CallFrame::new();
        let slot = frame.ret::<f64>();
        unsafe {
            slot.cast::<f64>().write(4.5);
            assert_eq!(frame.take_ret::<f64>(), 4.5);
        }
    }

    #[test]
    fn nested_frames_use_separate_arenas() {
        let mut outer = CallFrame::new();
        outer.arg(1i64);
        let outer_slot = unsafe { *outer.args_ptr() };
        {
            let mut inner = CallFrame::new();
            inner.arg(2i64);
            assert_ne!(outer_slot, unsafe { *inner.args_ptr() });
        }
        assert_eq!(unsafe { *outer_slot.cast::<i64>() }, 1);
    }

    #[test]
    fn dead_handle_poisons_frame() {
        let _guard = test_support::lock();
        let variant = Variant::from(&GString::from("x"));
        let handle = variant.payload().handle();
        crate::handle::end(handle);

        let mut frame = CallFrame::new();
        frame.variant_arg(&variant);
        assert!(matches!(frame.poison(), Some(HandleError::Stale { .. })));
        assert_eq!(frame.len(), 1);
        drop(frame);
        // ending twice is a logged no-op
        drop(variant);
    }

    #[test]
    fn string_literal_temporaries_live_until_drop() {
        let _guard = test_support::lock();
        let before = crate::handle::stats().kind(crate::handle::PayloadKind::String);
        {
            let mut frame = CallFrame::new();
            frame.arg("hello");
            let now = crate::handle::stats().kind(crate::handle::PayloadKind::String);
            assert_eq!(now.live(), before.live() + 1);
        }
        let after = crate::handle::stats().kind(crate::handle::PayloadKind::String);
        assert_eq!(after.live(), before.live());
    }
}
