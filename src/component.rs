//! Component type descriptors and the process-wide flag registry.
//!
//! Descriptors carry identity by address rather than `TypeId`, so a
//! descriptor can hold a lazily assigned, idempotent registration flag that
//! every caller sees through the same instance — see `descriptor::<T>()`
//! below.

use std::{
    any::type_name,
    fmt::{self, Display},
    mem::{align_of, size_of},
    ptr::drop_in_place,
    sync::OnceLock,
};

/// Components may not be registered beyond this many distinct types. Dense
/// flag indices are packed into a `u64` archetype bit-set, so 63 leaves one
/// spare encoding (0) that is never assigned, keeping flag 0 distinguishable
/// from "uninitialized" in debug output.
pub const MAX_COMPONENTS: u32 = 63;

/// No component's alignment may exceed this. Chunk layout math assumes
/// every offset it hands out satisfies every registered component's
/// alignment simultaneously once rounded up to this bound.
pub const MAX_ALIGN: usize = 16;

/// Immutable per-type record: size, alignment, drop glue, and (once
/// registered) a dense flag index. Exactly one `TypeDescriptor` exists per
/// process for a given `T` — see [`descriptor`] — so identity is by address,
/// not by `TypeId`, matching the data model's "identity is by address"
/// requirement.
#[derive(Debug)]
pub struct TypeDescriptor {
    size: usize,
    align: usize,
    name: &'static str,
    drop_in_place: unsafe fn(*mut u8),
    flag: OnceLock<u32>,
}

impl TypeDescriptor {
    fn new<T: 'static>() -> Self {
        TypeDescriptor {
            size: size_of::<T>(),
            align: align_of::<T>(),
            name: type_name::<T>(),
            drop_in_place: erased_drop_in_place::<T>,
            flag: OnceLock::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `Some(flag)` once this type has been registered via
    /// [`ComponentRegistry::register`], `None` before that.
    pub fn flag(&self) -> Option<u32> {
        self.flag.get().copied()
    }

    pub(crate) unsafe fn drop_in_place(&self, ptr: *mut u8) {
        (self.drop_in_place)(ptr)
    }
}

impl Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.name)
    }
}

unsafe fn erased_drop_in_place<T>(ptr: *mut u8) {
    drop_in_place(ptr as *mut T)
}

/// Returns the single, process-wide descriptor for `T`. The `static` lives
/// inside this generic function, so the compiler monomorphizes one instance
/// — and therefore one address — per distinct `T`.
pub fn descriptor<T: 'static>() -> &'static TypeDescriptor {
    static CELL: OnceLock<TypeDescriptor> = OnceLock::new();
    CELL.get_or_init(TypeDescriptor::new::<T>)
}

/// Dense flag index → descriptor, in assignment order. Doubles as the
/// counter of flags handed out so far (its length is the next free index);
/// this is the single source of truth `descriptor_for_flag` reads from when
/// building a chunk layout for an archetype bit-set it hasn't seen before.
static FLAG_REGISTRY: parking_lot::Mutex<Vec<&'static TypeDescriptor>> = parking_lot::Mutex::new(Vec::new());

/// Namespace for the global component-flag registry. There is exactly one
/// flag space for the whole process, so a flag index means the same
/// component no matter which archetype's bit-set it turns up in.
pub struct ComponentRegistry;

impl ComponentRegistry {
    /// Registers `T`, assigning it the next free dense flag index. Safe to
    /// call repeatedly for the same `T` from any number of threads:
    /// registration is idempotent.
    ///
    /// # Panics
    ///
    /// Panics if `T`'s alignment exceeds [`MAX_ALIGN`], or if all
    /// [`MAX_COMPONENTS`] flags are already assigned to other types. Both
    /// are static design limits of this crate, not runtime conditions a
    /// caller can recover from by freeing resources — see `DESIGN.md`.
    pub fn register<T: 'static>() -> u32 {
        let desc = descriptor::<T>();
        assert!(
            desc.align() <= MAX_ALIGN,
            "component {} has alignment {} exceeding MAX_ALIGN ({})",
            desc,
            desc.align(),
            MAX_ALIGN
        );

        if let Some(flag) = desc.flag.get() {
            return *flag;
        }

        let mut registry = FLAG_REGISTRY.lock();
        // Another thread may have raced us between the check above and
        // taking the lock; `get_or_init` below makes the actual assignment
        // idempotent regardless.
        *desc.flag.get_or_init(|| {
            assert!(
                registry.len() < MAX_COMPONENTS as usize,
                "component flag space exhausted: {} types already registered (max {})",
                MAX_COMPONENTS,
                MAX_COMPONENTS
            );
            registry.push(desc);
            (registry.len() - 1) as u32
        })
    }

    pub fn is_registered<T: 'static>() -> bool {
        descriptor::<T>().flag().is_some()
    }

    pub fn flag_of<T: 'static>() -> Option<u32> {
        descriptor::<T>().flag()
    }
}

/// Looks up the descriptor registered for `flag`, for building the layout
/// of an archetype whose component types aren't known at the call site
/// (e.g. `Entities::change_arch_immediate`, which only has a bit-set).
pub(crate) fn descriptor_for_flag(flag: u32) -> &'static TypeDescriptor {
    FLAG_REGISTRY.lock()[flag as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        struct Marker;
        let a = ComponentRegistry::register::<Marker>();
        let b = ComponentRegistry::register::<Marker>();
        assert_eq!(a, b);
        assert!(ComponentRegistry::is_registered::<Marker>());
    }

    #[test]
    fn distinct_types_get_distinct_flags() {
        struct A;
        struct B;
        let a = ComponentRegistry::register::<A>();
        let b = ComponentRegistry::register::<B>();
        assert_ne!(a, b);
    }

    #[test]
    fn unregistered_type_reports_none() {
        struct NeverRegistered;
        assert!(!ComponentRegistry::is_registered::<NeverRegistered>());
    }
}
