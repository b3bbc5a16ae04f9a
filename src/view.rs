//! Views: tuples of entity/component fields that drive row and chunk
//! iteration.
//!
//! Tuple arities up to four fields are generated via the `for_sequences!`
//! macro below rather than written out by hand.

use crate::{
    archetype::{Archetype, ArchetypeLayout},
    chunk::ChunkRef,
    component::ComponentRegistry,
    handle::Entity,
};

/// One field of a [`View`]: either the entity handle itself, a required
/// component reference, or an optional one.
///
/// # Safety
///
/// Implementors must ensure `get` only dereferences memory that `prepare`
/// proved belongs to this archetype's layout at the requested flag.
pub unsafe trait ViewItem<'a>: Sized + 'a {
    /// Per-chunk-list prepared state (typically a byte offset), computed
    /// once and reused for every row of every chunk in that list.
    type Fetch: Copy;

    /// `None` for [`Entity`] fields, which never gate archetype membership.
    fn flag() -> Option<u32>;

    /// Whether a missing component should yield `None` (`true`) rather
    /// than excluding the archetype entirely (`false`).
    fn optional() -> bool {
        false
    }

    fn prepare(layout: &ArchetypeLayout) -> Self::Fetch;

    /// # Safety
    /// `chunk` and `row` must be valid for the layout `fetch` was prepared
    /// from.
    unsafe fn get(fetch: Self::Fetch, chunk: ChunkRef, row: u32, entity: Entity) -> Self;
}

unsafe impl<'a> ViewItem<'a> for Entity {
    type Fetch = ();

    fn flag() -> Option<u32> {
        None
    }

    fn prepare(_layout: &ArchetypeLayout) -> Self::Fetch {}

    unsafe fn get(_fetch: (), _chunk: ChunkRef, _row: u32, entity: Entity) -> Self {
        entity
    }
}

unsafe impl<'a, T: 'static> ViewItem<'a> for &'a T {
    type Fetch = u32;

    fn flag() -> Option<u32> {
        ComponentRegistry::flag_of::<T>()
    }

    fn prepare(layout: &ArchetypeLayout) -> Self::Fetch {
        let flag = Self::flag().expect("component must be registered before it is viewed");
        layout
            .component_offset(flag)
            .expect("caller must only prepare a layout that is a superset of the view's flags")
    }

    unsafe fn get(offset: u32, chunk: ChunkRef, row: u32, _entity: Entity) -> Self {
        &*(chunk.row_ptr(offset, size_of::<T>(), row).as_ptr() as *const T)
    }
}

unsafe impl<'a, T: 'static> ViewItem<'a> for &'a mut T {
    type Fetch = u32;

    fn flag() -> Option<u32> {
        ComponentRegistry::flag_of::<T>()
    }

    fn prepare(layout: &ArchetypeLayout) -> Self::Fetch {
        let flag = Self::flag().expect("component must be registered before it is viewed");
        layout
            .component_offset(flag)
            .expect("caller must only prepare a layout that is a superset of the view's flags")
    }

    unsafe fn get(offset: u32, chunk: ChunkRef, row: u32, _entity: Entity) -> Self {
        &mut *(chunk.row_ptr(offset, size_of::<T>(), row).as_ptr() as *mut T)
    }
}

unsafe impl<'a, T: 'static> ViewItem<'a> for Option<&'a T> {
    type Fetch = Option<u32>;

    fn flag() -> Option<u32> {
        ComponentRegistry::flag_of::<T>()
    }

    fn optional() -> bool {
        true
    }

    fn prepare(layout: &ArchetypeLayout) -> Self::Fetch {
        Self::flag().and_then(|flag| layout.component_offset(flag))
    }

    unsafe fn get(fetch: Option<u32>, chunk: ChunkRef, row: u32, _entity: Entity) -> Self {
        fetch.map(|offset| &*(chunk.row_ptr(offset, size_of::<T>(), row).as_ptr() as *const T))
    }
}

unsafe impl<'a, T: 'static> ViewItem<'a> for Option<&'a mut T> {
    type Fetch = Option<u32>;

    fn flag() -> Option<u32> {
        ComponentRegistry::flag_of::<T>()
    }

    fn optional() -> bool {
        true
    }

    fn prepare(layout: &ArchetypeLayout) -> Self::Fetch {
        Self::flag().and_then(|flag| layout.component_offset(flag))
    }

    unsafe fn get(fetch: Option<u32>, chunk: ChunkRef, row: u32, _entity: Entity) -> Self {
        fetch.map(|offset| &mut *(chunk.row_ptr(offset, size_of::<T>(), row).as_ptr() as *mut T))
    }
}

/// A record of [`ViewItem`]s fetched together for one row. Implemented for
/// tuples of up to four fields.
pub trait View<'a>: Sized {
    type Fetch: Copy;

    /// The set of non-optional component flags this view requires.
    fn required() -> Archetype;

    fn prepare(layout: &ArchetypeLayout) -> Self::Fetch;

    /// # Safety
    /// See [`ViewItem::get`].
    unsafe fn get(fetch: Self::Fetch, chunk: ChunkRef, row: u32, entity: Entity) -> Self;
}

macro_rules! for_sequences {
    ($action:ident) => {
        for_sequences!([POP $action] [A, B, C, D]);
    };
    ([POP $action:ident] []) => {
        for_sequences!([$action] []);
    };
    ([POP $action:ident] [$head:ident $(,$tail:ident)*]) => {
        for_sequences!([$action] [$head $(,$tail)*]);
        for_sequences!([POP $action] [$($tail),*]);
    };
    ([$action:ident] [$($a:ident),*]) => {
        $action!($($a),*);
    };
}

macro_rules! view_tuple {
    () => {
        impl<'a> View<'a> for () {
            type Fetch = ();
            fn required() -> Archetype {
                Archetype::EMPTY
            }
            fn prepare(_layout: &ArchetypeLayout) -> Self::Fetch {}
            unsafe fn get(_fetch: (), _chunk: ChunkRef, _row: u32, _entity: Entity) -> Self {}
        }
    };

    ($($a:ident),+) => {
        impl<'a, $($a: ViewItem<'a>),+> View<'a> for ($($a,)+) {
            type Fetch = ($($a::Fetch,)+);

            fn required() -> Archetype {
                let mut required = Archetype::EMPTY;
                $(
                    if !$a::optional() {
                        if let Some(flag) = $a::flag() {
                            required = required.inserting(flag);
                        }
                    }
                )+
                required
            }

            fn prepare(layout: &ArchetypeLayout) -> Self::Fetch {
                ($($a::prepare(layout),)+)
            }

            unsafe fn get(fetch: Self::Fetch, chunk: ChunkRef, row: u32, entity: Entity) -> Self {
                #![allow(non_snake_case)]
                let ($($a,)+) = fetch;
                ($($a::get($a, chunk, row, entity),)+)
            }
        }
    };
}

for_sequences!(view_tuple);

fn size_of<T>() -> usize {
    std::mem::size_of::<T>()
}
