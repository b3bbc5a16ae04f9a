//! Fill a store, add three components to every entity, sum their values by
//! iteration, and check random access agrees with what iteration saw. Run
//! at `N = 100_000` to keep wall-clock reasonable; the property under test
//! is scale-independent.

mod common;

use archon::{Archetype, ComponentRegistry, Entities, Entity, Options};
use common::U256;

#[derive(Clone, Copy)]
struct A(u64);
#[derive(Clone, Copy)]
struct B(u128);
#[derive(Clone, Copy)]
struct C(U256);

fn write<T: Copy + 'static>(store: &Entities, e: Entity, value: T) {
    let bytes = store.get_component::<T>(e).expect("component must be present");
    bytes.copy_from_slice(unsafe {
        std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
    });
}

fn read<T: Copy + 'static>(store: &Entities, e: Entity) -> T {
    let bytes = store.get_component::<T>(e).expect("component must be present");
    unsafe { *(bytes.as_ptr() as *const T) }
}

#[test]
fn fill_add_components_sum_and_random_access() {
    const N: u32 = 100_000;

    let flag_a = ComponentRegistry::register::<A>();
    let flag_b = ComponentRegistry::register::<B>();
    let flag_c = ComponentRegistry::register::<C>();
    let abc = Archetype::EMPTY.inserting(flag_a).inserting(flag_b).inserting(flag_c);

    let mut store = Entities::init(Options {
        max_entities: N,
        max_archetypes: 8,
        max_chunks: 8192,
        chunk_size: 4096,
        ..Options::default()
    })
    .unwrap();

    let mut handles = Vec::with_capacity(N as usize);
    for i in 0..N {
        let e = store.reserve_immediate().unwrap();
        assert!(store.change_arch_immediate(e, abc, Archetype::EMPTY).unwrap());
        write(&store, e, A(i as u64));
        write(&store, e, B(i as u128));
        write(&store, e, C(U256::from_u64(i as u64)));
        handles.push(e);
    }

    let mut total = U256::ZERO;
    let mut visited = 0u32;
    store.for_each::<(Entity, &A, &B, &C)>(|(_, a, b, c)| {
        total = total
            .wrapping_add(U256::from_u64(a.0))
            .wrapping_add(U256::from_u128(b.0))
            .wrapping_add(c.0);
        visited += 1;
    });
    assert_eq!(visited, N);

    let sum_0_to_n_minus_1 = (N as u128 - 1) * N as u128 / 2;
    let expected = U256::from_u128(3 * sum_0_to_n_minus_1);
    assert_eq!(total, expected);

    for (i, &e) in handles.iter().enumerate() {
        let a: A = read(&store, e);
        let b: B = read(&store, e);
        let c: C = read(&store, e);
        assert_eq!(a.0, i as u64);
        assert_eq!(b.0, i as u128);
        assert_eq!(c.0, U256::from_u64(i as u64));
    }
}
