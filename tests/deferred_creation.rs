//! Two command buffers, each encoded on its own thread without touching the
//! store, then executed sequentially. Final sum must match the
//! immediate-write version of the same fill.

mod common;

use archon::{descriptor, execute_immediate, BufferOptions, CommandBuffer, Entities, Entity, Options};
use common::U256;
use std::thread;

#[derive(Clone, Copy)]
struct A(u64);
#[derive(Clone, Copy)]
struct B(u128);
#[derive(Clone, Copy)]
struct C(U256);

fn encode_range(buffer: &mut CommandBuffer, range: std::ops::Range<u32>) {
    for i in range {
        let e = buffer.reserve().unwrap();
        buffer.add_val(e, descriptor::<A>(), A(i as u64)).unwrap();
        buffer.add_val(e, descriptor::<B>(), B(i as u128)).unwrap();
        buffer.add_val(e, descriptor::<C>(), C(U256::from_u64(i as u64))).unwrap();
    }
}

#[test]
fn two_threads_encode_one_thread_executes() {
    const N: u32 = 100_000;
    const HALF: u32 = N / 2;

    let mut store = Entities::init(Options {
        max_entities: N,
        max_archetypes: 8,
        max_chunks: 8192,
        chunk_size: 4096,
        ..Options::default()
    })
    .unwrap();

    // Each entity encodes 4 subcommands (1 bind_entity + 3 add_val), so
    // `cmds` must cover the subcommand count, not the entity count.
    let opts = BufferOptions::new(4 * HALF as usize, 64).with_reserved_entities(HALF as usize);
    let mut buffer_a = CommandBuffer::init(opts, &mut store).unwrap();
    let mut buffer_b = CommandBuffer::init(opts, &mut store).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| encode_range(&mut buffer_a, 0..HALF));
        scope.spawn(|| encode_range(&mut buffer_b, HALF..N));
    });

    execute_immediate(&mut buffer_a, &mut store).unwrap();
    execute_immediate(&mut buffer_b, &mut store).unwrap();

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
}
