//! Encode `destroy` for half the entities while iterating, execute, and
//! check the survivors and the destroyed handles' generations.

use archon::{execute_immediate, Archetype, BufferOptions, CommandBuffer, ComponentRegistry, Entity, Options, Entities};
use std::collections::HashMap;

struct Tag(u32);

#[test]
fn destroy_half_via_command_buffer() {
    const N: u32 = 10_000;
    const HALF: u32 = N / 2;

    let flag = ComponentRegistry::register::<Tag>();
    let with_tag = Archetype::EMPTY.inserting(flag);

    let mut store = Entities::init(Options {
        max_entities: N,
        max_archetypes: 4,
        max_chunks: 1024,
        chunk_size: 4096,
        ..Options::default()
    })
    .unwrap();

    let mut handles = Vec::with_capacity(N as usize);
    for i in 0..N {
        let e = store.reserve_immediate().unwrap();
        store.change_arch_immediate(e, with_tag, Archetype::EMPTY).unwrap();
        let bytes = store.get_component::<Tag>(e).unwrap();
        bytes.copy_from_slice(&i.to_ne_bytes());
        handles.push(e);
    }

    let to_destroy: Vec<Entity> = store
        .iterator::<(Entity, &Tag)>()
        .filter(|(_, tag)| tag.0 < HALF)
        .map(|(e, _)| e)
        .collect();
    assert_eq!(to_destroy.len(), HALF as usize);
    let destroyed_by_index: HashMap<u32, Entity> = to_destroy.iter().map(|&e| (e.index(), e)).collect();

    let opts = BufferOptions::new(to_destroy.len(), 0).with_reserved_entities(0);
    let mut buffer = CommandBuffer::init(opts, &mut store).unwrap();
    for &e in &to_destroy {
        buffer.destroy(e).unwrap();
    }
    execute_immediate(&mut buffer, &mut store).unwrap();

    assert_eq!(store.count(), HALF);
    for &e in &to_destroy {
        assert!(!store.exists(e));
    }
    for &e in &handles {
        if !destroyed_by_index.contains_key(&e.index()) {
            assert!(store.exists(e));
        }
    }

    // Draining the freed slots confirms each one's generation advanced by
    // exactly one: a fresh reservation at the same index must outrank the
    // destroyed handle, and nothing else touched these indices in between.
    for _ in 0..HALF {
        let fresh = store.reserve_immediate().unwrap();
        let old = destroyed_by_index
            .get(&fresh.index())
            .expect("freed index must be one we destroyed");
        assert_eq!(fresh.generation(), old.generation() + 1);
    }
}
