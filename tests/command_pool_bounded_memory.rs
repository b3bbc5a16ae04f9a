//! Drive every buffer in a command pool past its headroom threshold and
//! confirm `acquire` fails fast afterward instead of blocking forever.

use archon::{BufferOptions, CommandPool, Entities, Error, Options, PoolOptions};

fn init_logger() {
    let _ = env_logger::try_init();
}

#[test]
fn exhausting_headroom_retires_every_buffer() {
    init_logger();

    const BUFFER_COUNT: usize = 4;
    const CMDS_PER_BUFFER: usize = 8;

    let mut store = Entities::init(Options {
        max_entities: (BUFFER_COUNT * CMDS_PER_BUFFER) as u32,
        ..Options::default()
    })
    .unwrap();

    let pool = CommandPool::init(
        PoolOptions {
            buffer_count: BUFFER_COUNT,
            buffer: BufferOptions::new(CMDS_PER_BUFFER, 0),
            headroom: 0.5,
            warn_ratio: 0.9,
        },
        &mut store,
    )
    .unwrap();

    for _ in 0..BUFFER_COUNT {
        let mut acquired = pool.acquire().unwrap();
        // Draining every pre-reserved handle alone pushes worst-case usage
        // to 1.0, well past the 0.5 headroom threshold, without needing to
        // touch `store` or encode a single command.
        for _ in 0..CMDS_PER_BUFFER {
            acquired.buffer.reserve().unwrap();
        }
        pool.release(acquired).unwrap();
    }

    assert_eq!(pool.retired_count(), BUFFER_COUNT);
    assert_eq!(pool.outstanding(), 0);

    assert_eq!(pool.acquire().err(), Some(Error::CmdPoolUnderflow));
}
