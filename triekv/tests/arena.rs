//! Fixed-slab arena accounting: a sequence of puts whose cumulative allocation would exceed the
//! ceiling fails with `OutOfMemory`, and nothing previously inserted is lost.

use triekv::{ArenaMode, Error, Options, Transaction};

#[test]
fn fixed_slab_rejects_once_the_ceiling_is_hit_without_losing_prior_inserts() {
    let options = Options::new().arena_mode(ArenaMode::FixedSlab { limit: 200 });
    let mut tr = Transaction::new_ram_only(options);
    tr.begin().unwrap();

    let mut inserted = Vec::new();
    loop {
        let key = format!("key-{}", inserted.len());
        match tr.put(key.as_bytes(), b"some-value-bytes") {
            Ok(()) => inserted.push(key),
            Err(Error::OutOfMemory) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
        if inserted.len() > 1000 {
            panic!("fixed slab never hit its ceiling");
        }
    }

    assert!(!inserted.is_empty());
    for key in &inserted {
        assert_eq!(
            tr.get(key.as_bytes()).unwrap().unwrap().as_bytes(),
            b"some-value-bytes"
        );
    }
}

#[test]
fn dynamic_mode_with_no_limit_never_hits_enomem_for_modest_workloads() {
    let options = Options::new().arena_mode(ArenaMode::Dynamic { limit: None });
    let mut tr = Transaction::new_ram_only(options);
    tr.begin().unwrap();
    for i in 0..500 {
        tr.put(format!("k{i}").as_bytes(), b"v").unwrap();
    }
    assert_eq!(tr.get(b"k499").unwrap().unwrap().as_bytes(), b"v");
}
