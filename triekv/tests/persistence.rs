//! Commit/reopen round-trips, a simulated-crash truncation test, and the concurrent-writer
//! MODIFIED scenario.

use std::io::{Seek, SeekFrom, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use triekv::{Database, Error, Options};

fn tmp_path() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    (dir, path)
}

#[test]
fn thousand_random_keys_survive_a_close_and_reopen() {
    let (_dir, path) = tmp_path();
    let mut rng = StdRng::seed_from_u64(42);
    let mut keys: Vec<[u8; 8]> = Vec::new();
    for _ in 0..1000 {
        let mut k = [0u8; 8];
        rng.fill(&mut k);
        keys.push(k);
    }

    {
        let db = Database::open(&path, Options::new()).unwrap();
        let mut tr = db.transaction();
        tr.begin().unwrap();
        for k in &keys {
            tr.put(k, k).unwrap();
        }
        tr.commit().unwrap();
        db.close().unwrap();
    }

    let db = Database::open(&path, Options::new()).unwrap();
    let mut tr = db.transaction();
    tr.begin().unwrap();
    let mut cur = triekv::Cursor::new(&mut tr);
    cur.first().unwrap();
    let mut seen = Vec::new();
    loop {
        seen.push(cur.key().unwrap());
        if cur.next().is_err() {
            break;
        }
    }

    let mut expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
    expected.sort();
    expected.dedup();
    assert_eq!(seen, expected);
}

#[test]
fn truncated_file_falls_back_to_the_previous_committed_footer() {
    let (_dir, path) = tmp_path();
    let db = Database::open(&path, Options::new()).unwrap();

    let mut tr = db.transaction();
    tr.begin().unwrap();
    tr.put(b"stable", b"1").unwrap();
    tr.commit().unwrap();
    db.close().unwrap();

    let good_len = std::fs::metadata(&path).unwrap().len();

    let db = Database::open(&path, Options::new()).unwrap();
    let mut tr = db.transaction();
    tr.begin().unwrap();
    tr.put(b"half-written", b"2").unwrap();
    tr.commit().unwrap();
    db.close().unwrap();

    // Simulate a crash during the second commit by truncating the file back to exactly where it
    // ended after the first: the second transaction's bytes (and its footer) are discarded
    // wholesale, leaving the first commit's footer exactly where it always was, at the tail.
    let full_len = std::fs::metadata(&path).unwrap().len();
    assert!(full_len > good_len);
    {
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(good_len).unwrap();
    }

    let db = Database::open(&path, Options::new()).unwrap();
    let mut tr = db.transaction();
    tr.begin().unwrap();
    assert_eq!(tr.get(b"stable").unwrap().unwrap().as_bytes(), b"1");
    assert_eq!(tr.get(b"half-written").unwrap(), None);
}

#[test]
fn second_committer_after_concurrent_commit_is_rejected() {
    let (_dir, path) = tmp_path();
    let db = Database::open(&path, Options::new()).unwrap();

    let mut a = db.transaction();
    a.begin().unwrap();
    let mut b = db.transaction();
    b.begin().unwrap();

    a.put(b"k", b"from-a").unwrap();
    a.commit().unwrap();

    b.put(b"k", b"from-b").unwrap();
    assert!(matches!(b.commit(), Err(Error::Modified)));

    let mut check = db.transaction();
    check.begin().unwrap();
    assert_eq!(check.get(b"k").unwrap().unwrap().as_bytes(), b"from-a");
}

#[test]
fn rejects_file_shorter_than_one_footer_after_external_truncation() {
    let (_dir, path) = tmp_path();
    {
        let db = Database::open(&path, Options::new()).unwrap();
        let mut tr = db.transaction();
        tr.begin().unwrap();
        tr.put(b"a", b"1").unwrap();
        tr.commit().unwrap();
    }

    let mut file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.set_len(10).unwrap();
    file.flush().unwrap();
    drop(file);

    let err = Database::open(&path, Options::new()).unwrap_err();
    assert!(matches!(err, Error::Corrupted(_)));
}
