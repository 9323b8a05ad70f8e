/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use minirel::Engine;
use tempfile::TempDir;

/// Create an engine over a fresh database file in a scratch directory. The
/// directory must be kept alive for the duration of the test.
pub fn setup() -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(dir.path().join("test.db")).unwrap();
    (dir, engine)
}
