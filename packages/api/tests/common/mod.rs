#![allow(dead_code)]

use std::error::Error;
use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::Runtime;
use tokio::sync::{Mutex, MutexGuard};

use db::{DbConfig, DbError};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

// The embedded engine's background tasks live on the runtime that opened the
// connection, so every test shares this one instead of a per-test runtime.
static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("test runtime")
});

pub type TestResult = Result<(), Box<dyn Error>>;

pub fn run<F: Future<Output = TestResult>>(test: F) -> TestResult {
    RUNTIME.block_on(test)
}

pub async fn setup_db() -> Result<MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    db::init(DbConfig::memory()).await?;
    let db_conn = db::get_db()?;
    db_conn
        .query("DELETE job; DELETE worker; DELETE config; DELETE sequence;")
        .await?
        .check()?;
    Ok(guard)
}
