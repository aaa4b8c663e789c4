//! Greet Module - Using hotmod-sdk
//!
//! Build with `cargo build --release` and copy the library from
//! `target/release` into the directory a hotmod host watches. Rebuilding and
//! copying it again triggers a reload.

use hotmod_sdk::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

static CALLS: AtomicU64 = AtomicU64::new(0);

fn on_reload() -> Result<(), String> {
    CALLS.store(0, Ordering::SeqCst);
    Ok(())
}

fn on_unload() -> Result<(), String> {
    eprintln!("greet-module: unloading after {} calls", CALLS.load(Ordering::SeqCst));
    Ok(())
}

#[export]
fn test(data: String) -> String {
    CALLS.fetch_add(1, Ordering::SeqCst);
    format!("hello {}", data)
}

#[export]
fn greet(greeting: String, name: String) -> String {
    CALLS.fetch_add(1, Ordering::SeqCst);
    format!("{}, {}!", greeting, name)
}

#[export]
fn divide(a: i64, b: i64) -> Result<i64, String> {
    CALLS.fetch_add(1, Ordering::SeqCst);
    if b == 0 {
        return Err("division by zero".to_string());
    }
    Ok(a / b)
}

#[export]
fn calls() -> u64 {
    CALLS.load(Ordering::SeqCst)
}

// Entry point, buffer release and the two hooks
export_module!(
    name: "testplugin",
    version: 0x0001_0000,
    reload: on_reload,
    unload: on_unload,
);
