//! Demonstration driver: exercise all three tiers and both dumps.

#[cfg(unix)]
fn main() {
    use tier_alloc::TierAlloc;

    let mut allocator = TierAlloc::system();
    if let Err(err) = allocator.init() {
        eprintln!("init failed: {err}");
        std::process::exit(1);
    }

    let pi = allocator.alloc(std::mem::size_of::<i32>());
    let pd = allocator.alloc(std::mem::size_of::<f64>());
    let pa = allocator.alloc(10 * std::mem::size_of::<i32>());
    let pc = allocator.alloc(2048);
    let pos = allocator.alloc(15 * 1024 * 1024);

    let mut report = String::new();
    let _ = allocator.dump_stat(&mut report);
    let _ = allocator.dump_blocks(&mut report);
    print!("{report}");

    // SAFETY: every pointer came from alloc above
    unsafe {
        allocator.release(pos);
        allocator.release(pc);
        allocator.release(pa);
        allocator.release(pd);
        allocator.release(pi);
    }

    allocator.destroy();
}

#[cfg(not(unix))]
fn main() {
    eprintln!("the demo needs the mmap page source, which is unix-only");
}
