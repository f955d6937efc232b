//! Driving the C shaped API directly. Run with `RUST_LOG=trace` to watch
//! every operation.

use segalloc::Segalloc;

fn main() {
    env_logger::init();

    let allocator = Segalloc::new();

    unsafe {
        let numbers = allocator.malloc(4 * 8).cast::<u64>();
        for i in 0..4 {
            numbers.add(i).write(i as u64 * 100);
        }

        let zeroed = allocator.calloc(10, 16);
        assert!((0..160).all(|i| zeroed.add(i).read() == 0));

        let grown = allocator.realloc(numbers.cast(), 4096).cast::<u64>();
        assert_eq!(grown.add(3).read(), 300);

        allocator.free(zeroed);
        allocator.free(grown.cast());
    }

    println!("heap grown to {} bytes", allocator.heap_size());
}
