//! The allocator serving an entire program as the global allocator. Every
//! collection below gets its memory from the segregated free lists.

use segalloc::Segalloc;

#[global_allocator]
static ALLOCATOR: Segalloc = Segalloc::new();

fn main() {
    let answer = Box::new(42);

    let mut primes = vec![2, 3, 5, 7, 11];
    primes.push(13);

    let mut sentence = String::from("every byte here");
    sentence.push_str(" came from segalloc");

    println!("{answer} {primes:?} \"{sentence}\"");
    println!("heap grown to {} bytes", ALLOCATOR.heap_size());
}
