// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property tests for the allocator: arbitrary alloc/free interleavings
//! must keep the chunk chain walkable, keep live payloads intact and
//! disjoint, zero-fill every allocation, and never leave two adjacent
//! free chunks behind a free.

use kern::heap::Heap;
use proptest::prelude::*;
use proptest::sample::Index;
use proptest_derive::Arbitrary;

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Alloc(#[proptest(strategy = "1usize..600")] usize),
    Free(Index),
}

struct Live {
    ptr: *mut u8,
    len: usize,
    fill: u8,
}

fn check_disjoint(live: &[Live], p: *mut u8, len: usize) -> Result<(), TestCaseError> {
    let a = p as usize;
    for other in live {
        let b = other.ptr as usize;
        prop_assert!(
            a + len <= b || b + other.len <= a,
            "allocation {a:#x}+{len} overlaps {b:#x}+{}",
            other.len
        );
    }
    Ok(())
}

proptest! {
    #[test]
    fn alloc_free_interleavings_preserve_invariants(ops: Vec<Op>) {
        let mut buf = vec![0u8; 64 * 1024];
        // Safety: buf outlives heap and every pointer derived from it.
        let heap = unsafe { Heap::init_raw(buf.as_mut_ptr(), buf.len()) }.unwrap();

        let mut live: Vec<Live> = Vec::new();
        let mut fill: u8 = 0;

        for op in ops {
            match op {
                Op::Alloc(len) => {
                    if let Some(p) = heap.alloc(len) {
                        let p = p.as_ptr();
                        prop_assert_eq!(p as usize % 16, 0);
                        let bytes = unsafe { std::slice::from_raw_parts_mut(p, len) };
                        prop_assert!(
                            bytes.iter().all(|&b| b == 0),
                            "allocations must be zero-filled"
                        );
                        check_disjoint(&live, p, len)?;

                        fill = fill.wrapping_add(1).max(1);
                        bytes.fill(fill);
                        live.push(Live { ptr: p, len, fill });
                    }
                }
                Op::Free(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let victim = live.swap_remove(index.index(live.len()));
                    // The payload must still hold exactly what we wrote:
                    // nothing else may have scribbled on a live block.
                    let bytes = unsafe {
                        std::slice::from_raw_parts(victim.ptr, victim.len)
                    };
                    prop_assert!(bytes.iter().all(|&b| b == victim.fill));

                    prop_assert_eq!(heap.free(victim.ptr), Ok(()));
                    let stats = heap.walk().unwrap();
                    prop_assert_eq!(
                        stats.adjacent_free_pairs, 0,
                        "free must coalesce neighbors"
                    );
                }
            }
            let stats = heap.walk().unwrap();
            prop_assert_eq!(stats.used_chunks, live.len());
        }

        // Drain everything: the heap must fold back into one free chunk.
        for item in live.drain(..) {
            prop_assert_eq!(heap.free(item.ptr), Ok(()));
        }
        let stats = heap.walk().unwrap();
        prop_assert_eq!(stats.chunks, 1);
        prop_assert_eq!(stats.free_chunks, 1);
    }

    #[test]
    fn double_free_is_always_detected(len in 1usize..512) {
        let mut buf = vec![0u8; 8 * 1024];
        // Safety: as above.
        let heap = unsafe { Heap::init_raw(buf.as_mut_ptr(), buf.len()) }.unwrap();
        let p = heap.alloc(len).unwrap().as_ptr();
        prop_assert_eq!(heap.free(p), Ok(()));
        prop_assert!(heap.free(p).is_err());
        heap.walk().unwrap();
    }
}
