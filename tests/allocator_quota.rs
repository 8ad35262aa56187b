use std::ptr;

use lualadspa::lua::alloc::BoundedAllocator;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Operation {
    Alloc { size: u16 },
    Resize { slot_hint: u8, size: u16 },
    Free { slot_hint: u8 },
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        any::<u16>().prop_map(|size| Operation::Alloc { size }),
        (any::<u8>(), any::<u16>()).prop_map(|(slot_hint, size)| Operation::Resize { slot_hint, size }),
        any::<u8>().prop_map(|slot_hint| Operation::Free { slot_hint }),
    ]
}

proptest! {
    #[test]
    fn accounting_matches_live_blocks(
        limit in 1usize..200_000,
        ops in prop::collection::vec(operation_strategy(), 1..128),
    ) {
        let alloc = BoundedAllocator::new(limit);
        // (pointer, size) of every live block
        let mut live: Vec<(*mut std::ffi::c_void, usize)> = Vec::new();

        for op in ops {
            match op {
                Operation::Alloc { size } => {
                    let size = size as usize;
                    let p = unsafe { alloc.allocate(ptr::null_mut(), 0, size) };
                    if size == 0 {
                        prop_assert!(p.is_null());
                    } else if p.is_null() {
                        prop_assert!(alloc.allocated() + size > limit);
                    } else {
                        live.push((p, size));
                    }
                }
                Operation::Resize { slot_hint, size } => {
                    if live.is_empty() {
                        continue;
                    }
                    let slot = slot_hint as usize % live.len();
                    let (p, old) = live[slot];
                    let size = size as usize;
                    let before = alloc.allocated();
                    let q = unsafe { alloc.allocate(p, old, size) };
                    if size == 0 {
                        prop_assert!(q.is_null());
                        live.swap_remove(slot);
                    } else if size > old && q == p && alloc.allocated() == before {
                        // rejected growth: block and size unchanged
                        prop_assert!(before + (size - old) > limit);
                    } else {
                        prop_assert!(!q.is_null());
                        live[slot] = (q, size);
                    }
                }
                Operation::Free { slot_hint } => {
                    if live.is_empty() {
                        continue;
                    }
                    let slot = slot_hint as usize % live.len();
                    let (p, old) = live.swap_remove(slot);
                    let freed = unsafe { alloc.allocate(p, old, 0) };
                    prop_assert!(freed.is_null());
                }
            }

            let expected: usize = live.iter().map(|&(_, size)| size).sum();
            prop_assert_eq!(alloc.allocated(), expected);
            prop_assert!(alloc.allocated() <= limit);
        }

        for (p, size) in live {
            unsafe { alloc.allocate(p, size, 0) };
        }
        prop_assert_eq!(alloc.allocated(), 0);
    }
}
