use slab_logger::sparse_array::{SparseArray, MIN_CHUNK_SIZE};
use slab_logger::SparseId;
use std::collections::HashSet;

#[test]
fn test_slots_do_not_move_on_growth() {
    let mut array = SparseArray::new();
    let (first, value) = array.add(7u64);
    let addr = value as *const u64;

    let ids: Vec<SparseId> = (0..1000u64).map(|i| array.emplace(i)).collect();
    assert!(array.chunk_count() > 5);
    assert_eq!(array.find(first).map(|v| v as *const u64), Some(addr));
    assert_eq!(array[first], 7);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(array[*id], i as u64);
    }
}

#[test]
fn test_slots_do_not_move_on_reserve() {
    let mut array = SparseArray::new();
    let ids: Vec<SparseId> = (0..5u32).map(|i| array.emplace(i)).collect();
    let addrs: Vec<*const u32> = ids.iter().map(|id| &array[*id] as *const u32).collect();
    let chunks = array.chunk_count();

    array.reserve(1 << 12);
    assert!(array.chunk_count() > chunks);
    assert!(array.capacity() >= 1 << 12);
    for (id, addr) in ids.iter().zip(&addrs) {
        assert_eq!(&array[*id] as *const u32, *addr);
    }
    assert_eq!(array.high_water(), 5);
}

#[test]
fn test_removal_does_not_move_neighbours() {
    let mut array = SparseArray::new();
    let ids: Vec<SparseId> = (0..64).map(|i| array.emplace(i)).collect();
    let addrs: Vec<*const i32> = ids.iter().map(|id| &array[*id] as *const i32).collect();

    for id in ids.iter().step_by(3) {
        assert!(array.remove(*id).is_some());
    }
    for (i, id) in ids.iter().enumerate() {
        if i % 3 == 0 {
            assert!(!array.contains(*id));
        } else {
            assert_eq!(&array[*id] as *const i32, addrs[i]);
        }
    }
    assert_eq!(array.len(), 64 - 22);
}

#[test]
fn test_reused_slot_gets_new_identity() {
    let mut array = SparseArray::new();
    let a = array.emplace("a");
    array.emplace("b");
    array.remove(a);
    let c = array.emplace("c");

    assert_eq!(c.index(), a.index());
    assert_ne!(c.generation(), a.generation());
    assert_ne!(c, a);
    assert_eq!(array.find(a), None);
    assert_eq!(array.find(c), Some(&"c"));
    assert_eq!(array.remove(a), None);
}

#[test]
fn test_ids_stay_unique_under_churn() {
    let mut array = SparseArray::new();
    let mut live = Vec::new();
    let mut seen = HashSet::new();

    for round in 0..200usize {
        let id = array.emplace(round);
        assert!(seen.insert(id), "id {id} handed out twice");
        live.push(id);
        if round % 3 == 2 {
            let victim = live.remove(round % live.len());
            assert!(array.remove(victim).is_some());
        }
    }

    assert_eq!(array.len(), live.len());
    assert!(array.len() <= array.high_water());
    assert!(array.high_water() <= array.capacity());
    for id in live {
        assert!(array.contains(id));
    }
}

#[test]
fn test_reserve_and_with_capacity() {
    let mut array: SparseArray<u8> = SparseArray::with_capacity(5);
    assert_eq!(array.capacity(), 8);
    assert_eq!(array.high_water(), 0);

    array.reserve(MIN_CHUNK_SIZE);
    assert_eq!(array.chunk_count(), 2);
    array.reserve(33);
    assert_eq!(array.capacity(), 64);
}

#[test]
fn test_id_of_and_retain() {
    let mut array = SparseArray::new();
    let ids: Vec<SparseId> = (0..10).map(|i| array.emplace(i * 10)).collect();

    let value = array.find(ids[4]).unwrap();
    assert_eq!(array.id_of(value), Some(ids[4]));
    let outside = 40;
    assert_eq!(array.id_of(&outside), None);

    array.retain(|_, v| *v % 20 == 0);
    assert_eq!(array.len(), 5);
    let kept: Vec<i32> = array.iter().map(|(_, v)| *v).collect();
    assert_eq!(kept, vec![0, 20, 40, 60, 80]);

    for (_, v) in array.iter_mut() {
        *v += 1;
    }
    assert_eq!(array[ids[2]], 21);
}

#[test]
fn test_clear_keeps_chunks() {
    let mut array = SparseArray::new();
    let ids: Vec<SparseId> = (0..20).map(|i| array.emplace(i)).collect();
    let chunks = array.chunk_count();

    array.clear();
    assert!(array.is_empty());
    assert_eq!(array.chunk_count(), chunks);
    assert!(ids.iter().all(|id| !array.contains(*id)));

    let fresh = array.emplace(99);
    assert_eq!(fresh.index(), 0);
    assert_ne!(fresh, ids[0]);
}
