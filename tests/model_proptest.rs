use std::collections::HashMap as StdHashMap;
use std::hash::BuildHasherDefault;
use std::hash::Hasher;

use proptest::prelude::*;
use vmap::Config;
use vmap::ErasedMap;
use vmap::HashMap;
use vmap::NoSuchKey;
use vmap::TypeDescriptor;

#[derive(Debug, Clone)]
enum Op {
    Insert(u16, u32),
    Erase(u16),
    Remove(u16),
    Get(u16),
    Resize(u32),
    ShrinkToFit,
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (any::<u16>(), any::<u32>()).prop_map(|(k, v)| Op::Insert(k, v)),
        3 => any::<u16>().prop_map(Op::Erase),
        1 => any::<u16>().prop_map(Op::Remove),
        3 => any::<u16>().prop_map(Op::Get),
        1 => (0u32..12).prop_map(Op::Resize),
        1 => Just(Op::ShrinkToFit),
        1 => Just(Op::Clear),
    ]
}

/// Keeps only the low bits of the key as its hash, so small key spaces
/// collide heavily.
#[derive(Default)]
struct LowBitsHasher(u64);

impl Hasher for LowBitsHasher {
    fn finish(&self) -> u64 {
        (self.0 & 0x3F) << 2
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = (self.0 << 8) | b as u64;
        }
    }
}

fn key_hash(key: &[u8]) -> u64 {
    (u16::from_ne_bytes([key[0], key[1]]) as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

static DESCRIPTOR: TypeDescriptor = TypeDescriptor::new(2, 4).with_hash(key_hash);

fn assert_load(len: usize, tombstones: usize, capacity: usize) -> Result<(), TestCaseError> {
    prop_assert!(capacity.is_power_of_two());
    prop_assert!(len + tombstones <= capacity);
    Ok(())
}

proptest! {
    #[test]
    fn typed_map_matches_model(ops in proptest::collection::vec(op(), 1..400)) {
        let mut map: HashMap<u16, u32> = HashMap::new();
        let mut model = StdHashMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    prop_assert_eq!(map.insert(k, v), Ok(model.insert(k, v)));
                    prop_assert!((map.len() + map.tombstones()) as f64 <= 0.7 * map.capacity() as f64);
                }
                Op::Erase(k) => {
                    let expected = model.remove(&k).map(|_| ()).ok_or(NoSuchKey);
                    prop_assert_eq!(map.erase(&k), expected);
                }
                Op::Remove(k) => prop_assert_eq!(map.remove(&k), model.remove(&k)),
                Op::Get(k) => prop_assert_eq!(map.get(&k), model.get(&k)),
                Op::Resize(power) => {
                    map.resize(power).unwrap();
                    prop_assert_eq!(map.tombstones(), 0);
                    prop_assert!(map.power() >= power.max(5));
                }
                Op::ShrinkToFit => map.shrink_to_fit().unwrap(),
                Op::Clear => {
                    map.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(map.len(), model.len());
            assert_load(map.len(), map.tombstones(), map.capacity())?;
        }

        for (k, v) in &model {
            prop_assert_eq!(map.get(k), Some(v));
        }
        let mut seen: Vec<_> = map.iter().map(|(&k, &v)| (k, v)).collect();
        let mut expected: Vec<_> = model.into_iter().collect();
        seen.sort_unstable();
        expected.sort_unstable();
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn colliding_map_matches_model(ops in proptest::collection::vec(op(), 1..300)) {
        let config = Config::new().with_initial_power(3);
        let mut map: HashMap<u16, u32, BuildHasherDefault<LowBitsHasher>> = HashMap::with_config(config);
        let mut model = StdHashMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => prop_assert_eq!(map.insert(k % 256, v), Ok(model.insert(k % 256, v))),
                Op::Erase(k) | Op::Remove(k) => prop_assert_eq!(map.remove(&(k % 256)), model.remove(&(k % 256))),
                Op::Get(k) => prop_assert_eq!(map.get(&(k % 256)), model.get(&(k % 256))),
                Op::Resize(power) => map.resize(power).unwrap(),
                Op::ShrinkToFit => map.shrink_to_fit().unwrap(),
                Op::Clear => {
                    map.clear();
                    model.clear();
                }
            }
            prop_assert_eq!(map.len(), model.len());
            prop_assert!(map.power() >= 3);
        }

        let copy = map.clone();
        for (k, v) in &model {
            prop_assert_eq!(copy.get(k), Some(v));
        }
    }

    #[test]
    fn erased_map_matches_model(ops in proptest::collection::vec(op(), 1..400)) {
        let mut map = ErasedMap::new(&DESCRIPTOR).unwrap();
        let mut model = StdHashMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    map.insert(&k.to_ne_bytes(), &v.to_ne_bytes()).unwrap();
                    model.insert(k, v);
                }
                Op::Erase(k) | Op::Remove(k) => {
                    let expected = model.remove(&k).map(|_| ()).ok_or(NoSuchKey);
                    prop_assert_eq!(map.erase(&k.to_ne_bytes()), expected);
                }
                Op::Get(k) => {
                    let expected = model.get(&k).map(|v| v.to_ne_bytes());
                    prop_assert_eq!(map.find(&k.to_ne_bytes()), expected.as_ref().map(|v| &v[..]));
                }
                Op::Resize(power) => map.resize(power).unwrap(),
                Op::ShrinkToFit => map.shrink_to_fit().unwrap(),
                Op::Clear => {
                    map.clear();
                    model.clear();
                }
            }

            prop_assert_eq!(map.len(), model.len());
            assert_load(map.len(), map.tombstones(), map.capacity())?;
        }

        prop_assert_eq!(map.iter().count(), model.len());
        for (key, value) in &map {
            let k = u16::from_ne_bytes([key[0], key[1]]);
            prop_assert_eq!(model.get(&k).map(|v| v.to_ne_bytes()), Some([value[0], value[1], value[2], value[3]]));
        }
    }
}
