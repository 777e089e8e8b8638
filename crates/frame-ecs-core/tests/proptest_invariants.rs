//! Property tests generating random per-frame operation sequences and
//! checking the universal invariants hold after every frame.

use frame_ecs_core::prelude::*;
use proptest::prelude::*;

const HEALTH: ComponentTypeId = ComponentTypeId(40);

fn registry() -> ComponentTypeRegistry {
    let mut reg = ComponentTypeRegistry::new(64);
    reg.register(HEALTH, "health", 4, TypeOptions::default());
    reg.lock();
    reg
}

/// Copies `Health` forward untouched and keeps every entity alive; used so
/// property tests can focus purely on spawn-cap and counts/offsets
/// invariants without entities dying out from under them.
struct KeepAlive;
impl Process for KeepAlive {
    fn signatures(&self) -> &[Signature] {
        Box::leak(Box::new(vec![Signature {
            required: vec![HEALTH],
            needs_context: false,
            future_type: Some(HEALTH),
            max_future_writes: 1,
            run: Box::new(|args: ProcessArgs<'_>| {
                let bytes = args.cursor.past_components(args.past, HEALTH);
                args.future_slice[..4].copy_from_slice(bytes);
                1
            }),
        }]))
    }
}

#[derive(Debug, Clone)]
enum FrameOp {
    Spawn(i32),
    Tick,
}

fn op_strategy() -> impl Strategy<Value = FrameOp> {
    prop_oneof![(-1_000i32..1_000).prop_map(FrameOp::Spawn), Just(FrameOp::Tick),]
}

fn check_invariants(manager: &EntityManager) {
    let past = manager.past();
    let entities = past.entities();
    // past.entities is sorted by ID.
    for pair in entities.windows(2) {
        assert!(pair[0] < pair[1], "past.entities must stay sorted by ID");
    }
    // committed components for HEALTH equal the sum of per-entity counts.
    let storage = past.storage(HEALTH).unwrap();
    let sum: u32 = (0..past.len()).map(|row| storage.count(row)).sum();
    assert_eq!(sum as usize, storage.buffer().committed_components());
    // offsets are either the sentinel (count 0) or within the committed
    // region.
    for row in 0..past.len() {
        let count = storage.count(row);
        let offset = storage.offset(row);
        if count == 0 {
            assert_eq!(offset, frame_ecs_core::game_state::OFFSET_SENTINEL);
        } else {
            assert!((offset as usize + count as usize) <= storage.buffer().committed_components());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn random_spawn_and_tick_sequences_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut manager = EntityManager::new(registry(), Some(2)).with_max_new_entities_per_frame(1_000);
        manager.register_process("keep_alive", Box::new(KeepAlive));
        manager.start_threads();

        for op in ops {
            match op {
                FrameOp::Spawn(health) => {
                    let proto = EntityPrototype::new().with_component(HEALTH, health.to_ne_bytes().to_vec());
                    let _ = manager.add_entity(proto);
                }
                FrameOp::Tick => {
                    manager.execute_frame();
                    check_invariants(&manager);
                }
            }
        }
        manager.destroy(false);
    }
}

#[test]
fn registering_a_process_after_first_frame_panics() {
    let mut manager = EntityManager::new(registry(), Some(1));
    manager.register_process("keep_alive", Box::new(KeepAlive));
    manager.start_threads();
    manager.execute_frame();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        manager.register_process("late", Box::new(KeepAlive));
    }));
    assert!(result.is_err(), "registering a process after frame 0 must panic");
    manager.destroy(false);
}

#[test]
fn swap_twice_is_identity_with_no_new_entities_or_deaths() {
    let mut manager = EntityManager::new(registry(), Some(1));
    manager.register_process("keep_alive", Box::new(KeepAlive));
    manager.start_threads();

    let proto = EntityPrototype::new().with_component(HEALTH, 5i32.to_ne_bytes().to_vec());
    let id = manager.add_entity(proto).unwrap();
    manager.execute_frame();
    manager.execute_frame();
    let first_row = manager.past().find_row(id).unwrap();
    let first_bytes = manager.past().storage(HEALTH).unwrap().slice(first_row).to_vec();

    manager.execute_frame();
    let second_row = manager.past().find_row(id).unwrap();
    let second_bytes = manager.past().storage(HEALTH).unwrap().slice(second_row).to_vec();

    assert_eq!(first_bytes, second_bytes, "an idle tick must round-trip component data unchanged");
    manager.destroy(false);
}
