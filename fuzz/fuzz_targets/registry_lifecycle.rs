#![no_main]

use std::collections::HashMap;

use libfuzzer_sys::fuzz_target;
use tether_core::error::{RegistryError, SlotError};
use tether_core::key::{CorrelationKey, RequestCode};
use tether_core::registry::Registry;
use tether_core::slot::{ResponseSlot, SlotState};

struct Tracked {
    slot: ResponseSlot<u32>,
    sent: Option<u32>,
}

fn key_for(tag: u8, code: u8) -> CorrelationKey {
    let code = RequestCode::new(u16::from(code % 16));
    if tag & 1 == 0 {
        CorrelationKey::activity(code)
    } else {
        CorrelationKey::permission(code)
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 65_536 {
        return;
    }

    let registry = Registry::new();
    let mut live: HashMap<CorrelationKey, Tracked> = HashMap::new();
    let mut destroyed = false;

    for chunk in data.chunks_exact(3) {
        let key = key_for(chunk[1], chunk[2]);
        match chunk[0] % 6 {
            // register
            0 => match registry.register(key, ResponseSlot::new()) {
                Ok(slot) => {
                    assert!(!destroyed);
                    assert!(live.insert(key, Tracked { slot, sent: None }).is_none());
                }
                Err(RegistryError::DuplicateKey { key: dup }) => {
                    assert_eq!(dup, key);
                    assert!(live.contains_key(&key));
                }
                Err(RegistryError::Destroyed) => assert!(destroyed),
                Err(other) => panic!("unexpected register error: {other}"),
            },
            // cycle end: close then unregister
            1 => {
                let tracked = live.remove(&key);
                if let Some(tracked) = &tracked {
                    tracked.slot.close();
                }
                assert_eq!(registry.unregister(&key), tracked.is_some());
            }
            // callback delivery
            2 => match registry.find::<u32>(&key) {
                Some(found) => {
                    let tracked = live.get_mut(&key).expect("registry entry without model");
                    assert!(found.same_slot(&tracked.slot));
                    let value = (u32::from(chunk[1]) << 8) | u32::from(chunk[2]);
                    match found.state() {
                        SlotState::Open => {
                            assert!(found.send(value).is_ok());
                            tracked.sent = Some(value);
                        }
                        state => {
                            assert_eq!(found.send(value), Err(SlotError::InvalidState { state }));
                        }
                    }
                }
                None => assert!(!live.contains_key(&key)),
            },
            // requester receive, only once the slot is settled
            3 => {
                if let Some(tracked) = live.get(&key) {
                    let state = tracked.slot.state();
                    if state != SlotState::Open {
                        let received = tracked.slot.receive_blocking();
                        match state {
                            SlotState::Fulfilled => {
                                assert_eq!(received.ok(), tracked.sent);
                                assert_eq!(tracked.slot.state(), SlotState::Consumed);
                            }
                            SlotState::Closed => assert_eq!(received, Err(SlotError::Closed)),
                            SlotState::Consumed => assert_eq!(
                                received,
                                Err(SlotError::InvalidState {
                                    state: SlotState::Consumed
                                })
                            ),
                            SlotState::Open => unreachable!(),
                        }
                    }
                }
            }
            // requester abandons without unregistering
            4 => {
                if let Some(tracked) = live.get(&key) {
                    tracked.slot.close();
                    assert_eq!(registry.slot_state(&key), Some(SlotState::Closed));
                }
            }
            // session destroyed
            _ => {
                assert_eq!(registry.close(), live.len());
                for (_, tracked) in live.drain() {
                    assert!(tracked.slot.is_closed());
                }
                destroyed = true;
            }
        }
        assert_eq!(registry.len(), live.len());
    }
});
