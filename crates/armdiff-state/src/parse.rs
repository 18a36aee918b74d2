//! Register dump scraping.
//!
//! Recognized lines (any subset, any order, surrounded by arbitrary text):
//!
//! ```text
//! PC : 0x0000000000400004
//! X0: 0x000000000000000a
//! FLAG_N: 0
//! FLAG_Z: 1
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::state::{CanonicalState, StateKey};

static PC_PATTERN: OnceLock<Regex> = OnceLock::new();
static REG_PATTERN: OnceLock<Regex> = OnceLock::new();
static FLAG_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Extract a [`CanonicalState`] from raw simulator output.
///
/// Never fails. Keys that are missing or malformed are simply absent. When a
/// key is printed more than once the last occurrence decides its value, and a
/// malformed last occurrence (e.g. a hex value wider than 64 bits) leaves the
/// key absent.
#[must_use]
pub fn parse_state(output: &str) -> CanonicalState {
    let mut state = CanonicalState::new();

    let pc_pattern =
        PC_PATTERN.get_or_init(|| Regex::new(r"\bPC\s*:\s*0[xX]([0-9a-fA-F]+)").unwrap());
    if let Some(caps) = pc_pattern.captures_iter(output).last() {
        set_or_clear(&mut state, StateKey::Pc, parse_hex(&caps[1]));
    }

    // Registers are matched in text order so later dumps overwrite earlier ones.
    let reg_pattern =
        REG_PATTERN.get_or_init(|| Regex::new(r"\bX(\d+)\s*:\s*0[xX]([0-9a-fA-F]+)").unwrap());
    for caps in reg_pattern.captures_iter(output) {
        let Some(key) = caps[1].parse::<u8>().ok().and_then(StateKey::x) else {
            continue;
        };
        set_or_clear(&mut state, key, parse_hex(&caps[2]));
    }

    let flag_pattern =
        FLAG_PATTERN.get_or_init(|| Regex::new(r"\bFLAG_([NZ])\s*:\s*(\d)\b").unwrap());
    for caps in flag_pattern.captures_iter(output) {
        let key = if &caps[1] == "N" {
            StateKey::FlagN
        } else {
            StateKey::FlagZ
        };
        set_or_clear(&mut state, key, caps[2].parse::<u64>().ok());
    }

    state
}

fn parse_hex(digits: &str) -> Option<u64> {
    u64::from_str_radix(digits, 16).ok()
}

fn set_or_clear(state: &mut CanonicalState, key: StateKey, value: Option<u64>) {
    match value {
        Some(v) => {
            state.insert(key, v);
        }
        None => {
            state.remove(key);
        }
    }
}
