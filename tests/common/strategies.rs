use deployer_core::state_machine::ScaleState;
use proptest::prelude::*;

/// Node type names: no property or multiplicity separators, never reserved
pub fn node_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,15}".prop_filter("reserved namespace", |name| {
        name != "ss" && name != "machine" && !name.starts_with("orchestrator")
    })
}

pub fn instance_index_strategy() -> impl Strategy<Value = u32> {
    1u32..500
}

/// Instance-level property names
pub fn property_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.]{0,23}".prop_filter("node level property", |property| {
        property != "multiplicity" && property != "ids"
    })
}

pub fn scale_state_strategy() -> impl Strategy<Value = ScaleState> {
    prop::sample::select(ScaleState::ALL.to_vec())
}

/// States of an instance mid-operation
pub fn in_flight_state_strategy() -> impl Strategy<Value = ScaleState> {
    prop::sample::select(
        ScaleState::ALL
            .iter()
            .copied()
            .filter(|state| !state.is_terminal())
            .collect::<Vec<_>>(),
    )
}

pub fn terminal_state_strategy() -> impl Strategy<Value = ScaleState> {
    prop::sample::select(vec![ScaleState::Operational, ScaleState::Gone])
}

/// Instance names as they may arrive from outside, separators included
pub fn raw_instance_name_strategy() -> impl Strategy<Value = String> {
    "[a-z:.0-9-]{0,12}"
}
