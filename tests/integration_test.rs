// SPDX-License-Identifier: Apache-2.0
//
// Copyright 2025 Cisco Systems, Inc. and its affiliates
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Black-box end-to-end scenarios: hand-built pickle byte streams covering
//! a well-formed pickle of every protocol, and the structural pathologies
//! `critique()` is meant to catch.

use picklebrine::{brines_match, critique, sample, PickleError};

fn proto0_int(pickle: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(pickle.as_bytes());
    bytes
}

#[test]
fn protocol_0_int_is_tagged_int_or_bool() {
    // "I1\n." -- protocol 0, bare INT, STOP.
    let bytes = proto0_int("I1\n.");
    let brine = sample(&bytes).unwrap();
    assert_eq!(brine.max_proto, 0);
}

#[test]
fn every_protocol_version_parses_a_trivial_none_pickle() {
    for proto in 0..=5u8 {
        let mut bytes = vec![0x80, proto, 0x4e, 0x2e]; // PROTO n, NONE, STOP
        if proto == 0 {
            // protocol 0 never emits a PROTO opcode
            bytes = vec![0x4e, 0x2e];
        }
        let report = critique(&bytes, None, false).unwrap();
        assert!(report.is_clean(), "protocol {proto}: {:?}", report.issues);
    }
}

#[test]
fn nested_list_of_strings_round_trips_cleanly() {
    // PROTO 2, MARK, SHORT_BINUNICODE 'a', SHORT_BINUNICODE 'b', LIST, STOP
    let mut bytes = vec![0x80, 0x02, 0x28];
    bytes.push(0x8c);
    bytes.push(1);
    bytes.push(b'a');
    bytes.push(0x8c);
    bytes.push(1);
    bytes.push(b'b');
    bytes.push(0x6c); // LIST
    bytes.push(0x2e);
    let brine = sample(&bytes).unwrap();
    match brine.shape {
        picklebrine::Shape::List(items) => assert_eq!(items.len(), 2),
        other => panic!("expected a list shape, got {other:?}"),
    }
}

#[test]
fn memo_cycle_through_get_and_put_is_not_infinitely_recursed() {
    // PROTO 2, EMPTY_LIST, MEMOIZE, BINGET 0, APPEND, STOP
    // (a list that appends a reference to itself, taken straight from the
    // kind of pickle that makes a naive unpickler spin forever)
    let bytes = vec![0x80, 0x02, 0x5d, 0x94, 0x68, 0, 0x61, 0x2e];
    let report = critique(&bytes, None, false).unwrap();
    assert!(report.is_clean());
}

#[test]
fn trailing_garbage_after_stop_is_flagged() {
    let bytes = vec![0x80, 0x02, 0x4e, 0x2e, 0x00, 0x00];
    let report = critique(&bytes, None, false).unwrap();
    assert!(!report.is_clean());
    assert!(report.issues.iter().any(|i| i.contains("unconsumed")));
}

#[test]
fn stack_underflow_is_a_hard_error_in_fail_fast_mode() {
    let bytes = vec![0x80, 0x02, 0x73, 0x2e]; // SETITEM with nothing on the stack
    let err = critique(&bytes, None, true).unwrap_err();
    assert!(matches!(err, PickleError::StackUnderflow { .. }));
}

#[test]
fn stack_underflow_is_collected_not_raised_in_accumulate_mode() {
    let bytes = vec![0x80, 0x02, 0x73, 0x2e];
    let report = critique(&bytes, None, false).unwrap();
    assert!(!report.is_clean());
}

#[test]
fn reduce_builds_a_callable_plus_args_shape() {
    // PROTO 2, GLOBAL "builtins str", EMPTY_TUPLE, REDUCE, STOP
    let mut bytes = vec![0x80, 0x02, 0x63];
    bytes.extend_from_slice(b"builtins\n");
    bytes.extend_from_slice(b"str\n");
    bytes.push(0x29); // EMPTY_TUPLE
    bytes.push(0x52); // REDUCE
    bytes.push(0x2e);
    let brine = sample(&bytes).unwrap();
    assert!(brine.globals.contains("builtins.str"));
    assert!(matches!(brine.shape, picklebrine::Shape::Reduce { .. }));
}

#[test]
fn two_pickles_differing_only_in_literal_values_have_matching_brines() {
    let a = sample(&[0x80, 0x02, 0x4b, 1, 0x2e]).unwrap();
    let b = sample(&[0x80, 0x02, 0x4b, 250, 0x2e]).unwrap();
    assert!(brines_match(&a, &b));
}

#[test]
fn reference_mismatch_is_reported_when_critiquing_against_a_brine() {
    let reference = sample(&[0x80, 0x02, 0x5d, 0x2e]).unwrap(); // empty list
    let candidate = vec![0x80, 0x02, 0x4e, 0x2e]; // None
    let report = critique(&candidate, Some(&reference), false).unwrap();
    assert!(!report.is_clean());
}

#[test]
fn pickle_missing_a_trailing_stop_is_flagged() {
    let bytes = vec![0x80, 0x02, 0x4e]; // PROTO 2, NONE, (no STOP)
    let report = critique(&bytes, None, false).unwrap();
    assert!(!report.is_clean());
    assert!(report
        .issues
        .iter()
        .any(|i| i.contains("does not end with a STOP")));
}
