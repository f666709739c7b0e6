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

//! Stateless predicates ("critiquers") run over a completed `ParseResult`,
//! plus the `critique()` facade that runs the VM and the critiquer registry
//! through a single diagnostic sink.

use tracing::warn;

use crate::brine::{self, brines_match, Brine};
use crate::error::{CritiqueReport, Diagnostics, PickleError};
use crate::opcodes::OpcodeKind;
use crate::vm::{self, ParseResult};

/// A single, stateless check over a finished walk. Every critiquer must be
/// idempotent: running it twice over the same `ParseResult` records the same
/// diagnostics both times.
pub trait Critiquer {
    fn name(&self) -> &'static str;
    fn run(&self, result: &ParseResult, diagnostics: &mut Diagnostics) -> Result<(), PickleError>;
}

/// The pickle's last instruction must be STOP.
pub struct EndsWithStop;

impl Critiquer for EndsWithStop {
    fn name(&self) -> &'static str {
        "ends_with_stop"
    }

    fn run(&self, result: &ParseResult, diagnostics: &mut Diagnostics) -> Result<(), PickleError> {
        match result.entries.last() {
            Some(entry) if entry.op == OpcodeKind::Stop => Ok(()),
            _ => diagnostics.record(PickleError::LastOpNotStop),
        }
    }
}

/// After a well-formed walk, the shadow stack must hold nothing beyond what
/// STOP already consumed -- any leftovers are objects the pickle built and
/// never used, a classic way of smuggling a malicious side effect past a
/// naive reviewer.
pub struct EmptyStackOnExit;

impl Critiquer for EmptyStackOnExit {
    fn name(&self) -> &'static str {
        "empty_stack_on_exit"
    }

    fn run(&self, result: &ParseResult, diagnostics: &mut Diagnostics) -> Result<(), PickleError> {
        if result.stack.is_empty() {
            Ok(())
        } else {
            diagnostics.record(PickleError::SuperfluousStackItems {
                count: result.stack.len(),
            })
        }
    }
}

/// When a reference brine is supplied, the pickle's own brine must
/// fuzzy-match it.
pub struct MatchesReference<'a> {
    pub reference: &'a Brine,
}

impl Critiquer for MatchesReference<'_> {
    fn name(&self) -> &'static str {
        "matches_reference"
    }

    fn run(&self, result: &ParseResult, diagnostics: &mut Diagnostics) -> Result<(), PickleError> {
        let Some(actual) = brine::extract(result, diagnostics)? else {
            return Ok(());
        };
        if brines_match(&actual, self.reference) {
            Ok(())
        } else {
            diagnostics.record(PickleError::StackInconsistent {
                reason: "brine does not match the supplied reference".into(),
            })
        }
    }
}

fn default_registry(result: &ParseResult) -> Vec<Box<dyn Critiquer + '_>> {
    let _ = result;
    vec![Box::new(EndsWithStop), Box::new(EmptyStackOnExit)]
}

/// Walks `bytes` and runs the critiquer registry over the result, plus a
/// reference-brine comparison if one was supplied.
///
/// In fail-fast mode, the first diagnostic recorded anywhere (VM walk or
/// critiquer) is returned immediately as `Err`. In accumulate mode, every
/// diagnostic found along the way is collected into the returned
/// `CritiqueReport`.
pub fn critique(
    bytes: &[u8],
    reference: Option<&Brine>,
    fail_fast: bool,
) -> Result<CritiqueReport, PickleError> {
    let _span = tracing::debug_span!("critique::critique", len = bytes.len()).entered();
    let mut diagnostics = Diagnostics::new(fail_fast);

    let result = match vm::run(bytes, &mut diagnostics) {
        Ok(r) => r,
        Err(e) => return Err(e),
    };

    for critiquer in default_registry(&result) {
        critiquer.run(&result, &mut diagnostics)?;
    }
    if let Some(reference) = reference {
        MatchesReference { reference }.run(&result, &mut diagnostics)?;
    }

    let report = CritiqueReport::from_diagnostics(diagnostics);
    if !report.is_clean() {
        warn!(issues = report.issues.len(), "critique found issues");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;

    fn run_ok(bytes: &[u8]) -> ParseResult {
        let mut diagnostics = Diagnostics::new(true);
        vm::run(bytes, &mut diagnostics).unwrap()
    }

    #[test]
    fn ends_with_stop_passes_on_well_formed_pickle() {
        let result = run_ok(&[0x80, 0x02, 0x4e, 0x2e]);
        let mut diagnostics = Diagnostics::new(true);
        assert!(EndsWithStop.run(&result, &mut diagnostics).is_ok());
    }

    #[test]
    fn critiquers_are_idempotent() {
        let result = run_ok(&[0x80, 0x02, 0x4e, 0x2e]);
        let mut first = Diagnostics::new(false);
        let mut second = Diagnostics::new(false);
        EmptyStackOnExit.run(&result, &mut first).unwrap();
        EmptyStackOnExit.run(&result, &mut second).unwrap();
        assert_eq!(first.issues(), second.issues());
    }

    #[test]
    fn just_a_string_is_clean() {
        let mut bytes = vec![0x80, 0x02, 0x8c, 2];
        bytes.extend_from_slice(b"hi");
        bytes.push(0x2e);
        let report = critique(&bytes, None, false).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn stack_underflow_propagates_in_fail_fast_mode() {
        let bytes = [0x80, 0x02, 0x61, 0x2e]; // APPEND with nothing on the stack
        let err = critique(&bytes, None, true).unwrap_err();
        assert!(matches!(err, PickleError::StackUnderflow { .. }));
    }
}
