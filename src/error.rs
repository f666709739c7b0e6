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

//! The diagnostic taxonomy produced while parsing or critiquing a pickle,
//! and the sink that either raises on the first one or accumulates them.

use thiserror::Error;

use crate::cell::Cell;

/// Everything that can go wrong while symbolically walking a pickle, or
/// that a critiquer can flag once the walk completes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PickleError {
    #[error("stack underflow at depth {stackdepth}: opcode needs {numtopop} item(s)")]
    StackUnderflow { stackdepth: usize, numtopop: usize },

    #[error("stack left in an inconsistent state: {reason}")]
    StackInconsistent { reason: String },

    #[error("memo error at index {memoidx}: {reason}")]
    MemoError { memoidx: usize, reason: String },

    #[error("dict build has a key with no matching value ({} item(s) since the mark)", kvlist.len())]
    MissingDictValue { kvlist: Vec<Cell> },

    #[error("{} byte(s) left unconsumed after STOP (pickle is {pickle_length} byte(s) long)", tail.len())]
    PickleTail { pickle_length: usize, tail: Vec<u8> },

    #[error("pickle does not end with a STOP opcode")]
    LastOpNotStop,

    #[error("{count} extraneous item(s) left on the stack after STOP")]
    SuperfluousStackItems { count: usize },
}

/// Accumulates or immediately raises diagnostics depending on `fail_fast`.
///
/// Matches the "single diagnostic sink" design: every part of the VM and
/// every critiquer reports through the same `record` call, and the
/// fail-fast/accumulate decision is made in exactly one place.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub fail_fast: bool,
    issues: Vec<PickleError>,
}

impl Diagnostics {
    pub fn new(fail_fast: bool) -> Self {
        Diagnostics {
            fail_fast,
            issues: Vec::new(),
        }
    }

    /// Records a diagnostic. In fail-fast mode this returns immediately with
    /// the error; in accumulate mode it always returns `Ok(())` and the
    /// error is appended to `issues()`.
    pub fn record(&mut self, err: PickleError) -> Result<(), PickleError> {
        if self.fail_fast {
            return Err(err);
        }
        self.issues.push(err);
        Ok(())
    }

    pub fn issues(&self) -> &[PickleError] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<PickleError> {
        self.issues
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// The outcome of a `critique()` call in accumulate mode: every diagnostic
/// raised while walking and while running the critiquer registry, in the
/// order they were recorded.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CritiqueReport {
    pub issues: Vec<String>,
}

impl CritiqueReport {
    pub fn from_diagnostics(diagnostics: Diagnostics) -> Self {
        CritiqueReport {
            issues: diagnostics
                .into_issues()
                .into_iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}
