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

//! Static analysis of Python pickle byte streams, without ever executing
//! the objects they describe.
//!
//! `picklebrine` walks a pickle's opcodes symbolically to recover a
//! structural summary (a "brine": shape, highest protocol feature used, and
//! the globals referenced) and a verdict ("critique") listing anything
//! structurally off about it -- trailing bytes after STOP, leftover stack
//! items, malformed dict builds, and so on.
//!
//! # Examples
//!
//! ```no_run
//! use picklebrine::{critique, sample};
//!
//! let bytes = std::fs::read("sample.pkl").unwrap();
//! let report = critique(&bytes, None, false).unwrap();
//! if !report.is_clean() {
//!     for issue in &report.issues {
//!         eprintln!("{issue}");
//!     }
//! }
//!
//! let brine = sample(&bytes).unwrap();
//! println!("max protocol feature used: {}", brine.max_proto);
//! ```

mod brine;
mod cell;
pub mod cli;
mod critique;
mod error;
mod opcodes;
mod token;
mod vm;

pub use brine::{brines_match, Brine};
pub use cell::{Cell, Kind, Shape};
pub use cli::{Cli, Command};
pub use error::{CritiqueReport, Diagnostics, PickleError};
pub use opcodes::OpcodeKind;

/// Runs the full critique pipeline: walk the pickle, run every critiquer,
/// and (if `reference` is given) compare its brine against one already
/// known to be good.
///
/// `fail_fast = true` returns the first diagnostic found as `Err`.
/// `fail_fast = false` always returns `Ok`, with every diagnostic collected
/// into the report.
pub fn critique(
    bytes: &[u8],
    reference: Option<&Brine>,
    fail_fast: bool,
) -> Result<CritiqueReport, PickleError> {
    critique::critique(bytes, reference, fail_fast)
}

/// Walks the pickle and extracts its brine. Always fail-fast: a brine is
/// only meaningful for a structurally sound pickle.
pub fn sample(bytes: &[u8]) -> Result<Brine, PickleError> {
    let mut diagnostics = Diagnostics::new(true);
    let result = vm::run(bytes, &mut diagnostics)?;
    brine::extract(&result, &mut diagnostics)?.ok_or(PickleError::LastOpNotStop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_recovers_brine_of_a_simple_pickle() {
        let bytes = [0x80, 0x02, 0x5d, 0x2e]; // PROTO 2, EMPTY_LIST, STOP
        let brine = sample(&bytes).unwrap();
        assert_eq!(brine.max_proto, 2);
    }

    #[test]
    fn critique_reports_clean_for_well_formed_pickle() {
        let bytes = [0x80, 0x02, 0x5d, 0x2e];
        let report = critique(&bytes, None, false).unwrap();
        assert!(report.is_clean());
    }
}
