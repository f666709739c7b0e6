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

//! A "brine" is the structural summary this crate extracts from a pickle:
//! the shape of the object it builds, the highest protocol feature it used,
//! and the globals it referenced. Two brines compare with [`fuzzy_eq`]
//! rather than byte-for-byte equality.

use std::collections::BTreeSet;

use crate::cell::{fuzzy_eq, shape_of, Shape};
use crate::error::{Diagnostics, PickleError};
use crate::vm::ParseResult;

/// The structural fingerprint of a pickle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Brine {
    pub shape: Shape,
    pub max_proto: u8,
    pub globals: BTreeSet<String>,
}

fn collect_globals(shape: &Shape, out: &mut BTreeSet<String>) {
    match shape {
        Shape::Global { module, name } => {
            out.insert(format!("{module}.{name}"));
        }
        Shape::List(items) | Shape::Tuple(items) | Shape::Set(items) | Shape::FrozenSet(items) => {
            for item in items {
                collect_globals(item, out);
            }
        }
        Shape::Dict(pairs) => {
            for (k, v) in pairs {
                collect_globals(k, out);
                collect_globals(v, out);
            }
        }
        Shape::Reduce { callable, args } => {
            collect_globals(callable, out);
            collect_globals(args, out);
        }
        Shape::Literal(_) => {}
    }
}

/// Extracts the brine from a completed, well-formed walk. Callers should
/// only call this once `run()` has produced a `ParseResult` that reached
/// STOP; a `root()` of `None` means there's nothing to summarize. If STOP's
/// operand turns out to be a raw `Mark`/`StackSlice` -- possible only with
/// adversarial bytes -- this records a diagnostic (raising immediately in
/// fail-fast mode, via `?`) and returns `Ok(None)` rather than panicking.
pub fn extract(
    result: &ParseResult,
    diagnostics: &mut Diagnostics,
) -> Result<Option<Brine>, PickleError> {
    let Some(root) = result.root() else {
        return Ok(None);
    };
    let shape = match shape_of(root) {
        Some(shape) => shape,
        std::option::Option::None => {
            diagnostics.record(PickleError::StackInconsistent {
                reason: "STOP's operand is a bare Mark/StackSlice, not a real value".into(),
            })?;
            return Ok(None);
        }
    };
    let mut globals = BTreeSet::new();
    collect_globals(&shape, &mut globals);
    Ok(Some(Brine {
        shape,
        max_proto: result.max_proto,
        globals,
    }))
}

/// Fuzzy equality between two brines: shapes compare kind-for-kind (not
/// value-for-value), `max_proto` and the referenced globals compare exactly.
pub fn brines_match(a: &Brine, b: &Brine) -> bool {
    a.max_proto == b.max_proto && a.globals == b.globals && fuzzy_eq(&a.shape, &b.shape)
}
