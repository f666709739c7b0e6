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

//! The symbolic value domain the VM pushes, pops, and memoizes, and the
//! `Shape` projection used for structural ("brine") comparison.
//!
//! `Cell` never holds a live Python object -- only the shape and kind the
//! pickle bytestream claims it has. Containers and globals are `Rc`-shared
//! rather than deep-cloned, so that memoizing a cell and later reading it
//! back through GET yields the same identity.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The coarse type tag every `Cell` carries. Kept separate from `Cell`
/// itself so critiquers and the brine extractor can reason about "what kind
/// of thing is this" without matching out the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Kind {
    None,
    Int,
    /// Protocol 0's INT opcode: ambiguous between a Python int and a bool.
    IntOrBool,
    Bool,
    Long,
    Float,
    Unicode,
    Bytes,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Global,
    Reduce,
    Mark,
    StackSlice,
    /// PERSID/BINPERSID and EXT1/2/4 targets: opaque, never resolved.
    Opaque,
}

/// The scalar payload of a `Literal` cell. Carried for diagnostics and CLI
/// display; brine comparison deliberately ignores it (two literals of the
/// same `Kind` are fuzzy-equal regardless of value).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum LiteralValue {
    None,
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::None => write!(f, "None"),
            LiteralValue::Int(v) => write!(f, "{v}"),
            LiteralValue::UInt(v) => write!(f, "{v}"),
            LiteralValue::Float(v) => write!(f, "{v}"),
            LiteralValue::Str(v) => write!(f, "{v:?}"),
            LiteralValue::Bytes(v) => write!(f, "{v:?}"),
        }
    }
}

/// An interned `(module, name)` pair behind a GLOBAL/STACK_GLOBAL/INST
/// opcode. Interning (rather than allocating a fresh string pair per
/// reference) means two references to the same global compare equal by
/// pointer, not just by value.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct GlobalData {
    pub module: String,
    pub name: String,
}

pub type GlobalRef = Rc<GlobalData>;

/// Interns `(module, name)` pairs so repeated references to the same global
/// share one allocation, the way `_make_global` caches by `(module, name)`.
#[derive(Debug, Default)]
pub struct GlobalArena {
    interned: RefCell<Vec<GlobalRef>>,
}

impl GlobalArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, module: String, name: String) -> GlobalRef {
        let mut interned = self.interned.borrow_mut();
        if let Some(existing) = interned
            .iter()
            .find(|g| g.module == module && g.name == name)
        {
            return Rc::clone(existing);
        }
        let fresh = Rc::new(GlobalData { module, name });
        interned.push(Rc::clone(&fresh));
        fresh
    }
}

/// A symbolic value on the VM's shadow stack or in its memo table.
///
/// Containers are `Rc`-shared so that aliasing introduced by memoization
/// (GET returning a previously-PUT cell) is visible identity, not a copy.
/// Mutating opcodes (APPEND, SETITEM, ...) rebuild the container rather than
/// mutating through the `Rc`: see the "mutated-list identity" design note.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Literal(Kind, LiteralValue),
    Mark,
    List(Rc<Vec<Cell>>),
    Tuple(Rc<Vec<Cell>>),
    Dict(Rc<Vec<(Cell, Cell)>>),
    Set(Rc<Vec<Cell>>),
    FrozenSet(Rc<Vec<Cell>>),
    Global(GlobalRef),
    Reduce { callable: Rc<Cell>, args: Rc<Cell> },
    /// The folded contents of a mark-delimited run, as produced by the VM's
    /// mark-folding step. Never observed outside the VM/critique layer.
    StackSlice(Rc<Vec<Cell>>),
}

impl Cell {
    pub fn kind(&self) -> Kind {
        match self {
            Cell::Literal(k, _) => *k,
            Cell::Mark => Kind::Mark,
            Cell::List(_) => Kind::List,
            Cell::Tuple(_) => Kind::Tuple,
            Cell::Dict(_) => Kind::Dict,
            Cell::Set(_) => Kind::Set,
            Cell::FrozenSet(_) => Kind::FrozenSet,
            Cell::Global(_) => Kind::Global,
            Cell::Reduce { .. } => Kind::Reduce,
            Cell::StackSlice(_) => Kind::StackSlice,
        }
    }

    pub fn none() -> Self {
        Cell::Literal(Kind::None, LiteralValue::None)
    }
}

/// The structural, value-erased projection of a `Cell` used for brine
/// comparison. Two `Shape`s compare equal under [`fuzzy_eq`] when they have
/// matching kind and matching structure, without regard to literal values.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Shape {
    Literal(Kind),
    List(Vec<Shape>),
    Tuple(Vec<Shape>),
    Dict(Vec<(Shape, Shape)>),
    Set(Vec<Shape>),
    FrozenSet(Vec<Shape>),
    Global { module: String, name: String },
    Reduce { callable: Box<Shape>, args: Box<Shape> },
}

/// Projects a `Cell` down to its `Shape`, dropping literal values and `Rc`
/// identity. `Mark`/`StackSlice` cells have no `Shape` representation -- a
/// well-formed pickle never leaves one as STOP's operand, but adversarial
/// bytes can (e.g. a bare `MARK, STOP`), so this returns `None` rather than
/// panicking when one turns up.
pub fn shape_of(cell: &Cell) -> Option<Shape> {
    Some(match cell {
        Cell::Literal(k, _) => Shape::Literal(*k),
        Cell::Mark | Cell::StackSlice(_) => return None,
        Cell::List(items) => Shape::List(
            items.iter().map(shape_of).collect::<Option<Vec<_>>>()?,
        ),
        Cell::Tuple(items) => Shape::Tuple(
            items.iter().map(shape_of).collect::<Option<Vec<_>>>()?,
        ),
        Cell::Dict(pairs) => Shape::Dict(
            pairs
                .iter()
                .map(|(k, v)| Some((shape_of(k)?, shape_of(v)?)))
                .collect::<Option<Vec<_>>>()?,
        ),
        Cell::Set(items) => Shape::Set(
            items.iter().map(shape_of).collect::<Option<Vec<_>>>()?,
        ),
        Cell::FrozenSet(items) => Shape::FrozenSet(
            items.iter().map(shape_of).collect::<Option<Vec<_>>>()?,
        ),
        Cell::Global(g) => Shape::Global {
            module: g.module.clone(),
            name: g.name.clone(),
        },
        Cell::Reduce { callable, args } => Shape::Reduce {
            callable: Box::new(shape_of(callable)?),
            args: Box::new(shape_of(args)?),
        },
    })
}

/// Structural equality that treats any two literals of the same `Kind` as
/// equal (ignoring their value) but otherwise requires matching shape.
/// `Shape`'s derived `PartialEq` is exact-value; this is the fuzzy variant
/// brine comparison actually uses.
pub fn fuzzy_eq(a: &Shape, b: &Shape) -> bool {
    match (a, b) {
        (Shape::Literal(ka), Shape::Literal(kb)) => ka == kb,
        (Shape::List(xs), Shape::List(ys)) | (Shape::Tuple(xs), Shape::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| fuzzy_eq(x, y))
        }
        (Shape::Set(xs), Shape::Set(ys)) | (Shape::FrozenSet(xs), Shape::FrozenSet(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| fuzzy_eq(x, y))
        }
        (Shape::Dict(xs), Shape::Dict(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|((ka, va), (kb, vb))| fuzzy_eq(ka, kb) && fuzzy_eq(va, vb))
        }
        (
            Shape::Global {
                module: ma,
                name: na,
            },
            Shape::Global {
                module: mb,
                name: nb,
            },
        ) => ma == mb && na == nb,
        (
            Shape::Reduce {
                callable: ca,
                args: aa,
            },
            Shape::Reduce {
                callable: cb,
                args: ab,
            },
        ) => fuzzy_eq(ca, cb) && fuzzy_eq(aa, ab),
        _ => false,
    }
}
